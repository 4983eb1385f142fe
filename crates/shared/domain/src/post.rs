//! Post domain entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::POST_ENTITY;
use crate::entity::Entity;
use crate::user::User;

/// Post authored by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i32,
    #[serde(default)]
    pub author_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub contents: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub view_count: i32,
    /// Author, present only when the `author` relation was included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Box<User>>,
}

impl Entity for Post {
    const NAME: &'static str = POST_ENTITY;
    type Id = i32;

    fn id(&self) -> i32 {
        self.id
    }
}

/// Post creation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreatePost {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

impl CreatePost {
    pub fn new(title: impl Into<String>, author_id: Option<i32>) -> Self {
        Self {
            title: title.into(),
            contents: None,
            author_id,
            published: None,
        }
    }
}

/// Post update payload; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdatePost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<i32>,
}
