//! User domain entity and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::USER_ENTITY;
use crate::entity::{Entity, SoftDeletable};
use crate::post::Post;

/// User domain entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Soft delete timestamp (None = active, Some = deleted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Authored posts, present only when the `posts` relation was included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<Vec<Post>>,
}

impl User {
    /// Check if user is active (not deleted)
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Name to show, falling back to the email address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

impl Entity for User {
    const NAME: &'static str = USER_ENTITY;
    type Id = i32;

    fn id(&self) -> i32 {
        self.id
    }
}

impl SoftDeletable for User {
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// User creation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateUser {
    /// User email address (unique)
    #[validate(email)]
    pub email: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
}

impl CreateUser {
    pub fn new(email: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            email: email.into(),
            name: name.map(str::to_string),
        }
    }
}

/// User update payload; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_deserializes_without_optional_fields() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 7,
            "email": "a@x.com"
        }))
        .unwrap();

        assert_eq!(user.id(), 7);
        assert_eq!(user.name, None);
        assert!(user.is_active());
        assert_eq!(user.display_name(), "a@x.com");
    }

    #[test]
    fn test_create_user_omits_absent_name() {
        let value = serde_json::to_value(CreateUser::new("a@x.com", None)).unwrap();
        assert_eq!(value, serde_json::json!({ "email": "a@x.com" }));
    }

    #[test]
    fn test_create_user_validation() {
        assert!(CreateUser::new("a@x.com", Some("A")).validate().is_ok());
        assert!(CreateUser::new("not-an-email", None).validate().is_err());
        assert!(CreateUser::new("a@x.com", Some("")).validate().is_err());
    }

    #[test]
    fn test_update_user_serializes_only_present_fields() {
        let update = UpdateUser {
            name: Some("B".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(update).unwrap();
        assert_eq!(value, serde_json::json!({ "name": "B" }));
    }
}
