//! Repository behavior over the in-memory store.

use std::sync::Arc;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::AppError;
use domain::{CreatePost, CreateUser, Post, UpdatePost, UpdateUser, User};
use repository::{
    AdapterFactory, BaseRepository, FindArgs, Filter, MemoryStore, OrderBy, QueryOptions,
    Relation, Selection, TableSchema, TransactionalRepository,
};

type Users = TransactionalRepository<User, CreateUser, UpdateUser>;
type Posts = BaseRepository<Post, CreatePost, UpdatePost>;

fn factory() -> AdapterFactory {
    let store = MemoryStore::new()
        .table(TableSchema::new("User").unique("email"))
        .table(
            TableSchema::new("Post")
                .default_value("published", false)
                .default_value("view_count", 0)
                .timestamps("created_at", "updated_at"),
        );

    AdapterFactory::new(Arc::new(store))
        .with_relation("User", Relation::has_many("posts", "Post", "author_id"))
        .with_relation("Post", Relation::belongs_to("author", "User", "author_id"))
}

fn users(factory: &AdapterFactory) -> Users {
    TransactionalRepository::new(factory.clone())
}

async fn seed(repo: &Users, count: usize) -> Vec<User> {
    let mut created = Vec::new();
    for i in 0..count {
        let user = repo
            .create(CreateUser::new(format!("user{i}@x.com"), Some("Seed")))
            .await
            .unwrap();
        created.push(user);
    }
    created
}

#[tokio::test]
async fn find_by_id_returns_created_entity() {
    let repo = users(&factory());

    let created = repo
        .create(CreateUser::new("a@x.com", Some("Alice")))
        .await
        .unwrap();
    let found = repo.find_by_id(created.id).await.unwrap();

    assert_eq!(found, Some(created));
}

#[tokio::test]
async fn count_matches_find_many_length() {
    let repo = users(&factory());
    seed(&repo, 3).await;
    repo.create(CreateUser::new("other@x.com", Some("Other")))
        .await
        .unwrap();

    let filter = Filter::new().eq("name", "Seed");
    let matched = repo.find_many(filter.clone()).await.unwrap();
    let counted = repo.count(Some(filter)).await.unwrap();

    assert_eq!(counted, matched.len() as u64);
    assert_eq!(counted, 3);
    assert_eq!(repo.count(None).await.unwrap(), 4);
}

#[tokio::test]
async fn pages_are_disjoint_and_cover_the_first_two_windows() {
    let repo = users(&factory());
    seed(&repo, 7).await;
    let order = OrderBy::asc("id");

    let first = repo
        .find_all_paginated(QueryOptions::new().page(1).limit(4).order_by(order.clone()))
        .await
        .unwrap();
    let second = repo
        .find_all_paginated(QueryOptions::new().page(2).limit(4).order_by(order.clone()))
        .await
        .unwrap();
    let all = repo
        .find_all(Some(QueryOptions::new().limit(8).order_by(order)))
        .await
        .unwrap();

    assert_eq!(first.data.len(), 4);
    assert_eq!(second.data.len(), 3);
    assert!(first.has_next);
    assert!(!second.has_next);
    assert!(second.has_previous);
    assert_eq!(first.total, 7);
    assert_eq!(first.total_pages, 2);

    let joined: Vec<i32> = first.data.iter().chain(&second.data).map(|u| u.id).collect();
    let expected: Vec<i32> = all.iter().map(|u| u.id).collect();
    assert_eq!(joined, expected);
}

#[tokio::test]
async fn has_next_is_false_when_everything_fits_on_one_page() {
    let repo = users(&factory());
    seed(&repo, 3).await;

    let page = repo
        .find_all_paginated(QueryOptions::new().page(1).limit(3))
        .await
        .unwrap();

    assert!(!page.has_next);
    assert!(!page.has_previous);
    assert_eq!(page.total_pages, 1);
}

#[tokio::test]
async fn upsert_creates_then_updates() {
    let repo = users(&factory());
    let filter = Filter::new().eq("email", "u@x.com");
    let update = UpdateUser {
        name: Some("Updated".to_string()),
        ..Default::default()
    };

    let created = repo
        .upsert(
            filter.clone(),
            CreateUser::new("u@x.com", Some("Created")),
            update.clone(),
        )
        .await
        .unwrap();
    assert_eq!(created.name.as_deref(), Some("Created"));

    let updated = repo
        .upsert(filter.clone(), CreateUser::new("u@x.com", Some("Created")), update)
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name.as_deref(), Some("Updated"));

    assert_eq!(repo.count(Some(filter)).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_semantics() {
    let repo = users(&factory());

    let none = repo
        .delete_many(Filter::new().eq("email", "nobody@x.com"))
        .await
        .unwrap();
    assert_eq!(none.count, 0);

    assert!(matches!(repo.delete(404).await, Err(AppError::NotFound)));

    let user = repo.create(CreateUser::new("a@x.com", None)).await.unwrap();
    assert_ok!(repo.delete(user.id).await);
    assert_eq!(repo.find_by_id(user.id).await.unwrap(), None);
}

#[tokio::test]
async fn update_of_missing_record_is_not_found() {
    let repo = users(&factory());
    let result = repo.update(1, UpdateUser::default()).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[tokio::test]
async fn failed_transaction_leaves_store_unchanged() {
    let repo = users(&factory());
    let existing = repo.create(CreateUser::new("keep@x.com", None)).await.unwrap();

    let result = repo
        .with_transaction(|tx| {
            Box::pin(async move {
                let a = tx.create(CreateUser::new("a@x.com", None)).await?;
                let b = tx.create(CreateUser::new("b@x.com", None)).await?;
                assert!(tx.find_by_id(a.id).await?.is_some());
                assert!(tx.find_by_id(b.id).await?.is_some());
                Err::<(i32, i32), _>(AppError::internal("boom"))
            })
        })
        .await;

    assert_err!(result);
    assert_eq!(repo.count(None).await.unwrap(), 1);
    assert!(repo.find_by_id(existing.id).await.unwrap().is_some());
    assert!(repo
        .find_one(Filter::new().eq("email", "a@x.com"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_email_is_a_constraint_violation() {
    let repo = users(&factory());
    repo.create(CreateUser::new("a@x.com", None)).await.unwrap();

    let found = repo
        .find_one(Filter::new().eq("email", "a@x.com"))
        .await
        .unwrap();
    assert!(found.is_some());

    match repo.create(CreateUser::new("a@x.com", None)).await {
        Err(AppError::ConstraintViolation(msg)) => assert!(msg.contains("email")),
        other => panic!("expected constraint violation, got {other:?}"),
    }
}

#[tokio::test]
async fn create_many_reports_count() {
    let repo = users(&factory());
    let before = repo.count(None).await.unwrap();

    let result = repo
        .create_many(vec![
            CreateUser::new("a@x.com", None),
            CreateUser::new("b@x.com", None),
        ])
        .await
        .unwrap();

    assert_eq!(result.count, 2);
    assert_eq!(repo.count(None).await.unwrap(), before + 2);
}

#[tokio::test]
async fn update_many_applies_to_every_match() {
    let repo = users(&factory());
    seed(&repo, 3).await;

    let result = repo
        .update_many(
            Filter::new().eq("name", "Seed"),
            UpdateUser {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.count, 3);
    assert_eq!(
        repo.count(Some(Filter::new().eq("name", "Renamed")))
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn exists_by_uses_the_full_condition() {
    let repo = users(&factory());
    repo.create(CreateUser::new("a@x.com", Some("A"))).await.unwrap();

    assert!(repo
        .exists_by(Filter::new().eq("email", "a@x.com").eq("name", "A"))
        .await
        .unwrap());
    assert!(!repo
        .exists_by(Filter::new().eq("email", "a@x.com").eq("name", "B"))
        .await
        .unwrap());
}

#[tokio::test]
async fn projection_returns_only_selected_fields() {
    let repo = users(&factory());
    repo.create(CreateUser::new("a@x.com", Some("A"))).await.unwrap();

    let rows = repo
        .find_projected(QueryOptions::new().select(Selection::fields(["email"])))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(serde_json::Value::Object(rows[0].clone()), json!({ "email": "a@x.com" }));
}

#[tokio::test]
async fn includes_resolve_relations_in_both_directions() {
    let factory = factory();
    let users = users(&factory);
    let posts = Posts::new(factory.clone());

    let author = users.create(CreateUser::new("a@x.com", None)).await.unwrap();
    let loner = users.create(CreateUser::new("b@x.com", None)).await.unwrap();
    posts
        .create(CreatePost::new("First", Some(author.id)))
        .await
        .unwrap();
    posts
        .create(CreatePost::new("Second", Some(author.id)))
        .await
        .unwrap();
    posts.create(CreatePost::new("Orphan", None)).await.unwrap();

    let with_posts = users
        .find_all(Some(
            QueryOptions::new()
                .include("posts")
                .order_by(OrderBy::asc("id")),
        ))
        .await
        .unwrap();
    assert_eq!(with_posts[0].id, author.id);
    assert_eq!(with_posts[0].posts.as_ref().map(Vec::len), Some(2));
    assert_eq!(with_posts[1].id, loner.id);
    assert_eq!(with_posts[1].posts.as_ref().map(Vec::len), Some(0));

    let with_author = posts
        .find_all(Some(
            QueryOptions::new()
                .include("author")
                .order_by(OrderBy::asc("id")),
        ))
        .await
        .unwrap();
    assert_eq!(
        with_author[0].author.as_ref().map(|u| u.email.as_str()),
        Some("a@x.com")
    );
    assert!(with_author[2].author.is_none());
}

#[tokio::test]
async fn nested_include_filters_related_records() {
    let factory = factory();
    let users = users(&factory);
    let posts = Posts::new(factory.clone());

    let author = users.create(CreateUser::new("a@x.com", None)).await.unwrap();
    posts
        .create(CreatePost {
            published: Some(true),
            ..CreatePost::new("Live", Some(author.id))
        })
        .await
        .unwrap();
    posts
        .create(CreatePost::new("Draft", Some(author.id)))
        .await
        .unwrap();

    let published_only = FindArgs::filtered(Filter::new().eq("published", true));
    let found = users
        .find_all(Some(QueryOptions::new().include_with("posts", published_only)))
        .await
        .unwrap();

    let titles: Vec<&str> = found[0]
        .posts
        .iter()
        .flatten()
        .map(|p| p.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Live"]);
}

#[tokio::test]
async fn include_keeps_projection_when_join_key_is_not_selected() {
    let factory = factory();
    let users = users(&factory);
    let posts = Posts::new(factory.clone());

    let author = users.create(CreateUser::new("a@x.com", None)).await.unwrap();
    posts
        .create(CreatePost::new("First", Some(author.id)))
        .await
        .unwrap();

    let rows = users
        .find_projected(
            QueryOptions::new()
                .select(Selection::fields(["email"]))
                .include("posts"),
        )
        .await
        .unwrap();

    assert!(rows[0].get("id").is_none());
    assert_eq!(rows[0]["posts"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn unknown_relation_is_rejected() {
    let repo = users(&factory());
    let result = repo
        .find_all(Some(QueryOptions::new().include("comments")))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn include_inside_transaction_sees_uncommitted_rows() {
    let factory = factory();
    let users = users(&factory);

    let count = users
        .with_transaction(|tx| {
            Box::pin(async move {
                let author = tx.create(CreateUser::new("a@x.com", None)).await?;
                let posts = Posts::new(tx.factory().clone());
                posts.create(CreatePost::new("Draft", Some(author.id))).await?;

                let found = tx
                    .find_all(Some(QueryOptions::new().include("posts")))
                    .await?;
                Ok(found[0].posts.as_ref().map_or(0, Vec::len))
            })
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
}
