//! User service over the in-memory backend.

use tokio_test::{assert_err, assert_ok};

use common::AppError;
use domain::{CreateUser, UpdateUser};
use repository::QueryOptions;
use user_service_lib::config::UserServiceConfig;
use user_service_lib::service::UserService;
use user_service_lib::{run_migrations, user_service, MigrateAction};

#[tokio::test]
async fn create_and_look_up_user() {
    let service = user_service(&UserServiceConfig::in_memory()).await.unwrap();

    let user = service
        .create_user(CreateUser::new("a@x.com", Some("Alice")))
        .await
        .unwrap();

    assert_eq!(service.get_user(user.id).await.unwrap(), user);
    assert_eq!(service.get_user_by_email("a@x.com").await.unwrap(), user);
    assert!(matches!(
        service.get_user_by_email("b@x.com").await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn duplicate_email_is_a_conflict_even_after_soft_delete() {
    let service = user_service(&UserServiceConfig::in_memory()).await.unwrap();

    let user = service
        .create_user(CreateUser::new("a@x.com", None))
        .await
        .unwrap();
    service.delete_user(user.id).await.unwrap();

    let err = service
        .create_user(CreateUser::new("a@x.com", None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(ref m) if m == "Email"));
}

#[tokio::test]
async fn update_to_taken_email_is_a_conflict() {
    let service = user_service(&UserServiceConfig::in_memory()).await.unwrap();

    service
        .create_user(CreateUser::new("a@x.com", None))
        .await
        .unwrap();
    let other = service
        .create_user(CreateUser::new("b@x.com", None))
        .await
        .unwrap();

    let err = service
        .update_user(
            other.id,
            UpdateUser {
                email: Some("a@x.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(ref m) if m == "Email"));
}

#[tokio::test]
async fn delete_and_restore_user() {
    let service = user_service(&UserServiceConfig::in_memory()).await.unwrap();
    let user = service
        .create_user(CreateUser::new("a@x.com", None))
        .await
        .unwrap();

    assert_ok!(service.delete_user(user.id).await);
    assert_err!(service.get_user(user.id).await);
    assert_eq!(
        service
            .list_deleted_users(QueryOptions::new())
            .await
            .unwrap()
            .len(),
        1
    );

    let restored = service.restore_user(user.id).await.unwrap();
    assert!(restored.is_active());
    assert_ok!(service.get_user(user.id).await);

    assert_ok!(service.hard_delete_user(user.id).await);
    assert!(matches!(
        service.hard_delete_user(user.id).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn list_users_uses_configured_page_size() {
    let mut config = UserServiceConfig::in_memory();
    config.repository.default_limit = 2;
    let service = user_service(&config).await.unwrap();

    for i in 0..3 {
        service
            .create_user(CreateUser::new(format!("u{i}@x.com"), None))
            .await
            .unwrap();
    }

    let page = service.list_users(QueryOptions::new()).await.unwrap();
    assert_eq!(page.limit, 2);
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.total, 3);
    assert!(page.has_next);
}

#[tokio::test]
async fn migrations_are_a_no_op_for_memory_backend() {
    assert_ok!(run_migrations(&UserServiceConfig::in_memory(), MigrateAction::Up).await);
}
