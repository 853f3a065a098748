/// Integration tests for database migrations
///
/// These tests require a running PostgreSQL database and are skipped when
/// `DATABASE_URL` is not set.

use std::env;
use taskhive_shared::db::migrations::{ensure_database_exists, get_migration_status, run_migrations};
use taskhive_shared::db::pool::{close_pool, create_pool, DatabaseConfig};

async fn migrated_pool() -> Option<sqlx::PgPool> {
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping database-backed test");
        return None;
    };

    ensure_database_exists(&url).await.expect("Failed to create database");
    let pool = create_pool(DatabaseConfig::new(url, 2)).await.expect("Failed to create pool");
    run_migrations(&pool).await.expect("Migrations failed");

    Some(pool)
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let Some(pool) = migrated_pool().await else { return };

    let first = get_migration_status(&pool).await.expect("Failed to get status");
    run_migrations(&pool).await.expect("Second migration run failed");
    let second = get_migration_status(&pool).await.expect("Failed to get status");

    assert_eq!(first.applied_migrations, second.applied_migrations);
    assert!(second.is_up_to_date, "Should be up to date after migrations");
    assert!(second.latest_version.is_some());
    assert_eq!(second.known_migrations, 4);

    close_pool(pool).await;
}

#[tokio::test]
async fn test_migration_creates_all_tables() {
    let Some(pool) = migrated_pool().await else { return };

    for table_name in ["users", "projects", "project_members", "tasks", "subtasks", "notes"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT FROM information_schema.tables
                WHERE table_schema = 'public'
                AND table_name = $1
            )",
        )
        .bind(table_name)
        .fetch_one(&pool)
        .await
        .unwrap_or_else(|e| panic!("Failed to check for table {}: {}", table_name, e));

        assert!(exists, "Table '{}' should exist after migrations", table_name);
    }

    close_pool(pool).await;
}

#[tokio::test]
async fn test_migration_creates_enums() {
    let Some(pool) = migrated_pool().await else { return };

    for enum_name in ["project_role", "task_status"] {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT FROM pg_type WHERE typname = $1)")
            .bind(enum_name)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("Failed to check for enum {}: {}", enum_name, e));

        assert!(exists, "Enum '{}' should exist after migrations", enum_name);
    }

    close_pool(pool).await;
}

#[tokio::test]
async fn test_unique_constraints_have_expected_names() {
    let Some(pool) = migrated_pool().await else { return };

    for constraint in ["users_email_key", "projects_name_key", "project_members_user_project_key"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT FROM pg_constraint WHERE conname = $1 AND contype = 'u')",
        )
        .bind(constraint)
        .fetch_one(&pool)
        .await
        .unwrap_or_else(|e| panic!("Failed to check for constraint {}: {}", constraint, e));

        assert!(exists, "Constraint '{}' should exist", constraint);
    }

    close_pool(pool).await;
}
