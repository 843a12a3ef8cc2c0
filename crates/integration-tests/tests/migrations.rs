//! Migration runner against a real SQLite file

mod common;

use common::TempDb;
use keystone_infra_sqlite::{create_pool, run_migrations, Migration, MigrationRunner, SqlitePool};

async fn schema(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

/// Applying the same set twice changes nothing the second time
#[tokio::test]
async fn test_reapply_is_noop() {
    let db = TempDb::empty().await;
    let runner = MigrationRunner::new(db.pool.clone())
        .with_migrations([Migration::entity_table(100, "users", &["email", "profile.handle"]).unwrap()]);
    assert_eq!(runner.apply().await.unwrap(), vec![1, 100]);
    let before = schema(&db.pool).await;
    assert!(before.iter().any(|sql| sql.contains("uq_users_profile_handle")));

    assert!(runner.apply().await.unwrap().is_empty());
    assert!(run_migrations(&db.pool).await.unwrap().is_empty());
    assert_eq!(schema(&db.pool).await, before);
}

/// The ledger survives a reconnect: a restarted process applies nothing
#[tokio::test]
async fn test_ledger_survives_reconnect() {
    let db = TempDb::empty().await;
    let users = || Migration::entity_table(100, "users", &["email"]).unwrap();

    let applied = MigrationRunner::new(db.pool.clone())
        .with_migrations([users()])
        .apply()
        .await
        .unwrap();
    assert_eq!(applied, vec![1, 100]);
    db.pool.close().await;

    let pool = create_pool(&db.url(), 2).await.unwrap();
    let runner = MigrationRunner::new(pool.clone()).with_migrations([users()]);
    assert!(runner.apply().await.unwrap().is_empty());
    assert_eq!(runner.applied_versions().await.unwrap(), vec![1, 100]);
    pool.close().await;
}

/// Rolling back removes entity tables newest first
#[tokio::test]
async fn test_rollback_to_core() {
    let db = TempDb::empty().await;
    let runner = MigrationRunner::new(db.pool.clone()).with_migrations([
        Migration::entity_table(100, "users", &["email"]).unwrap(),
        Migration::entity_table(101, "teams", &["slug"]).unwrap(),
    ]);
    runner.apply().await.unwrap();

    let rolled_back = runner.rollback_to(1).await.unwrap();
    assert_eq!(rolled_back, vec![101, 100]);
    assert_eq!(runner.applied_versions().await.unwrap(), vec![1]);

    // and forward again
    assert_eq!(runner.apply().await.unwrap(), vec![100, 101]);
}
