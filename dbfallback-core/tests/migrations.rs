//! End-to-end migration runner tests against the embedded adapter.

use std::sync::Arc;

use dbfallback_core::{
    DatabaseAdapter, EmbeddedAdapter, Migration, MigrationRunner, MigrationSet, RollbackOutcome,
    Value,
};

async fn embedded() -> Arc<dyn DatabaseAdapter> {
    Arc::new(EmbeddedAdapter::new(":memory:", "app_").await.unwrap())
}

fn create_clients() -> Migration {
    Migration::new(
        "20240101_create_clients_table",
        vec![
            "CREATE TABLE `app_clients` (\
             `id` INTEGER PRIMARY KEY, \
             `name` TEXT NOT NULL)"
                .to_string(),
        ],
        vec!["DROP TABLE `app_clients`".to_string()],
    )
}

fn create_projects() -> Migration {
    Migration::new(
        "20240202_create_projects_table",
        vec![
            "CREATE TABLE `app_projects` (\
             `id` INTEGER PRIMARY KEY, \
             `client_id` INTEGER NOT NULL, \
             `title` TEXT NOT NULL)"
                .to_string(),
        ],
        vec!["DROP TABLE `app_projects`".to_string()],
    )
}

#[tokio::test]
async fn run_applies_pending_migrations_in_order() {
    let adapter = embedded().await;
    let set = MigrationSet::new(vec![create_projects(), create_clients()]).unwrap();
    let runner = MigrationRunner::new(adapter.clone(), set);

    let report = runner.run().await.unwrap();
    assert_eq!(report.batch, 1);
    assert_eq!(
        report.applied,
        vec![
            "20240101_create_clients_table".to_string(),
            "20240202_create_projects_table".to_string(),
        ]
    );

    // Both tables exist and are queryable.
    adapter
        .fetch_all("SELECT * FROM `app_clients`", &[])
        .await
        .unwrap();
    adapter
        .fetch_all("SELECT * FROM `app_projects`", &[])
        .await
        .unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.applied, 2);
    assert_eq!(status.pending, 0);
    assert_eq!(status.last_batch, Some(1));
}

#[tokio::test]
async fn rerun_is_a_no_op() {
    let adapter = embedded().await;
    let set = MigrationSet::new(vec![create_clients()]).unwrap();
    let runner = MigrationRunner::new(adapter, set);

    runner.run().await.unwrap();
    let report = runner.run().await.unwrap();
    assert_eq!(report.batch, 0);
    assert!(report.applied.is_empty());

    let status = runner.status().await.unwrap();
    assert_eq!(status.applied, 1);
    assert_eq!(status.pending, 0);
    assert_eq!(status.last_batch, Some(1));
}

#[tokio::test]
async fn later_registrations_get_a_new_batch() {
    let adapter = embedded().await;

    let first = MigrationSet::new(vec![create_clients()]).unwrap();
    MigrationRunner::new(adapter.clone(), first)
        .run()
        .await
        .unwrap();

    let both = MigrationSet::new(vec![create_clients(), create_projects()]).unwrap();
    let runner = MigrationRunner::new(adapter, both);
    let report = runner.run().await.unwrap();
    assert_eq!(report.batch, 2);
    assert_eq!(report.applied, vec!["20240202_create_projects_table".to_string()]);

    let status = runner.status().await.unwrap();
    assert_eq!(status.last_batch, Some(2));
}

#[tokio::test]
async fn failed_migration_aborts_without_losing_earlier_ones() {
    let adapter = embedded().await;
    let broken = Migration::irreversible(
        "20240202_broken_migration",
        vec!["CREATE TABLE".to_string()],
    );
    let set = MigrationSet::new(vec![create_clients(), broken]).unwrap();
    let runner = MigrationRunner::new(adapter.clone(), set);

    let err = runner.run().await.unwrap_err();
    assert!(err.to_string().contains("20240202_broken_migration"));

    // The first migration stays committed; the broken one is not recorded.
    let status = runner.status().await.unwrap();
    assert_eq!(status.applied, 1);
    assert_eq!(status.pending, 1);
    adapter
        .fetch_all("SELECT * FROM `app_clients`", &[])
        .await
        .unwrap();

    // Fixing the migration under the same name resumes the run.
    let fixed = Migration::irreversible(
        "20240202_broken_migration",
        vec!["CREATE TABLE `app_fixed` (`id` INTEGER PRIMARY KEY)".to_string()],
    );
    let set = MigrationSet::new(vec![create_clients(), fixed]).unwrap();
    let report = MigrationRunner::new(adapter, set).run().await.unwrap();
    assert_eq!(report.batch, 2);
    assert_eq!(report.applied, vec!["20240202_broken_migration".to_string()]);
}

#[tokio::test]
async fn failed_statement_rolls_back_the_whole_migration() {
    let adapter = embedded().await;
    let partial = Migration::irreversible(
        "20240101_two_statements",
        vec![
            "CREATE TABLE `app_half` (`id` INTEGER PRIMARY KEY)".to_string(),
            "CREATE TABLE".to_string(),
        ],
    );
    let set = MigrationSet::new(vec![partial]).unwrap();

    MigrationRunner::new(adapter.clone(), set)
        .run()
        .await
        .unwrap_err();

    // The first statement's table must not survive the rollback.
    assert!(
        adapter
            .fetch_all("SELECT * FROM `app_half`", &[])
            .await
            .is_err()
    );
}

#[tokio::test]
async fn rollback_reverses_newest_first() {
    let adapter = embedded().await;
    let set = MigrationSet::new(vec![create_clients(), create_projects()]).unwrap();
    let runner = MigrationRunner::new(adapter.clone(), set);
    runner.run().await.unwrap();

    let steps = runner.rollback(2).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].name, "20240202_create_projects_table");
    assert_eq!(steps[0].outcome, RollbackOutcome::RolledBack);
    assert_eq!(steps[1].name, "20240101_create_clients_table");
    assert_eq!(steps[1].outcome, RollbackOutcome::RolledBack);

    // Tables are gone and the tracking rows removed.
    assert!(
        adapter
            .fetch_all("SELECT * FROM `app_clients`", &[])
            .await
            .is_err()
    );
    let status = runner.status().await.unwrap();
    assert_eq!(status.applied, 0);
    assert_eq!(status.pending, 2);
}

#[tokio::test]
async fn rollback_skips_irreversible_migrations() {
    let adapter = embedded().await;
    let keeper = Migration::irreversible(
        "20240101_seed_defaults",
        vec!["CREATE TABLE `app_defaults` (`id` INTEGER PRIMARY KEY)".to_string()],
    );
    let set = MigrationSet::new(vec![keeper]).unwrap();
    let runner = MigrationRunner::new(adapter.clone(), set);
    runner.run().await.unwrap();

    let steps = runner.rollback(1).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert!(matches!(steps[0].outcome, RollbackOutcome::Skipped { .. }));

    // The tracking row stays, so the migration is still considered applied.
    let status = runner.status().await.unwrap();
    assert_eq!(status.applied, 1);
    adapter
        .fetch_all("SELECT * FROM `app_defaults`", &[])
        .await
        .unwrap();
}

#[tokio::test]
async fn rollback_beyond_history_reports_only_real_steps() {
    let adapter = embedded().await;
    let set = MigrationSet::new(vec![create_clients()]).unwrap();
    let runner = MigrationRunner::new(adapter, set);
    runner.run().await.unwrap();

    let steps = runner.rollback(10).await.unwrap();
    assert_eq!(steps.len(), 1);
}

#[tokio::test]
async fn tracking_table_uses_adapter_prefix() {
    let adapter: Arc<dyn DatabaseAdapter> =
        Arc::new(EmbeddedAdapter::new(":memory:", "crm_").await.unwrap());
    let set = MigrationSet::new(vec![Migration::irreversible(
        "20240101_noop",
        vec!["SELECT 1".to_string()],
    )])
    .unwrap();
    MigrationRunner::new(adapter.clone(), set)
        .run()
        .await
        .unwrap();

    let recorded = adapter
        .fetch_scalar("SELECT COUNT(*) FROM `crm_migrations`", &[])
        .await
        .unwrap();
    assert_eq!(recorded, Some(Value::Int(1)));
}
