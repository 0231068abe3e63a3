//! Migration smoke tests: the schema applies cleanly and the expected
//! tables exist.

use faultline_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("failed to list tables");

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in [
        "tasks",
        "traces",
        "queue_ready",
        "queue_delayed",
        "queue_dead",
        "queue_index",
        "concurrency_slots",
        "namespaces",
        "rate_tokens",
        "stream_events",
        "injections",
        "executions",
        "detector_results",
        "granularity_results",
        "container_versions",
        "labels",
        "injection_labels",
        "datapack_labels",
    ] {
        assert!(names.contains(&expected), "missing table {expected}");
    }

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrency_slots_seeded() {
    let (pool, db_name) = create_test_db().await;

    let row: (i32, i32) =
        sqlx::query_as("SELECT in_use, max_slots FROM concurrency_slots WHERE id = 1")
            .fetch_one(&pool)
            .await
            .expect("slot row should exist");
    assert_eq!(row.0, 0);
    assert_eq!(row.1, 20);

    drop_test_db(&db_name).await;
}
