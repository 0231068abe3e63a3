//! Shared PostgreSQL harness for the integration tests.
//!
//! One server is shared per test binary; every test gets its own
//! database inside it, created through the same `faultline-db` helpers
//! the engine uses (admin connection, tagged pool, runtime
//! migrations), so the tests exercise the real setup path.
//!
//! The server comes from either:
//! - `FAULTLINE_TEST_PG_URL`, when a setup script (nextest, CI) already
//!   runs one, or
//! - a testcontainers instance started lazily on first use and kept
//!   alive for the life of the process.

use sqlx::{Connection, Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use faultline_db::config::DbConfig;
use faultline_db::pool;

/// The shared server: its root URL, plus the container handle when we
/// own one (dropping it would kill the server mid-suite).
struct TestServer {
    url: String,
    _owned: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<TestServer> = OnceCell::const_new();

async fn start_server() -> TestServer {
    if let Ok(url) = std::env::var("FAULTLINE_TEST_PG_URL") {
        return TestServer { url, _owned: None };
    }

    let container = Postgres::default()
        .with_tag("18")
        .start()
        .await
        .expect("failed to start PostgreSQL test container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container mapped port");

    TestServer {
        url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _owned: Some(container),
    }
}

/// Root URL of the shared server (no database name appended).
pub async fn pg_url() -> &'static str {
    &SERVER.get_or_init(start_server).await.url
}

/// Create a fresh database with migrations applied.
///
/// Returns `(pool, db_name)`; hand `db_name` back to [`drop_test_db`]
/// when the test finishes. The pool is tagged `faultline-tests` so
/// stray connections are attributable when a suite wedges.
pub async fn create_test_db() -> (PgPool, String) {
    let base_url = pg_url().await;
    let db_name = format!("fl_test_{}", Uuid::new_v4().simple());

    let mut admin = pool::admin_connection(&format!("{base_url}/postgres"))
        .await
        .expect("admin connection to test server");
    admin
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create test database {db_name}: {e}"));
    admin.close().await.ok();

    let config = DbConfig::new(format!("{base_url}/{db_name}"))
        .with_application_name("faultline-tests");
    let test_pool = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to test database {db_name}: {e}"));

    pool::run_migrations(&test_pool, pool::default_migrations_path())
        .await
        .expect("migrations should apply to a fresh database");

    (test_pool, db_name)
}

/// Drop a test database, evicting any connections still attached.
///
/// Safe to call twice; a database that is already gone is not an
/// error.
pub async fn drop_test_db(db_name: &str) {
    let base_url = pg_url().await;
    let Ok(mut admin) = pool::admin_connection(&format!("{base_url}/postgres")).await else {
        // The server itself is gone (container torn down); nothing left
        // to clean.
        return;
    };

    let evict = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = admin.execute(evict.as_str()).await;
    let _ = admin
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    admin.close().await.ok();
}
