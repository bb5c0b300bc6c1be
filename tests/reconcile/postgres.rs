use std::env;
use std::time::Duration;

use grantsmith::repository::interface::{Cluster, Mode};
use grantsmith::repository::postgres::PostgresCluster;

// Needs a reachable cluster: DATABASE_URL=postgres://... cargo test -- --ignored
#[tokio::test]
#[ignore]
async fn test_postgres_catalog_smoke() {
    let dsn = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let cluster = PostgresCluster::connect(&dsn, 1, Duration::from_secs(10))
        .await
        .unwrap();

    let mut tx = cluster.begin(Mode::Transaction).await.unwrap();
    let user = tx.current_user().await.unwrap();
    assert!(!user.is_empty());
    assert!(tx.get_user_by_name(&user).await.unwrap().is_some());

    let schemas = tx.list_schemas().await.unwrap();
    assert!(schemas.iter().all(|schema| !schema.nspname.starts_with("pg_")));

    tx.rollback().await.unwrap();
}
