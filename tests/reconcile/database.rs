use grantsmith::data_types::{ConnectionLimit, Database};
use grantsmith::reconciler::{DatabaseReconciler, ReconcileError, Reconciler};
use grantsmith::repository::memory::MemoryCluster;
use rstest::rstest;

use crate::{cluster, context};

#[rstest]
#[tokio::test]
async fn test_create_with_owner(cluster: MemoryCluster) {
    let databases = DatabaseReconciler::new(context(&cluster));
    let declared = Database {
        name: "warehouse".to_string(),
        owner: Some(101),
        connection_limit: ConnectionLimit::Unlimited,
    };

    let observed = databases.create(&declared).await.unwrap();

    assert_eq!(observed.attributes, declared);
    assert_eq!(
        cluster.journal(),
        vec!["CREATE DATABASE warehouse OWNER alice CONNECTION LIMIT UNLIMITED"]
    );
}

#[rstest]
#[tokio::test]
async fn test_update_order(cluster: MemoryCluster) {
    cluster.add_database(300, "warehouse", 101);
    let databases = DatabaseReconciler::new(context(&cluster));
    let previous = databases.read(300, None).await.unwrap().attributes;
    let declared = Database {
        name: "lake".to_string(),
        owner: Some(102),
        connection_limit: ConnectionLimit::Limited(15),
    };

    let observed = databases.update(300, &previous, &declared).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "ALTER DATABASE warehouse RENAME TO lake",
            "ALTER DATABASE lake OWNER TO bob",
            "ALTER DATABASE lake CONNECTION LIMIT 15",
        ]
    );
    assert_eq!(observed.attributes, declared);
}

#[rstest]
#[tokio::test]
async fn test_undeclared_owner_is_reported_not_changed(cluster: MemoryCluster) {
    cluster.add_database(300, "warehouse", 101);
    let databases = DatabaseReconciler::new(context(&cluster));
    let previous = Database {
        name: "warehouse".to_string(),
        owner: None,
        connection_limit: ConnectionLimit::Unlimited,
    };

    let observed = databases.update(300, &previous, &previous).await.unwrap();

    assert!(cluster.executed().is_empty());
    assert_eq!(observed.attributes.owner, Some(101));
}

#[rstest]
#[tokio::test]
async fn test_failed_create(cluster: MemoryCluster) {
    cluster.fail_on("CREATE DATABASE");
    let databases = DatabaseReconciler::new(context(&cluster));
    let declared = Database {
        name: "warehouse".to_string(),
        owner: None,
        connection_limit: ConnectionLimit::Unlimited,
    };

    let error = databases.create(&declared).await.unwrap_err();
    assert!(matches!(error, ReconcileError::Statement { .. }));
    assert!(cluster.snapshot().databases.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_delete(cluster: MemoryCluster) {
    cluster.add_database(300, "warehouse", 101);
    let databases = DatabaseReconciler::new(context(&cluster));
    let current = databases.read(300, None).await.unwrap().attributes;

    databases.delete(300, &current).await.unwrap();

    assert_eq!(cluster.journal(), vec!["DROP DATABASE warehouse"]);
    assert!(!databases.exists(300).await.unwrap());
}
