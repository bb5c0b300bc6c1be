use grantsmith::data_types::Schema;
use grantsmith::reconciler::{Reconciler, SchemaReconciler};
use grantsmith::repository::memory::{MemoryCluster, MASTER_USER_ID};
use rstest::rstest;

use crate::{cluster, context};

#[rstest]
#[tokio::test]
async fn test_create_then_lookup(cluster: MemoryCluster) {
    let schemas = SchemaReconciler::new(context(&cluster));
    let created = schemas
        .create(&Schema {
            name: "finance".to_string(),
            owner: None,
            cascade_on_delete: false,
        })
        .await
        .unwrap();

    let found = schemas.lookup("finance").await.unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.attributes.owner, Some(MASTER_USER_ID));
    assert_eq!(cluster.journal(), vec!["CREATE SCHEMA finance"]);
}

#[rstest]
#[tokio::test]
async fn test_rename_and_change_owner(cluster: MemoryCluster) {
    let schemas = SchemaReconciler::new(context(&cluster));
    let previous = schemas.read(500, None).await.unwrap().attributes;
    let declared = Schema {
        name: "revenue".to_string(),
        owner: Some(103),
        cascade_on_delete: true,
    };

    let observed = schemas.update(500, &previous, &declared).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "ALTER SCHEMA sales RENAME TO revenue",
            "ALTER SCHEMA revenue OWNER TO carol",
        ]
    );
    assert_eq!(observed.attributes, declared);
    assert_eq!(schemas.lookup("revenue").await.unwrap().id, 500);
}

#[rstest]
#[tokio::test]
async fn test_cascade_drops_contents(cluster: MemoryCluster) {
    cluster.add_table(500, "orders", MASTER_USER_ID);
    cluster.add_view(500, "daily_orders", MASTER_USER_ID);
    let schemas = SchemaReconciler::new(context(&cluster));
    let current = schemas
        .read(
            500,
            Some(&Schema {
                name: "sales".to_string(),
                owner: None,
                cascade_on_delete: true,
            }),
        )
        .await
        .unwrap()
        .attributes;
    assert!(current.cascade_on_delete);

    schemas.delete(500, &current).await.unwrap();

    assert_eq!(cluster.journal(), vec!["DROP SCHEMA sales CASCADE"]);
    assert!(cluster.snapshot().relations.is_empty());
    assert!(!schemas.exists(500).await.unwrap());
}
