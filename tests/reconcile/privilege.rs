use grantsmith::data_types::{
    PrivilegeBinding, PrivilegeBindingId, SchemaPrivilege, TablePrivilege,
};
use grantsmith::reconciler::{PrivilegeBindingReconciler, ReconcileError, Reconciler};
use grantsmith::repository::memory::{MemoryCluster, MASTER_USER_ID};
use rstest::rstest;

use crate::{cluster, context};

fn binding(tables: &[TablePrivilege], schemas: &[SchemaPrivilege]) -> PrivilegeBinding {
    PrivilegeBinding {
        schema_id: 500,
        group_id: 7,
        table_privileges: tables.iter().copied().collect(),
        schema_privileges: schemas.iter().copied().collect(),
    }
}

#[rstest]
#[tokio::test]
async fn test_select_usage_is_three_statements(cluster: MemoryCluster) {
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));
    let declared = binding(&[TablePrivilege::Select], &[SchemaPrivilege::Usage]);

    let observed = bindings.create(&declared).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "GRANT SELECT ON ALL TABLES IN SCHEMA sales TO GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA sales GRANT SELECT ON TABLES TO GROUP analysts",
            "GRANT USAGE ON SCHEMA sales TO GROUP analysts",
        ]
    );
    assert_eq!(observed.key(), "500_7");
    assert_eq!(observed.attributes, declared);
}

#[rstest]
#[tokio::test]
async fn test_zero_flags_fail_before_any_statement(cluster: MemoryCluster) {
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));

    let error = bindings.create(&binding(&[], &[])).await.unwrap_err();

    assert!(matches!(error, ReconcileError::Validation { .. }));
    assert!(cluster.executed().is_empty());
    assert!(cluster.catalog_queries().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_existing_and_future_tables_share_the_policy(cluster: MemoryCluster) {
    let existing = cluster.add_table(500, "orders", MASTER_USER_ID);
    PrivilegeBindingReconciler::new(context(&cluster))
        .create(&binding(
            &[TablePrivilege::Select, TablePrivilege::Insert],
            &[],
        ))
        .await
        .unwrap();
    let future = cluster.add_table(500, "refunds", MASTER_USER_ID);

    for table in [existing, future] {
        assert_eq!(
            cluster.relation_acl(table).as_deref(),
            Some("group analysts=ar/admin")
        );
    }
}

#[rstest]
#[tokio::test]
async fn test_update_then_repeat(cluster: MemoryCluster) {
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));
    let created = bindings
        .create(&binding(&[TablePrivilege::Select], &[SchemaPrivilege::Usage]))
        .await
        .unwrap();
    cluster.clear_journal();

    let declared = binding(
        &[TablePrivilege::Select, TablePrivilege::Update],
        &[SchemaPrivilege::Usage],
    );
    let observed = bindings
        .update(created.id, &created.attributes, &declared)
        .await
        .unwrap();
    assert_eq!(
        cluster.journal(),
        vec![
            "GRANT UPDATE ON ALL TABLES IN SCHEMA sales TO GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA sales GRANT UPDATE ON TABLES TO GROUP analysts",
        ]
    );
    assert_eq!(observed.attributes, declared);

    cluster.clear_journal();
    bindings
        .update(created.id, &observed.attributes, &declared)
        .await
        .unwrap();
    assert!(cluster.journal().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_update_to_nothing_is_rejected(cluster: MemoryCluster) {
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));
    let created = bindings
        .create(&binding(&[], &[SchemaPrivilege::Create]))
        .await
        .unwrap();

    let error = bindings
        .update(created.id, &created.attributes, &binding(&[], &[]))
        .await
        .unwrap_err();
    assert!(matches!(error, ReconcileError::Validation { .. }));
    assert!(bindings.exists(created.id).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_delete_only_touches_its_schema(cluster: MemoryCluster) {
    cluster.add_schema(501, "marketing", MASTER_USER_ID);
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));
    let created = bindings
        .create(&binding(&[TablePrivilege::Delete], &[SchemaPrivilege::Usage]))
        .await
        .unwrap();
    cluster.clear_journal();

    bindings
        .delete(created.id, &created.attributes)
        .await
        .unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "REVOKE ALL ON ALL TABLES IN SCHEMA sales FROM GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA sales REVOKE ALL ON TABLES FROM GROUP analysts",
            "REVOKE ALL ON SCHEMA sales FROM GROUP analysts",
        ]
    );
    assert!(!bindings.exists(created.id).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_read_missing(cluster: MemoryCluster) {
    let bindings = PrivilegeBindingReconciler::new(context(&cluster));
    let id: PrivilegeBindingId = "500_7".parse().unwrap();

    // Group and schema exist but nothing is granted
    assert!(bindings.read(id, None).await.unwrap_err().is_not_found());
    // No such group
    let id = PrivilegeBindingId {
        schema_id: 500,
        group_id: 99,
    };
    assert!(!bindings.exists(id).await.unwrap());
}
