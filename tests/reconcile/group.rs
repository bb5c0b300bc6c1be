use std::collections::BTreeSet;

use grantsmith::data_types::{
    Group, ObjectKind, PrivilegeBinding, SchemaPrivilege, TablePrivilege,
};
use grantsmith::reconciler::{
    GroupReconciler, PrivilegeBindingReconciler, ReconcileError, Reconciler, TransactionPhase,
};
use grantsmith::repository::memory::MemoryCluster;
use grantsmith::statement::Grantee;
use rstest::rstest;

use crate::{cluster, context, grant_usage};

fn analysts(members: &[i64]) -> Group {
    Group {
        name: "analysts".to_string(),
        members: members.iter().copied().collect(),
    }
}

#[rstest]
#[tokio::test]
async fn test_membership_change_names_users(cluster: MemoryCluster) {
    let groups = GroupReconciler::new(context(&cluster));
    let created = groups
        .create(&Group {
            name: "readers".to_string(),
            members: BTreeSet::from([101, 102]),
        })
        .await
        .unwrap();
    cluster.clear_journal();

    let declared = Group {
        name: "readers".to_string(),
        members: BTreeSet::from([102, 103]),
    };
    let observed = groups
        .update(created.id, &created.attributes, &declared)
        .await
        .unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "ALTER GROUP readers DROP USER alice",
            "ALTER GROUP readers ADD USER carol",
        ]
    );
    assert_eq!(observed.attributes, declared);
}

#[rstest]
#[tokio::test]
async fn test_second_update_is_a_no_op(cluster: MemoryCluster) {
    cluster.add_group(8, "loaders", &[101]);
    let groups = GroupReconciler::new(context(&cluster));
    let previous = groups.read(8, None).await.unwrap().attributes;
    let declared = Group {
        name: "loaders".to_string(),
        members: BTreeSet::from([101, 103]),
    };

    let observed = groups.update(8, &previous, &declared).await.unwrap();
    assert_eq!(cluster.journal().len(), 1);

    cluster.clear_journal();
    let again = groups
        .update(8, &observed.attributes, &declared)
        .await
        .unwrap();
    assert!(cluster.journal().is_empty());
    assert_eq!(again, observed);
}

#[rstest]
#[tokio::test]
async fn test_rename_comes_first(cluster: MemoryCluster) {
    let groups = GroupReconciler::new(context(&cluster));
    let declared = Group {
        name: "analytics".to_string(),
        members: BTreeSet::from([101]),
    };

    groups.update(7, &analysts(&[]), &declared).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "ALTER GROUP analysts RENAME TO analytics",
            "ALTER GROUP analytics ADD USER alice",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_delete_revokes_in_every_schema(cluster: MemoryCluster) {
    cluster.add_schema(501, "marketing", 101);
    PrivilegeBindingReconciler::new(context(&cluster))
        .create(&PrivilegeBinding {
            schema_id: 500,
            group_id: 7,
            table_privileges: BTreeSet::from([TablePrivilege::Select]),
            schema_privileges: BTreeSet::from([SchemaPrivilege::Usage]),
        })
        .await
        .unwrap();
    cluster.clear_journal();

    let groups = GroupReconciler::new(context(&cluster));
    groups.delete(7, &analysts(&[])).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "REVOKE ALL ON ALL TABLES IN SCHEMA marketing FROM GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA marketing REVOKE ALL ON TABLES FROM GROUP analysts",
            "REVOKE ALL ON SCHEMA marketing FROM GROUP analysts",
            "REVOKE ALL ON ALL TABLES IN SCHEMA public FROM GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public REVOKE ALL ON TABLES FROM GROUP analysts",
            "REVOKE ALL ON SCHEMA public FROM GROUP analysts",
            "REVOKE ALL ON ALL TABLES IN SCHEMA sales FROM GROUP analysts",
            "ALTER DEFAULT PRIVILEGES IN SCHEMA sales REVOKE ALL ON TABLES FROM GROUP analysts",
            "REVOKE ALL ON SCHEMA sales FROM GROUP analysts",
            "DROP GROUP analysts",
        ]
    );
    assert!(!groups.exists(7).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_delete_with_usage_on_public(cluster: MemoryCluster) {
    grant_usage(&cluster, "public", Grantee::Group("analysts".to_string())).await;
    let groups = GroupReconciler::new(context(&cluster));

    groups.delete(7, &analysts(&[])).await.unwrap();

    let journal = cluster.journal();
    assert!(journal.contains(&"REVOKE ALL ON SCHEMA public FROM GROUP analysts".to_string()));
    assert_eq!(journal.last().map(String::as_str), Some("DROP GROUP analysts"));
    assert!(!groups.exists(7).await.unwrap());
}

#[tokio::test]
async fn test_convergence_timeout_rolls_back() {
    let cluster = MemoryCluster::new().with_convergence_lag();
    let groups = GroupReconciler::new(context(&cluster));

    let error = groups.create(&analysts(&[])).await.unwrap_err();

    assert!(matches!(
        error,
        ReconcileError::ConvergenceTimeout { kind: ObjectKind::Group, ref name } if name == "analysts"
    ));
    assert_eq!(cluster.executed(), vec!["CREATE GROUP analysts"]);
    assert!(cluster.journal().is_empty());
    assert!(cluster.snapshot().groups.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_begin_failure_is_fatal(cluster: MemoryCluster) {
    cluster.fail_begin(true);
    let groups = GroupReconciler::new(context(&cluster));

    let error = groups.create(&analysts(&[101])).await.unwrap_err();
    assert!(matches!(
        error,
        ReconcileError::Transaction {
            phase: TransactionPhase::Begin,
            ..
        }
    ));
    assert!(cluster.executed().is_empty());

    // Exists propagates anything that is not a missing object
    assert!(groups.exists(7).await.is_err());
}

#[rstest]
#[tokio::test]
async fn test_exists(cluster: MemoryCluster) {
    let groups = GroupReconciler::new(context(&cluster));

    assert!(groups.exists(7).await.unwrap());
    assert!(!groups.exists(999).await.unwrap());
    assert!(groups.read(999, None).await.unwrap_err().is_not_found());
}
