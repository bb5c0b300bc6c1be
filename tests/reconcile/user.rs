use chrono::NaiveDate;
use grantsmith::data_types::{ConnectionLimit, Password, User, ValidUntil};
use grantsmith::reconciler::{ReconcileError, Reconciler, UserReconciler};
use grantsmith::repository::memory::{MemoryCluster, MASTER_USER_ID};
use grantsmith::statement::Grantee;
use rstest::rstest;

use crate::{cluster, context, grant_usage};

fn alice() -> User {
    User::new("alice", Password::Set("Secret123".to_string()))
}

#[rstest]
#[tokio::test]
async fn test_delete_reassigns_owned_schema_before_drop(cluster: MemoryCluster) {
    cluster.add_user(104, "dave");
    cluster.add_schema(600, "staging", 104);
    let users = UserReconciler::new(context(&cluster));
    let current = users.read(104, None).await.unwrap().attributes;

    users.delete(104, &current).await.unwrap();

    let journal = cluster.journal();
    let reassign = journal
        .iter()
        .position(|s| s == "ALTER SCHEMA staging OWNER TO admin")
        .unwrap();
    let drop = journal.iter().position(|s| s == "DROP USER dave").unwrap();
    assert!(reassign < drop);
    assert_eq!(drop, journal.len() - 1);
    // Three revokes for each of public, sales and staging
    assert_eq!(journal.len(), 11);

    let state = cluster.snapshot();
    assert!(!state.users.contains_key(&104));
    assert_eq!(state.schemas[&600].owner, MASTER_USER_ID);
}

#[rstest]
#[tokio::test]
async fn test_delete_with_usage_on_public(cluster: MemoryCluster) {
    grant_usage(&cluster, "public", Grantee::User("bob".to_string())).await;
    let users = UserReconciler::new(context(&cluster));

    users
        .delete(102, &User::new("bob", Password::Disabled))
        .await
        .unwrap();

    let journal = cluster.journal();
    assert!(journal.contains(&"REVOKE ALL ON SCHEMA public FROM bob".to_string()));
    assert_eq!(journal.last().map(String::as_str), Some("DROP USER bob"));
    assert!(!users.exists(102).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_failed_drop_rolls_everything_back(cluster: MemoryCluster) {
    cluster.add_user(104, "dave");
    cluster.add_schema(600, "staging", 104);
    cluster.add_function(600, "f_clean", "varchar", 104);
    cluster.fail_on("DROP USER dave");
    let before = cluster.snapshot();
    let users = UserReconciler::new(context(&cluster));

    let error = users
        .delete(104, &User::new("dave", Password::Disabled))
        .await
        .unwrap_err();

    match error {
        ReconcileError::Statement { statement, .. } => assert_eq!(statement, "DROP USER dave"),
        other => panic!("unexpected error {other:?}"),
    }
    let executed = cluster.executed();
    assert!(executed.contains(&"ALTER FUNCTION staging.f_clean(varchar) OWNER TO admin".to_string()));
    assert!(cluster.journal().is_empty());
    assert_eq!(cluster.snapshot(), before);
}

#[rstest]
#[tokio::test]
async fn test_rename_reissues_password(cluster: MemoryCluster) {
    let users = UserReconciler::new(context(&cluster));
    let created = users
        .create(&User::new("erin", Password::Set("Secret123".to_string())))
        .await
        .unwrap();
    cluster.clear_journal();

    let declared = User::new("erin_ops", Password::Set("Secret123".to_string()));
    let observed = users
        .update(created.id, &created.attributes, &declared)
        .await
        .unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            "ALTER USER erin RENAME TO erin_ops",
            "ALTER USER erin_ops PASSWORD '********'",
        ]
    );
    assert_eq!(observed.attributes, declared);
    assert_eq!(
        cluster.snapshot().users[&created.id].password.as_deref(),
        Some("Secret123")
    );
}

#[rstest]
#[tokio::test]
async fn test_update_is_all_or_nothing(cluster: MemoryCluster) {
    let users = UserReconciler::new(context(&cluster));
    let previous = users.read(101, Some(&alice())).await.unwrap().attributes;
    let declared = User {
        createdb: true,
        connection_limit: ConnectionLimit::Limited(10),
        superuser: true,
        ..previous.clone()
    };
    cluster.fail_on("CONNECTION LIMIT 10");

    let error = users.update(101, &previous, &declared).await.unwrap_err();
    assert!(matches!(error, ReconcileError::Statement { .. }));
    assert_eq!(
        cluster.executed(),
        vec!["ALTER USER alice CREATEDB", "ALTER USER alice CONNECTION LIMIT 10"]
    );

    let after = users.read(101, Some(&previous)).await.unwrap().attributes;
    assert_eq!(after, previous);
}

#[rstest]
#[tokio::test]
async fn test_identical_update_issues_nothing(cluster: MemoryCluster) {
    let users = UserReconciler::new(context(&cluster));
    let previous = users.read(101, Some(&alice())).await.unwrap().attributes;

    let observed = users.update(101, &previous, &previous).await.unwrap();
    assert!(cluster.executed().is_empty());
    assert_eq!(observed.attributes, previous);
}

#[rstest]
#[tokio::test]
async fn test_expiry_round_trip(cluster: MemoryCluster) {
    let users = UserReconciler::new(context(&cluster));
    let declared = User {
        valid_until: Some(ValidUntil::new(
            NaiveDate::from_ymd_opt(2030, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )),
        ..User::new("frank", Password::Disabled)
    };

    let observed = users.create(&declared).await.unwrap();
    assert_eq!(observed.attributes, declared);
    assert!(users.exists(observed.id).await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_duplicate_user_is_a_statement_failure(cluster: MemoryCluster) {
    let users = UserReconciler::new(context(&cluster));

    let error = users.create(&alice()).await.unwrap_err();
    assert!(matches!(error, ReconcileError::Statement { ref object, .. } if object == "user alice"));
}
