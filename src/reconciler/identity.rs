//! Name <-> id translation. Nothing is cached: names are mutable, so every
//! operation asks the catalog again.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::data_types::{DatabaseId, GroupId, ObjectKind, SchemaId, UserId};
use crate::repository::interface::Transaction;

use super::{query_error, ReconcileError, Result};

/// Usernames for `ids`, ordered by id. Fails if any id has no user.
pub async fn resolve_user_names(
    tx: &mut dyn Transaction,
    ids: &BTreeSet<UserId>,
) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let ids: Vec<UserId> = ids.iter().copied().collect();
    let names: HashMap<UserId, String> = tx
        .get_user_names(&ids)
        .await
        .map_err(query_error(format!("usernames of {ids:?}")))?
        .into_iter()
        .map(|record| (record.usesysid, record.usename))
        .collect();
    debug!(requested = ids.len(), found = names.len(), "Resolved usernames");

    ids.iter()
        .map(|id| {
            names
                .get(id)
                .cloned()
                .ok_or_else(|| ReconcileError::not_found(ObjectKind::User, id))
        })
        .collect()
}

pub async fn resolve_user_name(tx: &mut dyn Transaction, id: UserId) -> Result<String> {
    tx.get_user(id)
        .await
        .map_err(query_error(format!("user {id}")))?
        .map(|record| record.usename)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::User, id))
}

pub async fn resolve_user_id(tx: &mut dyn Transaction, name: &str) -> Result<UserId> {
    tx.get_user_by_name(name)
        .await
        .map_err(query_error(format!("user {name}")))?
        .map(|record| record.usesysid)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::User, name))
}

pub async fn resolve_group_name(tx: &mut dyn Transaction, id: GroupId) -> Result<String> {
    tx.get_group(id)
        .await
        .map_err(query_error(format!("group {id}")))?
        .map(|record| record.groname)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Group, id))
}

pub async fn resolve_group_id(tx: &mut dyn Transaction, name: &str) -> Result<GroupId> {
    tx.get_group_by_name(name)
        .await
        .map_err(query_error(format!("group {name}")))?
        .map(|record| record.grosysid)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Group, name))
}

pub async fn resolve_database_id(tx: &mut dyn Transaction, name: &str) -> Result<DatabaseId> {
    tx.get_database_by_name(name)
        .await
        .map_err(query_error(format!("database {name}")))?
        .map(|record| record.datid)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Database, name))
}

pub async fn resolve_schema_id(tx: &mut dyn Transaction, name: &str) -> Result<SchemaId> {
    tx.get_schema_by_name(name)
        .await
        .map_err(query_error(format!("schema {name}")))?
        .map(|record| record.oid)
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Schema, name))
}

/// Owner name for a declared owner id, `None` when no owner is declared
pub async fn resolve_owner(
    tx: &mut dyn Transaction,
    owner: Option<UserId>,
) -> Result<Option<String>> {
    match owner {
        Some(id) => resolve_user_name(tx, id).await.map(Some),
        None => Ok(None),
    }
}
