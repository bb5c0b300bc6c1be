//! Reads one object back from the catalog and decodes the packed text forms
//! (member lists, ACL strings) into attribute structs.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::data_types::{
    ConnectionLimit, Database, DatabaseId, Group, GroupId, ObjectKind, ParseError, Password,
    PrivilegeBinding, PrivilegeBindingId, Schema, SchemaId, SchemaPrivilege,
    TablePrivilege, User, UserId, ValidUntil,
};
use crate::repository::interface::{
    OwnedObjectRecord, SchemaRecord, Transaction,
};
use crate::statement::OwnedObject;

use super::{query_error, ReconcileError, Result};

fn decode_error(object: impl Into<String>, reason: impl ToString) -> ReconcileError {
    ReconcileError::Decode {
        object: object.into(),
        reason: reason.to_string(),
    }
}

/// Parse a member list as reported by `pg_group.grolist`: either the bare
/// `101,102` form or the array literal `{101,102}`.
pub fn decode_member_list(list: Option<&str>) -> Result<BTreeSet<UserId>, String> {
    let Some(list) = list else {
        return Ok(BTreeSet::new());
    };

    list.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<UserId>()
                .map_err(|_| format!("invalid member id {item:?} in {list:?}"))
        })
        .collect()
}

/// The privilege letters granted to `group <name>` in a `|` separated ACL,
/// e.g. `rw` for `group analysts=rw/admin`. `None` if the group has no item.
pub fn group_privilege_codes(acl: &str, group: &str) -> Option<String> {
    let grantee = format!("group {group}");

    acl.split('|')
        .filter_map(|item| item.trim().split_once('='))
        .find(|(item_grantee, _)| item_grantee.trim_matches('"') == grantee)
        .map(|(_, rest)| {
            rest.split_once('/')
                .map(|(codes, _)| codes)
                .unwrap_or(rest)
                .to_string()
        })
}

pub fn decode_table_privileges(codes: &str) -> BTreeSet<TablePrivilege> {
    TablePrivilege::ALL
        .into_iter()
        .filter(|privilege| codes.contains(privilege.acl_code()))
        .collect()
}

pub fn decode_schema_privileges(codes: &str) -> BTreeSet<SchemaPrivilege> {
    SchemaPrivilege::ALL
        .into_iter()
        .filter(|privilege| codes.contains(privilege.acl_code()))
        .collect()
}

/// `None` for a missing or `infinity` expiry
pub fn decode_valid_until(value: Option<&str>) -> Result<Option<ValidUntil>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("infinity") => Ok(None),
        Some(v) => ValidUntil::from_str(v).map(Some).map_err(|e| e.to_string()),
    }
}

pub fn decode_connection_limit(value: Option<&str>) -> Result<ConnectionLimit, String> {
    match value {
        None => Ok(ConnectionLimit::Unlimited),
        Some(v) => v.parse().map_err(|e: ParseError| e.to_string()),
    }
}

fn rank(object: &OwnedObject) -> u8 {
    match object {
        OwnedObject::Function { .. } => 0,
        OwnedObject::Database { .. } => 1,
        OwnedObject::Schema { .. } => 2,
        OwnedObject::Table { .. } | OwnedObject::View { .. } => 3,
    }
}

/// Decode owned objects, ordered functions first, then databases, schemas
/// and relations.
pub fn decode_owned_objects(records: Vec<OwnedObjectRecord>) -> Result<Vec<OwnedObject>, String> {
    let mut objects = records
        .into_iter()
        .map(|record| {
            let schema = || {
                record
                    .schema
                    .clone()
                    .ok_or_else(|| format!("{} {} has no schema", record.kind, record.name))
            };
            Ok(match record.kind.as_str() {
                "function" => OwnedObject::Function {
                    schema: schema()?,
                    name: record.name.clone(),
                    arguments: record.arguments.clone().unwrap_or_default(),
                },
                "database" => OwnedObject::Database {
                    name: record.name.clone(),
                },
                "schema" => OwnedObject::Schema {
                    name: record.name.clone(),
                },
                "table" => OwnedObject::Table {
                    schema: schema()?,
                    name: record.name.clone(),
                },
                "view" => OwnedObject::View {
                    schema: schema()?,
                    name: record.name.clone(),
                },
                other => return Err(format!("unknown object kind {other:?}")),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    objects.sort_by_key(rank);
    Ok(objects)
}

pub async fn read_user(
    tx: &mut dyn Transaction,
    id: UserId,
    prior: Option<&User>,
) -> Result<User> {
    let object = format!("user {id}");
    let record = tx
        .get_user(id)
        .await
        .map_err(query_error(object.clone()))?
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::User, id))?;

    Ok(User {
        name: record.usename,
        password: prior
            .map(|prior| prior.password.clone())
            .unwrap_or(Password::Unknown),
        valid_until: decode_valid_until(record.valuntil.as_deref())
            .map_err(|e| decode_error(object.clone(), e))?,
        connection_limit: decode_connection_limit(record.useconnlimit.as_deref())
            .map_err(|e| decode_error(object.clone(), e))?,
        syslog_access: prior
            .map(|prior| prior.syslog_access)
            .unwrap_or_default(),
        createdb: record.usecreatedb,
        superuser: record.usesuper,
    })
}

pub async fn read_group(tx: &mut dyn Transaction, id: GroupId) -> Result<Group> {
    let object = format!("group {id}");
    let record = tx
        .get_group(id)
        .await
        .map_err(query_error(object.clone()))?
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Group, id))?;

    Ok(Group {
        name: record.groname,
        members: decode_member_list(record.grolist.as_deref())
            .map_err(|e| decode_error(object, e))?,
    })
}

pub async fn read_database(tx: &mut dyn Transaction, id: DatabaseId) -> Result<Database> {
    let object = format!("database {id}");
    let record = tx
        .get_database(id)
        .await
        .map_err(query_error(object.clone()))?
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Database, id))?;

    Ok(Database {
        name: record.datname,
        owner: Some(record.datdba),
        connection_limit: decode_connection_limit(record.datconnlimit.as_deref())
            .map_err(|e| decode_error(object, e))?,
    })
}

pub async fn read_schema_record(tx: &mut dyn Transaction, id: SchemaId) -> Result<SchemaRecord> {
    tx.get_schema(id)
        .await
        .map_err(query_error(format!("schema {id}")))?
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Schema, id))
}

pub async fn read_schema(
    tx: &mut dyn Transaction,
    id: SchemaId,
    prior: Option<&Schema>,
) -> Result<Schema> {
    let record = read_schema_record(tx, id).await?;

    Ok(Schema {
        name: record.nspname,
        owner: Some(record.nspowner),
        cascade_on_delete: prior.map(|prior| prior.cascade_on_delete).unwrap_or(false),
    })
}

/// Names of every schema a principal can hold privileges in, `public` included
pub async fn read_schema_names(tx: &mut dyn Transaction) -> Result<Vec<String>> {
    Ok(tx
        .list_schemas()
        .await
        .map_err(query_error("schemas".to_string()))?
        .into_iter()
        .map(|record| record.nspname)
        .collect())
}

pub async fn read_owned_objects(
    tx: &mut dyn Transaction,
    owner: UserId,
) -> Result<Vec<OwnedObject>> {
    let object = format!("objects owned by user {owner}");
    let records = tx
        .list_owned_objects(owner)
        .await
        .map_err(query_error(object.clone()))?;

    decode_owned_objects(records).map_err(|e| decode_error(object, e))
}

/// Table privileges come from the schema's default ACL (kept in step with
/// the direct grants), schema privileges from the schema ACL. A group with
/// no privilege left in either has no binding.
pub async fn read_binding(
    tx: &mut dyn Transaction,
    id: PrivilegeBindingId,
) -> Result<PrivilegeBinding> {
    let object = format!("privilege binding {id}");
    let schema = read_schema_record(tx, id.schema_id).await?;
    let group = tx
        .get_group(id.group_id)
        .await
        .map_err(query_error(object.clone()))?
        .ok_or_else(|| ReconcileError::not_found(ObjectKind::Group, id.group_id))?;

    let default_acl = tx
        .get_default_table_acl(schema.oid)
        .await
        .map_err(query_error(object.clone()))?;
    let schema_acl = tx
        .get_schema_acl(schema.oid)
        .await
        .map_err(query_error(object))?;

    let codes_in = |acl: Option<String>| {
        acl.and_then(|acl| group_privilege_codes(&acl, &group.groname))
            .unwrap_or_default()
    };

    let binding = PrivilegeBinding {
        schema_id: id.schema_id,
        group_id: id.group_id,
        table_privileges: decode_table_privileges(&codes_in(default_acl)),
        schema_privileges: decode_schema_privileges(&codes_in(schema_acl)),
    };

    if binding.is_empty() {
        return Err(ReconcileError::not_found(ObjectKind::PrivilegeBinding, id));
    }
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::none(None, vec![])]
    #[case::bare(Some("101,102"), vec![101, 102])]
    #[case::array(Some("{101,102}"), vec![101, 102])]
    #[case::single(Some("{7}"), vec![7])]
    #[case::empty_array(Some("{}"), vec![])]
    fn test_decode_member_list(#[case] list: Option<&str>, #[case] expected: Vec<UserId>) {
        assert_eq!(
            decode_member_list(list).unwrap(),
            expected.into_iter().collect()
        );
    }

    #[test]
    fn test_decode_member_list_rejects_garbage() {
        assert!(decode_member_list(Some("{101,abc}")).is_err());
    }

    #[rstest]
    #[case::single("group analysts=rw/admin", "analysts", Some("rw"))]
    #[case::among_others(
        "admin=arwdRxt/admin|group analysts=r/admin|group loaders=aw/admin",
        "analysts",
        Some("r")
    )]
    #[case::prefix_is_not_a_match("group analysts_ro=r/admin", "analysts", None)]
    #[case::user_item_is_not_a_group("analysts=r/admin", "analysts", None)]
    #[case::quoted("\"group analysts=UC/admin\"", "analysts", Some("UC"))]
    fn test_group_privilege_codes(
        #[case] acl: &str,
        #[case] group: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            group_privilege_codes(acl, group).as_deref(),
            expected
        );
    }

    #[test]
    fn test_decode_privileges() {
        assert_eq!(
            decode_table_privileges("arx"),
            BTreeSet::from([
                TablePrivilege::Select,
                TablePrivilege::Insert,
                TablePrivilege::References
            ])
        );
        assert_eq!(
            decode_schema_privileges("U"),
            BTreeSet::from([SchemaPrivilege::Usage])
        );
        assert!(decode_schema_privileges("rw").is_empty());
    }

    #[rstest]
    #[case::missing(None, None)]
    #[case::infinity(Some("infinity"), None)]
    #[case::timestamp(Some("2030-01-01 00:00:00"), Some("2030-01-01 00:00:00"))]
    #[case::with_offset(Some("2030-06-30 12:00:00+00"), Some("2030-06-30 12:00:00"))]
    fn test_decode_valid_until(#[case] value: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(
            decode_valid_until(value)
                .unwrap()
                .map(|v| v.to_string())
                .as_deref(),
            expected
        );
    }

    #[test]
    fn test_decode_owned_objects_orders_by_kind() {
        let record = |kind: &str, schema: Option<&str>, name: &str| OwnedObjectRecord {
            kind: kind.to_string(),
            schema: schema.map(str::to_string),
            name: name.to_string(),
            arguments: None,
        };

        let objects = decode_owned_objects(vec![
            record("table", Some("sales"), "orders"),
            record("schema", None, "sales"),
            record("function", Some("util"), "f_clean"),
            record("database", None, "warehouse"),
        ])
        .unwrap();

        assert_eq!(
            objects,
            vec![
                OwnedObject::Function {
                    schema: "util".to_string(),
                    name: "f_clean".to_string(),
                    arguments: "".to_string(),
                },
                OwnedObject::Database {
                    name: "warehouse".to_string()
                },
                OwnedObject::Schema {
                    name: "sales".to_string()
                },
                OwnedObject::Table {
                    schema: "sales".to_string(),
                    name: "orders".to_string()
                },
            ]
        );

        assert!(decode_owned_objects(vec![record("sequence", None, "s")]).is_err());
    }
}
