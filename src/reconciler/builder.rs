//! Plans the ordered statements for one reconcile operation.
//!
//! Everything here is pure: names are resolved by the caller and passed in,
//! nothing touches the cluster. Order within each returned plan is the order
//! of execution:
//!
//! * a rename comes before anything else that mentions the object by name;
//! * a user's password is re-issued after a rename or any credential change;
//! * every capability flag change is its own statement;
//! * a direct table grant/revoke is immediately followed by the matching
//!   default privilege grant/revoke;
//! * groups and principals lose every privilege before they are dropped.

use std::collections::BTreeSet;

use crate::data_types::{
    Database, Password, PrivilegeBinding, Schema, SchemaPrivilege, TablePrivilege, User,
};
use crate::statement::{
    CreateUser, DatabaseChange, Expiry, GrantTarget, Grantee, GroupChange, OwnedObject,
    Privileges, SchemaChange, Statement, UserChange,
};

use super::diff::diff;
use super::{ReconcileError, Result};

fn password_literal(user: &User) -> Result<Option<String>> {
    match &user.password {
        Password::Set(password) => Ok(Some(password.clone())),
        Password::Disabled => Ok(None),
        Password::Unknown => Err(ReconcileError::validation(format!(
            "the password of user {} must be declared (set or disabled)",
            user.name
        ))),
    }
}

pub fn create_user(user: &User) -> Result<Vec<Statement>> {
    Ok(vec![Statement::CreateUser(CreateUser {
        name: user.name.clone(),
        password: password_literal(user)?,
        valid_until: user.valid_until,
        createdb: user.createdb,
        connection_limit: user.connection_limit,
        syslog_access: user.syslog_access,
        superuser: user.superuser,
    })])
}

pub fn update_user(previous: &User, declared: &User) -> Result<Vec<Statement>> {
    let mut plan = vec![];
    let renamed = previous.name != declared.name;

    if renamed {
        plan.push(Statement::AlterUser {
            name: previous.name.clone(),
            change: UserChange::Rename(declared.name.clone()),
        });
    }

    // Renaming a user clears its MD5 password, so it has to be set again
    if renamed
        || previous.password != declared.password
        || previous.valid_until != declared.valid_until
    {
        let password = password_literal(declared)?;
        let expiry = match (password.is_some(), declared.valid_until) {
            (false, _) => Expiry::Unchanged,
            (true, Some(valid_until)) => Expiry::Until(valid_until),
            (true, None) if previous.valid_until.is_some() => Expiry::Never,
            (true, None) => Expiry::Unchanged,
        };
        plan.push(Statement::AlterUser {
            name: declared.name.clone(),
            change: UserChange::Password { password, expiry },
        });
    }

    let mut alter = |change: UserChange| {
        plan.push(Statement::AlterUser {
            name: declared.name.clone(),
            change,
        })
    };

    if previous.createdb != declared.createdb {
        alter(UserChange::CreateDb(declared.createdb));
    }
    if previous.connection_limit != declared.connection_limit {
        alter(UserChange::ConnectionLimit(declared.connection_limit));
    }
    if previous.syslog_access != declared.syslog_access {
        alter(UserChange::SyslogAccess(declared.syslog_access));
    }
    if previous.superuser != declared.superuser {
        alter(UserChange::Superuser(declared.superuser));
    }

    Ok(plan)
}

/// Strip every privilege the user holds, hand its objects to `new_owner`
/// and drop it. `owned` is expected in reassignment order.
pub fn delete_user(
    name: &str,
    schemas: &[String],
    owned: &[OwnedObject],
    new_owner: &str,
) -> Vec<Statement> {
    let grantee = Grantee::User(name.to_string());

    let mut plan: Vec<Statement> = schemas
        .iter()
        .flat_map(|schema| revoke_everything(schema, &grantee))
        .collect();
    plan.extend(owned.iter().map(|object| Statement::AlterOwner {
        object: object.clone(),
        owner: new_owner.to_string(),
    }));
    plan.push(Statement::DropUser {
        name: name.to_string(),
    });
    plan
}

pub fn create_group(name: &str, members: Vec<String>) -> Vec<Statement> {
    vec![Statement::CreateGroup {
        name: name.to_string(),
        members,
    }]
}

/// `dropped` and `added` are member usernames, already resolved
pub fn update_group(
    previous_name: &str,
    declared_name: &str,
    dropped: Vec<String>,
    added: Vec<String>,
) -> Vec<Statement> {
    let mut plan = vec![];

    if previous_name != declared_name {
        plan.push(Statement::AlterGroup {
            name: previous_name.to_string(),
            change: GroupChange::Rename(declared_name.to_string()),
        });
    }
    if !dropped.is_empty() {
        plan.push(Statement::AlterGroup {
            name: declared_name.to_string(),
            change: GroupChange::DropUsers(dropped),
        });
    }
    if !added.is_empty() {
        plan.push(Statement::AlterGroup {
            name: declared_name.to_string(),
            change: GroupChange::AddUsers(added),
        });
    }

    plan
}

pub fn delete_group(name: &str, schemas: &[String]) -> Vec<Statement> {
    let grantee = Grantee::Group(name.to_string());

    let mut plan: Vec<Statement> = schemas
        .iter()
        .flat_map(|schema| revoke_everything(schema, &grantee))
        .collect();
    plan.push(Statement::DropGroup {
        name: name.to_string(),
    });
    plan
}

pub fn create_database(declared: &Database, owner: Option<String>) -> Statement {
    Statement::CreateDatabase {
        name: declared.name.clone(),
        owner,
        connection_limit: declared.connection_limit,
    }
}

/// `owner` is the resolved name of `declared.owner`
pub fn update_database(
    previous: &Database,
    declared: &Database,
    owner: Option<String>,
) -> Vec<Statement> {
    let mut plan = vec![];

    if previous.name != declared.name {
        plan.push(Statement::AlterDatabase {
            name: previous.name.clone(),
            change: DatabaseChange::Rename(declared.name.clone()),
        });
    }
    if let Some(owner) = owner.filter(|_| declared.owner != previous.owner) {
        plan.push(Statement::AlterDatabase {
            name: declared.name.clone(),
            change: DatabaseChange::Owner(owner),
        });
    }
    if previous.connection_limit != declared.connection_limit {
        plan.push(Statement::AlterDatabase {
            name: declared.name.clone(),
            change: DatabaseChange::ConnectionLimit(declared.connection_limit),
        });
    }

    plan
}

pub fn drop_database(name: &str) -> Statement {
    Statement::DropDatabase {
        name: name.to_string(),
    }
}

pub fn create_schema(declared: &Schema, owner: Option<String>) -> Vec<Statement> {
    vec![Statement::CreateSchema {
        name: declared.name.clone(),
        owner,
    }]
}

/// `owner` is the resolved name of `declared.owner`
pub fn update_schema(
    previous: &Schema,
    declared: &Schema,
    owner: Option<String>,
) -> Vec<Statement> {
    let mut plan = vec![];

    if previous.name != declared.name {
        plan.push(Statement::AlterSchema {
            name: previous.name.clone(),
            change: SchemaChange::Rename(declared.name.clone()),
        });
    }
    if let Some(owner) = owner.filter(|_| declared.owner != previous.owner) {
        plan.push(Statement::AlterSchema {
            name: declared.name.clone(),
            change: SchemaChange::Owner(owner),
        });
    }

    plan
}

pub fn drop_schema(name: &str, cascade: bool) -> Vec<Statement> {
    vec![Statement::DropSchema {
        name: name.to_string(),
        cascade,
    }]
}

pub fn validate_binding(binding: &PrivilegeBinding) -> Result<()> {
    if binding.is_empty() {
        return Err(ReconcileError::validation(format!(
            "privilege binding {} must grant at least one table or schema privilege",
            binding.id()
        )));
    }
    Ok(())
}

pub fn grant_binding(schema: &str, group: &str, binding: &PrivilegeBinding) -> Vec<Statement> {
    let grantee = Grantee::Group(group.to_string());
    let mut plan = vec![];

    plan.extend(table_pair(
        true,
        schema,
        &grantee,
        &binding.table_privileges,
    ));
    plan.extend(schema_statement(
        true,
        schema,
        &grantee,
        &binding.schema_privileges,
    ));
    plan
}

/// Revokes what the previous binding granted and the declared one does not,
/// then grants what is new. An unchanged binding plans nothing.
pub fn update_binding(
    schema: &str,
    group: &str,
    previous: &PrivilegeBinding,
    declared: &PrivilegeBinding,
) -> Vec<Statement> {
    let grantee = Grantee::Group(group.to_string());
    let tables = diff(
        previous.table_privileges.iter().copied(),
        declared.table_privileges.iter().copied(),
    );
    let schemas = diff(
        previous.schema_privileges.iter().copied(),
        declared.schema_privileges.iter().copied(),
    );

    let mut plan = vec![];
    plan.extend(table_pair(false, schema, &grantee, &tables.removed));
    plan.extend(table_pair(true, schema, &grantee, &tables.added));
    plan.extend(schema_statement(false, schema, &grantee, &schemas.removed));
    plan.extend(schema_statement(true, schema, &grantee, &schemas.added));
    plan
}

pub fn revoke_binding(schema: &str, group: &str) -> Vec<Statement> {
    revoke_everything(schema, &Grantee::Group(group.to_string()))
}

fn grant_or_revoke(
    grant: bool,
    privileges: Privileges,
    target: GrantTarget,
    grantee: &Grantee,
) -> Statement {
    let grantee = grantee.clone();
    if grant {
        Statement::Grant {
            privileges,
            target,
            grantee,
        }
    } else {
        Statement::Revoke {
            privileges,
            target,
            grantee,
        }
    }
}

/// Direct statement on the existing tables, then the default privilege
/// statement for tables created later. Nothing for an empty set.
fn table_pair(
    grant: bool,
    schema: &str,
    grantee: &Grantee,
    privileges: &BTreeSet<TablePrivilege>,
) -> Vec<Statement> {
    if privileges.is_empty() {
        return vec![];
    }
    let privileges = Privileges::Table(privileges.iter().copied().collect());

    vec![
        grant_or_revoke(
            grant,
            privileges.clone(),
            GrantTarget::AllTablesInSchema(schema.to_string()),
            grantee,
        ),
        grant_or_revoke(
            grant,
            privileges,
            GrantTarget::FutureTablesInSchema(schema.to_string()),
            grantee,
        ),
    ]
}

fn schema_statement(
    grant: bool,
    schema: &str,
    grantee: &Grantee,
    privileges: &BTreeSet<SchemaPrivilege>,
) -> Option<Statement> {
    (!privileges.is_empty()).then(|| {
        grant_or_revoke(
            grant,
            Privileges::Schema(privileges.iter().copied().collect()),
            GrantTarget::Schema(schema.to_string()),
            grantee,
        )
    })
}

fn revoke_everything(schema: &str, grantee: &Grantee) -> Vec<Statement> {
    [
        GrantTarget::AllTablesInSchema(schema.to_string()),
        GrantTarget::FutureTablesInSchema(schema.to_string()),
        GrantTarget::Schema(schema.to_string()),
    ]
    .into_iter()
    .map(|target| grant_or_revoke(false, Privileges::All, target, grantee))
    .collect()
}
