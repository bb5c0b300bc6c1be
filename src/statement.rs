//! DDL and DCL statements issued against the cluster.
//!
//! Identifiers are interpolated as given: callers are expected to hand in
//! names that are already safe to embed. Literal values (passwords, expiry
//! timestamps) are quoted here.

use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::data_types::{
    ConnectionLimit, SchemaPrivilege, SyslogAccess, TablePrivilege, ValidUntil,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantee {
    Group(String),
    User(String),
}

impl Display for Grantee {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::Group(name) => write!(f, "GROUP {name}"),
            Grantee::User(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privileges {
    All,
    Table(Vec<TablePrivilege>),
    Schema(Vec<SchemaPrivilege>),
}

impl Display for Privileges {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Privileges::All => write!(f, "ALL"),
            Privileges::Table(privileges) => write!(f, "{}", privileges.iter().join(", ")),
            Privileges::Schema(privileges) => write!(f, "{}", privileges.iter().join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    /// Every table that currently exists in the schema
    AllTablesInSchema(String),
    /// Default privileges for tables created in the schema from now on
    FutureTablesInSchema(String),
    Schema(String),
}

/// An object owned by a principal that must change hands before the
/// principal can be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedObject {
    Function {
        schema: String,
        name: String,
        arguments: String,
    },
    Database {
        name: String,
    },
    Schema {
        name: String,
    },
    Table {
        schema: String,
        name: String,
    },
    View {
        schema: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    Unchanged,
    Until(ValidUntil),
    Never,
}

#[derive(Clone, PartialEq, Eq)]
pub struct CreateUser {
    pub name: String,
    /// `None` disables password sign-in
    pub password: Option<String>,
    pub valid_until: Option<ValidUntil>,
    pub createdb: bool,
    pub connection_limit: ConnectionLimit,
    pub syslog_access: SyslogAccess,
    pub superuser: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub enum UserChange {
    Rename(String),
    Password {
        password: Option<String>,
        expiry: Expiry,
    },
    CreateDb(bool),
    ConnectionLimit(ConnectionLimit),
    SyslogAccess(SyslogAccess),
    Superuser(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    Rename(String),
    AddUsers(Vec<String>),
    DropUsers(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseChange {
    Rename(String),
    Owner(String),
    ConnectionLimit(ConnectionLimit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Rename(String),
    Owner(String),
}

#[derive(Clone, PartialEq, Eq)]
pub enum Statement {
    CreateUser(CreateUser),
    AlterUser {
        name: String,
        change: UserChange,
    },
    DropUser {
        name: String,
    },
    CreateGroup {
        name: String,
        members: Vec<String>,
    },
    AlterGroup {
        name: String,
        change: GroupChange,
    },
    DropGroup {
        name: String,
    },
    CreateDatabase {
        name: String,
        owner: Option<String>,
        connection_limit: ConnectionLimit,
    },
    AlterDatabase {
        name: String,
        change: DatabaseChange,
    },
    DropDatabase {
        name: String,
    },
    CreateSchema {
        name: String,
        owner: Option<String>,
    },
    AlterSchema {
        name: String,
        change: SchemaChange,
    },
    DropSchema {
        name: String,
        cascade: bool,
    },
    Grant {
        privileges: Privileges,
        target: GrantTarget,
        grantee: Grantee,
    },
    Revoke {
        privileges: Privileges,
        target: GrantTarget,
        grantee: Grantee,
    },
    AlterOwner {
        object: OwnedObject,
        owner: String,
    },
}

/// Renders a statement with every password literal masked.
pub struct Redacted<'a>(&'a Statement);

impl Display for Redacted<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.write_sql(f, true)
    }
}

impl Statement {
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }

    /// The cluster refuses to run these inside a transaction block
    pub fn requires_autocommit(&self) -> bool {
        matches!(
            self,
            Statement::CreateDatabase { .. } | Statement::DropDatabase { .. }
        )
    }

    fn write_sql(&self, f: &mut Formatter<'_>, redact: bool) -> fmt::Result {
        let literal = |value: &str| {
            if redact {
                "'********'".to_string()
            } else {
                quote_literal(value)
            }
        };

        match self {
            Statement::CreateUser(create) => {
                write!(f, "CREATE USER {} PASSWORD ", create.name)?;
                match &create.password {
                    Some(password) => write!(f, "{}", literal(password))?,
                    None => write!(f, "DISABLE")?,
                }
                if let Some(valid_until) = &create.valid_until {
                    write!(f, " VALID UNTIL {}", quote_literal(&valid_until.to_string()))?;
                }
                write!(
                    f,
                    " {} CONNECTION LIMIT {} SYSLOG ACCESS {} {}",
                    if create.createdb { "CREATEDB" } else { "NOCREATEDB" },
                    create.connection_limit,
                    create.syslog_access,
                    if create.superuser {
                        "CREATEUSER"
                    } else {
                        "NOCREATEUSER"
                    },
                )
            }
            Statement::AlterUser { name, change } => {
                write!(f, "ALTER USER {name} ")?;
                match change {
                    UserChange::Rename(new_name) => write!(f, "RENAME TO {new_name}"),
                    UserChange::Password {
                        password: None, ..
                    } => write!(f, "PASSWORD DISABLE"),
                    UserChange::Password {
                        password: Some(password),
                        expiry,
                    } => {
                        write!(f, "PASSWORD {}", literal(password))?;
                        match expiry {
                            Expiry::Unchanged => Ok(()),
                            Expiry::Until(valid_until) => write!(
                                f,
                                " VALID UNTIL {}",
                                quote_literal(&valid_until.to_string())
                            ),
                            Expiry::Never => write!(f, " VALID UNTIL 'infinity'"),
                        }
                    }
                    UserChange::CreateDb(true) => write!(f, "CREATEDB"),
                    UserChange::CreateDb(false) => write!(f, "NOCREATEDB"),
                    UserChange::ConnectionLimit(limit) => write!(f, "CONNECTION LIMIT {limit}"),
                    UserChange::SyslogAccess(access) => write!(f, "SYSLOG ACCESS {access}"),
                    UserChange::Superuser(true) => write!(f, "CREATEUSER"),
                    UserChange::Superuser(false) => write!(f, "NOCREATEUSER"),
                }
            }
            Statement::DropUser { name } => write!(f, "DROP USER {name}"),
            Statement::CreateGroup { name, members } => {
                write!(f, "CREATE GROUP {name}")?;
                if !members.is_empty() {
                    write!(f, " WITH USER {}", members.join(", "))?;
                }
                Ok(())
            }
            Statement::AlterGroup { name, change } => match change {
                GroupChange::Rename(new_name) => {
                    write!(f, "ALTER GROUP {name} RENAME TO {new_name}")
                }
                GroupChange::AddUsers(users) => {
                    write!(f, "ALTER GROUP {name} ADD USER {}", users.join(", "))
                }
                GroupChange::DropUsers(users) => {
                    write!(f, "ALTER GROUP {name} DROP USER {}", users.join(", "))
                }
            },
            Statement::DropGroup { name } => write!(f, "DROP GROUP {name}"),
            Statement::CreateDatabase {
                name,
                owner,
                connection_limit,
            } => {
                write!(f, "CREATE DATABASE {name}")?;
                if let Some(owner) = owner {
                    write!(f, " OWNER {owner}")?;
                }
                write!(f, " CONNECTION LIMIT {connection_limit}")
            }
            Statement::AlterDatabase { name, change } => match change {
                DatabaseChange::Rename(new_name) => {
                    write!(f, "ALTER DATABASE {name} RENAME TO {new_name}")
                }
                DatabaseChange::Owner(owner) => {
                    write!(f, "ALTER DATABASE {name} OWNER TO {owner}")
                }
                DatabaseChange::ConnectionLimit(limit) => {
                    write!(f, "ALTER DATABASE {name} CONNECTION LIMIT {limit}")
                }
            },
            Statement::DropDatabase { name } => write!(f, "DROP DATABASE {name}"),
            Statement::CreateSchema { name, owner } => {
                write!(f, "CREATE SCHEMA {name}")?;
                if let Some(owner) = owner {
                    write!(f, " AUTHORIZATION {owner}")?;
                }
                Ok(())
            }
            Statement::AlterSchema { name, change } => match change {
                SchemaChange::Rename(new_name) => {
                    write!(f, "ALTER SCHEMA {name} RENAME TO {new_name}")
                }
                SchemaChange::Owner(owner) => write!(f, "ALTER SCHEMA {name} OWNER TO {owner}"),
            },
            Statement::DropSchema { name, cascade } => {
                write!(f, "DROP SCHEMA {name}")?;
                if *cascade {
                    write!(f, " CASCADE")?;
                }
                Ok(())
            }
            Statement::Grant {
                privileges,
                target,
                grantee,
            } => match target {
                GrantTarget::AllTablesInSchema(schema) => write!(
                    f,
                    "GRANT {privileges} ON ALL TABLES IN SCHEMA {schema} TO {grantee}"
                ),
                GrantTarget::FutureTablesInSchema(schema) => write!(
                    f,
                    "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT {privileges} ON TABLES TO {grantee}"
                ),
                GrantTarget::Schema(schema) => {
                    write!(f, "GRANT {privileges} ON SCHEMA {schema} TO {grantee}")
                }
            },
            Statement::Revoke {
                privileges,
                target,
                grantee,
            } => match target {
                GrantTarget::AllTablesInSchema(schema) => write!(
                    f,
                    "REVOKE {privileges} ON ALL TABLES IN SCHEMA {schema} FROM {grantee}"
                ),
                GrantTarget::FutureTablesInSchema(schema) => write!(
                    f,
                    "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} REVOKE {privileges} ON TABLES FROM {grantee}"
                ),
                GrantTarget::Schema(schema) => {
                    write!(f, "REVOKE {privileges} ON SCHEMA {schema} FROM {grantee}")
                }
            },
            Statement::AlterOwner { object, owner } => match object {
                OwnedObject::Function {
                    schema,
                    name,
                    arguments,
                } => write!(
                    f,
                    "ALTER FUNCTION {schema}.{name}({arguments}) OWNER TO {owner}"
                ),
                OwnedObject::Database { name } => {
                    write!(f, "ALTER DATABASE {name} OWNER TO {owner}")
                }
                OwnedObject::Schema { name } => write!(f, "ALTER SCHEMA {name} OWNER TO {owner}"),
                // Redshift changes view ownership through ALTER TABLE as well
                OwnedObject::Table { schema, name } | OwnedObject::View { schema, name } => {
                    write!(f, "ALTER TABLE {schema}.{name} OWNER TO {owner}")
                }
            },
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write_sql(f, false)
    }
}

// Passwords can reach Debug output through error chains, so Debug is the
// redacted rendering.
impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Statement({})", self.redacted())
    }
}

impl fmt::Debug for CreateUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Statement::CreateUser(self.clone()))
    }
}

impl fmt::Debug for UserChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UserChange::Password { password, expiry } => f
                .debug_struct("Password")
                .field("disabled", &password.is_none())
                .field("expiry", expiry)
                .finish(),
            UserChange::Rename(name) => f.debug_tuple("Rename").field(name).finish(),
            UserChange::CreateDb(flag) => f.debug_tuple("CreateDb").field(flag).finish(),
            UserChange::ConnectionLimit(limit) => {
                f.debug_tuple("ConnectionLimit").field(limit).finish()
            }
            UserChange::SyslogAccess(access) => {
                f.debug_tuple("SyslogAccess").field(access).finish()
            }
            UserChange::Superuser(flag) => f.debug_tuple("Superuser").field(flag).finish(),
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
