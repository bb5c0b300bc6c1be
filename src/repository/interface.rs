use std::fmt::Debug;

use async_trait::async_trait;
use strum_macros::Display;

use crate::data_types::{DatabaseId, GroupId, SchemaId, UserId};
use crate::statement::Statement;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub usesysid: UserId,
    pub usename: String,
    pub usecreatedb: bool,
    pub usesuper: bool,
    pub valuntil: Option<String>,
    pub useconnlimit: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct UserNameRecord {
    pub usesysid: UserId,
    pub usename: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub grosysid: GroupId,
    pub groname: String,
    /// Member ids, comma separated
    pub grolist: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub datid: DatabaseId,
    pub datname: String,
    pub datdba: UserId,
    pub datconnlimit: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct SchemaRecord {
    pub oid: SchemaId,
    pub nspname: String,
    pub nspowner: UserId,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct OwnedObjectRecord {
    /// One of `function`, `database`, `schema`, `table`, `view`
    pub kind: String,
    pub schema: Option<String>,
    pub name: String,
    pub arguments: Option<String>,
}

/// Whether statements run inside a transaction block or are committed one by
/// one as they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    Transaction,
    Autocommit,
}

/// Classification of cluster failures by SQLSTATE
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Object already exists: {0}")]
    DuplicateObject(sqlx::Error),

    #[error("Other objects depend on it: {0}")]
    DependentObjects(sqlx::Error),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(sqlx::Error),

    #[error("Undefined object: {0}")]
    UndefinedObject(sqlx::Error),

    /// Raised by backends that do not speak SQL on the wire
    #[error("Cluster rejected the request: {reason}")]
    Rejected { reason: String },

    // All other errors
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait Cluster: Send + Sync + Debug {
    async fn begin(&self, mode: Mode) -> Result<Box<dyn Transaction>>;
}

/// A single exclusively owned handle on the cluster. Every statement and
/// catalog query of one reconcile operation goes through the same handle.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<()>;

    async fn current_user(&mut self) -> Result<String>;

    async fn get_user(&mut self, id: UserId) -> Result<Option<UserRecord>>;

    async fn get_user_by_name(&mut self, name: &str) -> Result<Option<UserRecord>>;

    async fn get_user_names(&mut self, ids: &[UserId]) -> Result<Vec<UserNameRecord>>;

    async fn get_group(&mut self, id: GroupId) -> Result<Option<GroupRecord>>;

    async fn get_group_by_name(&mut self, name: &str) -> Result<Option<GroupRecord>>;

    async fn get_database(&mut self, id: DatabaseId) -> Result<Option<DatabaseRecord>>;

    async fn get_database_by_name(&mut self, name: &str)
        -> Result<Option<DatabaseRecord>>;

    async fn get_schema(&mut self, id: SchemaId) -> Result<Option<SchemaRecord>>;

    async fn get_schema_by_name(&mut self, name: &str) -> Result<Option<SchemaRecord>>;

    /// Every schema outside the catalog (`pg_*`, `information_schema`),
    /// `public` included
    async fn list_schemas(&mut self) -> Result<Vec<SchemaRecord>>;

    /// The schema ACL items joined with `|`
    async fn get_schema_acl(&mut self, id: SchemaId) -> Result<Option<String>>;

    /// The default table ACL items of the schema joined with `|`
    async fn get_default_table_acl(&mut self, id: SchemaId) -> Result<Option<String>>;

    async fn list_owned_objects(&mut self, owner: UserId) -> Result<Vec<OwnedObjectRecord>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
