//! An in-process cluster used to exercise reconcilers without a live
//! warehouse. Statements are applied to a copy of the catalog that replaces
//! the shared one on commit; every committed statement is journaled in its
//! redacted form.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::debug;

use crate::data_types::{
    ConnectionLimit, DatabaseId, GroupId, ObjectKind, SchemaId, SchemaPrivilege,
    SyslogAccess, TablePrivilege, UserId, ValidUntil, SYSTEM_OWNER_ID,
};
use crate::statement::{
    DatabaseChange, Expiry, GrantTarget, Grantee, GroupChange, OwnedObject, Privileges,
    SchemaChange, Statement, UserChange,
};

use super::interface::{
    Cluster, DatabaseRecord, Error, GroupRecord, Mode, OwnedObjectRecord, Result,
    SchemaRecord, Transaction, UserNameRecord, UserRecord,
};

/// The principal every session connects as
pub const MASTER_USER_ID: UserId = 100;
pub const MASTER_USER: &str = "admin";

const FIRST_ALLOCATED_ID: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AclGrantee {
    Group(GroupId),
    User(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclItem {
    pub grantee: AclGrantee,
    pub privileges: BTreeSet<char>,
    pub grantor: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    /// `None` when password sign-in is disabled
    pub password: Option<String>,
    pub valid_until: Option<ValidUntil>,
    pub createdb: bool,
    pub superuser: bool,
    pub connection_limit: ConnectionLimit,
    pub syslog_access: SyslogAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub members: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub owner: UserId,
    pub connection_limit: ConnectionLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub name: String,
    pub owner: UserId,
    pub acl: Vec<AclItem>,
    pub default_table_acl: Vec<AclItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEntry {
    pub schema: SchemaId,
    pub name: String,
    pub owner: UserId,
    pub view: bool,
    pub acl: Vec<AclItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub schema: SchemaId,
    pub name: String,
    pub arguments: String,
    pub owner: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    next_id: i64,
    pub users: BTreeMap<UserId, UserEntry>,
    pub groups: BTreeMap<GroupId, GroupEntry>,
    pub databases: BTreeMap<DatabaseId, DatabaseEntry>,
    pub schemas: BTreeMap<SchemaId, SchemaEntry>,
    pub relations: BTreeMap<i64, RelationEntry>,
    pub functions: BTreeMap<i64, FunctionEntry>,
}

fn rejected(reason: impl Into<String>) -> Error {
    Error::Rejected {
        reason: reason.into(),
    }
}

fn table_codes(privileges: &Privileges) -> Result<Vec<char>> {
    match privileges {
        Privileges::All => Ok(TablePrivilege::ALL.iter().map(|p| p.acl_code()).collect()),
        Privileges::Table(privileges) => {
            Ok(privileges.iter().map(|p| p.acl_code()).collect())
        }
        Privileges::Schema(_) => Err(rejected("invalid privilege type for tables")),
    }
}

fn schema_codes(privileges: &Privileges) -> Result<Vec<char>> {
    match privileges {
        Privileges::All => Ok(SchemaPrivilege::ALL.iter().map(|p| p.acl_code()).collect()),
        Privileges::Schema(privileges) => {
            Ok(privileges.iter().map(|p| p.acl_code()).collect())
        }
        Privileges::Table(_) => Err(rejected("invalid privilege type for schemas")),
    }
}

fn apply_acl(
    acl: &mut Vec<AclItem>,
    grantee: AclGrantee,
    codes: &[char],
    grant: bool,
    grantor: UserId,
) {
    match acl.iter_mut().find(|item| item.grantee == grantee) {
        Some(item) if grant => item.privileges.extend(codes),
        Some(item) => {
            for code in codes {
                item.privileges.remove(code);
            }
        }
        None if grant => acl.push(AclItem {
            grantee,
            privileges: codes.iter().copied().collect(),
            grantor,
        }),
        None => {}
    }
    acl.retain(|item| !item.privileges.is_empty());
}

impl ClusterState {
    fn new() -> Self {
        let mut state = Self {
            next_id: FIRST_ALLOCATED_ID,
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            databases: BTreeMap::new(),
            schemas: BTreeMap::new(),
            relations: BTreeMap::new(),
            functions: BTreeMap::new(),
        };

        for (id, name) in [(SYSTEM_OWNER_ID, "rdsdb"), (MASTER_USER_ID, MASTER_USER)] {
            state.users.insert(
                id,
                UserEntry {
                    name: name.to_string(),
                    password: None,
                    valid_until: None,
                    createdb: true,
                    superuser: true,
                    connection_limit: ConnectionLimit::Unlimited,
                    syslog_access: SyslogAccess::Unrestricted,
                },
            );
        }
        for (id, name) in [(11, "pg_catalog"), (2200, "public")] {
            state.schemas.insert(
                id,
                SchemaEntry {
                    name: name.to_string(),
                    owner: SYSTEM_OWNER_ID,
                    acl: vec![],
                    default_table_acl: vec![],
                },
            );
        }
        state
    }

    fn allocate_id(&mut self) -> i64 {
        while self.id_in_use(self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn id_in_use(&self, id: i64) -> bool {
        self.users.contains_key(&id)
            || self.groups.contains_key(&id)
            || self.databases.contains_key(&id)
            || self.schemas.contains_key(&id)
            || self.relations.contains_key(&id)
            || self.functions.contains_key(&id)
    }

    fn find_user(&self, name: &str) -> Option<UserId> {
        self.users
            .iter()
            .find(|(_, user)| user.name == name)
            .map(|(id, _)| *id)
    }

    fn find_group(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|(_, group)| group.name == name)
            .map(|(id, _)| *id)
    }

    fn find_database(&self, name: &str) -> Option<DatabaseId> {
        self.databases
            .iter()
            .find(|(_, database)| database.name == name)
            .map(|(id, _)| *id)
    }

    fn find_schema(&self, name: &str) -> Option<SchemaId> {
        self.schemas
            .iter()
            .find(|(_, schema)| schema.name == name)
            .map(|(id, _)| *id)
    }

    fn user_id(&self, name: &str) -> Result<UserId> {
        self.find_user(name)
            .ok_or_else(|| rejected(format!("user \"{name}\" does not exist")))
    }

    fn group_id(&self, name: &str) -> Result<GroupId> {
        self.find_group(name)
            .ok_or_else(|| rejected(format!("group \"{name}\" does not exist")))
    }

    fn database_id(&self, name: &str) -> Result<DatabaseId> {
        self.find_database(name)
            .ok_or_else(|| rejected(format!("database \"{name}\" does not exist")))
    }

    fn schema_id(&self, name: &str) -> Result<SchemaId> {
        self.find_schema(name)
            .ok_or_else(|| rejected(format!("schema \"{name}\" does not exist")))
    }

    fn owner_id(&self, owner: &Option<String>, session_user: UserId) -> Result<UserId> {
        match owner {
            Some(name) => self.user_id(name),
            None => Ok(session_user),
        }
    }

    fn acl_grantee(&self, grantee: &Grantee) -> Result<AclGrantee> {
        match grantee {
            Grantee::Group(name) => self.group_id(name).map(AclGrantee::Group),
            Grantee::User(name) => self.user_id(name).map(AclGrantee::User),
        }
    }

    fn owns_objects(&self, user: UserId) -> bool {
        self.databases.values().any(|d| d.owner == user)
            || self.schemas.values().any(|s| s.owner == user)
            || self.relations.values().any(|r| r.owner == user)
            || self.functions.values().any(|f| f.owner == user)
    }

    fn holds_grants(&self, grantee: AclGrantee) -> bool {
        self.schemas.values().any(|schema| {
            schema
                .acl
                .iter()
                .chain(schema.default_table_acl.iter())
                .any(|item| item.grantee == grantee)
        }) || self
            .relations
            .values()
            .any(|relation| relation.acl.iter().any(|item| item.grantee == grantee))
    }

    fn render_acl(&self, acl: &[AclItem]) -> Option<String> {
        if acl.is_empty() {
            return None;
        }

        let name_of = |id: &UserId| {
            self.users
                .get(id)
                .map(|user| user.name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        Some(
            acl.iter()
                .map(|item| {
                    let grantee = match item.grantee {
                        AclGrantee::Group(id) => format!(
                            "group {}",
                            self.groups
                                .get(&id)
                                .map(|group| group.name.clone())
                                .unwrap_or_else(|| id.to_string())
                        ),
                        AclGrantee::User(id) => name_of(&id),
                    };
                    format!(
                        "{grantee}={}/{}",
                        item.privileges.iter().collect::<String>(),
                        name_of(&item.grantor)
                    )
                })
                .join("|"),
        )
    }

    fn update_acls(
        &mut self,
        target: &GrantTarget,
        privileges: &Privileges,
        grantee: &Grantee,
        grant: bool,
        grantor: UserId,
    ) -> Result<()> {
        let grantee = self.acl_grantee(grantee)?;

        match target {
            GrantTarget::Schema(name) => {
                let codes = schema_codes(privileges)?;
                let id = self.schema_id(name)?;
                if let Some(schema) = self.schemas.get_mut(&id) {
                    apply_acl(&mut schema.acl, grantee, &codes, grant, grantor);
                }
            }
            GrantTarget::AllTablesInSchema(name) => {
                let codes = table_codes(privileges)?;
                let id = self.schema_id(name)?;
                for relation in self.relations.values_mut().filter(|r| r.schema == id) {
                    apply_acl(&mut relation.acl, grantee, &codes, grant, grantor);
                }
            }
            GrantTarget::FutureTablesInSchema(name) => {
                let codes = table_codes(privileges)?;
                let id = self.schema_id(name)?;
                if let Some(schema) = self.schemas.get_mut(&id) {
                    apply_acl(&mut schema.default_table_acl, grantee, &codes, grant, grantor);
                }
            }
        }
        Ok(())
    }

    fn ensure_user_name_free(&self, name: &str) -> Result<()> {
        match self.find_user(name) {
            Some(_) => Err(rejected(format!("user \"{name}\" already exists"))),
            None => Ok(()),
        }
    }

    fn apply(&mut self, statement: &Statement, mode: Mode, session_user: UserId) -> Result<()> {
        if statement.requires_autocommit() && mode == Mode::Transaction {
            return Err(rejected(format!(
                "{} cannot run inside a transaction block",
                statement.redacted()
            )));
        }

        match statement {
            Statement::CreateUser(create) => {
                self.ensure_user_name_free(&create.name)?;
                let id = self.allocate_id();
                self.users.insert(
                    id,
                    UserEntry {
                        name: create.name.clone(),
                        password: create.password.clone(),
                        valid_until: create.valid_until,
                        createdb: create.createdb,
                        superuser: create.superuser,
                        connection_limit: create.connection_limit,
                        syslog_access: create.syslog_access,
                    },
                );
            }
            Statement::AlterUser { name, change } => {
                let id = self.user_id(name)?;
                if let UserChange::Rename(new_name) = change {
                    self.ensure_user_name_free(new_name)?;
                }
                let Some(user) = self.users.get_mut(&id) else {
                    return Err(rejected(format!("user \"{name}\" does not exist")));
                };
                match change {
                    UserChange::Rename(new_name) => user.name = new_name.clone(),
                    UserChange::Password { password, expiry } => {
                        user.password = password.clone();
                        match expiry {
                            Expiry::Unchanged => {}
                            Expiry::Until(valid_until) => user.valid_until = Some(*valid_until),
                            Expiry::Never => user.valid_until = None,
                        }
                    }
                    UserChange::CreateDb(flag) => user.createdb = *flag,
                    UserChange::ConnectionLimit(limit) => user.connection_limit = *limit,
                    UserChange::SyslogAccess(access) => user.syslog_access = *access,
                    UserChange::Superuser(flag) => user.superuser = *flag,
                }
            }
            Statement::DropUser { name } => {
                let id = self.user_id(name)?;
                if self.owns_objects(id) {
                    return Err(rejected(format!(
                        "user \"{name}\" can't be dropped because the user owns some object"
                    )));
                }
                if self.holds_grants(AclGrantee::User(id)) {
                    return Err(rejected(format!(
                        "user \"{name}\" can't be dropped because the user has a privilege on some object"
                    )));
                }
                self.users.remove(&id);
                for group in self.groups.values_mut() {
                    group.members.remove(&id);
                }
            }
            Statement::CreateGroup { name, members } => {
                if self.find_group(name).is_some() {
                    return Err(rejected(format!("group \"{name}\" already exists")));
                }
                let members = members
                    .iter()
                    .map(|member| self.user_id(member))
                    .collect::<Result<BTreeSet<_>>>()?;
                let id = self.allocate_id();
                self.groups.insert(
                    id,
                    GroupEntry {
                        name: name.clone(),
                        members,
                    },
                );
            }
            Statement::AlterGroup { name, change } => {
                let id = self.group_id(name)?;
                let users = match change {
                    GroupChange::AddUsers(users) | GroupChange::DropUsers(users) => users
                        .iter()
                        .map(|user| self.user_id(user))
                        .collect::<Result<Vec<_>>>()?,
                    GroupChange::Rename(new_name) => {
                        if self.find_group(new_name).is_some() {
                            return Err(rejected(format!(
                                "group \"{new_name}\" already exists"
                            )));
                        }
                        vec![]
                    }
                };
                if let Some(group) = self.groups.get_mut(&id) {
                    match change {
                        GroupChange::Rename(new_name) => group.name = new_name.clone(),
                        GroupChange::AddUsers(_) => group.members.extend(users),
                        GroupChange::DropUsers(_) => {
                            for user in users {
                                group.members.remove(&user);
                            }
                        }
                    }
                }
            }
            Statement::DropGroup { name } => {
                let id = self.group_id(name)?;
                if self.holds_grants(AclGrantee::Group(id)) {
                    return Err(rejected(format!(
                        "cannot drop group {name} because it has privileges on some object"
                    )));
                }
                self.groups.remove(&id);
            }
            Statement::CreateDatabase {
                name,
                owner,
                connection_limit,
            } => {
                if self.find_database(name).is_some() {
                    return Err(rejected(format!("database \"{name}\" already exists")));
                }
                let owner = self.owner_id(owner, session_user)?;
                let id = self.allocate_id();
                self.databases.insert(
                    id,
                    DatabaseEntry {
                        name: name.clone(),
                        owner,
                        connection_limit: *connection_limit,
                    },
                );
            }
            Statement::AlterDatabase { name, change } => {
                let id = self.database_id(name)?;
                let owner = match change {
                    DatabaseChange::Owner(owner) => Some(self.user_id(owner)?),
                    DatabaseChange::Rename(new_name) => {
                        if self.find_database(new_name).is_some() {
                            return Err(rejected(format!(
                                "database \"{new_name}\" already exists"
                            )));
                        }
                        None
                    }
                    DatabaseChange::ConnectionLimit(_) => None,
                };
                if let Some(database) = self.databases.get_mut(&id) {
                    match change {
                        DatabaseChange::Rename(new_name) => database.name = new_name.clone(),
                        DatabaseChange::Owner(_) => {
                            database.owner = owner.unwrap_or(database.owner)
                        }
                        DatabaseChange::ConnectionLimit(limit) => {
                            database.connection_limit = *limit
                        }
                    }
                }
            }
            Statement::DropDatabase { name } => {
                let id = self.database_id(name)?;
                self.databases.remove(&id);
            }
            Statement::CreateSchema { name, owner } => {
                if self.find_schema(name).is_some() {
                    return Err(rejected(format!("schema \"{name}\" already exists")));
                }
                let owner = self.owner_id(owner, session_user)?;
                let id = self.allocate_id();
                self.schemas.insert(
                    id,
                    SchemaEntry {
                        name: name.clone(),
                        owner,
                        acl: vec![],
                        default_table_acl: vec![],
                    },
                );
            }
            Statement::AlterSchema { name, change } => {
                let id = self.schema_id(name)?;
                let owner = match change {
                    SchemaChange::Owner(owner) => Some(self.user_id(owner)?),
                    SchemaChange::Rename(new_name) => {
                        if self.find_schema(new_name).is_some() {
                            return Err(rejected(format!(
                                "schema \"{new_name}\" already exists"
                            )));
                        }
                        None
                    }
                };
                if let Some(schema) = self.schemas.get_mut(&id) {
                    match change {
                        SchemaChange::Rename(new_name) => schema.name = new_name.clone(),
                        SchemaChange::Owner(_) => schema.owner = owner.unwrap_or(schema.owner),
                    }
                }
            }
            Statement::DropSchema { name, cascade } => {
                let id = self.schema_id(name)?;
                let has_dependents = self.relations.values().any(|r| r.schema == id)
                    || self.functions.values().any(|f| f.schema == id);
                if has_dependents && !cascade {
                    return Err(rejected(format!(
                        "cannot drop schema {name} because other objects depend on it"
                    )));
                }
                self.relations.retain(|_, relation| relation.schema != id);
                self.functions.retain(|_, function| function.schema != id);
                self.schemas.remove(&id);
            }
            Statement::Grant {
                privileges,
                target,
                grantee,
            } => self.update_acls(target, privileges, grantee, true, session_user)?,
            Statement::Revoke {
                privileges,
                target,
                grantee,
            } => self.update_acls(target, privileges, grantee, false, session_user)?,
            Statement::AlterOwner { object, owner } => {
                let owner = self.user_id(owner)?;
                self.reassign(object, owner)?;
            }
        }
        Ok(())
    }

    fn reassign(&mut self, object: &OwnedObject, owner: UserId) -> Result<()> {
        match object {
            OwnedObject::Function {
                schema,
                name,
                arguments,
            } => {
                let schema_id = self.schema_id(schema)?;
                let function = self
                    .functions
                    .values_mut()
                    .find(|f| f.schema == schema_id && &f.name == name && &f.arguments == arguments)
                    .ok_or_else(|| {
                        rejected(format!("function {schema}.{name}({arguments}) does not exist"))
                    })?;
                function.owner = owner;
            }
            OwnedObject::Database { name } => {
                let id = self.database_id(name)?;
                if let Some(database) = self.databases.get_mut(&id) {
                    database.owner = owner;
                }
            }
            OwnedObject::Schema { name } => {
                let id = self.schema_id(name)?;
                if let Some(schema) = self.schemas.get_mut(&id) {
                    schema.owner = owner;
                }
            }
            OwnedObject::Table { schema, name } | OwnedObject::View { schema, name } => {
                let schema_id = self.schema_id(schema)?;
                let relation = self
                    .relations
                    .values_mut()
                    .find(|r| r.schema == schema_id && &r.name == name)
                    .ok_or_else(|| {
                        rejected(format!("relation \"{schema}.{name}\" does not exist"))
                    })?;
                relation.owner = owner;
            }
        }
        Ok(())
    }

    fn user_record(&self, id: UserId) -> Option<UserRecord> {
        self.users.get(&id).map(|user| UserRecord {
            usesysid: id,
            usename: user.name.clone(),
            usecreatedb: user.createdb,
            usesuper: user.superuser,
            valuntil: user.valid_until.map(|v| v.to_string()),
            useconnlimit: Some(user.connection_limit.to_string()),
        })
    }

    fn group_record(&self, id: GroupId) -> Option<GroupRecord> {
        self.groups.get(&id).map(|group| GroupRecord {
            grosysid: id,
            groname: group.name.clone(),
            grolist: if group.members.is_empty() {
                None
            } else {
                Some(group.members.iter().join(","))
            },
        })
    }

    fn database_record(&self, id: DatabaseId) -> Option<DatabaseRecord> {
        self.databases.get(&id).map(|database| DatabaseRecord {
            datid: id,
            datname: database.name.clone(),
            datdba: database.owner,
            datconnlimit: Some(database.connection_limit.to_string()),
        })
    }

    fn schema_record(&self, id: SchemaId) -> Option<SchemaRecord> {
        self.schemas.get(&id).map(|schema| SchemaRecord {
            oid: id,
            nspname: schema.name.clone(),
            nspowner: schema.owner,
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: ClusterState,
    journal: Vec<String>,
    executed: Vec<String>,
    queries: Vec<&'static str>,
    failures: Vec<String>,
    fail_begin: bool,
    convergence_lag: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// A cluster holding only the system principal `rdsdb` (id 1), the master
    /// user `admin` (id 100) and the system-owned `pg_catalog` and `public`
    /// schemas.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ClusterState::new(),
                journal: vec![],
                executed: vec![],
                queries: vec![],
                failures: vec![],
                fail_begin: false,
                convergence_lag: false,
            })),
        }
    }

    /// Hide objects created in a session from that session's by-name lookups
    pub fn with_convergence_lag(self) -> Self {
        self.inner.lock().convergence_lag = true;
        self
    }

    /// Make every statement whose text contains `pattern` fail
    pub fn fail_on(&self, pattern: &str) {
        self.inner.lock().failures.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    pub fn fail_begin(&self, fail: bool) {
        self.inner.lock().fail_begin = fail;
    }

    /// Redacted text of every committed statement, in order
    pub fn journal(&self) -> Vec<String> {
        self.inner.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    /// Redacted text of every attempted statement, committed or not
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Names of the catalog queries issued so far
    pub fn catalog_queries(&self) -> Vec<&'static str> {
        self.inner.lock().queries.clone()
    }

    pub fn snapshot(&self) -> ClusterState {
        self.inner.lock().state.clone()
    }

    pub fn add_user(&self, id: UserId, name: &str) -> UserId {
        self.inner.lock().state.users.insert(
            id,
            UserEntry {
                name: name.to_string(),
                password: None,
                valid_until: None,
                createdb: false,
                superuser: false,
                connection_limit: ConnectionLimit::Unlimited,
                syslog_access: SyslogAccess::Restricted,
            },
        );
        id
    }

    pub fn add_group(&self, id: GroupId, name: &str, members: &[UserId]) -> GroupId {
        self.inner.lock().state.groups.insert(
            id,
            GroupEntry {
                name: name.to_string(),
                members: members.iter().copied().collect(),
            },
        );
        id
    }

    pub fn add_database(&self, id: DatabaseId, name: &str, owner: UserId) -> DatabaseId {
        self.inner.lock().state.databases.insert(
            id,
            DatabaseEntry {
                name: name.to_string(),
                owner,
                connection_limit: ConnectionLimit::Unlimited,
            },
        );
        id
    }

    pub fn add_schema(&self, id: SchemaId, name: &str, owner: UserId) -> SchemaId {
        self.inner.lock().state.schemas.insert(
            id,
            SchemaEntry {
                name: name.to_string(),
                owner,
                acl: vec![],
                default_table_acl: vec![],
            },
        );
        id
    }

    /// Tables start with the default table privileges of their schema
    pub fn add_table(&self, schema: SchemaId, name: &str, owner: UserId) -> i64 {
        self.add_relation(schema, name, owner, false)
    }

    pub fn add_view(&self, schema: SchemaId, name: &str, owner: UserId) -> i64 {
        self.add_relation(schema, name, owner, true)
    }

    fn add_relation(&self, schema: SchemaId, name: &str, owner: UserId, view: bool) -> i64 {
        let mut inner = self.inner.lock();
        let acl = inner
            .state
            .schemas
            .get(&schema)
            .map(|s| s.default_table_acl.clone())
            .unwrap_or_default();
        let id = inner.state.allocate_id();
        inner.state.relations.insert(
            id,
            RelationEntry {
                schema,
                name: name.to_string(),
                owner,
                view,
                acl,
            },
        );
        id
    }

    pub fn add_function(
        &self,
        schema: SchemaId,
        name: &str,
        arguments: &str,
        owner: UserId,
    ) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.state.allocate_id();
        inner.state.functions.insert(
            id,
            FunctionEntry {
                schema,
                name: name.to_string(),
                arguments: arguments.to_string(),
                owner,
            },
        );
        id
    }

    /// The rendered ACL of a relation, as the catalog would report it
    pub fn relation_acl(&self, id: i64) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .state
            .relations
            .get(&id)
            .and_then(|relation| inner.state.render_acl(&relation.acl))
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn begin(&self, mode: Mode) -> Result<Box<dyn Transaction>> {
        let inner = self.inner.lock();
        if inner.fail_begin {
            return Err(rejected("could not open a session on the cluster"));
        }

        debug!(%mode, "Opening in-memory session");
        Ok(Box::new(MemoryTransaction {
            cluster: self.inner.clone(),
            mode,
            working: inner.state.clone(),
            pending: vec![],
            created: vec![],
            convergence_lag: inner.convergence_lag,
        }))
    }
}

pub struct MemoryTransaction {
    cluster: Arc<Mutex<Inner>>,
    mode: Mode,
    working: ClusterState,
    pending: Vec<String>,
    created: Vec<(ObjectKind, String)>,
    convergence_lag: bool,
}

impl MemoryTransaction {
    fn record_query(&self, query: &'static str) {
        self.cluster.lock().queries.push(query);
    }

    fn visible(&self, kind: ObjectKind, name: &str) -> bool {
        !(self.convergence_lag
            && self
                .created
                .iter()
                .any(|(created_kind, created)| *created_kind == kind && created == name))
    }
}

fn created_object(statement: &Statement) -> Option<(ObjectKind, String)> {
    match statement {
        Statement::CreateUser(create) => Some((ObjectKind::User, create.name.clone())),
        Statement::CreateGroup { name, .. } => Some((ObjectKind::Group, name.clone())),
        Statement::CreateDatabase { name, .. } => Some((ObjectKind::Database, name.clone())),
        Statement::CreateSchema { name, .. } => Some((ObjectKind::Schema, name.clone())),
        _ => None,
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let sql = statement.redacted().to_string();
        let injected = {
            let mut inner = self.cluster.lock();
            inner.executed.push(sql.clone());
            inner
                .failures
                .iter()
                .any(|pattern| statement.to_string().contains(pattern.as_str()))
        };
        if injected {
            return Err(rejected(format!("injected failure: {sql}")));
        }

        let mut next = self.working.clone();
        next.apply(statement, self.mode, MASTER_USER_ID)?;
        self.working = next;

        if let Some(created) = created_object(statement) {
            self.created.push(created);
        }

        match self.mode {
            Mode::Transaction => self.pending.push(sql),
            Mode::Autocommit => {
                let mut inner = self.cluster.lock();
                inner.state = self.working.clone();
                inner.journal.push(sql);
            }
        }
        Ok(())
    }

    async fn current_user(&mut self) -> Result<String> {
        self.record_query("current_user");
        self.working
            .users
            .get(&MASTER_USER_ID)
            .map(|user| user.name.clone())
            .ok_or_else(|| rejected("session user does not exist"))
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<UserRecord>> {
        self.record_query("get_user");
        Ok(self.working.user_record(id))
    }

    async fn get_user_by_name(&mut self, name: &str) -> Result<Option<UserRecord>> {
        self.record_query("get_user_by_name");
        if !self.visible(ObjectKind::User, name) {
            return Ok(None);
        }
        Ok(self
            .working
            .find_user(name)
            .and_then(|id| self.working.user_record(id)))
    }

    async fn get_user_names(&mut self, ids: &[UserId]) -> Result<Vec<UserNameRecord>> {
        self.record_query("get_user_names");
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.working.users.get(id).map(|user| UserNameRecord {
                    usesysid: *id,
                    usename: user.name.clone(),
                })
            })
            .collect())
    }

    async fn get_group(&mut self, id: GroupId) -> Result<Option<GroupRecord>> {
        self.record_query("get_group");
        Ok(self.working.group_record(id))
    }

    async fn get_group_by_name(&mut self, name: &str) -> Result<Option<GroupRecord>> {
        self.record_query("get_group_by_name");
        if !self.visible(ObjectKind::Group, name) {
            return Ok(None);
        }
        Ok(self
            .working
            .find_group(name)
            .and_then(|id| self.working.group_record(id)))
    }

    async fn get_database(&mut self, id: DatabaseId) -> Result<Option<DatabaseRecord>> {
        self.record_query("get_database");
        Ok(self.working.database_record(id))
    }

    async fn get_database_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<DatabaseRecord>> {
        self.record_query("get_database_by_name");
        if !self.visible(ObjectKind::Database, name) {
            return Ok(None);
        }
        Ok(self
            .working
            .find_database(name)
            .and_then(|id| self.working.database_record(id)))
    }

    async fn get_schema(&mut self, id: SchemaId) -> Result<Option<SchemaRecord>> {
        self.record_query("get_schema");
        Ok(self.working.schema_record(id))
    }

    async fn get_schema_by_name(&mut self, name: &str) -> Result<Option<SchemaRecord>> {
        self.record_query("get_schema_by_name");
        if !self.visible(ObjectKind::Schema, name) {
            return Ok(None);
        }
        Ok(self
            .working
            .find_schema(name)
            .and_then(|id| self.working.schema_record(id)))
    }

    async fn list_schemas(&mut self) -> Result<Vec<SchemaRecord>> {
        self.record_query("list_schemas");
        Ok(self
            .working
            .schemas
            .iter()
            .filter(|(_, schema)| {
                !schema.name.starts_with("pg_") && schema.name != "information_schema"
            })
            .sorted_by(|(_, a), (_, b)| a.name.cmp(&b.name))
            .map(|(id, schema)| SchemaRecord {
                oid: *id,
                nspname: schema.name.clone(),
                nspowner: schema.owner,
            })
            .collect())
    }

    async fn get_schema_acl(&mut self, id: SchemaId) -> Result<Option<String>> {
        self.record_query("get_schema_acl");
        Ok(self
            .working
            .schemas
            .get(&id)
            .and_then(|schema| self.working.render_acl(&schema.acl)))
    }

    async fn get_default_table_acl(&mut self, id: SchemaId) -> Result<Option<String>> {
        self.record_query("get_default_table_acl");
        Ok(self
            .working
            .schemas
            .get(&id)
            .and_then(|schema| self.working.render_acl(&schema.default_table_acl)))
    }

    async fn list_owned_objects(&mut self, owner: UserId) -> Result<Vec<OwnedObjectRecord>> {
        self.record_query("list_owned_objects");
        let state = &self.working;
        let schema_name = |id: &SchemaId| state.schemas.get(id).map(|s| s.name.clone());

        let functions = state
            .functions
            .values()
            .filter(|f| f.owner == owner)
            .map(|f| OwnedObjectRecord {
                kind: "function".to_string(),
                schema: schema_name(&f.schema),
                name: f.name.clone(),
                arguments: Some(f.arguments.clone()),
            });
        let databases = state
            .databases
            .values()
            .filter(|d| d.owner == owner)
            .map(|d| OwnedObjectRecord {
                kind: "database".to_string(),
                schema: None,
                name: d.name.clone(),
                arguments: None,
            });
        let schemas = state
            .schemas
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| OwnedObjectRecord {
                kind: "schema".to_string(),
                schema: None,
                name: s.name.clone(),
                arguments: None,
            });
        let relations = state
            .relations
            .values()
            .filter(|r| r.owner == owner)
            .map(|r| OwnedObjectRecord {
                kind: if r.view { "view" } else { "table" }.to_string(),
                schema: schema_name(&r.schema),
                name: r.name.clone(),
                arguments: None,
            });

        Ok(functions
            .chain(databases)
            .chain(schemas)
            .chain(relations)
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.mode == Mode::Transaction {
            let mut inner = self.cluster.lock();
            inner.state = self.working;
            inner.journal.extend(self.pending);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
