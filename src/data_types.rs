use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{Display, EnumString};

pub type UserId = i64;
pub type GroupId = i64;
pub type DatabaseId = i64;
pub type SchemaId = i64;

/// Owner of the schemas the cluster creates for itself (`rdsdb`).
pub const SYSTEM_OWNER_ID: UserId = 1;

const REDACTED: &str = "********";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    User,
    Group,
    Database,
    Schema,
    PrivilegeBinding,
}

/// Identity of a schema privilege binding, rendered as `<schema_id>_<group_id>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PrivilegeBindingId {
    pub schema_id: SchemaId,
    pub group_id: GroupId,
}

impl fmt::Display for PrivilegeBindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.schema_id, self.group_id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid privilege binding id {0:?}, expected <schema_id>_<group_id>")]
    BindingId(String),

    #[error("Invalid connection limit {0:?}, expected UNLIMITED or a non-negative number")]
    ConnectionLimit(String),

    #[error("Invalid expiry {0:?}, expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")]
    ValidUntil(String),
}

impl FromStr for PrivilegeBindingId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::BindingId(s.to_string());
        let (schema_id, group_id) = s.split_once('_').ok_or_else(invalid)?;

        Ok(Self {
            schema_id: schema_id.parse().map_err(|_| invalid())?,
            group_id: group_id.parse().map_err(|_| invalid())?,
        })
    }
}

/// Credential state of a user. The cluster never reports passwords back, so
/// the state observed after a read is whatever the caller last declared.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Password {
    Set(String),
    /// `PASSWORD DISABLE`: the user can only sign in with temporary credentials
    Disabled,
    /// Imported without a prior declaration
    Unknown,
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Password::Set(_) => write!(f, "Set({REDACTED})"),
            Password::Disabled => write!(f, "Disabled"),
            Password::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Password::Set(_) => {
                serializer.serialize_newtype_variant("Password", 0, "set", REDACTED)
            }
            Password::Disabled => serializer.serialize_unit_variant("Password", 1, "disabled"),
            Password::Unknown => serializer.serialize_unit_variant("Password", 2, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectionLimit {
    #[default]
    Unlimited,
    Limited(u32),
}

impl fmt::Display for ConnectionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionLimit::Unlimited => write!(f, "UNLIMITED"),
            ConnectionLimit::Limited(limit) => write!(f, "{limit}"),
        }
    }
}

impl FromStr for ConnectionLimit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Plain PostgreSQL reports an unlimited database as -1
        if s.eq_ignore_ascii_case("unlimited") || s == "-1" {
            return Ok(ConnectionLimit::Unlimited);
        }
        s.parse()
            .map(ConnectionLimit::Limited)
            .map_err(|_| ParseError::ConnectionLimit(s.to_string()))
    }
}

impl TryFrom<String> for ConnectionLimit {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectionLimit> for String {
    fn from(value: ConnectionLimit) -> Self {
        value.to_string()
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyslogAccess {
    #[default]
    Restricted,
    Unrestricted,
}

/// Password expiry. Declarations may give a bare date, the cluster reports a
/// timestamp; both are compared as timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValidUntil(NaiveDateTime);

impl ValidUntil {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self(timestamp)
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for ValidUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

impl FromStr for ValidUntil {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Redshift may append a UTC offset to abstime values
        let trimmed = s.strip_suffix("+00").unwrap_or(s);

        parse_timestamp(trimmed)
            .map(ValidUntil)
            .ok_or_else(|| ParseError::ValidUntil(s.to_string()))
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(timestamp);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

impl TryFrom<String> for ValidUntil {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValidUntil> for String {
    fn from(value: ValidUntil) -> Self {
        value.to_string()
    }
}

/// Table-level privileges, in the order they are granted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "snake_case")]
pub enum TablePrivilege {
    Select,
    Insert,
    Update,
    Delete,
    References,
}

impl TablePrivilege {
    pub const ALL: [TablePrivilege; 5] = [
        TablePrivilege::Select,
        TablePrivilege::Insert,
        TablePrivilege::Update,
        TablePrivilege::Delete,
        TablePrivilege::References,
    ];

    /// Letter used for this privilege inside an ACL item (`group g=arwdx/owner`)
    pub fn acl_code(self) -> char {
        match self {
            TablePrivilege::Select => 'r',
            TablePrivilege::Insert => 'a',
            TablePrivilege::Update => 'w',
            TablePrivilege::Delete => 'd',
            TablePrivilege::References => 'x',
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "snake_case")]
pub enum SchemaPrivilege {
    Create,
    Usage,
}

impl SchemaPrivilege {
    pub const ALL: [SchemaPrivilege; 2] = [SchemaPrivilege::Create, SchemaPrivilege::Usage];

    pub fn acl_code(self) -> char {
        match self {
            SchemaPrivilege::Create => 'C',
            SchemaPrivilege::Usage => 'U',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub password: Password,
    #[serde(default)]
    pub valid_until: Option<ValidUntil>,
    #[serde(default)]
    pub connection_limit: ConnectionLimit,
    #[serde(default)]
    pub syslog_access: SyslogAccess,
    #[serde(default)]
    pub createdb: bool,
    #[serde(default)]
    pub superuser: bool,
}

impl User {
    pub fn new(name: impl Into<String>, password: Password) -> Self {
        Self {
            name: name.into(),
            password,
            valid_until: None,
            connection_limit: ConnectionLimit::default(),
            syslog_access: SyslogAccess::default(),
            createdb: false,
            superuser: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub members: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    /// Defaults to the connecting principal when not declared
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub connection_limit: ConnectionLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub cascade_on_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeBinding {
    pub schema_id: SchemaId,
    pub group_id: GroupId,
    #[serde(default)]
    pub table_privileges: BTreeSet<TablePrivilege>,
    #[serde(default)]
    pub schema_privileges: BTreeSet<SchemaPrivilege>,
}

impl PrivilegeBinding {
    pub fn id(&self) -> PrivilegeBindingId {
        PrivilegeBindingId {
            schema_id: self.schema_id,
            group_id: self.group_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table_privileges.is_empty() && self.schema_privileges.is_empty()
    }
}

/// An object as last read back from the cluster, keyed by its system id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observed<I, A> {
    pub id: I,
    pub attributes: A,
}

impl<I: fmt::Display, A> Observed<I, A> {
    /// Durable key of the object: the numeric system id rendered as text
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}
