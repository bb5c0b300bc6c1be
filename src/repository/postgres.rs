use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    pool::PoolConnection, postgres::PgPoolOptions, Executor, PgConnection, PgPool,
    Postgres, QueryBuilder,
};

use crate::data_types::{DatabaseId, GroupId, SchemaId, UserId};
use crate::statement::Statement;

use super::interface::{
    Cluster, DatabaseRecord, Error, GroupRecord, Mode, OwnedObjectRecord, Result,
    SchemaRecord, Transaction, UserNameRecord, UserRecord,
};

pub struct CatalogQueries {
    pub users: &'static str,
    pub groups: &'static str,
    pub databases: &'static str,
    pub schemas: &'static str,
    pub owned_objects: &'static str,
}

#[derive(Debug, Clone)]
pub struct PostgresCluster {
    pub executor: PgPool,
}

impl PostgresCluster {
    pub const QUERIES: CatalogQueries = CatalogQueries {
        users: r#"
        SELECT
            usesysid::bigint AS usesysid,
            CAST(usename AS VARCHAR) AS usename,
            usecreatedb,
            usesuper,
            CAST(valuntil AS VARCHAR) AS valuntil,
            CAST(useconnlimit AS VARCHAR) AS useconnlimit
        FROM pg_user_info"#,
        groups: r#"
        SELECT
            grosysid::bigint AS grosysid,
            CAST(groname AS VARCHAR) AS groname,
            array_to_string(grolist, ',') AS grolist
        FROM pg_group"#,
        databases: r#"
        SELECT
            datid::bigint AS datid,
            CAST(datname AS VARCHAR) AS datname,
            datdba::bigint AS datdba,
            CAST(datconnlimit AS VARCHAR) AS datconnlimit
        FROM pg_database_info"#,
        schemas: r#"
        SELECT
            oid::bigint AS oid,
            CAST(nspname AS VARCHAR) AS nspname,
            nspowner::bigint AS nspowner
        FROM pg_namespace"#,
        owned_objects: r#"
        SELECT 'function' AS kind, CAST(n.nspname AS VARCHAR) AS schema,
            CAST(p.proname AS VARCHAR) AS name,
            CAST(oidvectortypes(p.proargtypes) AS VARCHAR) AS arguments
        FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE p.proowner::bigint = $1
        UNION ALL
        SELECT 'database', NULL, CAST(datname AS VARCHAR), NULL
        FROM pg_database_info WHERE datdba::bigint = $1
        UNION ALL
        SELECT 'schema', NULL, CAST(nspname AS VARCHAR), NULL
        FROM pg_namespace WHERE nspowner::bigint = $1
        UNION ALL
        SELECT CASE c.relkind WHEN 'v' THEN 'view' ELSE 'table' END,
            CAST(n.nspname AS VARCHAR), CAST(c.relname AS VARCHAR), NULL
        FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relowner::bigint = $1 AND c.relkind IN ('r', 'v')"#,
    };

    pub async fn connect(
        dsn: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;

        Ok(Self { executor: pool })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                match &*code {
                    "42710" => return Error::DuplicateObject(error),
                    "2BP01" => return Error::DependentObjects(error),
                    "42501" => return Error::InsufficientPrivilege(error),
                    "42704" => return Error::UndefinedObject(error),
                    _ => {}
                }
            }
        }
        Error::SqlxError(error)
    }
}

#[async_trait]
impl Cluster for PostgresCluster {
    async fn begin(&self, mode: Mode) -> Result<Box<dyn Transaction>> {
        let handle = match mode {
            Mode::Transaction => Handle::Transaction(
                self.executor
                    .begin()
                    .await
                    .map_err(PostgresCluster::interpret_error)?,
            ),
            Mode::Autocommit => Handle::Session(
                self.executor
                    .acquire()
                    .await
                    .map_err(PostgresCluster::interpret_error)?,
            ),
        };

        Ok(Box::new(PostgresTransaction { handle }))
    }
}

enum Handle {
    Transaction(sqlx::Transaction<'static, Postgres>),
    /// A plain pooled connection: every statement commits on its own
    Session(PoolConnection<Postgres>),
}

pub struct PostgresTransaction {
    handle: Handle,
}

impl PostgresTransaction {
    fn connection(&mut self) -> &mut PgConnection {
        match &mut self.handle {
            Handle::Transaction(tx) => &mut **tx,
            Handle::Session(conn) => &mut **conn,
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let sql = statement.to_string();
        self.connection()
            .execute(sql.as_str())
            .await
            .map_err(PostgresCluster::interpret_error)?;
        Ok(())
    }

    async fn current_user(&mut self) -> Result<String> {
        let (name,): (String,) = sqlx::query_as("SELECT CAST(current_user AS VARCHAR)")
            .fetch_one(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)?;
        Ok(name)
    }

    async fn get_user(&mut self, id: UserId) -> Result<Option<UserRecord>> {
        let query = format!(
            "{} WHERE usesysid::bigint = $1",
            PostgresCluster::QUERIES.users
        );
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_user_by_name(&mut self, name: &str) -> Result<Option<UserRecord>> {
        let query = format!("{} WHERE usename = $1", PostgresCluster::QUERIES.users);
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_user_names(&mut self, ids: &[UserId]) -> Result<Vec<UserNameRecord>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT usesysid::bigint AS usesysid, CAST(usename AS VARCHAR) AS usename \
             FROM pg_user_info WHERE usesysid::bigint IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        builder
            .build_query_as::<UserNameRecord>()
            .fetch_all(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_group(&mut self, id: GroupId) -> Result<Option<GroupRecord>> {
        let query = format!(
            "{} WHERE grosysid::bigint = $1",
            PostgresCluster::QUERIES.groups
        );
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_group_by_name(&mut self, name: &str) -> Result<Option<GroupRecord>> {
        let query = format!("{} WHERE groname = $1", PostgresCluster::QUERIES.groups);
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_database(&mut self, id: DatabaseId) -> Result<Option<DatabaseRecord>> {
        let query = format!(
            "{} WHERE datid::bigint = $1",
            PostgresCluster::QUERIES.databases
        );
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_database_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<DatabaseRecord>> {
        let query = format!(
            "{} WHERE datname = $1",
            PostgresCluster::QUERIES.databases
        );
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_schema(&mut self, id: SchemaId) -> Result<Option<SchemaRecord>> {
        let query = format!("{} WHERE oid::bigint = $1", PostgresCluster::QUERIES.schemas);
        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_schema_by_name(&mut self, name: &str) -> Result<Option<SchemaRecord>> {
        let query = format!("{} WHERE nspname = $1", PostgresCluster::QUERIES.schemas);
        sqlx::query_as(&query)
            .bind(name)
            .fetch_optional(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn list_schemas(&mut self) -> Result<Vec<SchemaRecord>> {
        let query = format!(
            r#"{} WHERE nspname NOT LIKE 'pg\_%'
            AND nspname <> 'information_schema'
            ORDER BY nspname"#,
            PostgresCluster::QUERIES.schemas
        );
        sqlx::query_as(&query)
            .fetch_all(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn get_schema_acl(&mut self, id: SchemaId) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT array_to_string(nspacl, '|') FROM pg_namespace WHERE oid::bigint = $1",
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await
        .map_err(PostgresCluster::interpret_error)?;

        Ok(row.and_then(|(acl,)| acl))
    }

    async fn get_default_table_acl(&mut self, id: SchemaId) -> Result<Option<String>> {
        let rows: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT array_to_string(defaclacl, '|') FROM pg_default_acl \
             WHERE defaclnamespace::bigint = $1 AND defaclobjtype = 'r'",
        )
        .bind(id)
        .fetch_all(self.connection())
        .await
        .map_err(PostgresCluster::interpret_error)?;

        let items: Vec<String> = rows.into_iter().filter_map(|(acl,)| acl).collect();
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.join("|"))
        })
    }

    async fn list_owned_objects(&mut self, owner: UserId) -> Result<Vec<OwnedObjectRecord>> {
        sqlx::query_as(PostgresCluster::QUERIES.owned_objects)
            .bind(owner)
            .fetch_all(self.connection())
            .await
            .map_err(PostgresCluster::interpret_error)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        match self.handle {
            Handle::Transaction(tx) => {
                tx.commit().await.map_err(PostgresCluster::interpret_error)
            }
            Handle::Session(_) => Ok(()),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        match self.handle {
            Handle::Transaction(tx) => tx
                .rollback()
                .await
                .map_err(PostgresCluster::interpret_error),
            // Nothing left to undo once each statement has committed
            Handle::Session(_) => Ok(()),
        }
    }
}
