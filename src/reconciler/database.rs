//! Databases. `CREATE DATABASE` and `DROP DATABASE` cannot run inside a
//! transaction block, so create and delete use an autocommit session and
//! cannot be rolled back once the statement has gone through. Updates are
//! transactional.

use async_trait::async_trait;
use tracing::info;

use crate::data_types::{Database, DatabaseId, ObjectKind, Observed};
use crate::repository::interface::Mode;

use super::{builder, identity, reader, ReconcileContext, ReconcileTransaction, Reconciler, Result};

#[derive(Debug, Clone)]
pub struct DatabaseReconciler {
    context: ReconcileContext,
}

impl DatabaseReconciler {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }

    async fn create_in(
        &self,
        tx: &mut ReconcileTransaction,
        declared: &Database,
    ) -> Result<Observed<DatabaseId, Database>> {
        let owner = identity::resolve_owner(tx.catalog(), declared.owner).await?;
        tx.execute(&builder::create_database(declared, owner)).await?;

        self.context.waiter.await_visibility().await;
        let lookup = identity::resolve_database_id(tx.catalog(), &declared.name).await;
        let id = self
            .context
            .waiter
            .resolve(Self::KIND, &declared.name, lookup)?;

        let attributes = reader::read_database(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    async fn update_in(
        &self,
        tx: &mut ReconcileTransaction,
        id: DatabaseId,
        previous: &Database,
        declared: &Database,
    ) -> Result<Observed<DatabaseId, Database>> {
        let owner = if declared.owner != previous.owner {
            identity::resolve_owner(tx.catalog(), declared.owner).await?
        } else {
            None
        };
        tx.execute_all(&builder::update_database(previous, declared, owner))
            .await?;

        let attributes = reader::read_database(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    async fn delete_in(&self, tx: &mut ReconcileTransaction, id: DatabaseId) -> Result<()> {
        let current = reader::read_database(tx.catalog(), id).await?;
        tx.execute(&builder::drop_database(&current.name)).await
    }
}

#[async_trait]
impl Reconciler for DatabaseReconciler {
    type Id = DatabaseId;
    type Attributes = Database;

    const KIND: ObjectKind = ObjectKind::Database;

    async fn create(&self, declared: &Database) -> Result<Observed<DatabaseId, Database>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Autocommit, format!("database {}", declared.name))
            .await?;
        let outcome = self.create_in(&mut tx, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = observed.id, name = %declared.name, "Created database");
        Ok(observed)
    }

    async fn read(
        &self,
        id: DatabaseId,
        _prior: Option<&Database>,
    ) -> Result<Observed<DatabaseId, Database>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("database {id}"))
            .await?;
        let outcome = reader::read_database(tx.catalog(), id).await;
        let attributes = tx.finish(outcome).await?;

        Ok(Observed { id, attributes })
    }

    async fn update(
        &self,
        id: DatabaseId,
        previous: &Database,
        declared: &Database,
    ) -> Result<Observed<DatabaseId, Database>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("database {}", previous.name))
            .await?;
        let outcome = self.update_in(&mut tx, id, previous, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, name = %declared.name, "Updated database");
        Ok(observed)
    }

    async fn delete(&self, id: DatabaseId, _current: &Database) -> Result<()> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Autocommit, format!("database {id}"))
            .await?;
        let outcome = self.delete_in(&mut tx, id).await;
        tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, "Deleted database");
        Ok(())
    }
}
