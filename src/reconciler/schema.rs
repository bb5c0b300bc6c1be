use async_trait::async_trait;
use tracing::info;

use crate::data_types::{ObjectKind, Observed, Schema, SchemaId};
use crate::repository::interface::Mode;

use super::{
    builder, identity, query_error, reader, ReconcileContext, ReconcileError, ReconcileTransaction,
    Reconciler, Result,
};

#[derive(Debug, Clone)]
pub struct SchemaReconciler {
    context: ReconcileContext,
}

impl SchemaReconciler {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }

    /// Find a schema by name. The cascade flag is not stored in the catalog
    /// and is always reported as `false`.
    pub async fn lookup(&self, name: &str) -> Result<Observed<SchemaId, Schema>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("schema {name}"))
            .await?;
        let outcome = tx
            .catalog()
            .get_schema_by_name(name)
            .await
            .map_err(query_error(format!("schema {name}")));
        let record = tx
            .finish(outcome)
            .await?
            .ok_or_else(|| ReconcileError::not_found(ObjectKind::Schema, name))?;

        Ok(Observed {
            id: record.oid,
            attributes: Schema {
                name: record.nspname,
                owner: Some(record.nspowner),
                cascade_on_delete: false,
            },
        })
    }

    async fn create_in(
        &self,
        tx: &mut ReconcileTransaction,
        declared: &Schema,
    ) -> Result<Observed<SchemaId, Schema>> {
        let owner = identity::resolve_owner(tx.catalog(), declared.owner).await?;
        tx.execute_all(&builder::create_schema(declared, owner))
            .await?;

        self.context.waiter.await_visibility().await;
        let lookup = identity::resolve_schema_id(tx.catalog(), &declared.name).await;
        let id = self
            .context
            .waiter
            .resolve(Self::KIND, &declared.name, lookup)?;

        let attributes = reader::read_schema(tx.catalog(), id, Some(declared)).await?;
        Ok(Observed { id, attributes })
    }

    async fn update_in(
        &self,
        tx: &mut ReconcileTransaction,
        id: SchemaId,
        previous: &Schema,
        declared: &Schema,
    ) -> Result<Observed<SchemaId, Schema>> {
        let owner = if declared.owner != previous.owner {
            identity::resolve_owner(tx.catalog(), declared.owner).await?
        } else {
            None
        };
        tx.execute_all(&builder::update_schema(previous, declared, owner))
            .await?;

        let attributes = reader::read_schema(tx.catalog(), id, Some(declared)).await?;
        Ok(Observed { id, attributes })
    }

    async fn delete_in(
        &self,
        tx: &mut ReconcileTransaction,
        id: SchemaId,
        current: &Schema,
    ) -> Result<()> {
        let record = reader::read_schema_record(tx.catalog(), id).await?;
        tx.execute_all(&builder::drop_schema(
            &record.nspname,
            current.cascade_on_delete,
        ))
        .await
    }
}

#[async_trait]
impl Reconciler for SchemaReconciler {
    type Id = SchemaId;
    type Attributes = Schema;

    const KIND: ObjectKind = ObjectKind::Schema;

    async fn create(&self, declared: &Schema) -> Result<Observed<SchemaId, Schema>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("schema {}", declared.name))
            .await?;
        let outcome = self.create_in(&mut tx, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = observed.id, name = %declared.name, "Created schema");
        Ok(observed)
    }

    async fn read(
        &self,
        id: SchemaId,
        prior: Option<&Schema>,
    ) -> Result<Observed<SchemaId, Schema>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("schema {id}"))
            .await?;
        let outcome = reader::read_schema(tx.catalog(), id, prior).await;
        let attributes = tx.finish(outcome).await?;

        Ok(Observed { id, attributes })
    }

    async fn update(
        &self,
        id: SchemaId,
        previous: &Schema,
        declared: &Schema,
    ) -> Result<Observed<SchemaId, Schema>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("schema {}", previous.name))
            .await?;
        let outcome = self.update_in(&mut tx, id, previous, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, name = %declared.name, "Updated schema");
        Ok(observed)
    }

    async fn delete(&self, id: SchemaId, current: &Schema) -> Result<()> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("schema {id}"))
            .await?;
        let outcome = self.delete_in(&mut tx, id, current).await;
        tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, cascade = current.cascade_on_delete, "Deleted schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::data_types::SYSTEM_OWNER_ID;
    use crate::repository::memory::{MemoryCluster, MASTER_USER_ID};

    fn reconciler(cluster: &MemoryCluster) -> SchemaReconciler {
        SchemaReconciler::new(ReconcileContext::new(
            Arc::new(cluster.clone()),
            Duration::ZERO,
        ))
    }

    #[tokio::test]
    async fn test_lookup() {
        let cluster = MemoryCluster::new();
        let schemas = reconciler(&cluster);

        let public = schemas.lookup("public").await.unwrap();
        assert_eq!(public.id, 2200);
        assert_eq!(public.attributes.owner, Some(SYSTEM_OWNER_ID));

        assert!(schemas.lookup("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_with_owner() {
        let cluster = MemoryCluster::new();
        cluster.add_user(101, "alice");
        let declared = Schema {
            name: "sales".to_string(),
            owner: Some(101),
            cascade_on_delete: true,
        };

        let observed = reconciler(&cluster).create(&declared).await.unwrap();
        assert_eq!(observed.attributes, declared);
        assert_eq!(
            cluster.journal(),
            vec!["CREATE SCHEMA sales AUTHORIZATION alice"]
        );
    }

    #[tokio::test]
    async fn test_delete_without_cascade_keeps_populated_schema() {
        let cluster = MemoryCluster::new();
        cluster.add_schema(500, "sales", MASTER_USER_ID);
        cluster.add_table(500, "orders", MASTER_USER_ID);
        let schemas = reconciler(&cluster);
        let current = schemas.read(500, None).await.unwrap().attributes;

        assert!(schemas.delete(500, &current).await.is_err());
        assert!(schemas.exists(500).await.unwrap());

        let cascading = Schema {
            cascade_on_delete: true,
            ..current
        };
        schemas.delete(500, &cascading).await.unwrap();
        assert!(!schemas.exists(500).await.unwrap());
        assert_eq!(cluster.journal(), vec!["DROP SCHEMA sales CASCADE"]);
    }
}
