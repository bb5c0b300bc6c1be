//! Group privileges on one schema: table privileges granted on the existing
//! tables and as default privileges for future ones, plus schema privileges.

use async_trait::async_trait;
use tracing::info;

use crate::data_types::{
    ObjectKind, Observed, PrivilegeBinding, PrivilegeBindingId, SYSTEM_OWNER_ID,
};
use crate::repository::interface::Mode;

use super::{
    builder, identity, reader, ReconcileContext, ReconcileError, ReconcileTransaction, Reconciler,
    Result,
};

type ObservedBinding = Observed<PrivilegeBindingId, PrivilegeBinding>;

#[derive(Debug, Clone)]
pub struct PrivilegeBindingReconciler {
    context: ReconcileContext,
}

/// Schema and group names a binding's statements refer to
struct Target {
    schema: String,
    group: String,
}

impl PrivilegeBindingReconciler {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }

    /// Resolve both names, refusing schemas owned by the system principal
    async fn target(
        &self,
        tx: &mut ReconcileTransaction,
        id: PrivilegeBindingId,
    ) -> Result<Target> {
        let schema = reader::read_schema_record(tx.catalog(), id.schema_id).await?;
        if schema.nspowner == SYSTEM_OWNER_ID {
            return Err(ReconcileError::validation(format!(
                "schema {} is a system schema, privileges on it cannot be managed",
                schema.nspname
            )));
        }
        let group = identity::resolve_group_name(tx.catalog(), id.group_id).await?;

        Ok(Target {
            schema: schema.nspname,
            group,
        })
    }

    async fn create_in(
        &self,
        tx: &mut ReconcileTransaction,
        declared: &PrivilegeBinding,
    ) -> Result<ObservedBinding> {
        let id = declared.id();
        let target = self.target(tx, id).await?;
        tx.execute_all(&builder::grant_binding(
            &target.schema,
            &target.group,
            declared,
        ))
        .await?;

        let attributes = reader::read_binding(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    async fn update_in(
        &self,
        tx: &mut ReconcileTransaction,
        previous: &PrivilegeBinding,
        declared: &PrivilegeBinding,
    ) -> Result<ObservedBinding> {
        let id = declared.id();
        let target = self.target(tx, id).await?;
        tx.execute_all(&builder::update_binding(
            &target.schema,
            &target.group,
            previous,
            declared,
        ))
        .await?;

        let attributes = reader::read_binding(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    /// Only the binding's own schema is cleaned up. Revoking a group's
    /// privileges in every schema is left to the group's own deletion.
    async fn delete_in(&self, tx: &mut ReconcileTransaction, id: PrivilegeBindingId) -> Result<()> {
        let schema = reader::read_schema_record(tx.catalog(), id.schema_id).await?;
        let group = identity::resolve_group_name(tx.catalog(), id.group_id).await?;

        tx.execute_all(&builder::revoke_binding(&schema.nspname, &group))
            .await
    }
}

#[async_trait]
impl Reconciler for PrivilegeBindingReconciler {
    type Id = PrivilegeBindingId;
    type Attributes = PrivilegeBinding;

    const KIND: ObjectKind = ObjectKind::PrivilegeBinding;

    async fn create(&self, declared: &PrivilegeBinding) -> Result<ObservedBinding> {
        builder::validate_binding(declared)?;

        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("privilege binding {}", declared.id()))
            .await?;
        let outcome = self.create_in(&mut tx, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = %observed.id, "Created privilege binding");
        Ok(observed)
    }

    async fn read(
        &self,
        id: PrivilegeBindingId,
        _prior: Option<&PrivilegeBinding>,
    ) -> Result<ObservedBinding> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("privilege binding {id}"))
            .await?;
        let outcome = reader::read_binding(tx.catalog(), id).await;
        let attributes = tx.finish(outcome).await?;

        Ok(Observed { id, attributes })
    }

    async fn update(
        &self,
        id: PrivilegeBindingId,
        previous: &PrivilegeBinding,
        declared: &PrivilegeBinding,
    ) -> Result<ObservedBinding> {
        if declared.id() != id || previous.id() != id {
            return Err(ReconcileError::validation(format!(
                "privilege binding {id} cannot move to {}, it requires replacement",
                declared.id()
            )));
        }
        builder::validate_binding(declared)?;

        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("privilege binding {id}"))
            .await?;
        let outcome = self.update_in(&mut tx, previous, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = %id, "Updated privilege binding");
        Ok(observed)
    }

    async fn delete(&self, id: PrivilegeBindingId, _current: &PrivilegeBinding) -> Result<()> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("privilege binding {id}"))
            .await?;
        let outcome = self.delete_in(&mut tx, id).await;
        tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = %id, "Deleted privilege binding");
        Ok(())
    }
}
