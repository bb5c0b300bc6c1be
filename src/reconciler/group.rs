use async_trait::async_trait;
use tracing::{debug, info};

use crate::data_types::{Group, GroupId, ObjectKind, Observed};
use crate::repository::interface::Mode;

use super::diff::diff;
use super::{builder, identity, reader, ReconcileContext, ReconcileTransaction, Reconciler, Result};

#[derive(Debug, Clone)]
pub struct GroupReconciler {
    context: ReconcileContext,
}

impl GroupReconciler {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }

    async fn create_in(
        &self,
        tx: &mut ReconcileTransaction,
        declared: &Group,
    ) -> Result<Observed<GroupId, Group>> {
        let members = identity::resolve_user_names(tx.catalog(), &declared.members).await?;
        tx.execute_all(&builder::create_group(&declared.name, members))
            .await?;

        self.context.waiter.await_visibility().await;
        let lookup = identity::resolve_group_id(tx.catalog(), &declared.name).await;
        let id = self
            .context
            .waiter
            .resolve(Self::KIND, &declared.name, lookup)?;

        let attributes = reader::read_group(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    async fn update_in(
        &self,
        tx: &mut ReconcileTransaction,
        id: GroupId,
        previous: &Group,
        declared: &Group,
    ) -> Result<Observed<GroupId, Group>> {
        let members = diff(
            previous.members.iter().copied(),
            declared.members.iter().copied(),
        );
        debug!(
            group = %declared.name,
            removed = ?members.removed,
            added = ?members.added,
            "Membership change"
        );

        let dropped = identity::resolve_user_names(tx.catalog(), &members.removed).await?;
        let added = identity::resolve_user_names(tx.catalog(), &members.added).await?;
        let plan = builder::update_group(&previous.name, &declared.name, dropped, added);
        tx.execute_all(&plan).await?;

        let attributes = reader::read_group(tx.catalog(), id).await?;
        Ok(Observed { id, attributes })
    }

    async fn delete_in(&self, tx: &mut ReconcileTransaction, id: GroupId) -> Result<()> {
        let name = identity::resolve_group_name(tx.catalog(), id).await?;
        let schemas = reader::read_schema_names(tx.catalog()).await?;

        tx.execute_all(&builder::delete_group(&name, &schemas))
            .await
    }
}

#[async_trait]
impl Reconciler for GroupReconciler {
    type Id = GroupId;
    type Attributes = Group;

    const KIND: ObjectKind = ObjectKind::Group;

    async fn create(&self, declared: &Group) -> Result<Observed<GroupId, Group>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("group {}", declared.name))
            .await?;
        let outcome = self.create_in(&mut tx, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = observed.id, name = %declared.name, "Created group");
        Ok(observed)
    }

    async fn read(&self, id: GroupId, _prior: Option<&Group>) -> Result<Observed<GroupId, Group>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("group {id}"))
            .await?;
        let outcome = reader::read_group(tx.catalog(), id).await;
        let attributes = tx.finish(outcome).await?;

        Ok(Observed { id, attributes })
    }

    async fn update(
        &self,
        id: GroupId,
        previous: &Group,
        declared: &Group,
    ) -> Result<Observed<GroupId, Group>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("group {}", previous.name))
            .await?;
        let outcome = self.update_in(&mut tx, id, previous, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, name = %declared.name, "Updated group");
        Ok(observed)
    }

    async fn delete(&self, id: GroupId, _current: &Group) -> Result<()> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("group {id}"))
            .await?;
        let outcome = self.delete_in(&mut tx, id).await;
        tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, "Deleted group");
        Ok(())
    }
}
