use async_trait::async_trait;
use tracing::info;

use crate::data_types::{ObjectKind, Observed, User, UserId};
use crate::repository::interface::Mode;
use crate::statement::Statement;

use super::{
    builder, identity, query_error, reader, ReconcileContext, ReconcileTransaction, Reconciler,
    Result,
};

#[derive(Debug, Clone)]
pub struct UserReconciler {
    context: ReconcileContext,
}

impl UserReconciler {
    pub fn new(context: ReconcileContext) -> Self {
        Self { context }
    }

    async fn create_in(
        &self,
        tx: &mut ReconcileTransaction,
        plan: &[Statement],
        declared: &User,
    ) -> Result<Observed<UserId, User>> {
        tx.execute_all(plan).await?;

        self.context.waiter.await_visibility().await;
        let lookup = identity::resolve_user_id(tx.catalog(), &declared.name).await;
        let id = self
            .context
            .waiter
            .resolve(Self::KIND, &declared.name, lookup)?;

        let attributes = reader::read_user(tx.catalog(), id, Some(declared)).await?;
        Ok(Observed { id, attributes })
    }

    async fn update_in(
        &self,
        tx: &mut ReconcileTransaction,
        id: UserId,
        plan: &[Statement],
        declared: &User,
    ) -> Result<Observed<UserId, User>> {
        tx.execute_all(plan).await?;

        let attributes = reader::read_user(tx.catalog(), id, Some(declared)).await?;
        Ok(Observed { id, attributes })
    }

    /// Revoke everything the user holds in every schema, hand whatever it
    /// owns to the session principal, then drop it.
    async fn delete_in(&self, tx: &mut ReconcileTransaction, id: UserId) -> Result<()> {
        let name = identity::resolve_user_name(tx.catalog(), id).await?;
        let new_owner = tx
            .catalog()
            .current_user()
            .await
            .map_err(query_error("current user".to_string()))?;
        let schemas = reader::read_schema_names(tx.catalog()).await?;
        let owned = reader::read_owned_objects(tx.catalog(), id).await?;

        let plan = builder::delete_user(&name, &schemas, &owned, &new_owner);
        tx.execute_all(&plan).await
    }
}

#[async_trait]
impl Reconciler for UserReconciler {
    type Id = UserId;
    type Attributes = User;

    const KIND: ObjectKind = ObjectKind::User;

    async fn create(&self, declared: &User) -> Result<Observed<UserId, User>> {
        let plan = builder::create_user(declared)?;

        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("user {}", declared.name))
            .await?;
        let outcome = self.create_in(&mut tx, &plan, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id = observed.id, name = %declared.name, "Created user");
        Ok(observed)
    }

    async fn read(&self, id: UserId, prior: Option<&User>) -> Result<Observed<UserId, User>> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("user {id}"))
            .await?;
        let outcome = reader::read_user(tx.catalog(), id, prior).await;
        let attributes = tx.finish(outcome).await?;

        Ok(Observed { id, attributes })
    }

    async fn update(
        &self,
        id: UserId,
        previous: &User,
        declared: &User,
    ) -> Result<Observed<UserId, User>> {
        let plan = builder::update_user(previous, declared)?;

        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("user {}", previous.name))
            .await?;
        let outcome = self.update_in(&mut tx, id, &plan, declared).await;
        let observed = tx.finish(outcome).await?;

        info!(
            kind = %Self::KIND,
            id,
            name = %declared.name,
            statements = plan.len(),
            "Updated user"
        );
        Ok(observed)
    }

    async fn delete(&self, id: UserId, _current: &User) -> Result<()> {
        let mut tx = self
            .context
            .coordinator
            .begin(Mode::Transaction, format!("user {id}"))
            .await?;
        let outcome = self.delete_in(&mut tx, id).await;
        tx.finish(outcome).await?;

        info!(kind = %Self::KIND, id, "Deleted user");
        Ok(())
    }
}
