//! Converges one declared object at a time against the live cluster.
//!
//! Every operation runs through the same pipeline: the statement builder
//! plans the DDL (consulting the set-diff engine and the identity resolver),
//! the transaction coordinator executes it, the convergence waiter bridges the
//! catalog propagation delay after object creation and the state reader
//! confirms the result before the transaction commits.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum_macros::Display;

use crate::data_types::{ObjectKind, Observed};
use crate::repository::interface::{Cluster, Error as RepositoryError};

pub mod builder;
pub mod convergence;
pub mod database;
pub mod diff;
pub mod group;
pub mod identity;
pub mod privilege;
pub mod reader;
pub mod schema;
pub mod transaction;
pub mod user;

pub use convergence::ConvergenceWaiter;
pub use database::DatabaseReconciler;
pub use group::GroupReconciler;
pub use privilege::PrivilegeBindingReconciler;
pub use schema::SchemaReconciler;
pub use transaction::{ReconcileTransaction, TransactionCoordinator};
pub use user::UserReconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransactionPhase {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ObjectKind, id: String },

    #[error("Invalid declaration: {reason}")]
    Validation { reason: String },

    #[error("{kind} {name:?} is still not visible after the convergence window")]
    ConvergenceTimeout { kind: ObjectKind, name: String },

    #[error("Statement failed for {object}: {statement}: {source}")]
    Statement {
        object: String,
        /// Redacted statement text
        statement: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to {phase} transaction: {source}")]
    Transaction {
        phase: TransactionPhase,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to read {object}: {source}")]
    Query {
        object: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Could not decode {object}: {reason}")]
    Decode { object: String, reason: String },
}

impl ReconcileError {
    pub fn not_found(kind: ObjectKind, id: impl Display) -> Self {
        ReconcileError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        ReconcileError::Validation {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Wraps a failed catalog read with the object it was about
pub(crate) fn query_error(object: String) -> impl FnOnce(RepositoryError) -> ReconcileError {
    move |source| ReconcileError::Query { object, source }
}

/// Everything a reconciler needs from the outside world. Passed explicitly
/// into every reconciler instead of living in process-wide state.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub coordinator: TransactionCoordinator,
    pub waiter: ConvergenceWaiter,
}

impl ReconcileContext {
    pub fn new(cluster: Arc<dyn Cluster>, convergence_delay: Duration) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(cluster),
            waiter: ConvergenceWaiter::new(convergence_delay),
        }
    }
}

/// Create/Read/Update/Delete/Exists for one object kind
#[async_trait]
pub trait Reconciler: Send + Sync {
    type Id: Copy + Display + Send + Sync + 'static;
    type Attributes: Clone + Send + Sync + 'static;

    const KIND: ObjectKind;

    async fn create(
        &self,
        declared: &Self::Attributes,
    ) -> Result<Observed<Self::Id, Self::Attributes>>;

    /// Read the live object. Attributes the catalog does not expose are
    /// carried over from `prior`.
    async fn read(
        &self,
        id: Self::Id,
        prior: Option<&Self::Attributes>,
    ) -> Result<Observed<Self::Id, Self::Attributes>>;

    async fn update(
        &self,
        id: Self::Id,
        previous: &Self::Attributes,
        declared: &Self::Attributes,
    ) -> Result<Observed<Self::Id, Self::Attributes>>;

    async fn delete(&self, id: Self::Id, current: &Self::Attributes) -> Result<()>;

    async fn exists(&self, id: Self::Id) -> Result<bool> {
        match self.read(id, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
