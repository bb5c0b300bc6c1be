use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::repository::interface::{Cluster, Mode, Transaction};
use crate::statement::Statement;

use super::{ReconcileError, Result, TransactionPhase};

/// Opens the single transaction (or autocommit session) an operation runs in.
/// Nested transactions are not supported and a failure to begin is returned
/// as is, without retrying.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    cluster: Arc<dyn Cluster>,
}

impl TransactionCoordinator {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }

    /// Begin a unit of work for `object`, a label like `group analysts` used
    /// to give statement failures their context.
    pub async fn begin(
        &self,
        mode: Mode,
        object: impl Into<String>,
    ) -> Result<ReconcileTransaction> {
        let object = object.into();
        let inner = self.cluster.begin(mode).await.map_err(|source| {
            ReconcileError::Transaction {
                phase: TransactionPhase::Begin,
                source,
            }
        })?;
        debug!(%object, %mode, "Began unit of work");

        Ok(ReconcileTransaction {
            inner,
            object,
            mode,
            executed: 0,
        })
    }
}

pub struct ReconcileTransaction {
    inner: Box<dyn Transaction>,
    object: String,
    mode: Mode,
    executed: usize,
}

impl ReconcileTransaction {
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Number of statements executed so far
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Handle for catalog reads inside this unit of work
    pub fn catalog(&mut self) -> &mut dyn Transaction {
        self.inner.as_mut()
    }

    pub async fn execute(&mut self, statement: &Statement) -> Result<()> {
        debug!(object = %self.object, statement = %statement.redacted(), "Executing");

        self.inner
            .execute(statement)
            .await
            .map_err(|source| ReconcileError::Statement {
                object: self.object.clone(),
                statement: statement.redacted().to_string(),
                source,
            })?;
        self.executed += 1;
        Ok(())
    }

    /// Execute in order, stopping at the first failure
    pub async fn execute_all(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }

    /// Commit if the body succeeded, roll back otherwise. A rollback failure
    /// is logged and the body's own error is returned.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let Self {
            inner,
            object,
            mode,
            executed,
        } = self;

        match outcome {
            Ok(value) => {
                inner
                    .commit()
                    .await
                    .map_err(|source| ReconcileError::Transaction {
                        phase: TransactionPhase::Commit,
                        source,
                    })?;
                debug!(%object, %mode, executed, "Committed");
                Ok(value)
            }
            Err(body_error) => {
                warn!(%object, %mode, executed, error = %body_error, "Rolling back");
                if let Err(rollback_error) = inner.rollback().await {
                    let rollback_error = ReconcileError::Transaction {
                        phase: TransactionPhase::Rollback,
                        source: rollback_error,
                    };
                    error!(%object, error = %rollback_error, "Rollback failed");
                }
                Err(body_error)
            }
        }
    }
}
