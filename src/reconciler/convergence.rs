use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::data_types::ObjectKind;

use super::{ReconcileError, Result};

/// Bridges the delay between a creating statement and the new object showing
/// up in the catalog. One fixed pause, no polling: an object that is still
/// missing afterwards fails the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceWaiter {
    delay: Duration,
}

impl Default for ConvergenceWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ConvergenceWaiter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn await_visibility(&self) {
        if self.delay.is_zero() {
            return;
        }
        debug!(
            delay_ms = self.delay.as_millis() as u64,
            "Waiting for the catalog to converge"
        );
        sleep(self.delay).await;
    }

    /// Turn a by-name lookup made after the wait into the new object's id.
    /// `NotFound` at this point means the object never became visible.
    pub fn resolve<T>(&self, kind: ObjectKind, name: &str, lookup: Result<T>) -> Result<T> {
        match lookup {
            Err(e) if e.is_not_found() => Err(ReconcileError::ConvergenceTimeout {
                kind,
                name: name.to_string(),
            }),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_waits_the_full_delay() {
        let waiter = ConvergenceWaiter::new(Duration::from_millis(20));
        let started = tokio::time::Instant::now();
        waiter.await_visibility().await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_default_window() {
        assert_eq!(ConvergenceWaiter::default().delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_object_times_out() {
        let waiter = ConvergenceWaiter::new(Duration::ZERO);

        let error = waiter
            .resolve::<i64>(
                ObjectKind::Group,
                "analysts",
                Err(ReconcileError::not_found(ObjectKind::Group, "analysts")),
            )
            .unwrap_err();
        assert!(matches!(
            error,
            ReconcileError::ConvergenceTimeout { kind: ObjectKind::Group, ref name } if name == "analysts"
        ));

        assert_eq!(
            waiter
                .resolve(ObjectKind::Group, "analysts", Ok(7))
                .unwrap(),
            7
        );
    }

    #[test]
    fn test_other_errors_pass_through() {
        let waiter = ConvergenceWaiter::new(Duration::ZERO);
        let error = waiter
            .resolve::<i64>(
                ObjectKind::User,
                "alice",
                Err(ReconcileError::validation("bad")),
            )
            .unwrap_err();
        assert!(matches!(error, ReconcileError::Validation { .. }));
    }
}
