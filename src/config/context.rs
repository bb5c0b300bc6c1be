use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::reconciler::ReconcileContext;
use crate::repository::postgres::PostgresCluster;

use super::schema;

/// Connect to the configured cluster and wrap it for the reconcilers
pub async fn build_context(
    config: &schema::GrantsmithConfig,
) -> Result<ReconcileContext, sqlx::Error> {
    let cluster = PostgresCluster::connect(
        &config.cluster.dsn,
        config.cluster.max_connections,
        Duration::from_secs(config.cluster.acquire_timeout_secs),
    )
    .await?;
    info!(
        max_connections = config.cluster.max_connections,
        convergence_delay_ms = config.reconcile.convergence_delay_ms,
        "Connected to cluster"
    );

    Ok(ReconcileContext::new(
        Arc::new(cluster),
        Duration::from_millis(config.reconcile.convergence_delay_ms),
    ))
}
