pub mod handlers;
pub mod router;
pub mod state;

use crate::config::VigilantConfig;
use crate::error::{LogError, Result};
use crate::materializer::ServiceState;

/// Start the HTTP server with the given configuration.
///
/// Runs until Ctrl-C; the materializer is stopped before returning.
pub async fn start(config: VigilantConfig) -> Result<()> {
    let app_state = state::AppState::from_config(&config).await?;
    let supervisor = app_state.supervisor.clone();

    if config.materializer.autostart {
        supervisor.start().await?;
    }

    let bind_addr = config.bind_address();
    let app = router::build(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| LogError::Config(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LogError::Internal(format!("Server error: {e}")))?;

    if supervisor.state().await == ServiceState::Running {
        supervisor.stop().await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
