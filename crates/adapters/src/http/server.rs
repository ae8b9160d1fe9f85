use std::future::Future;
use std::sync::Arc;

use super::router::build_router;
use super::state::AppState;

/// Serve the probe, metrics and status routes until `shutdown` resolves.
///
/// In-flight requests are drained before returning.
pub async fn run_http_server(
    state: Arc<AppState>,
    bind_address: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind_address}:{port}")).await?;

    tracing::info!(%bind_address, port, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
