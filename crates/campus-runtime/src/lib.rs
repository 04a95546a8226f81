//! Request admission for the campus platform: the gate pipeline and its
//! axum transport edge.

mod gate;
mod middleware;
mod proxy;

use std::sync::Arc;

use axum::Router;

pub use gate::{Admission, Gate, GateRequest};
pub use middleware::{gate_middleware, strip_trusted_headers};
pub use proxy::{Upstream, context_echo, forward};

/// Router that gates every request, then forwards it upstream or, without an
/// upstream, echoes the attached context.
pub fn gated_router(gate: Arc<Gate>, upstream: Option<Arc<Upstream>>) -> Router {
    let inner: Router = match upstream {
        Some(upstream) => Router::new().fallback(forward).with_state(upstream),
        None => Router::new().fallback(context_echo),
    };
    inner.layer(axum::middleware::from_fn_with_state(gate, gate_middleware))
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
