pub mod api;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use memshard_core::SessionStore;

use crate::error::HostError;

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<SessionStore>,
}

impl HttpState {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

pub fn app(store: Arc<SessionStore>) -> Router {
    api::router().with_state(HttpState::new(store))
}

pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> Result<(), HostError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HostError::Bind { addr, source })?;
    tracing::info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(HostError::Serve)
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let mut term =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down...");
        }
        _ = async {
            match term.as_mut() {
                Some(t) => { t.recv().await; }
                None => std::future::pending::<()>().await,
            }
        } => {
            tracing::info!("SIGTERM received, shutting down...");
        }
    }
}
