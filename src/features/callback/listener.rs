use super::CallbackCorrelator;
use crate::common::net::presented_secret;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::routing::get;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const ACK: &str = "ok";

/// Webhook endpoint. Every request is acknowledged with `ok` so the
/// alerting service never retries a delivery.
pub fn router(correlator: Arc<CallbackCorrelator>) -> Router {
    Router::new()
        .route("/", get(acknowledge).post(receive))
        .layer(DefaultBodyLimit::disable())
        .with_state(correlator)
}

pub async fn serve<F>(
    addr: SocketAddr,
    correlator: Arc<CallbackCorrelator>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "webhook listener started");
    axum::serve(listener, router(correlator))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn acknowledge() -> &'static str {
    ACK
}

async fn receive(
    State(correlator): State<Arc<CallbackCorrelator>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> &'static str {
    let secret = presented_secret(query.as_deref());
    correlator.handle(&body, secret.as_deref());
    ACK
}
