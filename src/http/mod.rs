//! HTTP query surface.
//!
//! Every route is a `GET` answering with the envelope
//! `{"status": "SUCCESS" | "ERROR", "result": ...}`:
//! - `/tokens` lists tracked tokens
//! - `/tokens/:token` lists transfers of one token (`from`, `to` filters)
//! - `/from/:address` lists transfers sent by an address (`tokens`, `to`)
//! - `/to/:address` lists transfers received by an address (`tokens`, `from`)
//! - `/health` reports the ingestion state
//!
//! All list routes accept `limit` (default 100, `0` for no limit) and
//! `offset`. Address filters may be repeated or comma-separated.

mod handlers;

pub use handlers::{ApiResult, router};

use std::io;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consumer::ConsumerState;
use crate::query::QueryService;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: QueryService,
    pub ingestion: watch::Receiver<ConsumerState>,
}

impl ApiState {
    pub fn new(query: QueryService, ingestion: watch::Receiver<ConsumerState>) -> Self {
        Self { query, ingestion }
    }
}

/// Serves the API on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    cancel: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await;

    match &result {
        Ok(()) => info!("HTTP server stopped"),
        Err(e) => error!("HTTP server error: {}", e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn server_stops_on_cancel() {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let (_state_tx, state_rx) = watch::channel(ConsumerState::Idle);
        let state = ApiState::new(QueryService::new(store), state_rx);
        let cancel = CancellationToken::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = tokio::spawn(serve(listener, state, cancel.clone()));
        cancel.cancel();

        handle.await.unwrap().unwrap();
    }
}
