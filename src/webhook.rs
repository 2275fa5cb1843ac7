// ABOUTME: HTTP server receiving application-service transactions from the homeserver
// ABOUTME: Hands each batch to the relay engine, always acknowledging so the homeserver never retries bad input

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use bridge_core::{metrics, RelayEngine, Transaction};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// Maximum number of remembered transaction IDs before the set is reset.
const TXN_DEDUP_CAP: usize = 10_000;

#[derive(Clone)]
pub struct WebhookState {
    engine: Arc<RelayEngine>,
    hs_token: Option<String>,
    seen_txns: Arc<Mutex<HashSet<String>>>,
}

impl WebhookState {
    pub fn new(engine: Arc<RelayEngine>, hs_token: Option<String>) -> Self {
        Self {
            engine,
            hs_token,
            seen_txns: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Record `txn_id`; false if it was already processed.
    async fn first_delivery(&self, txn_id: &str) -> bool {
        let mut seen = self.seen_txns.lock().await;
        if seen.contains(txn_id) {
            return false;
        }
        if seen.len() >= TXN_DEDUP_CAP {
            seen.clear();
        }
        seen.insert(txn_id.to_string());
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    access_token: Option<String>,
}

/// Routes for transaction pushes; no metrics endpoint.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/transactions/", post(batch_handler))
        .route(
            "/transactions/{txn_id}",
            put(transaction_handler).post(transaction_handler),
        )
        .route("/_matrix/app/v1/transactions/{txn_id}", put(transaction_handler))
        .with_state(state)
}

/// Start the webhook HTTP server and run until `shutdown` resolves.
pub async fn start_webhook_server<F>(
    host: &str,
    port: u16,
    state: WebhookState,
    metrics_handle: Option<PrometheusHandle>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut app = router(state);
    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }
    let app = app.layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", host, port);
    tracing::info!(addr = %addr, "Starting webhook server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Webhook server stopped");
    Ok(())
}

async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

fn ack() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({})))
}

fn forbidden() -> (StatusCode, Json<Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"errcode": "M_FORBIDDEN", "error": "Bad token supplied"})),
    )
}

/// Whether the request carries the homeserver token, when one is required.
fn authorized(state: &WebhookState, query: &TokenQuery, headers: &HeaderMap) -> bool {
    let Some(expected) = state.hs_token.as_deref() else {
        return true;
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    query.access_token.as_deref() == Some(expected) || bearer == Some(expected)
}

/// `POST /transactions/`
async fn batch_handler(
    State(state): State<WebhookState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &query, &headers) {
        tracing::warn!("Transaction rejected: bad homeserver token");
        metrics::record_webhook_request("forbidden");
        return forbidden();
    }
    process(&state, None, &body).await
}

/// `PUT /transactions/{txn_id}` and its variants
async fn transaction_handler(
    State(state): State<WebhookState>,
    Path(txn_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &query, &headers) {
        tracing::warn!(txn_id = %txn_id, "Transaction rejected: bad homeserver token");
        metrics::record_webhook_request("forbidden");
        return forbidden();
    }
    if !state.first_delivery(&txn_id).await {
        tracing::debug!(txn_id = %txn_id, "Skipping replayed transaction");
        metrics::record_webhook_request("duplicate");
        return ack();
    }
    process(&state, Some(&txn_id), &body).await
}

async fn process(state: &WebhookState, txn_id: Option<&str>, body: &[u8]) -> (StatusCode, Json<Value>) {
    let txn: Transaction = match serde_json::from_slice(body) {
        Ok(txn) => txn,
        Err(e) => {
            tracing::warn!(txn_id = ?txn_id, error = %e, "Unparseable transaction body");
            metrics::record_webhook_request("bad_request");
            metrics::record_error("malformed_event");
            return ack();
        }
    };

    tracing::debug!(txn_id = ?txn_id, events = txn.events.len(), "Transaction received");
    let outcomes = state.engine.handle_transaction(txn.events).await;
    tracing::debug!(txn_id = ?txn_id, ?outcomes, "Transaction processed");
    metrics::record_webhook_request("ok");
    ack()
}
