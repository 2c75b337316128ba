//! Application service endpoint receiving the homeserver's event pushes.
//!
//! The homeserver delivers every event that concerns the bridge namespace
//! (including invites of ghosts to rooms the bot is not in) as a transaction
//! `PUT /_matrix/app/v1/transactions/{txnId}`, retrying until it gets a 200.
//! A transaction id is forwarded at most once.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::matrix::events::MatrixEvent;

/// Transaction ids remembered for deduplication.
const REMEMBERED_TRANSACTIONS: usize = 1024;

/// Recently completed transaction ids, oldest first.
#[derive(Debug, Default)]
struct TransactionLog {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl TransactionLog {
    fn contains(&self, txn_id: &str) -> bool {
        self.seen.contains(txn_id)
    }

    fn insert(&mut self, txn_id: String) {
        if !self.seen.insert(txn_id.clone()) {
            return;
        }
        self.order.push_back(txn_id);
        if self.order.len() > REMEMBERED_TRANSACTIONS {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

/// Body of a pushed transaction.
#[derive(Debug, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Legacy `?access_token=` authentication.
#[derive(Debug, Default, Deserialize)]
pub struct AccessToken {
    access_token: Option<String>,
}

/// The transaction endpoint: authenticates the homeserver and forwards the
/// decoded events in delivery order.
pub struct Appservice {
    homeserver_token: String,
    events: mpsc::UnboundedSender<MatrixEvent>,
    transactions: Mutex<TransactionLog>,
}

impl Appservice {
    pub fn new(
        homeserver_token: impl Into<String>,
        events: mpsc::UnboundedSender<MatrixEvent>,
    ) -> Self {
        Self {
            homeserver_token: homeserver_token.into(),
            events,
            transactions: Mutex::new(TransactionLog::default()),
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/_matrix/app/v1/transactions/:txn_id", put(put_transaction))
            .route("/transactions/:txn_id", put(put_transaction))
            .with_state(self)
    }

    /// Serve transactions on `listener` until `shutdown` completes.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        info!(
            "Listening for homeserver transactions on {}",
            listener.local_addr()?
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    fn authorize(&self, headers: &HeaderMap, query: &AccessToken) -> Result<(), Response> {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match bearer.or(query.access_token.as_deref()) {
            None => Err(matrix_error(
                StatusCode::UNAUTHORIZED,
                "M_UNAUTHORIZED",
                "Missing homeserver token",
            )),
            Some(token) if token == self.homeserver_token => Ok(()),
            Some(_) => Err(matrix_error(
                StatusCode::FORBIDDEN,
                "M_FORBIDDEN",
                "Invalid homeserver token",
            )),
        }
    }
}

fn matrix_error(status: StatusCode, errcode: &str, message: &str) -> Response {
    (status, Json(json!({ "errcode": errcode, "error": message }))).into_response()
}

async fn put_transaction(
    State(appservice): State<Arc<Appservice>>,
    Path(txn_id): Path<String>,
    Query(token): Query<AccessToken>,
    headers: HeaderMap,
    Json(transaction): Json<Transaction>,
) -> Response {
    if let Err(rejection) = appservice.authorize(&headers, &token) {
        warn!("Rejected transaction {}", txn_id);
        return rejection;
    }

    // Held while forwarding so concurrent pushes keep their order.
    let Ok(mut log) = appservice.transactions.lock() else {
        return matrix_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "M_UNKNOWN",
            "Transaction log poisoned",
        );
    };
    if log.contains(&txn_id) {
        debug!("Transaction {} already processed", txn_id);
        return (StatusCode::OK, Json(json!({}))).into_response();
    }

    debug!(
        "Transaction {} with {} events",
        txn_id,
        transaction.events.len()
    );
    for raw in transaction.events {
        match MatrixEvent::from_json(raw) {
            Ok(event) => {
                if appservice.events.send(event).is_err() {
                    return matrix_error(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "M_UNKNOWN",
                        "Bridge is shutting down",
                    );
                }
            }
            Err(e) => warn!("Skipping undecodable event in transaction {}: {}", txn_id, e),
        }
    }
    log.insert(txn_id);

    (StatusCode::OK, Json(json!({}))).into_response()
}
