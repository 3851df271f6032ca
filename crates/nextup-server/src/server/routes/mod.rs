//! HTTP surface.
//!
//! | Method | Path             | Reply                                  |
//! |--------|------------------|----------------------------------------|
//! | GET    | `/queue`         | caller's ticket, issued on first call  |
//! | POST   | `/queue/next`    | a fresh ticket for the caller          |
//! | POST   | `/queue/clear`   | `{"queue":"A0"}` after a reset         |
//! | GET    | `/queue/current` | `{"queue":<max>,"count":<active>}`     |
//! | GET    | `/queue/today`   | today's allocation records             |
//! | GET    | `/ws`            | ticket stream, see [`socket`]          |
//! | GET    | `/board/ws`      | free-form board stream                 |
//! | GET    | `/healthz`       | `ok`                                   |
//!
//! [`socket`]: crate::server::socket

#[cfg(test)]
mod tests;

use crate::server::{socket, state::AppState, telemetry};
use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{HeaderMap, HeaderName, Method, header, request::Parts},
    routing::{get, post},
};
use core::convert::Infallible;
use nextup::{
    AllocationRecord, ClientIdentity, IDENTITY_HEADER, Issued, Outcome, QueueState,
    SESSION_COOKIE, Ticket, TicketLedger, TicketReply, local_today, resolve,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queue", get(get_ticket))
        .route("/queue/next", post(next_ticket))
        .route("/queue/clear", post(clear_queue))
        .route("/queue/current", get(current_queue))
        .route("/queue/today", get(today))
        .route("/ws", get(socket::ticket_socket))
        .route("/board/ws", get(socket::board_socket))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors())
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(IDENTITY_HEADER),
        ])
}

/// The caller's identity, resolved once per request or socket upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester(pub ClientIdentity);

impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(identify(&parts.headers)))
    }
}

pub fn identify(headers: &HeaderMap) -> ClientIdentity {
    let explicit = headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok());
    let cookie = session_cookie(headers);
    resolve(explicit, cookie)
}

/// Value of the `session_id` cookie across every `Cookie` header.
fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
}

/// Counts what an allocating call did.
pub fn observe_issue(outcome: &Outcome<Issued>) {
    if outcome.value.created {
        telemetry::increment_tickets_issued();
    }
    telemetry::record_observers_pruned(outcome.delivery.pruned);
}

async fn get_ticket(
    State(state): State<AppState>,
    Requester(identity): Requester,
) -> Json<TicketReply> {
    let outcome = state.coordinator.get_or_create(&identity);
    observe_issue(&outcome);
    Json(outcome.value.ticket.into())
}

async fn next_ticket(
    State(state): State<AppState>,
    Requester(identity): Requester,
) -> Json<TicketReply> {
    let outcome = state.coordinator.advance(&identity);
    observe_issue(&outcome);
    Json(outcome.value.ticket.into())
}

async fn clear_queue(State(state): State<AppState>) -> Json<TicketReply> {
    let outcome = state.coordinator.reset();
    telemetry::increment_resets();
    telemetry::record_observers_pruned(outcome.delivery.pruned);
    Json(Ticket::ORIGIN.into())
}

async fn current_queue(State(state): State<AppState>) -> Json<QueueState> {
    Json(state.coordinator.current())
}

/// Prefers the ledger, which also holds rows from earlier runs; falls back to
/// this process's history when there is no ledger or it cannot be read.
async fn today(State(state): State<AppState>) -> Json<Vec<AllocationRecord>> {
    if let Some(ledger) = &state.ledger {
        match ledger.query_today().await {
            Ok(records) => return Json(records),
            Err(e) => tracing::warn!("Falling back to in-memory history: {e}"),
        }
    }
    Json(state.coordinator.store().records_on(local_today()))
}

async fn healthz() -> &'static str {
    "ok"
}
