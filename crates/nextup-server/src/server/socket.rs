//! WebSocket observers.
//!
//! `/ws` carries the ticket protocol. Each text frame is one command:
//!
//! ```text
//! get          -> {"queue": <current max>}
//! next | add   -> {"queue": <fresh ticket>}   and a broadcast
//! clear        -> {"queue": "A0"}             and a broadcast
//! ```
//!
//! Anything else is ignored and the socket stays open. Broadcasts arrive on
//! the same socket as `{"queue","count"}` or `{"event":"queue"}` depending on
//! the configured mode.
//!
//! `/board/ws` carries the free-form board. The observer is seeded with the
//! current board, so it is sent on connect and then after every accepted
//! mutation.
//!
//! A socket ends when the client closes it, a read or write fails, a write
//! stalls past [`WRITE_TIMEOUT`], the hub drops the observer for falling
//! behind, or the server shuts down. Its observer is unregistered either way.

use crate::server::{
    routes::{Requester, observe_issue},
    state::AppState,
    telemetry,
};
use anyhow::Context;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use core::time::Duration;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use nextup::{BoardCommand, ClientIdentity, Command, Outcome, TicketReply};
use serde::Serialize;
use tokio::time::timeout;

/// Longest a single frame write may take before the socket is dropped.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type Sink = SplitSink<WebSocket, Message>;

enum Inbound {
    Text(String),
    Skip,
    Closed,
}

pub async fn ticket_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Requester(identity): Requester,
) -> Response {
    ws.on_upgrade(move |socket| serve_tickets(socket, state, identity))
}

pub async fn board_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_board(socket, state))
}

#[tracing::instrument(level = "debug", skip_all, fields(identity = %identity))]
async fn serve_tickets(socket: WebSocket, state: AppState, identity: ClientIdentity) {
    let mut observer = state.coordinator.subscribe();
    telemetry::increment_observers_connected();
    tracing::debug!("Ticket observer connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            inbound = next_text(&mut stream) => match inbound {
                Inbound::Text(text) => {
                    let Some(command) = Command::parse(&text) else {
                        tracing::trace!(frame = %text, "Ignored unknown command");
                        continue;
                    };
                    let reply = execute(&state, &identity, command);
                    if let Err(e) = send_json(&mut sink, &reply).await {
                        tracing::debug!("Ticket socket write failed: {e:#}");
                        break;
                    }
                }
                Inbound::Skip => {}
                Inbound::Closed => break,
            },
            payload = observer.recv() => {
                let Some(notification) = payload else {
                    tracing::debug!("Ticket observer fell behind and was dropped");
                    break;
                };
                if let Err(e) = send_json(&mut sink, &notification).await {
                    tracing::debug!("Ticket socket write failed: {e:#}");
                    break;
                }
            }
        }
    }

    state.coordinator.unsubscribe(observer.id());
    telemetry::decrement_observers_connected();
    let _ = sink.close().await;
    tracing::debug!("Ticket observer disconnected");
}

fn execute(state: &AppState, identity: &ClientIdentity, command: Command) -> TicketReply {
    match command {
        Command::Next => {
            let outcome = state.coordinator.advance(identity);
            observe_issue(&outcome);
            outcome.value.ticket.into()
        }
        Command::Clear => {
            telemetry::increment_resets();
            record(state.coordinator.handle(identity, command))
        }
        Command::Get => record(state.coordinator.handle(identity, command)),
    }
}

fn record(outcome: Outcome<TicketReply>) -> TicketReply {
    telemetry::record_observers_pruned(outcome.delivery.pruned);
    outcome.value
}

#[tracing::instrument(level = "debug", skip_all)]
async fn serve_board(socket: WebSocket, state: AppState) {
    let mut observer = state.board.subscribe();
    telemetry::increment_observers_connected();
    tracing::debug!("Board observer connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            inbound = next_text(&mut stream) => match inbound {
                Inbound::Text(text) => match BoardCommand::parse(&text) {
                    Some(command) => {
                        state.board.apply(command);
                    }
                    None => tracing::trace!("Ignored empty board frame"),
                },
                Inbound::Skip => {}
                Inbound::Closed => break,
            },
            payload = observer.recv() => {
                let Some(board) = payload else {
                    tracing::debug!("Board observer fell behind and was dropped");
                    break;
                };
                if let Err(e) = send_json(&mut sink, board.as_ref()).await {
                    tracing::debug!("Board socket write failed: {e:#}");
                    break;
                }
            }
        }
    }

    state.board.unsubscribe(observer.id());
    telemetry::decrement_observers_connected();
    let _ = sink.close().await;
    tracing::debug!("Board observer disconnected");
}

async fn next_text(stream: &mut SplitStream<WebSocket>) -> Inbound {
    match stream.next().await {
        Some(Ok(Message::Text(text))) => Inbound::Text(text.as_str().to_owned()),
        Some(Ok(Message::Close(_))) | None => Inbound::Closed,
        Some(Ok(_)) => Inbound::Skip,
        Some(Err(e)) => {
            tracing::debug!("WebSocket read failed: {e}");
            Inbound::Closed
        }
    }
}

async fn send_json<T: Serialize>(sink: &mut Sink, payload: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string(payload).context("failed to encode payload")?;
    timeout(WRITE_TIMEOUT, sink.send(Message::Text(text.into())))
        .await
        .context("write timed out")?
        .context("socket closed")
}
