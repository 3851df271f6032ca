use super::*;
use crate::server::{config::CliArgs, config::ServerConfig, ledger::SqliteLedger};
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures::{SinkExt, StreamExt};
use nextup::RecordStatus;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

fn config() -> ServerConfig {
    ServerConfig::from_lookup(CliArgs { port: 0 }, |_| None).unwrap()
}

fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn as_client(app: &Router, method: Method, uri: &str, client: &str) -> Value {
    let request = request(method, uri)
        .header(IDENTITY_HEADER, client)
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn walkthrough_over_http() {
    let app = router(AppState::in_memory(&config()));

    assert_eq!(as_client(&app, Method::GET, "/queue", "C1").await, json!({"queue": "A1"}));
    assert_eq!(as_client(&app, Method::GET, "/queue", "C2").await, json!({"queue": "A2"}));
    assert_eq!(as_client(&app, Method::POST, "/queue/next", "C1").await, json!({"queue": "A3"}));
    assert_eq!(as_client(&app, Method::GET, "/queue", "C1").await, json!({"queue": "A3"}));
    assert_eq!(
        as_client(&app, Method::GET, "/queue/current", "anyone").await,
        json!({"queue": "A3", "count": 2})
    );

    assert_eq!(as_client(&app, Method::POST, "/queue/clear", "C2").await, json!({"queue": "A0"}));
    assert_eq!(
        as_client(&app, Method::GET, "/queue/current", "anyone").await,
        json!({"queue": "A0", "count": 0})
    );
    assert_eq!(as_client(&app, Method::GET, "/queue", "C9").await, json!({"queue": "A1"}));
}

#[tokio::test]
async fn identity_comes_from_cookie_then_anonymous() {
    let app = router(AppState::in_memory(&config()));

    let with_cookie = || {
        request(Method::GET, "/queue")
            .header(header::COOKIE, "theme=dark; session_id=abc123")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(call(&app, with_cookie()).await.1, json!({"queue": "A1"}));
    assert_eq!(call(&app, with_cookie()).await.1, json!({"queue": "A1"}));

    // Header wins over the cookie.
    let both = request(Method::GET, "/queue")
        .header(IDENTITY_HEADER, "explicit")
        .header(header::COOKIE, "session_id=abc123")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, both).await.1, json!({"queue": "A2"}));

    let anonymous = || request(Method::GET, "/queue").body(Body::empty()).unwrap();
    assert_eq!(call(&app, anonymous()).await.1, json!({"queue": "A3"}));
    assert_eq!(call(&app, anonymous()).await.1, json!({"queue": "A3"}));
}

#[test]
fn cookie_parsing_handles_multiple_headers() {
    let mut headers = HeaderMap::new();
    headers.append(header::COOKIE, "a=1".parse().unwrap());
    headers.append(header::COOKIE, "b=2;  session_id = s-9".parse().unwrap());
    assert_eq!(session_cookie(&headers), Some("s-9"));
    assert_eq!(identify(&headers).as_str(), "s-9");

    assert!(identify(&HeaderMap::new()).is_anonymous());
}

#[tokio::test]
async fn today_lists_in_memory_history() {
    let app = router(AppState::in_memory(&config()));
    as_client(&app, Method::GET, "/queue", "c1").await;
    as_client(&app, Method::POST, "/queue/next", "c1").await;

    let body = as_client(&app, Method::GET, "/queue/today", "c1").await;
    let records: Vec<AllocationRecord> = serde_json::from_value(body).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, RecordStatus::Inactive);
    assert_eq!(records[1].ticket.to_string(), "A2");
}

#[tokio::test]
async fn healthz_and_cors_preflight() {
    let app = router(AppState::in_memory(&config()));

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let preflight = request(Method::OPTIONS, "/queue")
        .header(header::ORIGIN, "https://kiosk.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, IDENTITY_HEADER)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn ledger_records_and_restores_state() {
    let config = config();
    let ledger = Arc::new(SqliteLedger::connect("sqlite::memory:").await.unwrap());

    let state = AppState::with_ledger(&config, Arc::clone(&ledger)).await;
    let app = router(state.clone());
    as_client(&app, Method::GET, "/queue", "c1").await;
    as_client(&app, Method::GET, "/queue", "c2").await;
    as_client(&app, Method::POST, "/queue/next", "c1").await;

    // Drain the journal without closing the shared pool.
    state.flush(core::time::Duration::from_secs(2)).await;

    let body = as_client(&app, Method::GET, "/queue/today", "c1").await;
    assert_eq!(body.as_array().map(Vec::len), Some(3));

    // A new process over the same ledger resumes where the last one stopped.
    let restarted = router(AppState::with_ledger(&config, Arc::clone(&ledger)).await);
    assert_eq!(
        as_client(&restarted, Method::GET, "/queue/current", "x").await,
        json!({"queue": "A3", "count": 2})
    );
    assert_eq!(as_client(&restarted, Method::GET, "/queue", "c2").await, json!({"queue": "A2"}));
    assert_eq!(as_client(&restarted, Method::GET, "/queue", "c3").await, json!({"queue": "A4"}));
}

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn ticket_socket_replies_and_broadcasts() {
    let state = AppState::in_memory(&config());
    let base = spawn_server(state.clone()).await;

    let (mut watcher, _) = connect_async(format!("{base}/ws")).await.unwrap();
    let (mut actor, _) = connect_async(format!("{base}/ws")).await.unwrap();

    // Wait until both observers are registered before mutating.
    while state.coordinator.observers() < 2 {
        tokio::task::yield_now().await;
    }

    actor.send(WsMessage::text("get")).await.unwrap();
    assert_eq!(next_json(&mut actor).await, json!({"queue": "A0"}));

    actor.send(WsMessage::text("bogus")).await.unwrap();
    actor.send(WsMessage::text("next")).await.unwrap();

    // The actor gets its reply and the broadcast, in either order.
    let mut seen = vec![next_json(&mut actor).await, next_json(&mut actor).await];
    seen.sort_by_key(|v| v.get("count").is_some());
    assert_eq!(seen, [json!({"queue": "A1"}), json!({"queue": "A1", "count": 1})]);

    assert_eq!(next_json(&mut watcher).await, json!({"queue": "A1", "count": 1}));

    watcher.close(None).await.unwrap();
    while state.coordinator.observers() > 1 {
        tokio::task::yield_now().await;
    }
    state.shutdown.cancel();
}

#[tokio::test]
async fn board_socket_shares_items() {
    let state = AppState::in_memory(&config());
    let base = spawn_server(state.clone()).await;

    let (mut a, _) = connect_async(format!("{base}/board/ws")).await.unwrap();
    assert_eq!(next_json(&mut a).await, json!({"queue": [], "count": 0}));
    let (mut b, _) = connect_async(format!("{base}/board/ws")).await.unwrap();
    assert_eq!(next_json(&mut b).await, json!({"queue": [], "count": 0}));

    a.send(WsMessage::text(r#"{"action":"add","value":"latte"}"#)).await.unwrap();
    for socket in [&mut a, &mut b] {
        assert_eq!(next_json(socket).await, json!({"queue": ["latte"], "count": 1}));
    }

    b.send(WsMessage::text("scone")).await.unwrap();
    for socket in [&mut a, &mut b] {
        assert_eq!(next_json(socket).await, json!({"queue": ["latte", "scone"], "count": 2}));
    }

    a.send(WsMessage::text("clear")).await.unwrap();
    assert_eq!(next_json(&mut b).await, json!({"queue": [], "count": 0}));
    state.shutdown.cancel();
}
