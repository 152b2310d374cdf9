mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::{app, app_with, RecordingStore, TestApp, VALID_ICE};
use fleetpulse_core::Config;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn wait_for_observers(app: &TestApp, count: usize) {
    tokio::time::timeout(WAIT, async {
        while app.hub.observer_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("observer count never reached the expected value");
}

async fn push(app: &TestApp, tenant: Option<&str>) -> StatusCode {
    let mut request = Request::builder().method(Method::POST).uri("/api/telemetry");
    if let Some(tenant) = tenant {
        request = request.header("x-tenant-id", tenant);
    }
    let request = request.body(Body::from(VALID_ICE)).unwrap();
    app.router.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_sse_emits_telemetry_events() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/stream/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(app.hub.observer_count(), 1);

    assert_eq!(push(&app, None).await, StatusCode::CREATED);

    let mut body = response.into_body();
    let frame = tokio::time::timeout(WAIT, body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: telemetry\n"));
    assert!(text.contains(r#"data: {"vehicle_id":"v1""#));

    // Dropping the body is the client going away
    drop(body);
    assert_eq!(app.hub.observer_count(), 0);
}

#[tokio::test]
async fn test_sse_stream_ends_on_shutdown() {
    let app = app();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/stream/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    app.shutdown.cancel();

    let collected = tokio::time::timeout(WAIT, response.into_body().collect())
        .await
        .expect("stream did not end after shutdown");
    assert!(collected.is_ok());
    assert_eq!(app.hub.observer_count(), 0);
}

#[tokio::test]
async fn test_unscoped_stream_forbidden_when_disallowed() {
    let mut config = Config::default();
    config.identity.allow_unscoped_observers = false;
    let app = app_with(RecordingStore::default(), &config);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/stream/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.hub.observer_count(), 0);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/stream/sse?tenant=acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.hub.observer_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_receives_text_frames_and_ignores_inbound() {
    let app = app();
    let addr = serve(&app).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/stream/ws"))
        .await
        .unwrap();
    wait_for_observers(&app, 1).await;

    // Inbound frames are read and discarded without closing the stream
    socket.send(Message::Text("hello".into())).await.unwrap();

    assert_eq!(push(&app, None).await, StatusCode::CREATED);

    let frame = tokio::time::timeout(WAIT, socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["vehicle_id"], "v1");
    assert_eq!(json["type"], "ICE");

    socket.close(None).await.unwrap();
    wait_for_observers(&app, 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_tenant_scoping() {
    let app = app();
    let addr = serve(&app).await;

    let (mut acme, _) = connect_async(format!("ws://{addr}/api/stream/ws?tenant=acme"))
        .await
        .unwrap();
    let (mut unscoped, _) = connect_async(format!("ws://{addr}/api/stream/ws"))
        .await
        .unwrap();
    wait_for_observers(&app, 2).await;

    assert_eq!(push(&app, Some("acme")).await, StatusCode::CREATED);

    let frame = tokio::time::timeout(WAIT, acme.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(frame.to_text().unwrap().contains(r#""tenant_id":"acme""#));

    // The unscoped observer never saw the tenant reading; an untenanted
    // push is global and reaches both
    assert_eq!(push(&app, None).await, StatusCode::CREATED);
    for socket in [&mut unscoped, &mut acme] {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!frame.to_text().unwrap().contains("tenant_id"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_closed_by_server_on_shutdown() {
    let app = app();
    let addr = serve(&app).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/stream/ws"))
        .await
        .unwrap();
    wait_for_observers(&app, 1).await;

    app.shutdown.cancel();

    let frame = tokio::time::timeout(WAIT, socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Close(_)));
    wait_for_observers(&app, 0).await;
}
