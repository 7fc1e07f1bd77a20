//! Integration tests for the callback server.
//!
//! These tests start a real HTTP server on localhost, send actual HTTP
//! requests, and verify what reaches the handlers.

use async_trait::async_trait;
use callback_server::{CallbackServer, NotificationHandler, NotificationPayload};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct ForwardingHandler {
    status: u16,
    sender: mpsc::UnboundedSender<NotificationPayload>,
}

#[async_trait]
impl NotificationHandler for ForwardingHandler {
    async fn handle(&self, payload: NotificationPayload) -> u16 {
        let _ = self.sender.send(payload);
        self.status
    }
}

async fn start() -> CallbackServer {
    CallbackServer::with_advertised_ip((0, 0), IpAddr::V4(Ipv4Addr::LOCALHOST))
        .await
        .expect("Failed to create callback server")
}

const NOTIFY: &str = r#"<?xml version="1.0"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2">
    <env:Body><wsnt:Notify/></env:Body>
</env:Envelope>"#;

#[tokio::test]
async fn test_callback_server_end_to_end() {
    let server = start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let webhook_id = server
        .router()
        .register_new(Arc::new(ForwardingHandler { status: 200, sender: tx }))
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(server.webhook_url(&webhook_id))
        .header("Content-Type", "application/soap+xml; charset=utf-8")
        .body(NOTIFY)
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert_eq!(response.status(), 200);

    let payload = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("Timeout waiting for notification")
        .expect("No notification received");
    assert_eq!(payload.webhook_id, webhook_id);
    assert_eq!(payload.content_type.as_deref(), Some("application/soap+xml; charset=utf-8"));
    assert!(String::from_utf8_lossy(&payload.body).contains("wsnt:Notify"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_status_is_the_reply_status() {
    let server = start().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let webhook_id = server
        .router()
        .register_new(Arc::new(ForwardingHandler { status: 500, sender: tx }))
        .await;

    let response = reqwest::Client::new()
        .post(server.webhook_url(&webhook_id))
        .header("Content-Type", "text/xml")
        .body("<broken")
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert_eq!(response.status(), 500);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_webhook_is_not_found() {
    let server = start().await;

    let response = reqwest::Client::new()
        .post(server.webhook_url("missing"))
        .header("Content-Type", "application/soap+xml")
        .body(NOTIFY)
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert_eq!(response.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_non_xml_delivery_is_refused() {
    let server = start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let webhook_id = server
        .router()
        .register_new(Arc::new(ForwardingHandler { status: 200, sender: tx }))
        .await;

    let response = reqwest::Client::new()
        .post(server.webhook_url(&webhook_id))
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await
        .expect("Failed to send HTTP request");
    assert_eq!(response.status(), 415);
    assert!(rx.try_recv().is_err());

    server.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_registration() {
    let server = start().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = reqwest::Client::new();
    let url = server.webhook_url("camera-1");

    let before = client
        .post(&url)
        .header("Content-Type", "application/soap+xml")
        .body(NOTIFY)
        .send()
        .await
        .unwrap();
    assert_eq!(before.status(), 404);

    server
        .router()
        .register("camera-1".to_string(), Arc::new(ForwardingHandler { status: 200, sender: tx }))
        .await;
    let during = client
        .post(&url)
        .header("Content-Type", "application/soap+xml")
        .body(NOTIFY)
        .send()
        .await
        .unwrap();
    assert_eq!(during.status(), 200);
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_some());

    server.router().unregister("camera-1").await;
    let after = client
        .post(&url)
        .header("Content-Type", "application/soap+xml")
        .body(NOTIFY)
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), 404);

    server.shutdown().await;
}
