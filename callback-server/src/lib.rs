//! Generic webhook server for receiving camera event notifications.
//!
//! This crate provides a lightweight HTTP server that accepts
//! `POST /api/webhook/{webhook_id}` deliveries and hands the raw body to a
//! registered handler. It has no knowledge of SOAP or ONVIF.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds to a local port and serves the webhook route.
//! - [`EventRouter`]: maps webhook ids to [`NotificationHandler`]s.
//! - [`webhook_id_for`]: derives a webhook id that survives restarts.
//! - [`NotificationPayload`]: webhook id, content type and raw body of a delivery.
//!
//! The handler decides the HTTP status of the reply, so a consumer can answer
//! `500` for a body it cannot parse and `200` for everything else.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callback_server::{CallbackServer, NotificationHandler, NotificationPayload};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl NotificationHandler for Printer {
//!     async fn handle(&self, payload: NotificationPayload) -> u16 {
//!         println!("{} bytes for {}", payload.body.len(), payload.webhook_id);
//!         200
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::ServerError> {
//!     let server = CallbackServer::new((3400, 3500)).await?;
//!     let id = server.router().register_new(Arc::new(Printer)).await;
//!     println!("Give this to the camera: {}", server.webhook_url(&id));
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;
pub mod router;
mod server;

pub use error::ServerError;
pub use router::{webhook_id_for, EventRouter, NotificationHandler, NotificationPayload};
pub use server::{CallbackServer, WEBHOOK_PATH};
