//! HTTP server for receiving webhook deliveries.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use crate::error::ServerError;
use crate::router::{EventRouter, NotificationPayload};

/// Path prefix under which webhooks are served
pub const WEBHOOK_PATH: &str = "/api/webhook";

/// HTTP callback server for webhook deliveries.
///
/// The `CallbackServer` binds to a local port and accepts
/// `POST /api/webhook/{webhook_id}`. Requests whose content type is not XML
/// are refused before reaching a handler.
///
/// # Example
///
/// ```no_run
/// use callback_server::CallbackServer;
///
/// #[tokio::main]
/// async fn main() {
///     let server = CallbackServer::new((3400, 3500))
///         .await
///         .expect("Failed to create callback server");
///
///     println!("Server listening at: {}", server.base_url());
///     server.shutdown().await;
/// }
/// ```
pub struct CallbackServer {
    /// The port the server is bound to
    port: u16,
    /// The base URL handed out in callback addresses
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Create and start a callback server advertised on the detected local IP.
    ///
    /// # Arguments
    ///
    /// * `port_range` - Range of ports to try binding to (start, end)
    ///
    /// # Returns
    ///
    /// The running server, or an error if no port could be bound or the local
    /// IP address could not be detected.
    pub async fn new(port_range: (u16, u16)) -> Result<Self, ServerError> {
        let local_ip = Self::detect_local_ip().ok_or(ServerError::LocalIpUnavailable)?;
        Self::with_advertised_ip(port_range, local_ip).await
    }

    /// Create and start a callback server that advertises `advertised_ip` in its URLs.
    ///
    /// A range of `(0, 0)` lets the operating system pick the port.
    pub async fn with_advertised_ip(
        port_range: (u16, u16),
        advertised_ip: IpAddr,
    ) -> Result<Self, ServerError> {
        let port = Self::find_available_port(port_range.0, port_range.1).ok_or(
            ServerError::NoAvailablePort {
                start: port_range.0,
                end: port_range.1,
            },
        )?;

        let event_router = Arc::new(EventRouter::new());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let (addr, server_handle) = Self::start_server(port, event_router.clone(), shutdown_rx)?;
        let base_url = format!("http://{}:{}", advertised_ip, addr.port());
        info!(%addr, %base_url, "callback server listening");

        Ok(Self {
            port: addr.port(),
            base_url,
            event_router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL of the server, `http://<ip>:<port>`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full callback URL for a webhook id.
    pub fn webhook_url(&self, webhook_id: &str) -> String {
        format!("{}{}/{}", self.base_url, WEBHOOK_PATH, webhook_id)
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the event router.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Shutdown the server gracefully, letting in-flight requests finish.
    pub async fn shutdown(mut self) {
        self.stop().await;
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "callback server task ended abnormally");
            }
        }
    }

    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
    }

    /// Detect the local IP address cameras should call back to.
    ///
    /// Uses a UDP socket "connection" to learn which interface would route
    /// outbound traffic. No data is sent.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    fn start_server(
        port: u16,
        event_router: Arc<EventRouter>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
        let webhook_route = warp::post()
            .and(warp::path!("api" / "webhook" / String))
            .and(warp::header::optional::<String>("content-type"))
            .and(warp::body::bytes())
            .and_then(move |webhook_id: String, content_type: Option<String>, body: Bytes| {
                let router = event_router.clone();
                async move {
                    debug!(%webhook_id, size = body.len(), "incoming webhook delivery");

                    if !Self::is_xml(content_type.as_deref()) {
                        debug!(%webhook_id, ?content_type, "refusing non-xml delivery");
                        return Err(warp::reject::custom(UnsupportedContentType));
                    }

                    let payload = NotificationPayload {
                        webhook_id,
                        content_type,
                        body,
                    };
                    match router.route_event(payload).await {
                        Some(status) => {
                            let status =
                                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                            Ok(warp::reply::with_status("", status))
                        }
                        None => Err(warp::reject::not_found()),
                    }
                }
            });

        let routes = webhook_route.recover(handle_rejection);

        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                async move {
                    shutdown_rx.recv().await;
                },
            )
            .map_err(|e| ServerError::Start(e.to_string()))?;

        Ok((addr, tokio::spawn(server)))
    }

    fn is_xml(content_type: Option<&str>) -> bool {
        content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"))
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

#[derive(Debug)]
struct UnsupportedContentType;

impl warp::reject::Reject for UnsupportedContentType {}

/// Convert rejections to HTTP responses.
async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Webhook not found")
    } else if err.find::<UnsupportedContentType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected an XML body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_port_available() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!CallbackServer::is_port_available(port));
        drop(listener);
    }

    #[test]
    fn test_find_available_port() {
        let port = CallbackServer::find_available_port(50000, 50100);
        assert!(port.is_some());
        assert!((50000..=50100).contains(&port.unwrap()));
    }

    #[test]
    fn test_is_xml() {
        assert!(CallbackServer::is_xml(Some("application/soap+xml; charset=utf-8")));
        assert!(CallbackServer::is_xml(Some("text/XML")));
        assert!(!CallbackServer::is_xml(Some("application/json")));
        assert!(!CallbackServer::is_xml(None));
    }

    #[tokio::test]
    async fn test_callback_server_creation() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let server = CallbackServer::with_advertised_ip((0, 0), ip).await.unwrap();

        assert_ne!(server.port(), 0);
        assert_eq!(server.base_url(), format!("http://127.0.0.1:{}", server.port()));
        assert_eq!(
            server.webhook_url("abc"),
            format!("http://127.0.0.1:{}/api/webhook/abc", server.port())
        );

        server.shutdown().await;
    }
}
