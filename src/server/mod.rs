//! Async TCP gateway using Tokio.
//!
//! Accepts TCP connections, turns each HTTP/1.1 request into a captured
//! [`Request`], runs the handler with that request bound as the current
//! request of its task, and emits the handler's response exactly once.
//! Supports HTTP/1.1 persistent connections (keep-alive) out of the box.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::context;
use crate::http::response::CONTENT_LENGTH;
use crate::http::{IntoResponse, Request, Response, StatusCode};

pub mod gateway;

use gateway::{GatewayEnv, GatewayError, RequestHead};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Script name reported to handlers unless [`Server::script_name`] overrides it.
pub const DEFAULT_SCRIPT_NAME: &str = "/index.php";

/// The httpkit gateway server.
///
/// # Examples
///
/// ```rust,no_run
/// use httpkit::server::Server;
/// use httpkit::http::JsonResponse;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?.script_name("/api/index.php");
///     server.run(|req| async move {
///         JsonResponse::default().success(format!("Hello from {}", req.path()))
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    script_name: String,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            script_name: DEFAULT_SCRIPT_NAME.to_owned(),
        })
    }

    /// Sets the `SCRIPT_NAME` reported to handlers.
    #[must_use]
    pub fn script_name(mut self, script_name: impl Into<String>) -> Self {
        self.script_name = script_name.into();
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives the captured [`Request`] and returns anything
    /// that implements [`IntoResponse`]. While the handler runs,
    /// [`Request::instance`] returns the same request.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F, R>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Arc<Request>) -> F + Send + Sync + 'static,
        F: Future<Output = R> + Send + 'static,
        R: IntoResponse + Send + 'static,
    {
        let handler = Arc::new(handler);
        let script_name: Arc<str> = self.script_name.into();
        info!(address = %self.local_addr, script = %script_name, "httpkit listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let env = GatewayEnv {
                script_name: script_name.to_string(),
                remote_addr: Some(peer_addr),
            };

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, env, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<H, F, R>(
    mut stream: TcpStream,
    env: GatewayEnv,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Arc<Request>) -> F + Send + Sync + 'static,
    F: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    let peer = env
        .remote_addr
        .map(|a| a.to_string())
        .unwrap_or_default();
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            reject_too_large(&mut stream, &peer).await?;
            break;
        }

        let head = match RequestHead::parse(&buf) {
            Ok(head) => head,
            Err(GatewayError::Incomplete) => {
                // Headers not yet fully received; read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "bad request, sending 400");
                let response = closing(
                    Response::new()
                        .status(StatusCode::BadRequest)
                        .write(format!("Bad Request: {e}")),
                );
                stream.write_all(&wire(response)).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let body_offset = head.body_offset();
        let total_needed = match body_offset.checked_add(head.content_length().unwrap_or(0)) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                reject_too_large(&mut stream, &peer).await?;
                break;
            }
        };
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = head.is_keep_alive();
        let sources = head.into_sources(&buf[body_offset..total_needed], &env);
        let request = Arc::new(Request::from_sources(sources));

        debug!(
            peer = %peer,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let outcome = context::scope(Arc::clone(&request), handler(request)).await;
        let response = match outcome.into_response() {
            Ok(response) => response,
            Err(e) => {
                error!(peer = %peer, error = %e, "handler response could not be emitted, sending 500");
                Response::new()
                    .status(StatusCode::InternalServerError)
                    .write("Internal Server Error")
            }
        };
        let response = if keep_alive {
            response
        } else {
            closing(response)
        };

        stream.write_all(&wire(response)).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

fn closing(response: Response) -> Response {
    response.header("Connection", "close")
}

async fn reject_too_large(stream: &mut TcpStream, peer: &str) -> Result<(), std::io::Error> {
    let err = GatewayError::BodyTooLarge {
        max_bytes: MAX_REQUEST_SIZE,
    };
    warn!(peer = %peer, error = %err, "request too large, sending 413");
    let response = closing(
        Response::new()
            .status(StatusCode::PayloadTooLarge)
            .write("Request entity too large"),
    );
    stream.write_all(&wire(response)).await
}

/// Serializes `response` for the socket. The core counts `Content-Length`
/// in characters; on the wire it must be the body's byte length.
fn wire(mut response: Response) -> BytesMut {
    let body_bytes: usize = response.fragments().iter().map(String::len).sum();
    response.set_header(CONTENT_LENGTH, Some(body_bytes.to_string()));
    response.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::JsonResponse;
    use serde_json::json;

    async fn spawn_server() -> SocketAddr {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("httpkit=debug")
            .with_test_writer()
            .try_init();

        let server = Server::bind("127.0.0.1:0")
            .await
            .unwrap()
            .script_name("/app/index.php");
        let addr = server.local_addr();
        tokio::spawn(server.run(|req: Arc<Request>| async move {
            let current = Request::instance().expect("request is scoped");
            assert!(Arc::ptr_eq(&current, &req));

            let mut extra = serde_json::Map::new();
            extra.insert("path".into(), json!(req.path()));
            extra.insert("method".into(), json!(req.method().as_str()));
            extra.insert("ajax".into(), json!(req.ajax()));
            extra.insert("input".into(), json!(req.all()));
            JsonResponse::default().success_with("OK", 200u16, extra)
        }));
        addr
    }

    async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn json_body(response: &str) -> serde_json::Value {
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn serves_json_envelope() {
        let addr = spawn_server().await;
        let body = r#"{"a":4,"c":5}"#;
        let raw = format!(
            "POST /app/users/5?a=1 HTTP/1.1\r\nHost: localhost\r\nX-Requested-With: XmlHttpRequest\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let response = roundtrip(addr, raw.as_bytes()).await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert_eq!(
            json_body(&response),
            json!({
                "status": "success",
                "message": "OK",
                "path": "users/5",
                "method": "POST",
                "ajax": true,
                "input": {"a": 4, "c": 5},
            })
        );
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn content_length_counts_body_bytes() {
        let addr = spawn_server().await;
        let response = roundtrip(
            addr,
            b"GET /app/?m=h%C3%A9llo HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(body.contains("héllo"));
        assert_eq!(content_length(head), body.len());
    }

    #[tokio::test]
    async fn keep_alive_framing_with_non_ascii_body() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /app/?m=%C3%A9%C3%A9 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        // Read exactly as many bytes as the first response's framing announces.
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        let (body_start, body_len) = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the first response completed");
            out.extend_from_slice(&chunk[..n]);
            if let Some(pos) = out.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = std::str::from_utf8(&out[..pos]).unwrap();
                let len = content_length(head);
                if out.len() >= pos + 4 + len {
                    break (pos + 4, len);
                }
            }
        };
        let first: serde_json::Value =
            serde_json::from_slice(&out[body_start..body_start + body_len]).unwrap();
        assert_eq!(first["input"]["m"], json!("éé"));

        stream
            .write_all(b"GET /app/?m=ok HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        stream.read_to_end(&mut out).await.unwrap();
        let second = std::str::from_utf8(&out[body_start + body_len..]).unwrap();
        assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(json_body(second)["input"]["m"], json!("ok"));
    }

    #[tokio::test]
    async fn oversized_content_length_gets_413() {
        let addr = spawn_server().await;
        let response = roundtrip(
            addr,
            b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nx",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(response.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let addr = spawn_server().await;
        let response = roundtrip(addr, b"GET / HTTP/9.9\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
