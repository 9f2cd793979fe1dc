//! # httpkit
//!
//! An HTTP message layer: inbound data from several sources merged into one
//! [`Request`], and outbound state buffered in a [`Response`] or
//! [`JsonResponse`] until it is emitted.
//!
//! ## Quick Start
//!
//! ```rust
//! use httpkit::http::{IntoResponse, JsonResponse, Request, Sources, TransportMetadata};
//!
//! let request = Request::capture(
//!     Sources::new()
//!         .query([("id", "5")])
//!         .metadata(TransportMetadata::from_iter([("REQUEST_METHOD", "get")])),
//! );
//!
//! let response = match request.str("id") {
//!     Some(id) => {
//!         let mut extra = serde_json::Map::new();
//!         extra.insert("id".into(), id.into());
//!         JsonResponse::default().success_with("Found.", 200u16, extra)
//!     }
//!     None => JsonResponse::default().not_found("Not found."),
//! };
//!
//! let bytes = response.into_response().unwrap().into_bytes();
//! assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! ```
//!
//! [`server::Server`] hosts the same model over TCP.

pub mod context;
pub mod http;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{
    Headers, IntoResponse, JsonResponse, Method, Payload, Request, Response, ResponseError,
    Sources, StatusCode, TransportMetadata,
};
pub use server::{Server, ServerError};
