//! Buffered HTTP response.
//!
//! A [`Response`] accumulates a status code, an ordered header map, and body
//! fragments, then serializes all of it in one go. Emission takes the
//! response by value, so a response cannot be emitted twice or modified after
//! it was emitted.

use std::io::Write;

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tracing::debug;

use super::json::{JsonResponse, Payload};
use super::{Headers, StatusCode};

/// Header kept in sync with the body by [`Response::write`].
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Default `Access-Control-Allow-Origin` value.
pub const DEFAULT_ALLOW_ORIGIN: &str = "*";

/// Default `Access-Control-Allow-Headers` value.
pub const DEFAULT_ALLOW_HEADERS: &str =
    "Content-Type, Access-Control-Allow-Headers, Authorization, X-Requested-With";

/// Errors produced while emitting a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("failed to serialize JSON body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Conversion into a plain [`Response`] ready for emission.
///
/// Hosts accept `impl IntoResponse` so handlers can return either a
/// [`Response`] or a [`JsonResponse`].
pub trait IntoResponse {
    /// Finalizes the body and returns the response to emit.
    fn into_response(self) -> Result<Response, ResponseError>;
}

/// An HTTP/1.1 response under construction.
///
/// Every response starts with permissive CORS headers, which can be
/// overridden like any other header.
///
/// # Examples
///
/// ```
/// use httpkit::http::Response;
///
/// let response = Response::new()
///     .header("Content-Type", "text/plain")
///     .write("Hello, ")
///     .write("World!");
///
/// assert_eq!(response.get_header("Content-Length"), Some("13"));
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
/// assert!(text.ends_with("\r\n\r\nHello, World!"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Vec<String>,
}

impl Response {
    /// Creates a `200` response with the default CORS headers and no body.
    pub fn new() -> Self {
        let mut headers = Headers::with_capacity(4);
        headers.set("Access-Control-Allow-Origin", DEFAULT_ALLOW_ORIGIN);
        headers.set("Access-Control-Allow-Headers", DEFAULT_ALLOW_HEADERS);
        Self {
            status: StatusCode::Ok.as_u16(),
            headers,
            body: Vec::new(),
        }
    }

    /// Returns a fresh [`JsonResponse`] seeded with `data` and `status`.
    ///
    /// Nothing is carried over from any existing response.
    pub fn json(data: Option<Payload>, status: impl Into<u16>) -> JsonResponse {
        JsonResponse::new(data).status(status)
    }

    /// Sets a response header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Removes a response header.
    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Sets `name` to `value`, or removes it when `value` is `None`.
    ///
    /// The in-place form for code that decorates a response it does not own.
    pub fn set_header(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        let name = name.into();
        match value {
            Some(value) => self.headers.set(name, value),
            None => {
                self.headers.remove(&name);
            }
        }
    }

    /// Applies [`header`](Self::header) for every entry.
    #[must_use]
    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.set(name, value);
        }
        self
    }

    /// Returns `true` if the header is set.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Returns the header value, or `None` if it is not set.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns all headers in emission order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Appends a body fragment.
    #[must_use]
    pub fn write(mut self, fragment: impl Into<String>) -> Self {
        self.append(fragment);
        self
    }

    /// Appends a body fragment in place.
    ///
    /// `Content-Length` grows by the fragment's length in characters, not
    /// bytes. A `Content-Length` that does not parse as a number counts as 0.
    pub fn append(&mut self, fragment: impl Into<String>) {
        let fragment = fragment.into();
        let current = self
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let length = current + fragment.chars().count();
        self.headers.set(CONTENT_LENGTH, length.to_string());
        self.body.push(fragment);
    }

    /// Sets the status code.
    #[must_use]
    pub fn status(mut self, status: impl Into<u16>) -> Self {
        self.status = status.into();
        self
    }

    /// Sets the status code in place.
    pub fn set_status(&mut self, status: impl Into<u16>) {
        self.status = status.into();
    }

    /// Returns the status code.
    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Returns the body fragments written so far.
    pub fn fragments(&self) -> &[String] {
        &self.body
    }

    /// Returns the status line without its line terminator, e.g. `HTTP/1.1 404 Not Found`.
    ///
    /// Codes without a known reason phrase are written as the bare number.
    pub fn status_line(&self) -> String {
        match StatusCode::from_u16(self.status) {
            Some(code) => format!("HTTP/1.1 {} {}", self.status, code.canonical_reason()),
            None => format!("HTTP/1.1 {}", self.status),
        }
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format:
    /// status line, headers in order, blank line, then the concatenated body.
    pub fn into_bytes(self) -> BytesMut {
        let body_len: usize = self.body.iter().map(String::len).sum();
        let estimated_size = 128 + self.headers.len() * 64 + body_len;
        let mut buf = BytesMut::with_capacity(estimated_size);

        debug!(
            status = self.status,
            headers = self.headers.len(),
            fragments = self.body.len(),
            "emitting response"
        );

        // Status line
        buf.put(self.status_line().as_bytes());
        buf.put(&b"\r\n"[..]);

        // Headers
        buf.put(self.headers.to_string().as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        for fragment in &self.body {
            buf.put(fragment.as_bytes());
        }

        buf
    }

    /// Emits the response to `out`.
    pub fn flush<W: Write>(self, out: &mut W) -> Result<(), ResponseError> {
        out.write_all(&self.into_bytes())?;
        out.flush()?;
        Ok(())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> Result<Response, ResponseError> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn default_headers() {
        let r = Response::new();
        assert_eq!(r.status_code(), 200);
        assert_eq!(r.get_header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            r.get_header("Access-Control-Allow-Headers"),
            Some(DEFAULT_ALLOW_HEADERS)
        );
        assert!(!r.has_header("Content-Length"));
    }

    #[test]
    fn default_headers_can_be_overridden() {
        let r = Response::new().header("Access-Control-Allow-Origin", "https://example.com");
        assert_eq!(
            r.get_header("Access-Control-Allow-Origin"),
            Some("https://example.com")
        );
    }

    #[test]
    fn header_set_and_remove() {
        let mut r = Response::new().header("X-Request-Id", "abc-123");
        assert_eq!(r.get_header("X-Request-Id"), Some("abc-123"));

        r.set_header("X-Request-Id", None::<String>);
        assert!(!r.has_header("X-Request-Id"));
        assert_eq!(r.get_header("X-Request-Id"), None);

        let r = r.header("X-Gone", "1").remove_header("X-Gone");
        assert!(!r.has_header("X-Gone"));
    }

    #[test]
    fn with_headers_applies_each() {
        let r = Response::new().with_headers([("A", "1"), ("B", "2")]);
        assert_eq!(r.get_header("A"), Some("1"));
        assert_eq!(r.get_header("B"), Some("2"));
    }

    #[test]
    fn content_length_tracks_writes() {
        let fragments = ["abc", "", "hello world", "z"];
        let mut r = Response::new();
        let mut expected = 0;
        for fragment in fragments {
            r.append(fragment);
            expected += fragment.len();
            assert_eq!(r.get_header("Content-Length"), Some(expected.to_string().as_str()));
        }
        assert_eq!(r.fragments().len(), 4);
    }

    #[test]
    fn content_length_counts_characters() {
        let r = Response::new().write("héllo").write("✓");
        assert_eq!(r.get_header("Content-Length"), Some("6"));
    }

    #[test]
    fn status_line_and_body() {
        let r = Response::new().status(StatusCode::NotFound).write("Not ").write("Found");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(s.contains("Content-Length: 9\r\n"));
        assert!(s.ends_with("\r\n\r\nNot Found"));
    }

    #[test]
    fn unknown_status_has_no_reason() {
        let r = Response::new().status(299u16);
        assert_eq!(r.status_line(), "HTTP/1.1 299");
    }

    #[test]
    fn headers_emitted_in_order() {
        let r = Response::new().header("X-First", "1").header("X-Flag", "");
        let s = to_string(r.into_bytes());
        let origin = s.find("Access-Control-Allow-Origin").unwrap();
        let first = s.find("X-First: 1\r\n").unwrap();
        assert!(origin < first);
        assert!(s.contains("\r\nX-Flag\r\n"));
    }

    #[test]
    fn flush_writes_to_sink() {
        let mut out = Vec::new();
        Response::new().write("ok").flush(&mut out).unwrap();
        assert!(out.ends_with(b"\r\n\r\nok"));
    }

    #[test]
    fn json_does_not_carry_state() {
        let envelope = Response::json(None, StatusCode::Created);
        assert_eq!(envelope.status_code(), 201);
        assert!(envelope.data().is_empty());
        assert_eq!(envelope.get_header("Content-Type"), Some("application/json"));
    }
}
