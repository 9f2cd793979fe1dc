//! Raw HTTP/1.1 head parsing using the [`httparse`] crate, and translation of
//! a parsed request into capture [`Sources`].
//!
//! The translation follows CGI conventions so that a [`Request`] built behind
//! this gateway looks the same as one built from a CGI environment.
//!
//! [`Request`]: crate::http::Request

use std::net::SocketAddr;

use thiserror::Error;

use crate::http::transport::{self, TransportMetadata, header_var};
use crate::http::Sources;

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// Per-connection facts the gateway adds to every request's metadata.
#[derive(Debug, Clone, Default)]
pub struct GatewayEnv {
    /// Reported as `SCRIPT_NAME`; its directory is stripped by
    /// [`Request::path`](crate::http::Request::path).
    pub script_name: String,
    pub remote_addr: Option<SocketAddr>,
}

/// A parsed request line and header block.
///
/// # Examples
///
/// ```
/// use httpkit::server::gateway::{GatewayEnv, RequestHead};
///
/// let raw = b"GET /app/users/5?tab=posts HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let head = RequestHead::parse(raw).unwrap();
/// assert_eq!(head.path(), "/app/users/5");
///
/// let env = GatewayEnv { script_name: "/app/index.php".into(), remote_addr: None };
/// let sources = head.into_sources(&[], &env);
/// assert_eq!(sources.query, vec![("tab".to_owned(), "posts".to_owned())]);
/// assert_eq!(sources.metadata.get("HTTP_HOST"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: String,
    target: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Vec<(String, String)>,
    body_offset: usize,
}

impl RequestHead {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses the request line and headers at the start of `buf`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Incomplete`] — more data is needed to complete the head.
    /// - [`GatewayError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`GatewayError::MissingField`] — method, path, or version is absent.
    pub fn parse(buf: &[u8]) -> Result<Self, GatewayError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(GatewayError::Incomplete),
        };

        let method = raw_req
            .method
            .ok_or(GatewayError::MissingField { field: "method" })?
            .to_owned();
        let target = raw_req
            .path
            .ok_or(GatewayError::MissingField { field: "path" })?
            .to_owned();
        let version = raw_req
            .version
            .ok_or(GatewayError::MissingField { field: "version" })?;

        let headers = raw_req
            .headers
            .iter()
            .filter_map(|h| {
                let value = std::str::from_utf8(h.value).ok()?;
                Some((h.name.to_owned(), value.to_owned()))
            })
            .collect();

        Ok(Self {
            method,
            target,
            version,
            headers,
            body_offset,
        })
    }

    /// Returns the offset at which the body starts in the parsed buffer.
    pub fn body_offset(&self) -> usize {
        self.body_offset
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Returns the first value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Builds capture sources from this head and its `body`.
    ///
    /// Query strings and `application/x-www-form-urlencoded` bodies are
    /// percent-decoded. The raw body is passed on as (lossy) UTF-8 text.
    pub fn into_sources(self, body: &[u8], env: &GatewayEnv) -> Sources {
        let query = self
            .query_string()
            .map(|q| decode_form(q.as_bytes()))
            .unwrap_or_default();

        let is_form = self.header("content-type").is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
        });
        let form = if is_form { decode_form(body) } else { Vec::new() };

        let metadata = self.metadata(env);

        Sources {
            query,
            body: form,
            metadata,
            raw_body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    fn metadata(&self, env: &GatewayEnv) -> TransportMetadata {
        let mut vars = std::collections::HashMap::new();
        vars.insert(transport::REQUEST_METHOD.to_owned(), self.method.clone());
        vars.insert(transport::REQUEST_URI.to_owned(), self.target.clone());
        vars.insert(
            transport::QUERY_STRING.to_owned(),
            self.query_string().unwrap_or_default().to_owned(),
        );
        vars.insert(transport::SCRIPT_NAME.to_owned(), env.script_name.clone());
        vars.insert(transport::REDIRECT_URL.to_owned(), self.path().to_owned());
        vars.insert(
            transport::SERVER_PROTOCOL.to_owned(),
            format!("HTTP/1.{}", self.version),
        );
        if let Some(addr) = env.remote_addr {
            vars.insert(transport::REMOTE_ADDR.to_owned(), addr.ip().to_string());
        }

        for (name, value) in &self.headers {
            // CGI reports these two without the HTTP_ prefix.
            let var = if name.eq_ignore_ascii_case("content-type") {
                transport::CONTENT_TYPE.to_owned()
            } else if name.eq_ignore_ascii_case("content-length") {
                transport::CONTENT_LENGTH.to_owned()
            } else {
                header_var(name)
            };
            vars.entry(var)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }

        TransportMetadata::new(vars)
    }
}

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

fn decode_form(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> GatewayEnv {
        GatewayEnv {
            script_name: "/index.php".into(),
            remote_addr: Some("10.0.0.7:5123".parse().unwrap()),
        }
    }

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.path(), "/");
        assert_eq!(head.query_string(), None);
        assert_eq!(head.header("host"), Some("localhost"));
        assert_eq!(head.body_offset(), raw.len()); // no body
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(RequestHead::parse(raw), Err(GatewayError::Incomplete)));
    }

    #[test]
    fn keep_alive_http11_default() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert!(RequestHead::parse(raw).unwrap().is_keep_alive());
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        assert!(!RequestHead::parse(raw).unwrap().is_keep_alive());
    }

    #[test]
    fn http10_defaults_to_close() {
        let raw = b"GET / HTTP/1.0\r\n\r\n";
        assert!(!RequestHead::parse(raw).unwrap().is_keep_alive());
    }

    #[test]
    fn query_is_percent_decoded() {
        let raw = b"GET /search?q=hello+w%C3%B6rld&page=2 HTTP/1.1\r\n\r\n";
        let sources = RequestHead::parse(raw).unwrap().into_sources(&[], &env());
        assert_eq!(
            sources.query,
            vec![
                ("q".to_owned(), "hello wörld".to_owned()),
                ("page".to_owned(), "2".to_owned()),
            ]
        );
    }

    #[test]
    fn form_body_is_decoded() {
        let raw = b"POST /users HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded; charset=utf-8\r\nContent-Length: 13\r\n\r\nname=ada&x=%21";
        let head = RequestHead::parse(raw).unwrap();
        let body = &raw[head.body_offset()..];
        assert_eq!(head.content_length(), Some(13));
        let sources = head.into_sources(body, &env());
        assert_eq!(sources.body[0], ("name".to_owned(), "ada".to_owned()));
        assert_eq!(sources.body[1], ("x".to_owned(), "!".to_owned()));
        assert_eq!(sources.raw_body, "name=ada&x=%21");
    }

    #[test]
    fn json_body_is_not_form_decoded() {
        let raw = b"POST / HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"a\":1}";
        let head = RequestHead::parse(raw).unwrap();
        let body = &raw[head.body_offset()..];
        let sources = head.into_sources(body, &env());
        assert!(sources.body.is_empty());
        assert_eq!(sources.raw_body, "{\"a\":1}");
    }

    #[test]
    fn metadata_follows_cgi_naming() {
        let raw = b"post /app/x?y=1 HTTP/1.1\r\nX-Requested-With: XmlHttpRequest\r\nContent-Type: text/plain\r\nAccept: a\r\nAccept: b\r\n\r\n";
        let sources = RequestHead::parse(raw).unwrap().into_sources(&[], &env());
        let meta = &sources.metadata;
        assert_eq!(meta.get("REQUEST_METHOD"), Some("post"));
        assert_eq!(meta.get("REQUEST_URI"), Some("/app/x?y=1"));
        assert_eq!(meta.get("QUERY_STRING"), Some("y=1"));
        assert_eq!(meta.get("REDIRECT_URL"), Some("/app/x"));
        assert_eq!(meta.get("SCRIPT_NAME"), Some("/index.php"));
        assert_eq!(meta.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(meta.get("REMOTE_ADDR"), Some("10.0.0.7"));
        assert_eq!(meta.get("CONTENT_TYPE"), Some("text/plain"));
        assert_eq!(meta.get("HTTP_CONTENT_TYPE"), None);
        assert_eq!(meta.get("HTTP_X_REQUESTED_WITH"), Some("XmlHttpRequest"));
        assert_eq!(meta.get("HTTP_ACCEPT"), Some("a, b"));
    }
}
