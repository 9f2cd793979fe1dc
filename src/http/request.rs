//! Inbound request model: one merged input space per call.
//!
//! A [`Request`] is built from the four inputs a host hands over
//! ([`Sources`]): body fields, query fields, transport metadata, and the raw
//! body. Fields are merged in that order, with the raw body decoded as JSON
//! and merged last, so a JSON payload can override form fields.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::Method;
use super::transport::{self, TransportMetadata};
use crate::context;

/// Header value that marks an AJAX request.
pub const AJAX_MARKER: &str = "XmlHttpRequest";

/// The raw inputs a host supplies for one inbound call.
///
/// # Examples
///
/// ```
/// use httpkit::http::{Sources, TransportMetadata};
///
/// let sources = Sources::new()
///     .query([("page", "2")])
///     .body([("name", "ada")])
///     .metadata(TransportMetadata::from_iter([("REQUEST_METHOD", "POST")]))
///     .raw_body(r#"{"name":"grace"}"#);
/// assert_eq!(sources.query.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// Decoded query-string fields, in order of appearance.
    pub query: Vec<(String, String)>,
    /// Decoded form-body fields, in order of appearance.
    pub body: Vec<(String, String)>,
    pub metadata: TransportMetadata,
    /// Undecoded request body text.
    pub raw_body: String,
}

impl Sources {
    /// Creates an empty set of sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query-string fields.
    #[must_use]
    pub fn query<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query = collect_fields(fields);
        self
    }

    /// Sets the form-body fields.
    #[must_use]
    pub fn body<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = collect_fields(fields);
        self
    }

    /// Sets the transport metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: TransportMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the raw request body.
    #[must_use]
    pub fn raw_body(mut self, raw_body: impl Into<String>) -> Self {
        self.raw_body = raw_body.into();
        self
    }
}

fn collect_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Vec<(String, String)>
where
    K: Into<String>,
    V: Into<String>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A captured inbound request.
///
/// The input space and metadata are fixed at construction. Derived facts
/// ([`path`](Self::path), [`method`](Self::method), [`ajax`](Self::ajax)) are
/// recomputed from the metadata on every call.
///
/// # Examples
///
/// ```
/// use httpkit::http::{Method, Request, Sources, TransportMetadata};
///
/// let request = Request::from_sources(
///     Sources::new()
///         .query([("a", "1")])
///         .body([("a", "2"), ("b", "3")])
///         .raw_body(r#"{"a":4,"c":5}"#)
///         .metadata(TransportMetadata::from_iter([
///             ("REQUEST_METHOD", "post"),
///             ("SCRIPT_NAME", "/app/index.php"),
///             ("REDIRECT_URL", "/app/users/5"),
///         ])),
/// );
///
/// assert_eq!(request.input("a"), Some(&serde_json::json!(4)));
/// assert_eq!(request.str("b"), Some("3"));
/// assert_eq!(request.method(), Method::Post);
/// assert_eq!(request.path(), "users/5");
/// assert!(!request.ajax());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Request {
    input: Map<String, Value>,
    metadata: TransportMetadata,
}

impl Request {
    /// Builds a request and makes it the current request of the calling
    /// thread, replacing any earlier capture.
    pub fn capture(sources: Sources) -> Arc<Self> {
        let request = Arc::new(Self::from_sources(sources));
        context::set_current(Arc::clone(&request));
        request
    }

    /// Returns the current request, if one was captured or scoped.
    ///
    /// See [`context::current`] for the lookup order.
    pub fn instance() -> Option<Arc<Self>> {
        context::current()
    }

    /// Builds a request without touching the current-request slot.
    pub fn from_sources(sources: Sources) -> Self {
        let Sources {
            query,
            body,
            metadata,
            raw_body,
        } = sources;

        let mut input = Map::new();
        for (key, value) in body.into_iter().chain(query) {
            input.insert(key, Value::String(value));
        }
        if let Some(fields) = decode_raw_body(&raw_body) {
            input.extend(fields);
        }

        debug!(
            fields = input.len(),
            metadata = metadata.len(),
            "request captured"
        );

        Self { input, metadata }
    }

    /// Returns the whole input space.
    pub fn all(&self) -> &Map<String, Value> {
        &self.input
    }

    /// Returns the input value for `key`.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// Returns the input value for `key`, or `default` when it is absent.
    pub fn input_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.input.get(key).unwrap_or(default)
    }

    /// Returns `true` if the input space contains `key`.
    pub fn has(&self, key: &str) -> bool {
        self.input.contains_key(key)
    }

    /// Returns the input value for `key` if it is a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// Deserializes the input value for `key` into `T`.
    ///
    /// Returns `None` when the key is absent or the value does not fit `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.input.get(key)?;
        T::deserialize(value).ok()
    }

    /// Returns the transport metadata.
    pub fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    /// Returns a single transport variable.
    pub fn server(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
    }

    /// Returns the route path relative to the script's directory.
    ///
    /// The directory of `SCRIPT_NAME` (with a trailing `/`) is stripped from
    /// the front of `REDIRECT_URL`. Without `REDIRECT_URL` the path is empty.
    pub fn path(&self) -> String {
        let Some(url) = self.metadata.get(transport::REDIRECT_URL) else {
            return String::new();
        };
        let prefix = self
            .metadata
            .get(transport::SCRIPT_NAME)
            .and_then(script_dir_prefix);
        match prefix {
            Some(prefix) => url.strip_prefix(prefix).unwrap_or(url).to_owned(),
            None => url.to_owned(),
        }
    }

    /// Returns the uppercased request method.
    ///
    /// An absent `REQUEST_METHOD` yields `Method::Custom("")`.
    pub fn method(&self) -> Method {
        let raw = self
            .metadata
            .get(transport::REQUEST_METHOD)
            .unwrap_or_default()
            .to_uppercase();
        let Ok(method) = raw.parse::<Method>();
        method
    }

    /// Returns `true` iff `X-Requested-With` is exactly `XmlHttpRequest`.
    pub fn ajax(&self) -> bool {
        self.metadata.get(transport::HTTP_X_REQUESTED_WITH) == Some(AJAX_MARKER)
    }
}

// "/app/index.php" -> "/app/", "/index.php" -> "/". A script name without a
// slash has no directory to strip.
fn script_dir_prefix(script_name: &str) -> Option<&str> {
    let idx = script_name.rfind('/')?;
    Some(&script_name[..=idx])
}

fn decode_raw_body(raw: &str) -> Option<Map<String, Value>> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Some(fields),
        Ok(_) => {
            debug!("raw body is JSON but not an object, ignored");
            None
        }
        Err(e) => {
            debug!(error = %e, "raw body is not JSON, ignored");
            None
        }
    }
}
