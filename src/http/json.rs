//! JSON responses and the `{status, message, ...}` envelope convention.
//!
//! A [`JsonResponse`] keeps a [`DataBag`] instead of raw body fragments and
//! serializes it only when the response is emitted.
//!
//! ## Write semantics
//!
//! [`JsonResponse::write`] dispatches on a [`Payload`]:
//!
//! | Payload    | Effect on the bag                                             |
//! |------------|---------------------------------------------------------------|
//! | `Mapping`  | merged key-wise, new values win                               |
//! | `Sequence` | merged as a mapping keyed `0..n`, overwriting those positions |
//! | `Scalar`   | appended at the next free position                            |
//!
//! Sequence merging overwrites positions; it does not append.

use std::fmt;

use bytes::BytesMut;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::response::{IntoResponse, Response, ResponseError};
use super::{Headers, StatusCode};

/// Message used by [`JsonResponse::success`] callers that have nothing better to say.
pub const SUCCESS_MESSAGE: &str = "Successful.";
/// Default failure message.
pub const FAIL_MESSAGE: &str = "Failed.";
/// Default not-found message.
pub const NOT_FOUND_MESSAGE: &str = "Not found.";

/// A key in the [`DataBag`]: either a position or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(u64),
    Name(String),
}

impl Key {
    /// Classifies a mapping key. Canonical non-negative integers (`"0"`,
    /// `"17"`, but not `"07"` or `"-1"`) address positions.
    pub fn parse(key: impl Into<String>) -> Self {
        let key = key.into();
        let canonical = !key.is_empty()
            && key.bytes().all(|b| b.is_ascii_digit())
            && (key == "0" || !key.starts_with('0'));
        match key.parse::<u64>() {
            Ok(idx) if canonical => Self::Index(idx),
            _ => Self::Name(key),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

impl From<u64> for Key {
    fn from(idx: u64) -> Self {
        Self::Index(idx)
    }
}

/// Ordered collection of keyed JSON values backing a [`JsonResponse`].
///
/// Serializes as a JSON array when its keys are exactly `0..n` in order, and
/// as a JSON object otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBag {
    entries: Vec<(Key, Value)>,
}

impl DataBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`. An existing key keeps its position.
    pub fn insert(&mut self, key: Key, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Appends `value` at the next free position: one past the highest
    /// position in the bag, or 0.
    ///
    /// Returns `false`, leaving the bag unchanged, when the highest position
    /// is already `u64::MAX`.
    pub fn push(&mut self, value: Value) -> bool {
        let highest = self
            .entries
            .iter()
            .filter_map(|(k, _)| match k {
                Key::Index(idx) => Some(*idx),
                Key::Name(_) => None,
            })
            .max();
        let next = match highest {
            None => 0,
            Some(idx) => match idx.checked_add(1) {
                Some(next) => next,
                None => {
                    warn!(highest = idx, "no free position left in JSON data, value dropped");
                    return false;
                }
            },
        };
        self.entries.push((Key::Index(next), value));
        true
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns an iterator over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Returns `true` when the keys are exactly `0..n` in order.
    pub fn is_list(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(pos, (k, _))| *k == Key::Index(pos as u64))
    }

    /// Converts the bag into the JSON value it serializes as.
    pub fn to_value(&self) -> Value {
        if self.is_list() {
            Value::Array(self.entries.iter().map(|(_, v)| v.clone()).collect())
        } else {
            Value::Object(
                self.entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            )
        }
    }
}

impl Serialize for DataBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_list() {
            let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
            for (_, value) in &self.entries {
                seq.serialize_element(value)?;
            }
            seq.end()
        } else {
            let mut map = serializer.serialize_map(Some(self.entries.len()))?;
            for (key, value) in &self.entries {
                map.serialize_entry(&key.to_string(), value)?;
            }
            map.end()
        }
    }
}

/// A scalar that [`JsonResponse::write`] appends as a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::String(s) => Value::String(s),
            Scalar::Int(n) => Value::from(n),
            Scalar::Bool(b) => Value::Bool(b),
        }
    }
}

/// Input to [`JsonResponse::write`], classified once at the call boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
    Scalar(Scalar),
}

impl Payload {
    /// Classifies a dynamic JSON value.
    ///
    /// Returns `None` for `null`, floats, and integers outside `i64`, which
    /// have no write semantics.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::Mapping(map)),
            Value::Array(items) => Some(Self::Sequence(items)),
            Value::String(s) => Some(Self::Scalar(Scalar::String(s))),
            Value::Bool(b) => Some(Self::Scalar(Scalar::Bool(b))),
            Value::Number(n) => n.as_i64().map(|n| Self::Scalar(Scalar::Int(n))),
            Value::Null => None,
        }
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<Vec<Value>> for Payload {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

impl From<Scalar> for Payload {
    fn from(scalar: Scalar) -> Self {
        Self::Scalar(scalar)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Scalar(Scalar::String(s.to_owned()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Scalar(Scalar::String(s))
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Self::Scalar(Scalar::Int(n))
    }
}

impl From<i32> for Payload {
    fn from(n: i32) -> Self {
        Self::Scalar(Scalar::Int(n.into()))
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Self::Scalar(Scalar::Bool(b))
    }
}

/// A response whose body is a JSON document built from a [`DataBag`].
///
/// # Examples
///
/// ```
/// use httpkit::http::{IntoResponse, JsonResponse};
/// use serde_json::json;
///
/// let payload = json!({"id": 1}).as_object().cloned().unwrap();
/// let response = JsonResponse::new(Some(payload.into())).into_response().unwrap();
///
/// assert_eq!(response.get_header("Content-Type"), Some("application/json"));
/// assert_eq!(response.get_header("Content-Length"), Some("8"));
/// assert_eq!(response.fragments(), [r#"{"id":1}"#]);
/// ```
///
/// Envelope helpers replace the whole bag:
///
/// ```
/// use httpkit::http::JsonResponse;
/// use serde_json::json;
///
/// let response = JsonResponse::default().not_found("No such user.");
/// assert_eq!(response.status_code(), 404);
/// assert_eq!(
///     response.to_value(),
///     json!({"status": "not-found", "message": "No such user."})
/// );
/// ```
#[derive(Debug, Clone)]
pub struct JsonResponse {
    inner: Response,
    data: DataBag,
}

impl JsonResponse {
    /// Creates a `200` JSON response, writing `data` into the bag when given.
    pub fn new(data: Option<Payload>) -> Self {
        let mut response = Self {
            inner: Response::new().header("Content-Type", "application/json"),
            data: DataBag::new(),
        };
        if let Some(data) = data {
            response.append(data);
        }
        response
    }

    /// Writes `payload` into the bag; see the [module docs](self) for the rules.
    #[must_use]
    pub fn write(mut self, payload: impl Into<Payload>) -> Self {
        self.append(payload);
        self
    }

    /// Writes `payload` into the bag in place.
    pub fn append(&mut self, payload: impl Into<Payload>) {
        match payload.into() {
            Payload::Mapping(map) => {
                for (key, value) in map {
                    self.data.insert(Key::parse(key), value);
                }
            }
            Payload::Sequence(items) => {
                for (idx, value) in items.into_iter().enumerate() {
                    self.data.insert(Key::Index(idx as u64), value);
                }
            }
            Payload::Scalar(scalar) => {
                self.data.push(scalar.into());
            }
        }
    }

    /// Writes a dynamic JSON value, classifying it with [`Payload::from_value`].
    /// Values without write semantics are dropped.
    #[must_use]
    pub fn write_value(mut self, value: Value) -> Self {
        match Payload::from_value(value) {
            Some(payload) => self.append(payload),
            None => debug!("JSON value has no write semantics, ignored"),
        }
        self
    }

    /// Replaces the bag with `{status, message, ...extra}` and sets the status code.
    ///
    /// Keys in `extra` override `status` and `message`.
    #[must_use]
    pub fn set(
        mut self,
        status_name: impl Into<String>,
        message: impl Into<String>,
        status: impl Into<u16>,
        extra: Map<String, Value>,
    ) -> Self {
        self.inner.set_status(status);
        self.data.clear();
        self.data
            .insert(Key::Name("status".into()), Value::String(status_name.into()));
        self.data
            .insert(Key::Name("message".into()), Value::String(message.into()));
        for (key, value) in extra {
            self.data.insert(Key::parse(key), value);
        }
        self
    }

    /// `200` success envelope.
    #[must_use]
    pub fn success(self, message: impl Into<String>) -> Self {
        self.success_with(message, StatusCode::Ok, Map::new())
    }

    /// Success envelope with a custom status and extra fields.
    #[must_use]
    pub fn success_with(
        self,
        message: impl Into<String>,
        status: impl Into<u16>,
        extend: Map<String, Value>,
    ) -> Self {
        self.set("success", message, status, extend)
    }

    /// `500` failure envelope.
    #[must_use]
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.fail_with(message, StatusCode::InternalServerError, Map::new())
    }

    /// Failure envelope with a custom status and extra fields.
    #[must_use]
    pub fn fail_with(
        self,
        message: impl Into<String>,
        status: impl Into<u16>,
        extend: Map<String, Value>,
    ) -> Self {
        self.set("failed", message, status, extend)
    }

    /// `404` not-found envelope.
    #[must_use]
    pub fn not_found(self, message: impl Into<String>) -> Self {
        self.not_found_with(message, Map::new())
    }

    /// Not-found envelope with extra fields.
    #[must_use]
    pub fn not_found_with(self, message: impl Into<String>, extend: Map<String, Value>) -> Self {
        self.set("not-found", message, StatusCode::NotFound, extend)
    }

    /// Returns the data bag.
    pub fn data(&self) -> &DataBag {
        &self.data
    }

    /// Returns the bag as the JSON value it will serialize to.
    pub fn to_value(&self) -> Value {
        self.data.to_value()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.header(name, value);
        self
    }

    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.inner = self.inner.remove_header(name);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: Option<impl Into<String>>) {
        self.inner.set_header(name, value);
    }

    #[must_use]
    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.inner = self.inner.with_headers(headers);
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.inner.has_header(name)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.inner.get_header(name)
    }

    pub fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    #[must_use]
    pub fn status(mut self, status: impl Into<u16>) -> Self {
        self.inner.set_status(status);
        self
    }

    pub fn set_status(&mut self, status: impl Into<u16>) {
        self.inner.set_status(status);
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code()
    }

    /// Serializes the bag and emits the response in HTTP/1.1 wire format.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::Serialize`] if the bag cannot be serialized.
    pub fn into_bytes(self) -> Result<BytesMut, ResponseError> {
        Ok(self.into_response()?.into_bytes())
    }

    /// Serializes the bag and emits the response to `out`.
    pub fn flush<W: std::io::Write>(self, out: &mut W) -> Result<(), ResponseError> {
        self.into_response()?.flush(out)
    }
}

impl Default for JsonResponse {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IntoResponse for JsonResponse {
    /// Writes the serialized bag as the only body fragment of the inner
    /// response, so `Content-Length` covers the JSON text.
    fn into_response(self) -> Result<Response, ResponseError> {
        let body = serde_json::to_string(&self.data)?;
        Ok(self.inner.write(body))
    }
}
