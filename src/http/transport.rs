//! Transport metadata: the host's read-only facts about one inbound call.
//!
//! Keys follow CGI naming (`REQUEST_METHOD`, `SCRIPT_NAME`, `HTTP_*` for
//! request headers). The map is captured once and never mutated.

use std::collections::HashMap;

/// Request method, e.g. `GET`.
pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
/// Original request target including the query string.
pub const REQUEST_URI: &str = "REQUEST_URI";
/// Raw query string, without the leading `?`.
pub const QUERY_STRING: &str = "QUERY_STRING";
/// Path of the script handling the call, e.g. `/app/index.php`.
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
/// Route hint set by the front server when it rewrote the request path.
pub const REDIRECT_URL: &str = "REDIRECT_URL";
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
/// Set by browsers' XHR wrappers; see [`crate::http::Request::ajax`].
pub const HTTP_X_REQUESTED_WITH: &str = "HTTP_X_REQUESTED_WITH";

/// Read-only key/value view over transport-level facts.
///
/// # Examples
///
/// ```
/// use httpkit::http::TransportMetadata;
///
/// let meta = TransportMetadata::from_iter([
///     ("REQUEST_METHOD", "get"),
///     ("HTTP_X_REQUESTED_WITH", "XmlHttpRequest"),
/// ]);
///
/// assert_eq!(meta.get("REQUEST_METHOD"), Some("get"));
/// assert_eq!(meta.header("x-requested-with"), Some("XmlHttpRequest"));
/// assert_eq!(meta.get("MISSING"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetadata {
    vars: HashMap<String, String>,
}

impl TransportMetadata {
    /// Creates metadata from an owned map.
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Captures the process environment, as a CGI host would hand it over.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        tracing::debug!(vars = vars.len(), "transport metadata captured from environment");
        Self { vars }
    }

    /// Returns the value of `key`, or `None` when the host did not supply it.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns a request header by its HTTP name, looked up through its
    /// `HTTP_*` variable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.get(&header_var(name))
    }

    /// Returns `true` if the host supplied `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if no variables were supplied.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns an iterator over all `(key, value)` pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for TransportMetadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Maps an HTTP header name to its CGI variable: `X-Requested-With` →
/// `HTTP_X_REQUESTED_WITH`.
pub fn header_var(name: &str) -> String {
    let mut var = String::with_capacity(name.len() + 5);
    var.push_str("HTTP_");
    var.extend(name.chars().map(|c| match c {
        '-' => '_',
        c => c.to_ascii_uppercase(),
    }));
    var
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none() {
        let meta = TransportMetadata::default();
        assert_eq!(meta.get("REQUEST_METHOD"), None);
        assert!(meta.is_empty());
    }

    #[test]
    fn header_var_naming() {
        assert_eq!(header_var("X-Requested-With"), "HTTP_X_REQUESTED_WITH");
        assert_eq!(header_var("host"), "HTTP_HOST");
    }

    #[test]
    fn header_lookup() {
        let meta = TransportMetadata::from_iter([("HTTP_CONTENT_TYPE", "text/plain")]);
        assert_eq!(meta.header("Content-Type"), Some("text/plain"));
        assert!(meta.contains("HTTP_CONTENT_TYPE"));
        assert_eq!(meta.header("Accept"), None);
    }

    #[test]
    fn from_env_sees_process_vars() {
        let meta = TransportMetadata::from_env();
        assert_eq!(meta.get("PATH").map(str::to_owned), std::env::var("PATH").ok());
    }
}
