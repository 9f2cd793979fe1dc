//! Ordered HTTP header map with case-insensitive name lookup.
//!
//! Names are matched case-insensitively per [RFC 9110 §5]. Each name holds a
//! single value: setting an existing name replaces its value in place, so the
//! emission order is the order in which names were first set.

use std::fmt;

/// An ordered, single-value HTTP header map.
///
/// # Examples
///
/// ```
/// use httpkit::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.set("Content-Type", "text/html; charset=utf-8");
/// headers.set("X-Custom", "first");
/// headers.set("x-custom", "second");
///
/// assert_eq!(headers.get("content-type"), Some("text/html; charset=utf-8"));
/// assert_eq!(headers.get("X-Custom"), Some("second"));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Sets a header. An existing entry with the same name keeps its position
    /// and its original spelling; only the value changes.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.inner[idx].1 = value,
            None => self.inner.push((name, value)),
        }
    }

    /// Returns the value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.inner[idx].1.as_str())
    }

    /// Removes the entry with the given header name (case-insensitive).
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.inner.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the map contains an entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.inner.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Writes one header line per entry. An empty value is written as the bare
/// name with no `: ` separator.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            if value.is_empty() {
                write!(f, "{name}\r\n")?;
            } else {
                write!(f, "{name}: {value}\r\n")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(h.get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn replace_keeps_position() {
        let mut h = Headers::new();
        h.set("A", "1");
        h.set("B", "2");
        h.set("a", "3");
        let entries: Vec<_> = h.iter().collect();
        assert_eq!(entries, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.set("X-Foo", "bar");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo")); // already gone
    }

    #[test]
    fn contains() {
        let mut h = Headers::new();
        h.set("Authorization", "Bearer token");
        assert!(h.contains("authorization"));
        assert!(!h.contains("x-missing"));
    }

    #[test]
    fn display_bare_name_for_empty_value() {
        let mut h = Headers::new();
        h.set("X-Flag", "");
        h.set("X-Value", "on");
        assert_eq!(h.to_string(), "X-Flag\r\nX-Value: on\r\n");
    }
}
