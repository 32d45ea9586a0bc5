//! HTTP header map with case-insensitive names.

use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A header field name, compared and hashed without regard to ASCII case.
///
/// The name is stored as received; [`canonical`](Self::canonical) gives the
/// display form with each `-`-separated segment capitalized.
///
/// # Examples
///
/// ```
/// use pollhttp::http::HeaderName;
///
/// let name = HeaderName::new("content-type");
/// assert_eq!(name, HeaderName::new("Content-Type"));
/// assert_eq!(name.canonical(), "Content-Type");
/// ```
#[derive(Debug, Clone)]
pub struct HeaderName(String);

impl HeaderName {
    /// Wraps a header name without changing its case.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name exactly as it was received.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name with each `-`-separated segment capitalized.
    pub fn canonical(&self) -> String {
        self.0
            .split('-')
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for HeaderName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A header map keyed by [`HeaderName`].
///
/// Inserting a name that is already present (in any case) replaces its
/// value. Iteration order is unspecified and equality ignores it.
///
/// # Examples
///
/// ```
/// use pollhttp::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("content-type", "text/html");
/// headers.insert("Content-Type", "text/plain");
///
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<HeaderName, String>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty header map with room for `capacity` names.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: HashMap::with_capacity(capacity),
        }
    }

    /// Sets a header, returning the value it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<HeaderName>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.inner.insert(name.into(), value.into())
    }

    /// Looks up a header, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&HeaderName::new(name)).map(String::as_str)
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&HeaderName::new(name))
    }

    /// Returns `true` if a header with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&HeaderName::new(name))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(name, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.inner.iter().map(|(k, v)| (k, v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<HeaderName>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a HeaderName, &'a String);
    type IntoIter = hash_map::Iter<'a, HeaderName, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
