//! Decoded HTTP/1.1 requests.

use bytes::Bytes;

use super::{Headers, Method};

/// One `name=value` pair from the query string, percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryItem {
    pub name: String,
    pub value: String,
}

impl QueryItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A fully decoded HTTP/1.1 request.
///
/// Produced by [`RequestDecoder`](super::RequestDecoder); the caller owns
/// it once returned.
///
/// # Examples
///
/// ```
/// use pollhttp::http::{Method, RequestDecoder};
/// use pollhttp::stream::ConsumingBytes;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut bytes = ConsumingBytes::new("GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n");
/// let request = RequestDecoder::new().decode(&mut bytes).await.unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) version: String,
    pub(crate) query: Vec<QueryItem>,
    pub(crate) headers: Headers,
    pub(crate) body: Bytes,
}

impl Request {
    /// Creates an HTTP/1.1 request with no query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            version: "HTTP/1.1".to_owned(),
            query: Vec::new(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The protocol version token, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Query items in the order they appeared, duplicates included.
    pub fn query(&self) -> &[QueryItem] {
        &self.query
    }

    /// The value of the first query item named `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }

    /// The request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The body, exactly `Content-Length` bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The `Content-Length` header as a `usize`, if present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// An explicit `Connection` header decides; otherwise HTTP/1.1 keeps the
    /// connection alive and older versions close it.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) if conn.eq_ignore_ascii_case("close") => false,
            Some(conn) if conn.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version == "HTTP/1.1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(version: &str, connection: Option<&str>) -> Request {
        let mut request = Request::new(Method::Get, "/");
        request.version = version.to_owned();
        if let Some(value) = connection {
            request.headers.insert("Connection", value);
        }
        request
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        assert!(request_with("HTTP/1.1", None).is_keep_alive());
        assert!(!request_with("HTTP/1.0", None).is_keep_alive());
    }

    #[test]
    fn connection_header_overrides_version() {
        assert!(!request_with("HTTP/1.1", Some("close")).is_keep_alive());
        assert!(request_with("HTTP/1.0", Some("Keep-Alive")).is_keep_alive());
    }

    #[test]
    fn query_param_returns_first_match() {
        let mut request = Request::new(Method::Get, "/");
        request.query = vec![QueryItem::new("a", "1"), QueryItem::new("a", "2")];
        assert_eq!(request.query_param("a"), Some("1"));
        assert_eq!(request.query_param("b"), None);
    }

    #[test]
    fn content_length_parses_header() {
        let mut request = Request::new(Method::Post, "/");
        assert_eq!(request.content_length(), None);
        request.headers_mut().insert("content-length", "12");
        assert_eq!(request.content_length(), Some(12));
    }
}
