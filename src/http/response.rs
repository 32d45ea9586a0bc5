//! Minimal HTTP/1.1 response encoding for the server front end.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response.
///
/// # Examples
///
/// ```
/// use pollhttp::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .body("Hello");
///
/// let bytes = response.encode(true);
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 5\r\n"));
/// assert!(text.ends_with("\r\n\r\nHello"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Sets a header, replacing any previous value for the same name.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Encodes the response for the wire.
    ///
    /// `Content-Length` and `Connection` are always written by the encoder
    /// and override headers of the same name.
    pub fn encode(&self, keep_alive: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + self.body.len());
        buf.put(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        for (name, value) in self.headers.iter() {
            let name_str = name.as_str();
            if name_str.eq_ignore_ascii_case("content-length")
                || name_str.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        let connection = if keep_alive { "keep-alive" } else { "close" };
        buf.put(format!("Connection: {connection}\r\n").as_bytes());
        buf.put(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        buf.put(self.body.as_ref());
        buf
    }
}
