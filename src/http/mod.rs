//! HTTP/1.1 protocol types and the incremental request decoder.
//!
//! This module provides [`Method`], [`HeaderName`], [`Headers`],
//! [`Request`], [`RequestDecoder`] and, for the server front end,
//! [`StatusCode`] and [`Response`].

use std::fmt;
use std::hash::{Hash, Hasher};

pub mod decoder;
pub mod headers;
pub mod request;
pub mod response;

pub use decoder::{DecodeError, DecoderLimits, RequestDecoder};
pub use headers::{HeaderName, Headers};
pub use request::{QueryItem, Request};
pub use response::Response;

/// An HTTP response status code.
///
/// Only the codes the server front end emits are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    NoContent = 204,
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    PayloadTooLarge = 413,
    InternalServerError = 500,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoContent => "No Content",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// An HTTP request method.
///
/// Well-known methods have their own variants; any other token is kept
/// verbatim in [`Method::Custom`]. Equality and hashing compare the token
/// itself, so `Method::Custom("GET".into())` equals `Method::Get`.
///
/// # Examples
///
/// ```
/// use pollhttp::http::Method;
///
/// assert_eq!(Method::new("GET"), Method::Get);
/// assert_eq!(Method::new("FISH"), Method::Custom("FISH".into()));
/// assert_eq!(Method::Custom("POST".into()), Method::Post);
/// assert_eq!(Method::new("FISH").as_str(), "FISH");
/// ```
#[derive(Debug, Clone)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// Any other method token, preserved exactly as received.
    Custom(String),
}

impl Method {
    /// Maps `token` to a named variant, or keeps it as [`Method::Custom`].
    pub fn new(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Method {}

impl Hash for Method {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Method {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
