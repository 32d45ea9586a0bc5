//! Incremental HTTP/1.1 request decoder.
//!
//! The decoder pulls bytes from a [`ByteSource`] in strict order: the status
//! line, then header lines up to the first empty line, then exactly
//! `Content-Length` body bytes. It never reads past the end of the request,
//! so the same source can be handed back for the next request on a
//! keep-alive connection.

use bytes::{BufMut, BytesMut};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use thiserror::Error;

use super::{Headers, Method, QueryItem, Request};
use crate::stream::{ByteSource, StreamError};

/// Errors that end the decoding of one request.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed status line: {0:?}")]
    InvalidStatusLine(String),

    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),

    /// The byte sequence ended inside a required section.
    #[error("unexpected end of stream in {0}")]
    UnexpectedEnd(&'static str),

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("request has more than {limit} headers")]
    TooManyHeaders { limit: usize },

    #[error("body of {length} bytes exceeds the maximum of {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },

    #[error("failed to read request: {0}")]
    Stream(#[from] StreamError),
}

/// Size limits applied while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecoderLimits {
    /// Longest status or header line, excluding the `\r\n`.
    pub max_line_length: usize,
    pub max_headers: usize,
    pub max_body_size: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_line_length: 8 * 1024,
            max_headers: 100,
            max_body_size: 8 * 1024 * 1024,
        }
    }
}

/// Decodes HTTP/1.1 requests from a [`ByteSource`].
///
/// A failed decode leaves no state behind; the decoder can be reused on a
/// fresh source.
#[derive(Debug, Clone, Default)]
pub struct RequestDecoder {
    limits: DecoderLimits,
}

impl RequestDecoder {
    /// Creates a decoder with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder enforcing `limits`.
    pub fn with_limits(limits: DecoderLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DecoderLimits {
        &self.limits
    }

    /// Decodes one request.
    ///
    /// # Errors
    ///
    /// Any [`DecodeError`]; an empty source is
    /// [`DecodeError::UnexpectedEnd`].
    pub async fn decode<S: ByteSource>(&self, bytes: &mut S) -> Result<Request, DecodeError> {
        self.decode_next(bytes)
            .await?
            .ok_or(DecodeError::UnexpectedEnd("status line"))
    }

    /// Decodes the next request, or returns `None` if the source ends
    /// before its first byte.
    pub async fn decode_next<S: ByteSource>(
        &self,
        bytes: &mut S,
    ) -> Result<Option<Request>, DecodeError> {
        let Some(line) = self.take_line(bytes, "status line").await? else {
            return Ok(None);
        };
        let line = String::from_utf8(line)
            .map_err(|e| DecodeError::InvalidStatusLine(lossy(e.as_bytes())))?;
        let (method, target, version) = parse_status_line(&line)?;
        let (path, query) = split_target(target);

        let headers = self.take_headers(bytes).await?;

        let length = headers
            .get("content-length")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if length > self.limits.max_body_size {
            return Err(DecodeError::BodyTooLarge {
                length,
                limit: self.limits.max_body_size,
            });
        }
        let body = take_body(bytes, length).await?;

        Ok(Some(Request {
            method,
            path,
            version: version.to_owned(),
            query,
            headers,
            body: body.freeze(),
        }))
    }

    async fn take_headers<S: ByteSource>(&self, bytes: &mut S) -> Result<Headers, DecodeError> {
        let mut headers = Headers::new();
        // Counts lines, not names: repeated names still use up the limit.
        let mut lines = 0;
        loop {
            let line = self
                .take_line(bytes, "headers")
                .await?
                .ok_or(DecodeError::UnexpectedEnd("headers"))?;
            if line.is_empty() {
                return Ok(headers);
            }
            if lines >= self.limits.max_headers {
                return Err(DecodeError::TooManyHeaders {
                    limit: self.limits.max_headers,
                });
            }
            let line =
                String::from_utf8(line).map_err(|e| DecodeError::InvalidHeader(lossy(e.as_bytes())))?;
            let (name, value) = parse_header(&line)?;
            headers.insert(name, value);
            lines += 1;
        }
    }

    // Reads up to and including `\r\n`, returning the line without it.
    // `None` means the source ended before the line started.
    async fn take_line<S: ByteSource>(
        &self,
        bytes: &mut S,
        section: &'static str,
    ) -> Result<Option<Vec<u8>>, DecodeError> {
        let mut line = Vec::new();
        loop {
            let Some(byte) = bytes.next_byte().await? else {
                return if line.is_empty() {
                    Ok(None)
                } else {
                    Err(DecodeError::UnexpectedEnd(section))
                };
            };
            line.push(byte);
            if line.ends_with(b"\r\n") {
                line.truncate(line.len() - 2);
                return Ok(Some(line));
            }
            if line.len() > self.limits.max_line_length + 1 {
                return Err(DecodeError::LineTooLong {
                    limit: self.limits.max_line_length,
                });
            }
        }
    }
}

async fn take_body<S: ByteSource>(bytes: &mut S, length: usize) -> Result<BytesMut, DecodeError> {
    let mut body = BytesMut::with_capacity(length);
    while body.len() < length {
        match bytes.next_byte().await? {
            Some(byte) => body.put_u8(byte),
            None => return Err(DecodeError::UnexpectedEnd("body")),
        }
    }
    Ok(body)
}

/// Splits `METHOD SP TARGET SP VERSION` on its first two spaces.
fn parse_status_line(line: &str) -> Result<(Method, &str, &str), DecodeError> {
    let invalid = || DecodeError::InvalidStatusLine(line.to_owned());
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let target = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let version = parts.next().ok_or_else(invalid)?;
    if !version.starts_with("HTTP/") {
        return Err(invalid());
    }
    Ok((Method::new(method), target, version))
}

/// Splits the request target on the first `?` into path and query items.
fn split_target(target: &str) -> (String, Vec<QueryItem>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), parse_query(query)),
        None => (target.to_owned(), Vec::new()),
    }
}

/// Parses `a=1&b=2` into ordered, percent-decoded items.
///
/// Only `%XX` escapes are decoded; `+` is kept as-is. Duplicates are kept.
fn parse_query(query: &str) -> Vec<QueryItem> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            QueryItem::new(percent_decode(name), percent_decode(value))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn parse_header(line: &str) -> Result<(&str, &str), DecodeError> {
    match line.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => Err(DecodeError::InvalidHeader(line.to_owned())),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
