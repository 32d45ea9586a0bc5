//! Single-pass asynchronous byte sequences.
//!
//! A [`ByteSource`] hands out one byte per pull and may suspend at any pull.
//! It is not restartable: once it has ended or failed it keeps returning
//! `Ok(None)`. The HTTP decoder consumes requests through this trait, either
//! from a live connection ([`SocketBytes`]) or from memory
//! ([`ConsumingBytes`]).

use std::future::Future;

use thiserror::Error;

use crate::reactor::ReactorError;
use crate::socket::SocketError;

mod consuming;
mod socket;

pub use consuming::ConsumingBytes;
pub use socket::{AsyncSocket, SocketBytes};

/// Errors raised while pulling bytes from a connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Reactor(#[from] ReactorError),
}

/// A lazy, producer-paced sequence of bytes.
pub trait ByteSource {
    /// Pulls the next byte, suspending until one is available.
    ///
    /// Returns `Ok(None)` once the sequence has ended.
    fn next_byte(&mut self) -> impl Future<Output = Result<Option<u8>, StreamError>> + Send;
}
