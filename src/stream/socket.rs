use std::future::Future;

use bytes::{Buf, BytesMut};

use super::{ByteSource, StreamError};
use crate::reactor::{Direction, SocketPool};
use crate::socket::{Socket, SocketError};

/// Bytes requested from the OS per `read()` when the buffer runs dry.
const READ_CHUNK: usize = 4096;

/// A [`Socket`] bound to the [`SocketPool`] that wakes it.
///
/// Each operation retries the non-blocking call, suspending on the pool
/// whenever the socket reports [`SocketError::Blocked`].
#[derive(Debug)]
pub struct AsyncSocket {
    socket: Socket,
    pool: SocketPool,
}

impl AsyncSocket {
    /// Binds `socket` to the pool that will wake it.
    pub fn new(socket: Socket, pool: SocketPool) -> Self {
        Self { socket, pool }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn pool(&self) -> &SocketPool {
        &self.pool
    }

    /// Reads at least one byte into `buf`.
    ///
    /// A closed peer surfaces as [`SocketError::Disconnected`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        loop {
            match self.socket.read(buf) {
                Err(SocketError::Blocked) => {
                    self.pool.suspend(&self.socket, Direction::Read).await?;
                }
                other => return Ok(other?),
            }
        }
    }

    /// Writes all of `data`, resuming partial writes where they stopped.
    pub async fn write_all(&self, data: &[u8]) -> Result<(), StreamError> {
        let mut index = 0;
        while index < data.len() {
            match self.socket.write(data, index) {
                Ok(written) => index += written,
                Err(SocketError::Blocked) => {
                    self.pool.suspend(&self.socket, Direction::Write).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Waits for and accepts the next connection on a listening socket.
    pub async fn accept(&self) -> Result<AsyncSocket, StreamError> {
        loop {
            match self.socket.accept() {
                Ok(socket) => return Ok(AsyncSocket::new(socket, self.pool.clone())),
                Err(SocketError::Blocked) => {
                    self.pool.suspend(&self.socket, Direction::Read).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// A byte sequence over everything the peer sends.
    pub fn bytes(&self) -> SocketBytes<'_> {
        SocketBytes {
            socket: self,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            finished: false,
        }
    }

    /// Closes the underlying socket.
    pub fn close(&mut self) -> Result<(), SocketError> {
        self.socket.close()
    }
}

/// Buffered [`ByteSource`] over an [`AsyncSocket`].
///
/// Bytes read ahead stay in the buffer for the next pull, so one
/// `SocketBytes` should serve every request on a keep-alive connection.
#[derive(Debug)]
pub struct SocketBytes<'a> {
    socket: &'a AsyncSocket,
    buffer: BytesMut,
    finished: bool,
}

impl SocketBytes<'_> {
    /// Returns `true` once the peer disconnected or a read failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    async fn fill(&mut self) -> Result<(), StreamError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.socket.read(&mut chunk).await {
            Ok(count) => {
                self.buffer.extend_from_slice(&chunk[..count]);
                Ok(())
            }
            Err(StreamError::Socket(SocketError::Disconnected)) => {
                self.finished = true;
                Ok(())
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }
}

impl ByteSource for SocketBytes<'_> {
    fn next_byte(&mut self) -> impl Future<Output = Result<Option<u8>, StreamError>> + Send {
        async move {
            while !self.buffer.has_remaining() {
                if self.finished {
                    return Ok(None);
                }
                self.fill().await?;
            }
            Ok(Some(self.buffer.get_u8()))
        }
    }
}
