use std::future::Future;

use bytes::{Buf, Bytes};

use super::{ByteSource, StreamError};

/// An in-memory byte sequence that consumes its buffer as it is pulled.
///
/// # Examples
///
/// ```
/// use pollhttp::stream::{ByteSource, ConsumingBytes};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut bytes = ConsumingBytes::new("ab");
/// assert_eq!(bytes.next_byte().await.unwrap(), Some(b'a'));
/// assert_eq!(bytes.next_byte().await.unwrap(), Some(b'b'));
/// assert_eq!(bytes.next_byte().await.unwrap(), None);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConsumingBytes {
    bytes: Bytes,
}

impl ConsumingBytes {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Bytes not yet pulled.
    pub fn remaining(&self) -> usize {
        self.bytes.remaining()
    }
}

impl ByteSource for ConsumingBytes {
    fn next_byte(&mut self) -> impl Future<Output = Result<Option<u8>, StreamError>> + Send {
        let next = self.bytes.has_remaining().then(|| self.bytes.get_u8());
        std::future::ready(Ok(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_each_byte_then_ends() {
        let mut bytes = ConsumingBytes::new(vec![1u8, 2]);
        assert_eq!(bytes.next_byte().await.unwrap(), Some(1));
        assert_eq!(bytes.remaining(), 1);
        assert_eq!(bytes.next_byte().await.unwrap(), Some(2));
        assert_eq!(bytes.next_byte().await.unwrap(), None);
        assert_eq!(bytes.next_byte().await.unwrap(), None);
    }
}
