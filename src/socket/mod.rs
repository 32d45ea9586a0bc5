//! Thin ownership wrapper over a single non-blocking OS socket.
//!
//! Every method is one non-blocking syscall. A call that would wait reports
//! [`SocketError::Blocked`] instead; waiting for readiness is the job of
//! [`SocketPool`](crate::reactor::SocketPool).

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::ptr;

use libc::{c_int, socklen_t};
use thiserror::Error;

pub mod options;

pub use options::{Flags, OptionValue, SocketOption};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
const SEND_FLAGS: c_int = 0;

/// Errors produced by socket operations.
///
/// OS error codes are translated here and never escape as bare integers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The operation would have to wait. Suspend on the reactor and retry.
    #[error("operation would block")]
    Blocked,

    /// The peer closed the connection, or this wrapper was already closed.
    #[error("socket disconnected")]
    Disconnected,

    #[error("{operation} failed: {message}")]
    Failed {
        operation: &'static str,
        errno: i32,
        message: String,
    },
}

impl SocketError {
    fn last_os_error(operation: &'static str) -> Self {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => Self::Blocked,
            code => Self::Failed {
                operation,
                errno: code.unwrap_or_default(),
                message: err.to_string(),
            },
        }
    }

    // Reads and writes treat a dead descriptor or a reset peer as a disconnect.
    fn last_transfer_error(operation: &'static str) -> Self {
        match Self::last_os_error(operation) {
            Self::Failed { errno, .. }
                if errno == libc::EBADF || errno == libc::EPIPE || errno == libc::ECONNRESET =>
            {
                Self::Disconnected
            }
            other => other,
        }
    }

    fn invalid_argument(operation: &'static str) -> Self {
        let err = io::Error::from_raw_os_error(libc::EINVAL);
        Self::Failed {
            operation,
            errno: libc::EINVAL,
            message: err.to_string(),
        }
    }

    /// Returns `true` for [`SocketError::Blocked`].
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// Address family of a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Inet,
    Inet6,
    Unix,
}

impl Domain {
    fn raw(self) -> c_int {
        match self {
            Self::Inet => libc::AF_INET,
            Self::Inet6 => libc::AF_INET6,
            Self::Unix => libc::AF_UNIX,
        }
    }

    /// The family matching `addr`.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::Inet,
            SocketAddr::V6(_) => Self::Inet6,
        }
    }
}

/// Communication semantics of a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Datagram,
}

impl SocketType {
    fn raw(self) -> c_int {
        match self {
            Self::Stream => libc::SOCK_STREAM,
            Self::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// An owned, non-blocking OS socket.
///
/// The descriptor is closed by [`close`](Self::close) or on drop. Once closed
/// the wrapper holds `-1` and every further operation fails.
///
/// # Examples
///
/// ```
/// use pollhttp::socket::{Socket, SocketError};
///
/// let (left, right) = Socket::make_non_blocking_pair().unwrap();
/// assert_eq!(right.read_byte(), Err(SocketError::Blocked));
///
/// left.write(b"hi", 0).unwrap();
/// assert_eq!(right.read_byte(), Ok(b'h'));
/// ```
#[derive(Debug)]
pub struct Socket {
    file: RawFd,
}

impl Socket {
    /// Creates a new non-blocking socket.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Failed`] if the OS rejects the domain/type
    /// combination or is out of descriptors.
    pub fn new(domain: Domain, kind: SocketType) -> Result<Self, SocketError> {
        // SAFETY: plain syscall, no pointers involved.
        let file = unsafe { libc::socket(domain.raw(), kind.raw(), 0) };
        if file == -1 {
            return Err(SocketError::last_os_error("socket"));
        }
        let socket = Self { file };
        socket.set_non_blocking()?;
        Ok(socket)
    }

    /// Creates two connected non-blocking Unix stream sockets.
    pub fn make_non_blocking_pair() -> Result<(Self, Self), SocketError> {
        let mut files: [c_int; 2] = [-1; 2];
        // SAFETY: `files` has room for the two descriptors socketpair writes.
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, files.as_mut_ptr())
        };
        if rc == -1 {
            return Err(SocketError::last_os_error("socketpair"));
        }
        let (first, second) = (Self { file: files[0] }, Self { file: files[1] });
        first.set_non_blocking()?;
        second.set_non_blocking()?;
        Ok((first, second))
    }

    /// Takes ownership of an existing descriptor as-is.
    ///
    /// The descriptor is not switched to non-blocking mode; `-1` yields a
    /// socket on which every operation fails.
    pub const fn from_raw(file: RawFd) -> Self {
        Self { file }
    }

    /// The underlying descriptor, `-1` once closed.
    pub fn raw_fd(&self) -> RawFd {
        self.file
    }

    /// Returns `true` until the socket is closed.
    pub fn is_valid(&self) -> bool {
        self.file >= 0
    }

    fn set_non_blocking(&self) -> Result<(), SocketError> {
        let flags = self.flags()?;
        self.set_flags(flags.union(Flags::NON_BLOCKING))
    }

    /// Reads available bytes into `buf` and returns how many were read.
    ///
    /// # Errors
    ///
    /// - [`SocketError::Blocked`] when no data is available yet.
    /// - [`SocketError::Disconnected`] when the peer has closed, or the
    ///   socket itself is closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if buf.is_empty() {
            return Ok(0);
        }
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let count = unsafe { libc::read(self.file, buf.as_mut_ptr().cast(), buf.len()) };
        match count {
            -1 => Err(SocketError::last_transfer_error("read")),
            0 => Err(SocketError::Disconnected),
            n => Ok(n as usize),
        }
    }

    /// Reads a single byte.
    pub fn read_byte(&self) -> Result<u8, SocketError> {
        let mut byte = [0u8; 1];
        self.read(&mut byte)?;
        Ok(byte[0])
    }

    /// Writes `data[from..]` and returns the number of bytes written.
    ///
    /// Partial writes are normal; continue from `from + written`.
    ///
    /// # Errors
    ///
    /// An offset past the end of `data` fails with `EINVAL`.
    pub fn write(&self, data: &[u8], from: usize) -> Result<usize, SocketError> {
        let Some(remaining) = data.get(from..) else {
            return Err(SocketError::invalid_argument("write"));
        };
        if remaining.is_empty() {
            return Ok(0);
        }
        // SAFETY: `remaining` is valid for reads of `remaining.len()` bytes.
        let count = unsafe {
            libc::send(
                self.file,
                remaining.as_ptr().cast(),
                remaining.len(),
                SEND_FLAGS,
            )
        };
        if count == -1 {
            return Err(SocketError::last_transfer_error("write"));
        }
        Ok(count as usize)
    }

    /// Accepts a pending connection as a new, independently owned socket.
    ///
    /// Fails with [`SocketError::Blocked`] when nothing is pending.
    pub fn accept(&self) -> Result<Socket, SocketError> {
        // SAFETY: null address pointers are allowed when the peer address is unwanted.
        let file = unsafe { libc::accept(self.file, ptr::null_mut(), ptr::null_mut()) };
        if file == -1 {
            return Err(SocketError::last_os_error("accept"));
        }
        let socket = Socket { file };
        socket.set_non_blocking()?;
        Ok(socket)
    }

    /// Marks a bound stream socket as accepting connections.
    pub fn listen(&self) -> Result<(), SocketError> {
        // SAFETY: plain syscall.
        if unsafe { libc::listen(self.file, libc::SOMAXCONN) } == -1 {
            return Err(SocketError::last_os_error("listen"));
        }
        Ok(())
    }

    /// Binds to `addr`. The socket's domain must match the address family.
    pub fn bind(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let (storage, len) = encode_addr(&addr);
        // SAFETY: `storage` holds a valid sockaddr of `len` bytes.
        let rc = unsafe {
            libc::bind(
                self.file,
                (&storage as *const libc::sockaddr_storage).cast(),
                len,
            )
        };
        if rc == -1 {
            return Err(SocketError::last_os_error("bind"));
        }
        Ok(())
    }

    /// Binds to `port` on the IPv6 unspecified address (`[::]`).
    pub fn bind_ip6(&self, port: u16) -> Result<(), SocketError> {
        self.bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
    }

    /// Returns the locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        // SAFETY: all-zero bytes is a valid sockaddr_storage.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        // SAFETY: `storage` has room for `len` bytes.
        let rc = unsafe {
            libc::getsockname(
                self.file,
                (&mut storage as *mut libc::sockaddr_storage).cast(),
                &mut len,
            )
        };
        if rc == -1 {
            return Err(SocketError::last_os_error("getsockname"));
        }
        decode_addr(&storage)
    }

    /// Closes the descriptor. Closing an already closed socket is an error.
    pub fn close(&mut self) -> Result<(), SocketError> {
        let file = mem::replace(&mut self.file, -1);
        // SAFETY: `file` is owned by this wrapper and never used again.
        if unsafe { libc::close(file) } == -1 {
            return Err(SocketError::last_os_error("close"));
        }
        Ok(())
    }

    /// Reads a socket option.
    pub fn get_value<T: OptionValue>(&self, option: SocketOption<T>) -> Result<T, SocketError> {
        let mut raw: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;
        // SAFETY: `raw` is a c_int and `len` describes its size.
        let rc = unsafe {
            libc::getsockopt(
                self.file,
                option.level,
                option.name,
                (&mut raw as *mut c_int).cast(),
                &mut len,
            )
        };
        if rc == -1 {
            return Err(SocketError::last_os_error("getsockopt"));
        }
        Ok(T::from_raw(raw))
    }

    /// Sets a socket option.
    pub fn set_value<T: OptionValue>(
        &self,
        option: SocketOption<T>,
        value: T,
    ) -> Result<(), SocketError> {
        let raw = value.into_raw();
        // SAFETY: `raw` is a c_int and the length matches.
        let rc = unsafe {
            libc::setsockopt(
                self.file,
                option.level,
                option.name,
                (&raw as *const c_int).cast(),
                mem::size_of::<c_int>() as socklen_t,
            )
        };
        if rc == -1 {
            return Err(SocketError::last_os_error("setsockopt"));
        }
        Ok(())
    }

    /// Snapshot of the descriptor's status flags.
    pub fn flags(&self) -> Result<Flags, SocketError> {
        // SAFETY: plain syscall.
        let bits = unsafe { libc::fcntl(self.file, libc::F_GETFL) };
        if bits == -1 {
            return Err(SocketError::last_os_error("fcntl(F_GETFL)"));
        }
        Ok(Flags::from_bits(bits))
    }

    /// Replaces the descriptor's status flags with `flags`.
    ///
    /// Start from [`flags`](Self::flags) to keep `NON_BLOCKING` set.
    pub fn set_flags(&self, flags: Flags) -> Result<(), SocketError> {
        // SAFETY: plain syscall.
        if unsafe { libc::fcntl(self.file, libc::F_SETFL, flags.bits()) } == -1 {
            return Err(SocketError::last_os_error("fcntl(F_SETFL)"));
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.file >= 0 {
            // SAFETY: the descriptor is still owned by this wrapper.
            unsafe {
                libc::close(self.file);
            }
        }
    }
}

fn encode_addr(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    // SAFETY: all-zero bytes is a valid sockaddr_storage.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in.
            let sin = unsafe {
                &mut *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in>()
            };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in6.
            let sin6 = unsafe {
                &mut *(&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr_in6>()
            };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as socklen_t)
}

fn decode_addr(storage: &libc::sockaddr_storage) -> Result<SocketAddr, SocketError> {
    match c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: the family says the storage holds a sockaddr_in.
            let sin = unsafe {
                &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>()
            };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddrV4::new(ip, u16::from_be(sin.sin_port)).into())
        }
        libc::AF_INET6 => {
            // SAFETY: the family says the storage holds a sockaddr_in6.
            let sin6 = unsafe {
                &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>()
            };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )
            .into())
        }
        family => Err(SocketError::Failed {
            operation: "getsockname",
            errno: libc::EAFNOSUPPORT,
            message: format!("unsupported address family {family}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_data_that_is_sent() {
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();
        assert_eq!(s1.write(&[10, 20], 0), Ok(2));
        assert_eq!(s2.read_byte(), Ok(10));
        assert_eq!(s2.read_byte(), Ok(20));
    }

    #[test]
    fn write_resumes_from_offset() {
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();
        assert_eq!(s1.write(b"hello", 3), Ok(2));
        let mut buf = [0u8; 8];
        assert_eq!(s2.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(s1.write(b"hello", 5), Ok(0));
    }

    #[test]
    fn write_rejects_offset_past_the_end() {
        let (s1, s2) = Socket::make_non_blocking_pair().unwrap();
        let err = s1.write(b"hello", 6).unwrap_err();
        assert!(matches!(
            err,
            SocketError::Failed { operation: "write", errno, .. } if errno == libc::EINVAL
        ));
        assert_eq!(s2.read_byte(), Err(SocketError::Blocked));
    }

    #[test]
    fn read_is_blocked_when_no_data_is_available() {
        let (mut s1, mut s2) = Socket::make_non_blocking_pair().unwrap();
        assert_eq!(s1.read_byte(), Err(SocketError::Blocked));
        s1.close().unwrap();
        s2.close().unwrap();
    }

    #[test]
    fn read_is_disconnected_when_socket_is_closed() {
        let (mut s1, mut s2) = Socket::make_non_blocking_pair().unwrap();
        s1.close().unwrap();
        s2.close().unwrap();
        assert_eq!(s1.read_byte(), Err(SocketError::Disconnected));
    }

    #[test]
    fn read_is_disconnected_when_peer_closes() {
        let (s1, mut s2) = Socket::make_non_blocking_pair().unwrap();
        s2.close().unwrap();
        assert_eq!(s1.read_byte(), Err(SocketError::Disconnected));
    }

    #[test]
    fn sockets_are_created_non_blocking() {
        let socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();
        assert!(socket.flags().unwrap().contains(Flags::NON_BLOCKING));
    }

    #[test]
    fn sets_and_gets_int_option() {
        let socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();
        socket
            .set_value(SocketOption::RECEIVE_BUFFER_SIZE, 32_768)
            .unwrap();
        let value = socket.get_value(SocketOption::RECEIVE_BUFFER_SIZE).unwrap();

        // Linux doubles the value to leave room for bookkeeping overhead.
        if cfg!(target_os = "linux") {
            assert_eq!(value, 65_536);
        } else {
            assert_eq!(value, 32_768);
        }
    }

    #[test]
    fn sets_and_gets_bool_option() {
        let socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();

        socket
            .set_value(SocketOption::LOCAL_ADDRESS_REUSE, true)
            .unwrap();
        assert_eq!(socket.get_value(SocketOption::LOCAL_ADDRESS_REUSE), Ok(true));

        socket
            .set_value(SocketOption::LOCAL_ADDRESS_REUSE, false)
            .unwrap();
        assert_eq!(socket.get_value(SocketOption::LOCAL_ADDRESS_REUSE), Ok(false));
    }

    #[test]
    fn sets_and_gets_flags() {
        let socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();
        let flags = socket.flags().unwrap();
        assert!(!flags.contains(Flags::APPEND));

        socket.set_flags(flags | Flags::APPEND).unwrap();
        let flags = socket.flags().unwrap();
        assert!(flags.contains(Flags::APPEND));
        assert!(flags.contains(Flags::NON_BLOCKING));
    }

    #[test]
    fn invalid_socket_operations_fail() {
        let mut socket = Socket::from_raw(-1);
        assert!(!socket.is_valid());
        assert!(socket.accept().is_err());
        assert!(socket.listen().is_err());
        assert!(socket.bind_ip6(8080).is_err());
        assert!(socket.flags().is_err());
        assert!(socket.get_value(SocketOption::KEEP_ALIVE).is_err());
        assert!(socket.close().is_err());
    }

    #[test]
    fn closing_twice_is_an_error() {
        let mut socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();
        socket.close().unwrap();
        assert!(socket.close().is_err());
    }

    #[test]
    fn accept_is_blocked_without_pending_connections() {
        let socket = Socket::new(Domain::Inet, SocketType::Stream).unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        socket.listen().unwrap();
        assert_eq!(socket.accept().unwrap_err(), SocketError::Blocked);
    }

    #[test]
    fn local_addr_reports_bound_port() {
        let socket = Socket::new(Domain::Inet, SocketType::Stream).unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn accepted_connections_are_non_blocking() {
        let listener = Socket::new(Domain::Inet, SocketType::Stream).unwrap();
        listener.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        listener.listen().unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();
        let accepted = loop {
            match listener.accept() {
                Ok(socket) => break socket,
                Err(SocketError::Blocked) => std::thread::yield_now(),
                Err(e) => panic!("accept failed: {e}"),
            }
        };
        assert!(accepted.flags().unwrap().contains(Flags::NON_BLOCKING));
        assert_eq!(accepted.read_byte(), Err(SocketError::Blocked));
    }
}
