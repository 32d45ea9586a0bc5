//! Typed socket options and descriptor status flags.

use std::marker::PhantomData;
use std::ops::BitOr;

use libc::c_int;

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for bool {}
}

/// A value that can be stored in an integer socket option.
pub trait OptionValue: Copy + sealed::Sealed {
    fn into_raw(self) -> c_int;
    fn from_raw(raw: c_int) -> Self;
}

impl OptionValue for i32 {
    fn into_raw(self) -> c_int {
        self
    }

    fn from_raw(raw: c_int) -> Self {
        raw
    }
}

impl OptionValue for bool {
    fn into_raw(self) -> c_int {
        c_int::from(self)
    }

    fn from_raw(raw: c_int) -> Self {
        raw != 0
    }
}

/// A socket-level option whose value has type `T`.
///
/// The type parameter ties each option to the value it carries, so
/// `RECEIVE_BUFFER_SIZE` can only be read as an `i32` and
/// `LOCAL_ADDRESS_REUSE` only as a `bool`.
///
/// # Examples
///
/// ```
/// use pollhttp::socket::{Domain, Socket, SocketOption, SocketType};
///
/// let socket = Socket::new(Domain::Unix, SocketType::Stream).unwrap();
/// socket.set_value(SocketOption::LOCAL_ADDRESS_REUSE, true).unwrap();
/// assert!(socket.get_value(SocketOption::LOCAL_ADDRESS_REUSE).unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOption<T> {
    pub(crate) level: c_int,
    pub(crate) name: c_int,
    _value: PhantomData<fn() -> T>,
}

impl<T> SocketOption<T> {
    const fn new(level: c_int, name: c_int) -> Self {
        Self {
            level,
            name,
            _value: PhantomData,
        }
    }
}

impl SocketOption<i32> {
    /// `SO_RCVBUF`. Linux reports back twice the requested size.
    pub const RECEIVE_BUFFER_SIZE: Self = Self::new(libc::SOL_SOCKET, libc::SO_RCVBUF);
    /// `SO_SNDBUF`.
    pub const SEND_BUFFER_SIZE: Self = Self::new(libc::SOL_SOCKET, libc::SO_SNDBUF);
}

impl SocketOption<bool> {
    /// `SO_REUSEADDR`.
    pub const LOCAL_ADDRESS_REUSE: Self = Self::new(libc::SOL_SOCKET, libc::SO_REUSEADDR);
    /// `SO_KEEPALIVE`.
    pub const KEEP_ALIVE: Self = Self::new(libc::SOL_SOCKET, libc::SO_KEEPALIVE);
}

/// File status flags of a descriptor (`fcntl(F_GETFL)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(c_int);

impl Flags {
    pub const NON_BLOCKING: Self = Self(libc::O_NONBLOCK);
    pub const APPEND: Self = Self(libc::O_APPEND);

    pub const fn from_bits(bits: c_int) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> c_int {
        self.0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_values_map_to_c_ints() {
        assert_eq!(true.into_raw(), 1);
        assert_eq!(false.into_raw(), 0);
        assert!(bool::from_raw(4));
        assert!(!bool::from_raw(0));
    }

    #[test]
    fn flags_contains_and_union() {
        let flags = Flags::NON_BLOCKING | Flags::APPEND;
        assert!(flags.contains(Flags::APPEND));
        assert!(flags.contains(Flags::NON_BLOCKING));
        assert!(!Flags::NON_BLOCKING.contains(Flags::APPEND));
        assert_eq!(flags.bits(), libc::O_NONBLOCK | libc::O_APPEND);
    }
}
