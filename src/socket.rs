//! Thin wrappers over the stream-socket syscalls.
//!
//! Every call maps to exactly one kernel state change and reports failure as
//! the platform `Errno`. `raw_result` folds either outcome into the signed
//! convention shared with completion results: a non-negative value on
//! success, `-errno` on failure.
//!
//! The only retries are `EINTR` on `connect` and treating `EINTR` from
//! `close` as success (the descriptor is gone on Linux either way).

use core::ffi::c_int;
use core::mem::size_of;

use rustix::fd::{BorrowedFd, IntoRawFd, RawFd};
use rustix::io::Errno;
use rustix::net::{AddressFamily, SocketAddrV4, SocketFlags, SocketType};

use crate::addr::SockAddrIn;

/// Folds a syscall result into the single signed-integer convention.
pub trait RawResult {
    fn into_raw(self) -> i32;
}

impl RawResult for Result<(), Errno> {
    fn into_raw(self) -> i32 {
        match self {
            Ok(()) => 0,
            Err(e) => -e.raw_os_error(),
        }
    }
}

impl RawResult for Result<i32, Errno> {
    fn into_raw(self) -> i32 {
        match self {
            Ok(v) => v,
            Err(e) => -e.raw_os_error(),
        }
    }
}

#[must_use]
pub fn raw_result<R: RawResult>(res: R) -> i32 {
    res.into_raw()
}

fn borrow(fd: RawFd) -> Result<BorrowedFd<'static>, Errno> {
    if fd < 0 {
        return Err(Errno::BADF);
    }
    // SAFETY: non-negative; the borrow never outlives the single syscall
    // it is passed to.
    Ok(unsafe { BorrowedFd::borrow_raw(fd) })
}

/// errno left by the libc call that just failed.
fn last_errno() -> Errno {
    // SAFETY: `__errno_location` always returns this thread's errno cell.
    Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}

fn sockaddr(ip: &[u8], port: u16) -> Result<SocketAddrV4, Errno> {
    SockAddrIn::from_bytes(ip, port)
        .map(SocketAddrV4::from)
        .ok_or(Errno::INVAL)
}

/// Creates an `AF_INET` stream socket. The caller owns the returned fd.
///
/// ## Errors
/// Returns the `Errno` from `socket(2)`.
pub fn new_stream_socket(close_on_exec: bool, non_blocking: bool) -> Result<RawFd, Errno> {
    let mut flags = SocketFlags::empty();
    if close_on_exec {
        flags |= SocketFlags::CLOEXEC;
    }
    if non_blocking {
        flags |= SocketFlags::NONBLOCK;
    }
    let fd = rustix::net::socket_with(AddressFamily::INET, SocketType::STREAM, flags, None)?;
    let fd = fd.into_raw_fd();
    log::trace!("new stream socket fd={fd} cloexec={close_on_exec} nonblock={non_blocking}");
    Ok(fd)
}

/// Binds to an IPv4 address given as exactly four bytes.
///
/// ## Errors
/// `EINVAL` if `ip` is not four bytes, otherwise the `Errno` from `bind(2)`.
pub fn bind(fd: RawFd, ip: &[u8], port: u16) -> Result<(), Errno> {
    let addr = sockaddr(ip, port)?;
    rustix::net::bind_v4(borrow(fd)?, &addr)
}

/// ## Errors
/// Returns the `Errno` from `listen(2)`.
pub fn listen(fd: RawFd, backlog: i32) -> Result<(), Errno> {
    rustix::net::listen(borrow(fd)?, backlog)
}

/// Connects to an IPv4 address, retrying while interrupted by signals.
///
/// ## Errors
/// `EINVAL` if `ip` is not four bytes, otherwise the `Errno` from
/// `connect(2)` (e.g. `ECONNREFUSED`, `ETIMEDOUT`, `EINPROGRESS` on a
/// non-blocking socket).
pub fn connect(fd: RawFd, ip: &[u8], port: u16) -> Result<(), Errno> {
    let addr = sockaddr(ip, port)?;
    let sock = borrow(fd)?;
    loop {
        match rustix::net::connect_v4(sock, &addr) {
            Err(e) if e == Errno::INTR => continue,
            res => return res,
        }
    }
}

/// Shuts down the read half, the write half, or both.
///
/// ## Errors
/// `EINVAL` if neither half is selected, otherwise the `Errno` from
/// `shutdown(2)`.
pub fn shutdown(fd: RawFd, read: bool, write: bool) -> Result<(), Errno> {
    let how = match (read, write) {
        (true, true) => rustix::net::Shutdown::ReadWrite,
        (true, false) => rustix::net::Shutdown::Read,
        (false, true) => rustix::net::Shutdown::Write,
        (false, false) => return Err(Errno::INVAL),
    };
    rustix::net::shutdown(borrow(fd)?, how)
}

/// ## Errors
/// Returns the `Errno` from `close(2)`, except `EINTR`.
pub fn close(fd: RawFd) -> Result<(), Errno> {
    // SAFETY: closing an fd we do not own is the caller's contract, as with
    // close(2) itself; no Rust object wraps `fd`.
    if unsafe { libc::close(fd) } == -1 {
        let errno = last_errno();
        if errno != Errno::INTR {
            return Err(errno);
        }
    }
    Ok(())
}

/// Reads an `int`-valued socket option.
///
/// ## Errors
/// Returns the `Errno` from `getsockopt(2)`.
pub fn get_sock_opt(fd: RawFd, level: i32, optname: i32) -> Result<i32, Errno> {
    let mut value: c_int = 0;
    let mut len = size_of::<c_int>() as libc::socklen_t;
    // SAFETY: value/len describe a live c_int-sized buffer.
    let res = unsafe {
        libc::getsockopt(
            fd,
            level,
            optname,
            (&mut value as *mut c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if res == -1 {
        return Err(last_errno());
    }
    Ok(value)
}

/// Writes an `int`-valued socket option.
///
/// ## Errors
/// Returns the `Errno` from `setsockopt(2)`.
pub fn set_sock_opt(fd: RawFd, level: i32, optname: i32, value: i32) -> Result<(), Errno> {
    let value: c_int = value;
    // SAFETY: value is a live c_int for the duration of the call.
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            optname,
            (&value as *const c_int).cast::<libc::c_void>(),
            size_of::<c_int>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(last_errno());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SOL_SOCKET, SO_ERROR, SO_KEEPALIVE, SO_REUSEADDR, SO_TYPE, SOCK_STREAM};
    use pretty_assertions::assert_eq;

    const LOCALHOST: [u8; 4] = [127, 0, 0, 1];

    /// Listening socket on an ephemeral port; returns (fd, port).
    fn listener(backlog: i32) -> (RawFd, u16) {
        let fd = new_stream_socket(true, false).expect("socket");
        set_sock_opt(fd, SOL_SOCKET, SO_REUSEADDR, 1).expect("SO_REUSEADDR");
        bind(fd, &LOCALHOST, 0).expect("bind");
        listen(fd, backlog).expect("listen");
        let local = rustix::net::getsockname(borrow(fd).expect("fd")).expect("getsockname");
        let port = match local {
            rustix::net::SocketAddrAny::V4(v4) => v4.port(),
            other => panic!("unexpected local address {other:?}"),
        };
        (fd, port)
    }

    #[test]
    fn test_new_stream_socket() {
        let fd = new_stream_socket(true, true).expect("socket");
        assert!(fd >= 0);
        assert_eq!(get_sock_opt(fd, SOL_SOCKET, SO_TYPE), Ok(SOCK_STREAM));
        close(fd).expect("close");
    }

    #[test]
    fn test_sock_opt_round_trip() {
        let fd = new_stream_socket(true, false).expect("socket");
        set_sock_opt(fd, SOL_SOCKET, SO_KEEPALIVE, 1).expect("set");
        assert_eq!(get_sock_opt(fd, SOL_SOCKET, SO_KEEPALIVE), Ok(1));
        set_sock_opt(fd, SOL_SOCKET, SO_KEEPALIVE, 0).expect("set");
        assert_eq!(get_sock_opt(fd, SOL_SOCKET, SO_KEEPALIVE), Ok(0));
        assert_eq!(get_sock_opt(fd, SOL_SOCKET, SO_ERROR), Ok(0));
        close(fd).expect("close");
    }

    #[test]
    fn test_bind_rejects_non_ipv4_bytes() {
        let fd = new_stream_socket(true, false).expect("socket");
        assert_eq!(bind(fd, &[127, 0, 0], 0), Err(Errno::INVAL));
        assert_eq!(connect(fd, &[0; 16], 80), Err(Errno::INVAL));
        close(fd).expect("close");
    }

    #[test]
    fn test_connect_to_listener() {
        let (lfd, port) = listener(4);
        let cfd = new_stream_socket(true, false).expect("socket");
        connect(cfd, &LOCALHOST, port).expect("connect");
        shutdown(cfd, true, true).expect("shutdown");
        close(cfd).expect("close client");
        close(lfd).expect("close listener");
    }

    #[test]
    fn test_connect_refused_is_negative() {
        // Bound but never listening: nothing accepts on this port.
        let fd = new_stream_socket(true, false).expect("socket");
        bind(fd, &LOCALHOST, 0).expect("bind");
        let local = rustix::net::getsockname(borrow(fd).expect("fd")).expect("getsockname");
        let rustix::net::SocketAddrAny::V4(v4) = local else {
            panic!("unexpected local address");
        };

        let cfd = new_stream_socket(true, false).expect("socket");
        let res = raw_result(connect(cfd, &LOCALHOST, v4.port()));
        assert!(res < 0);
        assert!(
            res == -Errno::CONNREFUSED.raw_os_error() || res == -Errno::TIMEDOUT.raw_os_error(),
            "unexpected result {res}"
        );
        close(cfd).expect("close");
        close(fd).expect("close");
    }

    #[test]
    fn test_shutdown_requires_a_direction() {
        let fd = new_stream_socket(true, false).expect("socket");
        assert_eq!(shutdown(fd, false, false), Err(Errno::INVAL));
        // Not connected.
        assert_eq!(shutdown(fd, true, false), Err(Errno::NOTCONN));
        close(fd).expect("close");
    }

    #[test]
    fn test_close_bad_fd() {
        assert_eq!(raw_result(close(-1)), -Errno::BADF.raw_os_error());
        assert_eq!(listen(-1, 1), Err(Errno::BADF));
    }

    #[test]
    fn test_sock_opt_errors_carry_kernel_errno() {
        let fd = new_stream_socket(true, false).expect("socket");
        assert_eq!(get_sock_opt(fd, SOL_SOCKET, -1), Err(Errno::NOPROTOOPT));
        assert_eq!(set_sock_opt(fd, SOL_SOCKET, -1, 1), Err(Errno::NOPROTOOPT));
        close(fd).expect("close");
        assert_eq!(get_sock_opt(-1, SOL_SOCKET, SO_TYPE), Err(Errno::BADF));
        assert_eq!(set_sock_opt(-1, SOL_SOCKET, SO_KEEPALIVE, 1), Err(Errno::BADF));
    }

    #[test]
    fn test_raw_result_convention() {
        assert_eq!(raw_result(Ok::<i32, Errno>(5)), 5);
        assert_eq!(raw_result(Ok::<(), Errno>(())), 0);
        assert_eq!(
            raw_result(Err::<(), Errno>(Errno::AGAIN)),
            -Errno::AGAIN.raw_os_error()
        );
    }
}
