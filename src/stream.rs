//! Client stream abstraction and inbound delivery.
//!
//! The session core only needs "one connected, bidirectional stream with a queryable peer".
//! `SessionStream` is that contract; delivery (socket activation, a one-shot listener, a
//! socketpair in tests) stays outside the core.
use std::env;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{getsockname, AddressFamily, SockaddrLike, SockaddrStorage};
use tracing::{debug, info};

use crate::errors::{ConnectStage, GateError};

/// First descriptor passed by systemd-style activation (SD_LISTEN_FDS_START).
const LISTEN_FDS_START: RawFd = 3;

pub trait SessionStream: Read + Write + AsFd + Send {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Human-readable peer identity for logs.
    fn peer_label(&self) -> io::Result<String>;

    /// Shut down both directions; the descriptor itself closes on drop.
    fn shutdown_both(&self) -> io::Result<()>;
}

impl SessionStream for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn peer_label(&self) -> io::Result<String> {
        self.peer_addr().map(|a| a.to_string())
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl SessionStream for UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn peer_label(&self) -> io::Result<String> {
        let addr = self.peer_addr()?;
        Ok(match addr.as_pathname() {
            Some(p) => format!("unix:{}", p.display()),
            None => "unix:(unnamed)".to_string(),
        })
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Pick the descriptor handed over by the activator: fd 3 when LISTEN_PID/LISTEN_FDS name
/// this process, otherwise standard input (inetd style).
fn activation_fd(listen_pid: Option<&str>, listen_fds: Option<&str>, pid: u32) -> RawFd {
    let pid_matches = listen_pid
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map(|p| p == pid)
        .unwrap_or(false);
    let fds = listen_fds
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);
    if pid_matches && fds >= 1 {
        LISTEN_FDS_START
    } else {
        0
    }
}

/// Client connection handed over by the activator, TCP or unix-domain.
#[derive(Debug)]
pub enum ClientSocket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Read for ClientSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientSocket::Tcp(s) => s.read(buf),
            ClientSocket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ClientSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientSocket::Tcp(s) => s.write(buf),
            ClientSocket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientSocket::Tcp(s) => s.flush(),
            ClientSocket::Unix(s) => s.flush(),
        }
    }
}

impl AsFd for ClientSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            ClientSocket::Tcp(s) => s.as_fd(),
            ClientSocket::Unix(s) => s.as_fd(),
        }
    }
}

impl SessionStream for ClientSocket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            ClientSocket::Tcp(s) => SessionStream::set_nonblocking(s, nonblocking),
            ClientSocket::Unix(s) => SessionStream::set_nonblocking(s, nonblocking),
        }
    }

    fn peer_label(&self) -> io::Result<String> {
        match self {
            ClientSocket::Tcp(s) => SessionStream::peer_label(s),
            ClientSocket::Unix(s) => SessionStream::peer_label(s),
        }
    }

    fn shutdown_both(&self) -> io::Result<()> {
        match self {
            ClientSocket::Tcp(s) => s.shutdown_both(),
            ClientSocket::Unix(s) => s.shutdown_both(),
        }
    }
}

/// Wrap a connected socket descriptor according to its address family.
///
/// Descriptors that are not sockets, are not connected, or belong to another family are
/// inbound connect errors.
pub fn socket_from_fd(fd: OwnedFd) -> Result<ClientSocket, GateError> {
    let inbound = |e: io::Error| GateError::connect(ConnectStage::Inbound, e);
    let local: SockaddrStorage = getsockname(fd.as_raw_fd()).map_err(|e| inbound(e.into()))?;
    let sock = match local.family() {
        Some(AddressFamily::Inet) | Some(AddressFamily::Inet6) => {
            ClientSocket::Tcp(TcpStream::from(fd))
        }
        Some(AddressFamily::Unix) => ClientSocket::Unix(UnixStream::from(fd)),
        other => {
            return Err(inbound(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported socket family {other:?}"),
            )))
        }
    };
    let peer = sock.peer_label().map_err(inbound)?;
    info!(%peer, "client connected");
    Ok(sock)
}

/// Take ownership of the already-accepted connection the activator passed to this process.
pub fn inherited_socket() -> Result<ClientSocket, GateError> {
    let listen_pid = env::var("LISTEN_PID").ok();
    let listen_fds = env::var("LISTEN_FDS").ok();
    let fd = activation_fd(
        listen_pid.as_deref(),
        listen_fds.as_deref(),
        std::process::id(),
    );
    // Child processes must not pick the descriptors up again.
    env::remove_var("LISTEN_PID");
    env::remove_var("LISTEN_FDS");
    env::remove_var("LISTEN_FDNAMES");

    debug!(fd, "taking inherited client socket");
    // SAFETY: the activator hands this descriptor to the process exclusively; nothing else in
    // the process reads from it, so ownership can move into the stream.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    socket_from_fd(owned)
}

/// Bind `addr`, accept exactly one connection and drop the listener.
pub fn accept_one<A: ToSocketAddrs>(addr: A) -> Result<TcpStream, GateError> {
    let listener =
        TcpListener::bind(addr).map_err(|e| GateError::connect(ConnectStage::Inbound, e))?;
    if let Ok(local) = listener.local_addr() {
        info!(%local, "waiting for a single client connection");
    }
    let (stream, peer) = listener
        .accept()
        .map_err(|e| GateError::connect(ConnectStage::Inbound, e))?;
    info!(%peer, "client connected");
    Ok(stream)
}
