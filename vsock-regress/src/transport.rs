//! Stream transports the client and server run over.
//!
//! AF_VSOCK is the production transport. Unix-domain sockets implement the
//! same traits so the exchange logic runs on hosts without `vsock_loopback`.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::debug;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use vsock::{VsockListener, VsockStream};

use crate::endpoint::Endpoint;
use crate::error::{RegressError, Result};

/// An established, bidirectional byte stream.
pub trait Connection: Read + Write {
    /// Bound every subsequent read and write; `None` blocks indefinitely.
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

/// A bound listening socket.
pub trait Listener: AsRawFd {
    type Conn: Connection;

    /// Blocking accept. Returns the stream and a printable peer address.
    fn accept_conn(&self) -> io::Result<(Self::Conn, String)>;
}

/// Something the client can dial.
pub trait Connector {
    type Conn: Connection;

    fn connect(&self) -> io::Result<Self::Conn>;

    /// Printable target address, for logs and errors.
    fn target(&self) -> String;
}

impl Connection for VsockStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

impl Listener for VsockListener {
    type Conn = VsockStream;

    fn accept_conn(&self) -> io::Result<(VsockStream, String)> {
        let (stream, addr) = self.accept()?;
        Ok((stream, Endpoint::new(addr.cid(), addr.port()).to_string()))
    }
}

impl Connection for UnixStream {
    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }
}

impl Listener for UnixListener {
    type Conn = UnixStream;

    fn accept_conn(&self) -> io::Result<(UnixStream, String)> {
        let (stream, addr) = self.accept()?;
        let peer = match addr.as_pathname() {
            Some(path) => path.display().to_string(),
            None => "unix:(unnamed)".to_string(),
        };
        Ok((stream, peer))
    }
}

/// Dials a fixed vsock endpoint.
#[derive(Debug, Clone, Copy)]
pub struct VsockConnector {
    endpoint: Endpoint,
}

impl VsockConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        VsockConnector { endpoint }
    }
}

impl Connector for VsockConnector {
    type Conn = VsockStream;

    fn connect(&self) -> io::Result<VsockStream> {
        VsockStream::connect_with_cid_port(self.endpoint.cid(), self.endpoint.port())
    }

    fn target(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Dials a Unix-domain socket path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        UnixConnector { path: path.into() }
    }
}

impl Connector for UnixConnector {
    type Conn = UnixStream;

    fn connect(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path)
    }

    fn target(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Bind the server's wildcard vsock endpoint.
pub fn bind_vsock(port: u32) -> Result<VsockListener> {
    let endpoint = Endpoint::listen_any(port);
    VsockListener::bind_with_cid_port(endpoint.cid(), endpoint.port()).map_err(|source| {
        RegressError::Bind {
            endpoint: endpoint.to_string(),
            source,
        }
    })
}

/// Wait until `fd` is readable. Returns `false` when `timeout` elapses first.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(i32::MAX as u128) as i32;
        match poll(&mut fds, millis) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

/// Accept one connection, giving up after `timeout`.
pub fn accept_timeout<L: Listener>(
    listener: &L,
    timeout: Option<Duration>,
) -> Result<(L::Conn, String)> {
    if let Some(timeout) = timeout {
        let ready = wait_readable(listener.as_raw_fd(), timeout)?;
        if !ready {
            return Err(RegressError::Timeout(format!(
                "no connection within {} ms",
                timeout.as_millis()
            )));
        }
    }

    let (conn, peer) = listener.accept_conn()?;
    debug!("Accepted connection from {}", peer);
    Ok((conn, peer))
}
