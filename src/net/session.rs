//! Byte streams under the transport
//!
//! Plain TCP and TLS connections look the same to the I/O thread: readiness
//! is polled on the raw socket, data moves through [`SessionOps`].

use openssl::ssl::SslStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// A connected byte stream
pub trait SessionOps: Send {
    /// Socket to poll for readiness
    fn raw_fd(&self) -> RawFd;

    /// Bytes decoded already and readable without touching the socket
    fn pending(&self) -> usize {
        0
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shut the stream down in both directions
    fn close(&mut self) -> io::Result<()>;
}

/// Wait up to `timeout` for `fd` to become readable
///
/// Returns `Ok(false)` when nothing arrived in time or the wait was
/// interrupted by a signal. A hang up counts as readable so the following
/// read can report it.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: `pfd` is a valid pollfd for the duration of the call and the
    // count matches.
    let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

    match ready {
        n if n > 0 => Ok(true),
        0 => Ok(false),
        _ => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(false)
            } else {
                Err(err)
            }
        }
    }
}

/// Unencrypted session
#[derive(Debug)]
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

impl SessionOps for FdSessionOps {
    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// TLS session over an OpenSSL stream whose handshake already completed
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
}

impl TlsSessionOps {
    pub fn new(stream: SslStream<TcpStream>) -> Self {
        TlsSessionOps { stream }
    }

    /// Negotiated protocol version, e.g. "TLSv1.3"
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }
}

impl std::fmt::Debug for TlsSessionOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessionOps")
            .field("fd", &self.raw_fd())
            .field("version", &self.version())
            .finish()
    }
}

impl SessionOps for TlsSessionOps {
    fn raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }

    fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        // close_notify is best effort, the peer may already be gone
        let _ = self.stream.shutdown();
        self.stream.get_ref().shutdown(Shutdown::Both)
    }
}
