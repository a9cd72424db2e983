//! Asynchronous transport capability
//!
//! The HTTP engine never touches sockets directly. It drives a [`Transport`]
//! (connect, write, close, abort) and is driven back through a single event
//! handler that receives [`TransportEvent`]s from the transport's own thread.
//!
//! [`TcpTransport`] is the stock implementation on top of `std::net`, with
//! optional TLS through OpenSSL.

pub mod session;
pub mod tcp;
pub mod tls;

pub use session::{FdSessionOps, SessionOps, TlsSessionOps};
pub use tcp::{TcpConfig, TcpTransport};
pub use tls::{TlsConfig, TlsConfigBuilder};

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Tls(err.to_string())
    }
}

/// Error code carried by [`TransportEvent::Error`].
///
/// A small value type so it can cross thread boundaries inside an event
/// without dragging the original `io::Error` along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    OutOfMemory,
    Buffer,
    Timeout,
    Routing,
    InProgress,
    IllegalValue,
    WouldBlock,
    AddressInUse,
    AlreadyConnected,
    NotConnected,
    Interface,
    Aborted,
    Reset,
    Closed,
    IllegalArgument,
    ConnectionRefused,
    HostUnreachable,
    Tls,
    /// Raw OS error number without a dedicated variant
    Other(i32),
}

impl ErrorCode {
    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::OutOfMemory => "Out of memory error.",
            ErrorCode::Buffer => "Buffer error.",
            ErrorCode::Timeout => "Timeout error.",
            ErrorCode::Routing => "Routing problem.",
            ErrorCode::InProgress => "Operation in progress.",
            ErrorCode::IllegalValue => "Illegal value.",
            ErrorCode::WouldBlock => "Operation would block.",
            ErrorCode::AddressInUse => "Address in use.",
            ErrorCode::AlreadyConnected => "Connection already established.",
            ErrorCode::NotConnected => "Not connected.",
            ErrorCode::Interface => "Low-level netif error.",
            ErrorCode::Aborted => "Connection aborted.",
            ErrorCode::Reset => "Connection reset.",
            ErrorCode::Closed => "Connection closed.",
            ErrorCode::IllegalArgument => "Illegal argument.",
            ErrorCode::ConnectionRefused => "Connection refused.",
            ErrorCode::HostUnreachable => "Host is unreachable.",
            ErrorCode::Tls => "TLS failure.",
            ErrorCode::Other(_) => "Unknown error.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "{} ({})", self.description(), code),
            _ => f.write_str(self.description()),
        }
    }
}

impl From<&io::Error> for ErrorCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
            io::ErrorKind::ConnectionReset => ErrorCode::Reset,
            io::ErrorKind::ConnectionAborted => ErrorCode::Aborted,
            io::ErrorKind::NotConnected => ErrorCode::NotConnected,
            io::ErrorKind::AddrInUse => ErrorCode::AddressInUse,
            io::ErrorKind::AddrNotAvailable => ErrorCode::Routing,
            io::ErrorKind::TimedOut => ErrorCode::Timeout,
            io::ErrorKind::WouldBlock => ErrorCode::WouldBlock,
            io::ErrorKind::InvalidInput => ErrorCode::IllegalArgument,
            io::ErrorKind::InvalidData => ErrorCode::IllegalValue,
            io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => ErrorCode::Closed,
            _ => match err.raw_os_error() {
                Some(libc::EHOSTUNREACH) => ErrorCode::HostUnreachable,
                Some(libc::ENETUNREACH) => ErrorCode::Routing,
                Some(libc::EINPROGRESS) => ErrorCode::InProgress,
                Some(libc::EISCONN) => ErrorCode::AlreadyConnected,
                Some(code) => ErrorCode::Other(code),
                None => ErrorCode::Other(-1),
            },
        }
    }
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Io(e) => ErrorCode::from(e),
            Error::Tls(_) => ErrorCode::Tls,
            Error::InvalidAddress(_) => ErrorCode::IllegalArgument,
            Error::NotConnected => ErrorCode::NotConnected,
            Error::AlreadyConnected => ErrorCode::AlreadyConnected,
        }
    }
}

/// Notification raised by a transport from its own execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent<'a> {
    /// Connection established (TLS handshake included)
    Connected,
    /// Connection gone, whatever the reason
    Disconnected,
    /// Connection level failure
    Error(ErrorCode),
    /// Inbound bytes. The slice is only valid for the duration of the call.
    Data(&'a [u8]),
    /// Outbound data was not acknowledged in time
    Timeout(Duration),
}

/// Receiver of transport events
pub type EventHandler = Arc<dyn Fn(TransportEvent<'_>) + Send + Sync>;

/// Asynchronous transport capability
///
/// `connect` only dispatches the attempt; completion is reported through
/// [`TransportEvent::Connected`] or [`TransportEvent::Error`].
pub trait Transport: Send {
    /// Start connecting to `host:port`, optionally over TLS
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> Result<()>;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Graceful close; a `Disconnected` event follows
    fn close(&mut self);

    /// Hard close; no further events are raised for this connection
    fn abort(&mut self);

    /// Is a connection currently established?
    fn connected(&self) -> bool;

    /// Register (or remove) the event handler
    fn set_event_handler(&mut self, handler: Option<EventHandler>);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> Result<()> {
        (**self).connect(host, port, secure)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn abort(&mut self) {
        (**self).abort()
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn set_event_handler(&mut self, handler: Option<EventHandler>) {
        (**self).set_event_handler(handler)
    }
}
