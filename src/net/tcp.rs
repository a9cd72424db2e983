//! TCP transport
//!
//! Every connection gets its own I/O thread. The thread connects (and runs
//! the TLS handshake when asked to), then polls the socket and hands inbound
//! bytes to the registered event handler. Writes happen on the caller's
//! thread through the shared session.

use super::session::{wait_readable, FdSessionOps, SessionOps, TlsSessionOps};
use super::{Error, ErrorCode, EventHandler, Result, TlsConfig, Transport, TransportEvent};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Poll slice of the I/O thread, bounds how long a close request waits
const POLL_SLICE: Duration = Duration::from_millis(50);

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum time to establish the TCP connection
    pub connect_timeout: Duration,
    /// Maximum time a write may wait for the peer to accept data
    pub ack_timeout: Duration,
    /// Size of the receive buffer handed to the event handler
    pub read_buffer_size: usize,
    /// TLS settings for secure connections
    pub tls: TlsConfig,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            read_buffer_size: 4096,
            tls: TlsConfig::default(),
        }
    }
}

type SharedHandler = Arc<Mutex<Option<EventHandler>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(handler: &SharedHandler, event: TransportEvent<'_>) {
    let handler = lock(handler).clone();
    if let Some(handler) = handler {
        handler(event);
    }
}

/// State of one connection, shared between the transport and its I/O thread
struct Link {
    session: Mutex<Option<Box<dyn SessionOps>>>,
    /// Second handle on the socket so it can be shut down without the session lock
    socket: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    closing: AtomicBool,
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl Link {
    fn new() -> Self {
        Link {
            session: Mutex::new(None),
            socket: Mutex::new(None),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    fn shutdown_socket(&self) {
        if let Some(socket) = lock(&self.socket).as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

/// Thread-backed [`Transport`] over `std::net::TcpStream`
pub struct TcpTransport {
    config: TcpConfig,
    handler: SharedHandler,
    link: Option<Arc<Link>>,
}

impl TcpTransport {
    /// Create a transport with default settings
    pub fn new() -> Self {
        Self::with_config(TcpConfig::default())
    }

    /// Create a transport with custom settings
    pub fn with_config(config: TcpConfig) -> Self {
        TcpTransport {
            config,
            handler: Arc::new(Mutex::new(None)),
            link: None,
        }
    }

    /// Get the transport configuration
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn busy(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| !link.finished.load(Ordering::Acquire))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("config", &self.config)
            .field("connected", &self.connected())
            .finish()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> Result<()> {
        if self.busy() {
            return Err(Error::AlreadyConnected);
        }
        if host.is_empty() {
            return Err(Error::InvalidAddress("empty host".to_string()));
        }

        let link = Arc::new(Link::new());
        let host = host.to_string();
        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let thread_link = Arc::clone(&link);

        thread::Builder::new()
            .name("asynchttp-io".to_string())
            .spawn(move || run_link(&thread_link, &host, port, secure, &config, &handler))?;

        self.link = Some(link);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let link = match self.link {
            Some(ref link) if link.connected.load(Ordering::Acquire) => Arc::clone(link),
            _ => return Err(Error::NotConnected),
        };

        let mut guard = lock(&link.session);
        let session = guard.as_mut().ok_or(Error::NotConnected)?;
        let mut written = 0;

        while written < buf.len() {
            match session.write(&buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    warn!("Write not acknowledged within {:?}.", self.config.ack_timeout);
                    emit(&self.handler, TransportEvent::Timeout(self.config.ack_timeout));
                    return Err(Error::Io(e));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        trace!("Wrote {} of {} bytes.", written, buf.len());
        Ok(written)
    }

    fn close(&mut self) {
        if let Some(ref link) = self.link {
            link.closing.store(true, Ordering::Release);
            if let Some(session) = lock(&link.session).as_mut() {
                let _ = session.close();
            }
            link.shutdown_socket();
        }
    }

    fn abort(&mut self) {
        if let Some(link) = self.link.take() {
            link.aborted.store(true, Ordering::Release);
            link.shutdown_socket();
        }
    }

    fn connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.connected.load(Ordering::Acquire))
    }

    fn set_event_handler(&mut self, handler: Option<EventHandler>) {
        *lock(&self.handler) = handler;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.abort();
    }
}

fn open_stream(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in (host, port).to_socket_addrs()? {
        match connect_addr(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address for {}", host))
    }))
}

fn connect_addr(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nodelay(true)?;
    Ok(socket.into())
}

fn establish(
    link: &Link,
    host: &str,
    port: u16,
    secure: bool,
    config: &TcpConfig,
) -> Result<Box<dyn SessionOps>> {
    let stream = open_stream(host, port, config.connect_timeout)?;
    stream.set_write_timeout(Some(config.ack_timeout))?;
    *lock(&link.socket) = Some(stream.try_clone()?);

    if secure {
        // The handshake blocks on the server's flight and gets the connect budget
        stream.set_read_timeout(Some(config.connect_timeout))?;
        let tls = config.tls.handshake(host, stream)?;
        // Bounded reads keep a TLS read with a partial record from holding the session lock
        tls.get_ref().set_read_timeout(Some(POLL_SLICE))?;
        Ok(Box::new(TlsSessionOps::new(tls)))
    } else {
        stream.set_read_timeout(Some(POLL_SLICE))?;
        Ok(Box::new(FdSessionOps::new(stream)))
    }
}

fn run_link(
    link: &Link,
    host: &str,
    port: u16,
    secure: bool,
    config: &TcpConfig,
    handler: &SharedHandler,
) {
    let quiet = || link.aborted.load(Ordering::Acquire);

    match establish(link, host, port, secure, config) {
        Ok(session) => {
            let fd = session.raw_fd();
            *lock(&link.session) = Some(session);
            link.connected.store(true, Ordering::Release);

            if !quiet() {
                emit(handler, TransportEvent::Connected);
                receive(link, fd, config.read_buffer_size, handler);
            }
        }
        Err(e) => {
            if !quiet() {
                emit(handler, TransportEvent::Error(ErrorCode::from(&e)));
            }
        }
    }

    link.connected.store(false, Ordering::Release);
    lock(&link.session).take();
    lock(&link.socket).take();
    // Set before the last event so a handler reacting to it may reconnect
    link.finished.store(true, Ordering::Release);

    if !quiet() {
        emit(handler, TransportEvent::Disconnected);
    }
}

fn receive(link: &Link, fd: std::os::fd::RawFd, buffer_size: usize, handler: &SharedHandler) {
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        if link.aborted.load(Ordering::Acquire) {
            return;
        }

        let buffered = lock(&link.session).as_ref().map_or(0, |s| s.pending());
        if buffered == 0 {
            match wait_readable(fd, POLL_SLICE) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    emit(handler, TransportEvent::Error(ErrorCode::from(&e)));
                    return;
                }
            }
        }

        let result = match lock(&link.session).as_mut() {
            Some(session) => session.read(&mut buf),
            None => return,
        };

        match result {
            Ok(0) => return,
            Ok(n) => {
                if !link.aborted.load(Ordering::Acquire) {
                    emit(handler, TransportEvent::Data(&buf[..n]));
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                // A locally requested close shows up as a read failure on some platforms
                if !link.closing.load(Ordering::Acquire) && !link.aborted.load(Ordering::Acquire) {
                    emit(handler, TransportEvent::Error(ErrorCode::from(&e)));
                }
                return;
            }
        }
    }
}
