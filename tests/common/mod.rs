//! Shared helpers for the integration tests

#![allow(dead_code)]

use asynchttp::http::{AsyncHttpClient, HttpResponse};
use asynchttp::net::{self, ErrorCode, EventHandler, Transport, TransportEvent};
use std::io::{BufRead, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Route `tracing` output to the test harness, once per test binary
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }

    cond()
}

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Proptest configuration with `cases` cases and no persisted failures
pub fn proptest_config(cases: u32) -> proptest::test_runner::Config {
    proptest::test_runner::Config {
        cases,
        failure_persistence: None,
        ..proptest::test_runner::Config::default()
    }
}

/// Read one request from a test server's connection: header block plus a
/// `Content-Length` body
pub fn read_request(reader: &mut impl BufRead) -> Option<String> {
    let mut request = String::new();
    let mut content_length = 0;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }

        if let Some(value) = line
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(|v| v.trim().to_string())
        {
            content_length = value.parse().ok()?;
        }

        let end = line == "\r\n";
        request.push_str(&line);
        if end {
            break;
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    request.push_str(&String::from_utf8_lossy(&body));

    Some(request)
}

#[derive(Default)]
struct MockState {
    handler: Mutex<Option<EventHandler>>,
    auto_connect: bool,
    connected: AtomicBool,
    connects: Mutex<Vec<(String, u16, bool)>>,
    writes: Mutex<Vec<Vec<u8>>>,
    closes: AtomicUsize,
    aborts: AtomicUsize,
}

impl MockState {
    fn emit(&self, event: TransportEvent<'_>) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

/// Scripted transport; the test plays the server through a [`MockHandle`]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Connects as soon as asked to
    pub fn new() -> (Self, MockHandle) {
        Self::build(true)
    }

    /// Connect only completes when the test calls [`MockHandle::accept`]
    pub fn manual() -> (Self, MockHandle) {
        Self::build(false)
    }

    fn build(auto_connect: bool) -> (Self, MockHandle) {
        let state = Arc::new(MockState {
            auto_connect,
            ..MockState::default()
        });
        (
            MockTransport {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, host: &str, port: u16, secure: bool) -> net::Result<()> {
        self.state
            .connects
            .lock()
            .unwrap()
            .push((host.to_string(), port, secure));

        if self.state.auto_connect {
            self.state.connected.store(true, Ordering::SeqCst);
            self.state.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> net::Result<usize> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(net::Error::NotConnected);
        }
        self.state.writes.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.connected.swap(false, Ordering::SeqCst) {
            self.state.emit(TransportEvent::Disconnected);
        }
    }

    fn abort(&mut self) {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
    }

    fn connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn set_event_handler(&mut self, handler: Option<EventHandler>) {
        *self.state.handler.lock().unwrap() = handler;
    }
}

/// Server side of a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    /// Complete a pending connect
    pub fn accept(&self) {
        self.state.connected.store(true, Ordering::SeqCst);
        self.state.emit(TransportEvent::Connected);
    }

    /// Fail a pending connect the way a real transport does
    pub fn refuse(&self, code: ErrorCode) {
        self.state.emit(TransportEvent::Error(code));
        self.state.emit(TransportEvent::Disconnected);
    }

    /// Deliver response bytes
    pub fn feed(&self, data: &[u8]) {
        self.state.emit(TransportEvent::Data(data));
    }

    /// Peer closes the connection
    pub fn hang_up(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.emit(TransportEvent::Disconnected);
    }

    /// Raise an ACK timeout
    pub fn time_out(&self) {
        self.state.emit(TransportEvent::Timeout(Duration::from_secs(10)));
    }

    pub fn connects(&self) -> Vec<(String, u16, bool)> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().unwrap().clone()
    }

    /// Everything written so far as text
    pub fn written(&self) -> String {
        String::from_utf8(self.writes().concat()).unwrap()
    }

    /// Number of complete requests (header blocks) written
    pub fn requests(&self) -> usize {
        self.written().matches("\r\n\r\n").count()
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

/// What a client reported through its callbacks
#[derive(Debug)]
pub enum Outcome {
    Response(HttpResponse),
    Closed,
    Error(String),
}

/// Collects callback invocations of a client
#[derive(Clone, Default)]
pub struct Recorder {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl Recorder {
    pub fn attach(client: &AsyncHttpClient) -> Self {
        let recorder = Recorder::default();

        let outcomes = recorder.outcomes.clone();
        client.on_response(move |rsp| outcomes.lock().unwrap().push(Outcome::Response(rsp.clone())));

        let outcomes = recorder.outcomes.clone();
        client.on_closed(move || outcomes.lock().unwrap().push(Outcome::Closed));

        let outcomes = recorder.outcomes.clone();
        client.on_error(move |err| {
            outcomes
                .lock()
                .unwrap()
                .push(Outcome::Error(format!("{:?}", err)))
        });

        recorder
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    pub fn responses(&self) -> Vec<HttpResponse> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                Outcome::Response(rsp) => Some(rsp.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| matches!(o, Outcome::Closed))
            .count()
    }

    /// Error callbacks, `Debug` formatted
    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                Outcome::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Take all recorded outcomes
    pub fn take(&self) -> Vec<Outcome> {
        std::mem::take(&mut *self.outcomes.lock().unwrap())
    }
}
