//! Asynchronous HTTP client
//!
//! [`AsyncHttpClient`] never does network work on the caller's thread. API
//! calls push commands onto a bounded queue, the transport pushes its events
//! onto another, and a dedicated processing task drains both every
//! `poll_period`. Responses, closed connections and errors are reported
//! through the registered callbacks, from the processing task.
//!
//! While a request runs, from connect until its response completed or the
//! connection ended, the client holds a [`RequestPermit`] of its
//! [`GlobalRequestMutex`].

use super::connection::{ConnectionController, ConnectionState, SharedState};
use super::mutex::{GlobalRequestMutex, RequestPermit};
use super::parser::{ParseEvent, ResponseParser};
use super::queue::Queue;
use super::{
    Error, FormParams, Headers, HttpRequest, HttpResponse, Method, RequestTarget, Result, Version,
    DEFAULT_USER_AGENT, MAX_HEADERS,
};
use crate::net::{self, ErrorCode, EventHandler, Transport, TransportEvent};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called with every complete response
pub type ResponseCallback = Arc<dyn Fn(&HttpResponse) + Send + Sync>;

/// Called when the connection is gone
pub type ClosedCallback = Arc<dyn Fn() + Send + Sync>;

/// Called when a request failed
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Value of the `User-Agent` header
    pub user_agent: String,
    /// Period of the processing task
    pub poll_period: Duration,
    /// Capacity of the command queue
    pub command_queue_capacity: usize,
    /// Capacity of the event queue
    pub event_queue_capacity: usize,
    /// How long an enqueue may wait on a full queue, `None` waits forever
    pub enqueue_timeout: Option<Duration>,
    /// How long to wait for the global request mutex
    pub global_mutex_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_period: Duration::from_millis(20),
            command_queue_capacity: 10,
            event_queue_capacity: 10,
            enqueue_timeout: Some(Duration::from_secs(1)),
            global_mutex_wait: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Create a configuration builder starting from the defaults
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the `User-Agent` value
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the processing task period
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Set the command queue capacity
    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.command_queue_capacity = capacity;
        self
    }

    /// Set the event queue capacity
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.event_queue_capacity = capacity;
        self
    }

    /// Set the enqueue timeout, `None` waits forever
    pub fn enqueue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.enqueue_timeout = timeout;
        self
    }

    /// Set the wait for the global request mutex
    pub fn global_mutex_wait(mut self, wait: Duration) -> Self {
        self.config.global_mutex_wait = wait;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[derive(Debug)]
enum Command {
    Get,
    Post(Bytes),
}

impl Command {
    fn method(&self) -> Method {
        match self {
            Command::Get => Method::Get,
            Command::Post(_) => Method::Post,
        }
    }
}

/// Owned copy of a [`TransportEvent`]
#[derive(Debug)]
enum Event {
    Connected,
    Disconnected,
    Error(ErrorCode),
    Data(Bytes),
    Timeout(Duration),
}

impl Event {
    fn from_transport(event: TransportEvent<'_>) -> Self {
        match event {
            TransportEvent::Connected => Event::Connected,
            TransportEvent::Disconnected => Event::Disconnected,
            TransportEvent::Error(code) => Event::Error(code),
            TransportEvent::Data(data) => Event::Data(copy_inbound(data)),
            TransportEvent::Timeout(timeout) => Event::Timeout(timeout),
        }
    }
}

/// Copy received bytes out of the transport's buffer
///
/// If memory runs out the data is lost and an empty buffer is returned.
fn copy_inbound(data: &[u8]) -> Bytes {
    let mut buf = Vec::new();

    if buf.try_reserve_exact(data.len()).is_err() {
        error!("Out of memory, {} byte of received data dropped.", data.len());
        return Bytes::new();
    }

    buf.extend_from_slice(data);
    Bytes::from(buf)
}

fn event_handler(events: Arc<Queue<Event>>, timeout: Option<Duration>) -> EventHandler {
    Arc::new(move |event: TransportEvent<'_>| {
        if let Err(event) = events.send(Event::from_transport(event), timeout) {
            error!("Event queue full, {:?} dropped.", event);
        }
    })
}

enum Notification {
    Response(HttpResponse),
    Closed,
    Error(Error),
}

#[derive(Default)]
struct Callbacks {
    response: Option<ResponseCallback>,
    closed: Option<ClosedCallback>,
    error: Option<ErrorCallback>,
}

/// State owned by the processing task
struct Core {
    target: Option<RequestTarget>,
    headers: Headers,
    params: FormParams,
    keep_alive: bool,
    version: Version,
    pending: Option<Command>,
    parser: ResponseParser,
    controller: ConnectionController,
    permit: Option<RequestPermit>,
}

impl Core {
    fn send(&mut self, target: &RequestTarget, command: Command, user_agent: &str) -> Result<()> {
        let mut builder = HttpRequest::builder(command.method(), target.clone())
            .version(self.version)
            .keep_alive(self.keep_alive)
            .user_agent(user_agent)
            .headers(&self.headers)
            .params(self.params.clone());

        if let Command::Post(payload) = command {
            builder = builder.payload(payload);
        }

        let request = builder.build();
        debug!("Sending {} {}.", request.method(), target);

        self.controller.send(&request.to_wire())
    }

    /// Forget the request in flight and give the global mutex back
    fn reset_request(&mut self) {
        self.pending = None;
        self.parser.reset();
        self.permit = None;
    }

    fn fail_request(&mut self, err: Error, notes: &mut Vec<Notification>) {
        error!("Request failed: {}", err);
        notes.push(Notification::Error(err));
        self.reset_request();
        self.controller.disconnect();
    }
}

struct Shared {
    core: Mutex<Core>,
    state: SharedState,
    commands: Queue<Command>,
    events: Arc<Queue<Event>>,
    callbacks: Mutex<Callbacks>,
    config: ClientConfig,
    request_mutex: GlobalRequestMutex,
    generation: AtomicU64,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    /// One processing cycle: a single command, then every queued event
    fn process(&self) {
        let mut notes = Vec::new();

        {
            let mut core = self.lock_core();

            if let Some(command) = self.commands.try_recv() {
                self.handle_command(&mut core, command, &mut notes);
            }

            while let Some(event) = self.events.try_recv() {
                self.handle_event(&mut core, event, &mut notes);
            }
        }

        self.notify(notes);
    }

    fn handle_command(&self, core: &mut Core, command: Command, notes: &mut Vec<Notification>) {
        let method = command.method();

        let Some(target) = core.target.clone() else {
            warn!("{} without request target dropped.", method);
            notes.push(Notification::Error(Error::NotStarted));
            return;
        };

        let state = core.controller.state();

        if state.is_request_open() {
            warn!("{} dropped, a request is already open.", method);
            notes.push(Notification::Error(Error::RequestOpen));
            return;
        }

        if state == ConnectionState::Closing {
            warn!("{} dropped, connection is closing.", method);
            notes.push(Notification::Error(Error::ConnectionClosed));
            return;
        }

        if core.permit.is_none() {
            match self.request_mutex.try_acquire(self.config.global_mutex_wait) {
                Some(permit) => core.permit = Some(permit),
                None => {
                    warn!("{} dropped, global request mutex busy.", method);
                    notes.push(Notification::Error(Error::Busy));
                    return;
                }
            }
        }

        if state == ConnectionState::Connected {
            if let Err(err) = core.send(&target, command, &self.config.user_agent) {
                core.fail_request(err, notes);
            }
        } else {
            core.pending = Some(command);

            if let Err(err) = core.controller.connect(&target) {
                error!("Connect to {} failed: {}", target, err);
                core.reset_request();
                notes.push(Notification::Error(err));
            }
        }
    }

    fn handle_event(&self, core: &mut Core, event: Event, notes: &mut Vec<Notification>) {
        match event {
            Event::Connected => {
                if !core.controller.handle_connected() {
                    return;
                }

                if let (Some(command), Some(target)) = (core.pending.take(), core.target.clone()) {
                    if let Err(err) = core.send(&target, command, &self.config.user_agent) {
                        core.fail_request(err, notes);
                    }
                }
            }

            Event::Disconnected => {
                core.controller.handle_disconnected();
                core.reset_request();
                notes.push(Notification::Closed);
            }

            Event::Error(code) => {
                warn!("Error occurred: {}", code);
                notes.push(Notification::Error(Error::Transport(code)));
                core.target = None;
                core.reset_request();
                core.controller.disconnect();
            }

            Event::Data(data) => self.handle_data(core, &data, notes),

            Event::Timeout(timeout) => {
                warn!("Connection timeout after {:?}.", timeout);
                core.controller.disconnect();
            }
        }
    }

    fn handle_data(&self, core: &mut Core, data: &[u8], notes: &mut Vec<Notification>) {
        let mut events = Vec::new();
        let result = core.parser.parse(data, &mut events);

        for event in events {
            match event {
                ParseEvent::ConnectionClose => {
                    if core.keep_alive {
                        warn!("Connection can not be kept-alive.");
                        core.keep_alive = false;
                    }
                }
                ParseEvent::Response(response) => {
                    core.controller.finish_request();
                    core.permit = None;
                    notes.push(Notification::Response(response));
                }
            }
        }

        if let Err(err) = result {
            core.fail_request(err, notes);
        }
    }

    fn notify(&self, notes: Vec<Notification>) {
        if notes.is_empty() {
            return;
        }

        let (on_response, on_closed, on_error) = {
            let callbacks = lock(&self.callbacks);
            (
                callbacks.response.clone(),
                callbacks.closed.clone(),
                callbacks.error.clone(),
            )
        };

        for note in notes {
            match note {
                Notification::Response(response) => {
                    if let Some(ref callback) = on_response {
                        callback(&response);
                    }
                }
                Notification::Closed => {
                    if let Some(ref callback) = on_closed {
                        callback();
                    }
                }
                Notification::Error(err) => {
                    if let Some(ref callback) = on_error {
                        callback(&err);
                    }
                }
            }
        }
    }
}

fn run(shared: Arc<Shared>, generation: u64) {
    debug!("Processing task started.");

    while shared.generation.load(Ordering::Acquire) == generation {
        shared.process();
        thread::sleep(shared.config.poll_period);
    }

    debug!("Processing task stopped.");
}

/// Asynchronous HTTP/1.x client
///
/// # Examples
///
/// ```no_run
/// use asynchttp::http::{AsyncHttpClient, ClientConfig};
/// use asynchttp::net::TcpTransport;
///
/// let config = ClientConfig::builder().user_agent("sensor/1.0").build();
/// let client = AsyncHttpClient::with_config(TcpTransport::new(), config);
///
/// client.on_error(|err| eprintln!("request failed: {}", err));
/// client.begin("http://example.com/api/values").unwrap();
/// client.add_param("temperature", "21.5");
/// client.post("").unwrap();
/// ```
pub struct AsyncHttpClient {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncHttpClient {
    /// Create a client with default configuration on the process-wide mutex
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Create a client with custom configuration on the process-wide mutex
    pub fn with_config(transport: impl Transport + 'static, config: ClientConfig) -> Self {
        Self::with_global_mutex(transport, config, GlobalRequestMutex::global())
    }

    /// Create a client that serializes its requests on `request_mutex`
    pub fn with_global_mutex(
        transport: impl Transport + 'static,
        config: ClientConfig,
        request_mutex: GlobalRequestMutex,
    ) -> Self {
        let events = Arc::new(Queue::new(config.event_queue_capacity));
        let mut controller = ConnectionController::new(transport);
        controller.set_event_handler(Some(event_handler(
            Arc::clone(&events),
            config.enqueue_timeout,
        )));

        let shared = Shared {
            state: controller.shared_state(),
            core: Mutex::new(Core {
                target: None,
                headers: Headers::new(),
                params: FormParams::new(),
                keep_alive: false,
                version: Version::default(),
                pending: None,
                parser: ResponseParser::new(),
                controller,
                permit: None,
            }),
            commands: Queue::new(config.command_queue_capacity),
            events,
            callbacks: Mutex::new(Callbacks::default()),
            config,
            request_mutex,
            generation: AtomicU64::new(0),
        };

        AsyncHttpClient {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Set the request target for following requests
    ///
    /// Starts the processing task if necessary. Fails while a request is
    /// open. A failed parse leaves the client without target.
    pub fn begin(&self, url: &str) -> Result<()> {
        self.start_worker()?;

        let mut core = self.shared.lock_core();

        if core.controller.is_request_open() {
            return Err(Error::RequestOpen);
        }

        let previous = core.target.take();
        core.parser.reset();

        let target = RequestTarget::parse(url).map_err(|err| {
            error!("Invalid URL \"{}\": {}", url, err);
            err
        })?;

        debug!(
            "Host: {}, port: {}, secure: {}, URI: {}",
            target.hostname(),
            target.port(),
            target.is_secure(),
            target.uri()
        );

        if core.controller.is_connected() {
            let same_peer = previous.as_ref().is_some_and(|current| {
                current.hostname() == target.hostname()
                    && current.port() == target.port()
                    && current.is_secure() == target.is_secure()
            });

            if !same_peer {
                core.controller.abort();

                // Whatever the old connection queued must not hit the new one
                let dropped = self.shared.events.clear();
                if dropped > 0 {
                    debug!("{} events of the aborted connection dropped.", dropped);
                }
            }
        }

        core.target = Some(target);
        Ok(())
    }

    /// Stop processing and forget everything
    ///
    /// Aborts the connection, drops queued commands and events without
    /// notification, clears target, headers and parameters and releases the
    /// global mutex. May be called from a callback.
    pub fn end(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(handle) = lock(&self.worker).take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Processing task panicked.");
            }
        }

        {
            let mut core = self.shared.lock_core();
            core.controller.abort();
            core.reset_request();
            core.target = None;
            core.headers.clear();
            core.params.clear();
        }

        self.clear_queues();
    }

    /// Is the client connected to the server?
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).is_connected()
    }

    /// Select HTTP/1.0 or HTTP/1.1 (default)
    pub fn set_http_version(&self, version: Version) {
        self.shared.lock_core().version = version;
    }

    /// Ask the server to keep the connection open
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.shared.lock_core().keep_alive = keep_alive;
    }

    /// Add a header to every following request
    ///
    /// Headers the client sets itself (`Host`, `User-Agent`, `Connection`,
    /// `Accept-Encoding`, `Authorization`, `Content-Length`) are ignored.
    /// Fails with [`Error::HeaderLimit`] once [`MAX_HEADERS`] headers were added.
    pub fn add_header(&self, name: &str, value: &str) -> Result<()> {
        let mut core = self.shared.lock_core();

        if core.headers.is_full() {
            warn!("Header \"{}\" refused, {} headers already added.", name, MAX_HEADERS);
            return Err(Error::HeaderLimit(MAX_HEADERS));
        }

        core.headers.insert_request_header(name, value);
        Ok(())
    }

    /// Remove all added headers
    pub fn clear_headers(&self) {
        self.shared.lock_core().headers.clear();
    }

    /// Add a URL encoded form parameter, sent as body of a POST without payload
    pub fn add_param(&self, name: &str, value: &str) {
        self.shared.lock_core().params.add(name, value);
    }

    /// Remove all form parameters
    pub fn clear_params(&self) {
        self.shared.lock_core().params.clear();
    }

    /// Register the response callback
    pub fn on_response<F>(&self, callback: F)
    where
        F: Fn(&HttpResponse) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).response = Some(Arc::new(callback));
    }

    /// Register the connection closed callback
    ///
    /// Called whenever the connection goes away. The request in flight, if
    /// any, is forgotten and the global mutex released; the request target,
    /// added headers and form parameters are kept so the next `get()` or
    /// `post()` reconnects to the same peer. Use [`end`](Self::end) to drop
    /// them too.
    pub fn on_closed<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).closed = Some(Arc::new(callback));
    }

    /// Register the error callback
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).error = Some(Arc::new(callback));
    }

    /// Queue a GET request
    pub fn get(&self) -> Result<()> {
        self.request(Command::Get)
    }

    /// Queue a POST request
    ///
    /// A non-empty payload is sent as is and form parameters are skipped.
    /// With an empty payload the form parameters become the body.
    pub fn post(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.request(Command::Post(payload.into()))
    }

    fn request(&self, command: Command) -> Result<()> {
        if self.shared.lock_core().target.is_none() {
            return Err(Error::NotStarted);
        }

        if lock(&self.shared.state).is_request_open() {
            return Err(Error::RequestOpen);
        }

        self.shared
            .commands
            .send(command, self.shared.config.enqueue_timeout)
            .map_err(|command| {
                warn!("Command queue full, {} dropped.", command.method());
                Error::QueueFull
            })
    }

    fn start_worker(&self) -> Result<()> {
        let mut worker = lock(&self.worker);

        if worker.is_some() {
            return Ok(());
        }

        self.clear_queues();

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name("asynchttp-client".to_string())
            .spawn(move || run(shared, generation))
            .map_err(net::Error::Io)?;

        *worker = Some(handle);
        Ok(())
    }

    fn clear_queues(&self) {
        let dropped = self.shared.commands.clear() + self.shared.events.clear();
        if dropped > 0 {
            info!("{} queued commands and events dropped.", dropped);
        }
    }
}

impl fmt::Debug for AsyncHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHttpClient")
            .field("state", &*lock(&self.shared.state))
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Drop for AsyncHttpClient {
    fn drop(&mut self) {
        self.shared.lock_core().controller.set_event_handler(None);
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleTransport;

    impl Transport for IdleTransport {
        fn connect(&mut self, _host: &str, _port: u16, _secure: bool) -> net::Result<()> {
            Ok(())
        }

        fn write(&mut self, _buf: &[u8]) -> net::Result<usize> {
            Err(net::Error::NotConnected)
        }

        fn close(&mut self) {}

        fn abort(&mut self) {}

        fn connected(&self) -> bool {
            false
        }

        fn set_event_handler(&mut self, _handler: Option<EventHandler>) {}
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.user_agent, "AsyncHttpClient");
        assert_eq!(config.poll_period, Duration::from_millis(20));
        assert_eq!(config.command_queue_capacity, 10);
        assert_eq!(config.event_queue_capacity, 10);
        assert_eq!(config.enqueue_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.global_mutex_wait, Duration::from_millis(100));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder()
            .user_agent("test")
            .poll_period(Duration::from_millis(1))
            .command_queue_capacity(2)
            .event_queue_capacity(3)
            .enqueue_timeout(None)
            .global_mutex_wait(Duration::ZERO)
            .build();

        assert_eq!(config.user_agent, "test");
        assert_eq!(config.poll_period, Duration::from_millis(1));
        assert_eq!(config.command_queue_capacity, 2);
        assert_eq!(config.event_queue_capacity, 3);
        assert_eq!(config.enqueue_timeout, None);
        assert_eq!(config.global_mutex_wait, Duration::ZERO);
    }

    #[test]
    fn test_copy_inbound() {
        assert_eq!(copy_inbound(b"abc"), Bytes::from_static(b"abc"));
        assert!(copy_inbound(b"").is_empty());
    }

    #[test]
    fn test_request_without_begin() {
        let client = AsyncHttpClient::with_global_mutex(
            IdleTransport,
            ClientConfig::default(),
            GlobalRequestMutex::new(),
        );

        assert!(matches!(client.get(), Err(Error::NotStarted)));
        assert!(matches!(client.post(&b"x"[..]), Err(Error::NotStarted)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_begin_invalid_url_clears_target() {
        let client = AsyncHttpClient::with_global_mutex(
            IdleTransport,
            ClientConfig::default(),
            GlobalRequestMutex::new(),
        );

        client.begin("http://example.com/").unwrap();
        assert!(matches!(client.begin("gopher://example.com/"), Err(Error::InvalidProtocol(_))));
        assert!(matches!(client.get(), Err(Error::NotStarted)));
    }

    #[test]
    fn test_end_clears_target() {
        let client = AsyncHttpClient::with_global_mutex(
            IdleTransport,
            ClientConfig::default(),
            GlobalRequestMutex::new(),
        );

        client.begin("http://example.com/").unwrap();
        client.end();
        assert!(matches!(client.get(), Err(Error::NotStarted)));

        client.begin("http://example.com/").unwrap();
        client.get().unwrap();
    }
}
