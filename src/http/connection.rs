//! Connection lifecycle
//!
//! [`ConnectionController`] owns the transport and tracks where the
//! connection stands in a single [`ConnectionState`]:
//!
//! ```text
//!            connect()             Connected event
//!   Idle ──────────────► Connecting ───────────────► Connected
//!    ▲                                                 │   ▲
//!    │ Disconnected event                       send() │   │ finish_request()
//!    │                                                 ▼   │
//!    └──────────── Closing ◄──── disconnect() ──── AwaitingResponse
//! ```
//!
//! `Disconnected` returns to `Idle` from every state. The state is shared
//! behind a mutex so it can be queried without going through the worker.

use super::{Error, RequestTarget, Result, WireRequest};
use crate::net::{EventHandler, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Connection and request state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Idle,
    /// Connect dispatched, a request waits for the connection
    Connecting,
    /// Connected, no request in flight
    Connected,
    /// Request sent, response not complete yet
    AwaitingResponse,
    /// Close initiated, waiting for the transport to confirm
    Closing,
}

impl ConnectionState {
    /// Is the transport connected?
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::AwaitingResponse | ConnectionState::Closing
        )
    }

    /// Is a request waiting to be sent or waiting for its response?
    pub fn is_request_open(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::AwaitingResponse)
    }
}

/// Shared handle to a [`ConnectionState`]
pub type SharedState = Arc<Mutex<ConnectionState>>;

/// Owner of the transport
pub struct ConnectionController {
    transport: Box<dyn Transport>,
    state: SharedState,
    peer: String,
}

impl ConnectionController {
    /// Create a controller for `transport`
    pub fn new(transport: impl Transport + 'static) -> Self {
        ConnectionController {
            transport: Box::new(transport),
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            peer: String::new(),
        }
    }

    /// Handle to the state, readable from any thread
    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// Is the transport connected?
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Is a request pending or in flight?
    pub fn is_request_open(&self) -> bool {
        self.state().is_request_open()
    }

    /// Route transport events to `handler`
    pub fn set_event_handler(&mut self, handler: Option<EventHandler>) {
        self.transport.set_event_handler(handler);
    }

    /// Dispatch a connect to `target` on behalf of a request
    ///
    /// Success only means the attempt was accepted; the outcome arrives as a
    /// transport event.
    pub fn connect(&mut self, target: &RequestTarget) -> Result<()> {
        match self.state() {
            ConnectionState::Idle => {}
            ConnectionState::Connecting | ConnectionState::AwaitingResponse => {
                return Err(Error::RequestOpen)
            }
            ConnectionState::Connected | ConnectionState::Closing => {
                return Err(Error::Net(crate::net::Error::AlreadyConnected))
            }
        }

        self.peer = target.to_string();
        info!("Connecting to {}.", self.peer);

        self.set_state(ConnectionState::Connecting);

        if let Err(err) = self
            .transport
            .connect(target.hostname(), target.port(), target.is_secure())
        {
            self.set_state(ConnectionState::Idle);
            return Err(err.into());
        }

        Ok(())
    }

    /// Write a request as two transport writes, header block then body
    ///
    /// Fails unless both writes were taken completely. The caller is expected
    /// to close the connection on failure.
    pub fn send(&mut self, request: &WireRequest) -> Result<()> {
        if !self.transport.connected() {
            return Err(Error::Net(crate::net::Error::NotConnected));
        }

        self.set_state(ConnectionState::AwaitingResponse);

        if let Err(err) = self.write_request(request) {
            self.set_state(ConnectionState::Connected);
            return Err(err);
        }

        debug!("Request sent to {}.", self.peer);
        Ok(())
    }

    fn write_request(&mut self, request: &WireRequest) -> Result<()> {
        for part in [request.head(), request.body()] {
            if part.is_empty() {
                continue;
            }

            let written = self.transport.write(part)?;
            if written != part.len() {
                return Err(Error::IncompleteWrite {
                    expected: part.len(),
                    written,
                });
            }
        }

        Ok(())
    }

    /// The transport reports an established connection
    ///
    /// Returns whether a request is waiting to be sent.
    pub fn handle_connected(&mut self) -> bool {
        info!("Connected to {}.", self.peer);

        let mut state = self.lock_state();
        let pending = *state == ConnectionState::Connecting;
        *state = ConnectionState::Connected;

        pending
    }

    /// The transport reports the connection is gone
    pub fn handle_disconnected(&mut self) {
        info!("Disconnected from {}.", self.peer);
        self.set_state(ConnectionState::Idle);
    }

    /// The response to the request in flight is complete
    pub fn finish_request(&mut self) {
        let mut state = self.lock_state();
        if *state == ConnectionState::AwaitingResponse {
            *state = ConnectionState::Connected;
        }
    }

    /// Close the connection gracefully if there is one
    ///
    /// Without a connection, a pending connect is abandoned and the state
    /// returns to idle.
    pub fn disconnect(&mut self) {
        if self.transport.connected() {
            info!("Disconnecting from {}.", self.peer);
            self.set_state(ConnectionState::Closing);
            self.transport.close();
        } else {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Tear the connection down without further events
    pub fn abort(&mut self) {
        if self.transport.connected() {
            info!("Aborting connection to {}.", self.peer);
        }
        self.transport.abort();
        self.set_state(ConnectionState::Idle);
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.lock_state() = state;
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state())
            .field("peer", &self.peer)
            .finish()
    }
}
