//! asynchttp - event-driven HTTP/1.x client
//!
//! A non-blocking HTTP/1.0 and HTTP/1.1 client built on an asynchronous
//! transport. Responses are parsed incrementally as bytes arrive, requests
//! are issued through a command queue and all client instances in a process
//! share a single request mutex.

pub mod http;
pub mod net;
