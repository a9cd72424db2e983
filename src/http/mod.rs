//! Asynchronous HTTP/1.x client
//!
//! Requests are serialized and written through a [`Transport`](crate::net::Transport);
//! responses are parsed incrementally as the transport delivers bytes, in
//! whatever fragments the network produced.
//!
//! # Architecture
//!
//! - [`RequestTarget`] is the parsed URL (`begin`)
//! - [`HttpRequest`] serializes request line, standard headers, user headers and body
//! - [`ResponseParser`] turns inbound byte slices into [`HttpResponse`]s, delegating
//!   chunked bodies to [`ChunkedBodyParser`]
//! - [`ConnectionController`] owns the transport and the connection state
//! - [`AsyncHttpClient`] runs commands and transport events on a dedicated worker
//!   thread and serializes requests process-wide through a [`GlobalRequestMutex`]
//!
//! # Examples
//!
//! ```no_run
//! use asynchttp::http::AsyncHttpClient;
//! use asynchttp::net::TcpTransport;
//!
//! let client = AsyncHttpClient::new(TcpTransport::new());
//! client.on_response(|rsp| {
//!     println!("{} {}", rsp.status().code(), String::from_utf8_lossy(rsp.body()));
//! });
//!
//! client.begin("http://example.com/index.html").unwrap();
//! client.get().unwrap();
//! ```

pub mod chunked;
pub mod client;
pub mod connection;
pub mod headers;
pub mod line;
pub mod message;
pub mod mutex;
pub mod parser;
pub mod queue;
pub mod request;
pub mod url;

pub use chunked::{encode_chunked_body, ChunkState, ChunkedBodyParser};
pub use client::{
    AsyncHttpClient, ClientConfig, ClientConfigBuilder, ClosedCallback, ErrorCallback,
    ResponseCallback,
};
pub use connection::{ConnectionController, ConnectionState};
pub use headers::Headers;
pub use message::{HttpResponse, HttpResponseBuilder, Method, Status, Version};
pub use mutex::{GlobalRequestMutex, RequestPermit};
pub use parser::{ParseEvent, ResponsePart, ResponseParser, TransferCoding};
pub use request::{url_encode, FormParams, HttpRequest, HttpRequestBuilder, WireRequest};
pub use url::RequestTarget;

use crate::net::ErrorCode;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Net(#[from] crate::net::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Unsupported transfer coding: {0}")]
    UnsupportedTransferCoding(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("More than {0} headers")]
    HeaderLimit(usize),

    #[error("A request is already open")]
    RequestOpen,

    #[error("Another request holds the global request mutex")]
    Busy,

    #[error("No request target, call begin() first")]
    NotStarted,

    #[error("Queue full")]
    QueueFull,

    #[error("Incomplete write: {written} of {expected} bytes")]
    IncompleteWrite { expected: usize, written: usize },

    #[error("Transport error: {0}")]
    Transport(ErrorCode),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// Maximum length of a status, header or chunk-size line, terminator included
pub const MAX_LINE_LENGTH: usize = 8192;

/// Default HTTP port
pub const HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const HTTPS_PORT: u16 = 443;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Transfer codings this client accepts, it performs no decompression
pub const ACCEPT_ENCODING: &str = "identity;q=1,chunked;q=0.1,*;q=0";

/// Default `User-Agent` value
pub const DEFAULT_USER_AGENT: &str = "AsyncHttpClient";
