//! Request serialization
//!
//! Builds the wire form of a request: request line, the headers the client
//! controls, user headers, blank line and optional body. The header block and
//! the body are kept apart so they go out as two transport writes.

use super::{
    Headers, Method, RequestTarget, Version, ACCEPT_ENCODING, CRLF, DEFAULT_USER_AGENT,
};
use bytes::Bytes;
use std::fmt::Write as _;
use tracing::warn;

/// Encode a string for `application/x-www-form-urlencoded`
///
/// `A-Z a-z 0-9 - _ . ~` pass through, space becomes `+`, every other byte
/// becomes `%XX` in uppercase hex.
pub fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());

    for byte in s.bytes() {
        match byte {
            b' ' => encoded.push('+'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{:02X}", byte);
            }
        }
    }

    encoded
}

/// URL encoded form parameters, `name=value` pairs joined by `&`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormParams {
    encoded: String,
}

impl FormParams {
    /// Create an empty parameter list
    pub fn new() -> Self {
        FormParams::default()
    }

    /// Append a parameter; a parameter without name is ignored, the value may be empty
    pub fn add(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            return;
        }

        if !self.encoded.is_empty() {
            self.encoded.push('&');
        }
        self.encoded.push_str(&url_encode(name));
        self.encoded.push('=');
        self.encoded.push_str(&url_encode(value));
    }

    /// Remove all parameters
    pub fn clear(&mut self) {
        self.encoded.clear();
    }

    /// Check if there are no parameters
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// The encoded form, e.g. `a=1&b=x+y`
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

/// Serialized request, ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    head: Vec<u8>,
    body: Bytes,
}

impl WireRequest {
    /// Request line, headers and the terminating blank line
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Message body, possibly empty
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    target: RequestTarget,
    version: Version,
    keep_alive: bool,
    user_agent: String,
    headers: Headers,
    params: FormParams,
    payload: Bytes,
}

impl HttpRequest {
    /// Create a builder for a request to `target`
    pub fn builder(method: Method, target: RequestTarget) -> HttpRequestBuilder {
        HttpRequestBuilder {
            request: HttpRequest {
                method,
                target,
                version: Version::default(),
                keep_alive: false,
                user_agent: DEFAULT_USER_AGENT.to_string(),
                headers: Headers::new(),
                params: FormParams::new(),
                payload: Bytes::new(),
            },
        }
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the request target
    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// User headers (reserved names already filtered out)
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Convert the request to wire format
    ///
    /// An explicit payload wins over form parameters; when both are set the
    /// parameters are dropped with a warning.
    pub fn to_wire(&self) -> WireRequest {
        let mut head = Vec::with_capacity(256);

        let _ = write!(
            Line(&mut head),
            "{} {} {}{}",
            self.method,
            self.target.uri(),
            self.version,
            CRLF
        );

        push_header(&mut head, "Host", &self.target.host_header());
        push_header(&mut head, "User-Agent", &self.user_agent);
        push_header(
            &mut head,
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );

        if self.version == Version::Http11 {
            push_header(&mut head, "Accept-Encoding", ACCEPT_ENCODING);
        }

        if let Some(auth) = self.target.authorization() {
            push_header(&mut head, "Authorization", &format!("Basic {}", auth));
        }

        let body = if !self.payload.is_empty() {
            push_header(&mut head, "Content-Length", &self.payload.len().to_string());
            if !self.params.is_empty() {
                warn!("Parameters skipped.");
            }
            self.payload.clone()
        } else if !self.params.is_empty() {
            push_header(&mut head, "Content-Type", "application/x-www-form-urlencoded");
            push_header(&mut head, "Content-Length", &self.params.as_str().len().to_string());
            Bytes::copy_from_slice(self.params.as_str().as_bytes())
        } else {
            Bytes::new()
        };

        self.headers.write_wire(&mut head);
        head.extend_from_slice(CRLF.as_bytes());

        WireRequest { head, body }
    }
}

/// Adapter so `write!` can target a byte buffer
struct Line<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for Line<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
}

/// Builder for HTTP requests
#[derive(Debug)]
pub struct HttpRequestBuilder {
    request: HttpRequest,
}

impl HttpRequestBuilder {
    /// Set the HTTP version
    pub fn version(mut self, version: Version) -> Self {
        self.request.version = version;
        self
    }

    /// Ask the server to keep the connection open
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.request.keep_alive = keep_alive;
        self
    }

    /// Set the `User-Agent` value
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.request.user_agent = user_agent.into();
        self
    }

    /// Add a user header; reserved names are silently dropped
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert_request_header(name, value);
        self
    }

    /// Add all user headers; reserved names are silently dropped
    pub fn headers(mut self, headers: &Headers) -> Self {
        for (name, value) in headers.iter() {
            self.request.headers.insert_request_header(name, value);
        }
        self
    }

    /// Set the form parameters
    pub fn params(mut self, params: FormParams) -> Self {
        self.request.params = params;
        self
    }

    /// Set the explicit payload
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.request.payload = payload.into();
        self
    }

    /// Build the request
    pub fn build(self) -> HttpRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> RequestTarget {
        RequestTarget::parse(url).unwrap()
    }

    fn head_str(wire: &WireRequest) -> String {
        String::from_utf8(wire.head().to_vec()).unwrap()
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("abcXYZ019"), "abcXYZ019");
        assert_eq!(url_encode("a b"), "a+b");
        assert_eq!(url_encode("-_.~"), "-_.~");
        assert_eq!(url_encode("a&b=c/d"), "a%26b%3Dc%2Fd");
        assert_eq!(url_encode("ä"), "%C3%A4");
        assert_eq!(url_encode(""), "");
    }

    #[test]
    fn test_form_params() {
        let mut params = FormParams::new();
        params.add("name", "John Doe");
        params.add("", "ignored");
        params.add("empty", "");
        assert_eq!(params.as_str(), "name=John+Doe&empty=");

        params.clear();
        assert!(params.is_empty());
    }

    #[test]
    fn test_get_http11() {
        let wire = HttpRequest::builder(Method::Get, target("http://example.com/path"))
            .user_agent("test-agent")
            .build()
            .to_wire();

        assert_eq!(
            head_str(&wire),
            "GET /path HTTP/1.1\r\n\
             Host: example.com\r\n\
             User-Agent: test-agent\r\n\
             Connection: close\r\n\
             Accept-Encoding: identity;q=1,chunked;q=0.1,*;q=0\r\n\
             \r\n"
        );
        assert!(wire.body().is_empty());
    }

    #[test]
    fn test_get_http10_keep_alive_port_auth() {
        let wire = HttpRequest::builder(Method::Get, target("http://u:p@example.com:8080"))
            .version(Version::Http10)
            .keep_alive(true)
            .build()
            .to_wire();

        assert_eq!(
            head_str(&wire),
            "GET / HTTP/1.0\r\n\
             Host: example.com:8080\r\n\
             User-Agent: AsyncHttpClient\r\n\
             Connection: keep-alive\r\n\
             Authorization: Basic dTpw\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_user_headers_after_standard_headers() {
        let wire = HttpRequest::builder(Method::Get, target("https://example.com/"))
            .header("X-Token", "abc")
            .header("content-length", "999")
            .header("HOST", "other")
            .build()
            .to_wire();

        let head = head_str(&wire);
        assert!(head.ends_with("X-Token: abc\r\n\r\n"));
        assert!(!head.contains("999"));
        assert!(!head.contains("other"));
        assert_eq!(head.matches("Host:").count(), 1);
    }

    #[test]
    fn test_post_payload() {
        let wire = HttpRequest::builder(Method::Post, target("http://example.com/api"))
            .header("Content-Type", "application/json")
            .payload(&b"{\"a\":1}"[..])
            .build()
            .to_wire();

        let head = head_str(&wire);
        assert!(head.starts_with("POST /api HTTP/1.1\r\n"));
        assert!(head.contains("Content-Length: 7\r\n"));
        assert!(head.ends_with("Content-Type: application/json\r\n\r\n"));
        assert_eq!(wire.body(), b"{\"a\":1}");
    }

    #[test]
    fn test_post_form_params() {
        let mut params = FormParams::new();
        params.add("q", "a b");
        params.add("lang", "en");

        let wire = HttpRequest::builder(Method::Post, target("http://example.com/form"))
            .params(params)
            .build()
            .to_wire();

        let head = head_str(&wire);
        assert!(head.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        assert!(head.contains("Content-Length: 13\r\n"));
        assert_eq!(wire.body(), b"q=a+b&lang=en");
    }

    #[test]
    fn test_payload_wins_over_params() {
        let mut params = FormParams::new();
        params.add("secret", "param");

        let wire = HttpRequest::builder(Method::Post, target("http://example.com/"))
            .params(params)
            .payload(&b"body"[..])
            .build()
            .to_wire();

        let all = String::from_utf8([wire.head(), wire.body()].concat()).unwrap();
        assert!(all.contains("Content-Length: 4\r\n"));
        assert!(!all.contains("secret"));
        assert!(!all.contains("x-www-form-urlencoded"));
        assert!(all.ends_with("\r\n\r\nbody"));
    }
}
