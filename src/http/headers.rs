//! Header lists
//!
//! [`Headers`] keeps name/value pairs in arrival order. Names compare
//! case-insensitively and a name may repeat. The list itself is unbounded;
//! whoever fills it from untrusted input checks [`Headers::is_full`] and
//! refuses more than [`MAX_HEADERS`] entries.

use super::{Error, Result, CRLF, MAX_HEADERS};
use tracing::debug;

/// Request headers the client emits itself; user supplied ones are dropped.
pub const RESERVED_REQUEST_HEADERS: [&str; 6] = [
    "Host",
    "User-Agent",
    "Connection",
    "Accept-Encoding",
    "Authorization",
    "Content-Length",
];

/// Is `name` one of the [`RESERVED_REQUEST_HEADERS`] (case-insensitive)?
pub fn is_reserved(name: &str) -> bool {
    RESERVED_REQUEST_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Ordered, case-insensitive header list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Append a header; an existing one with the same name is kept
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Append a header unless [`MAX_HEADERS`] entries are already present
    pub fn try_insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        if self.is_full() {
            return Err(Error::HeaderLimit(MAX_HEADERS));
        }

        self.insert(name, value);
        Ok(())
    }

    /// Are [`MAX_HEADERS`] entries present?
    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_HEADERS
    }

    /// Append a request header unless the client sets it itself
    ///
    /// Returns whether the header was kept.
    pub fn insert_request_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();

        if is_reserved(&name) {
            debug!("Header \"{}\" is set by the client, ignored.", name);
            return false;
        }

        self.insert(name, value);
        true
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Every value of `name`, in arrival order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Append `Name: value\r\n` for every entry
    pub fn write_wire(&self, buf: &mut Vec<u8>) {
        for (name, value) in self.iter() {
            buf.reserve(name.len() + value.len() + 4);
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
    }

    /// Split a received header line at its first colon
    ///
    /// Whitespace around name and value is dropped. Lines without a colon or
    /// with an empty name are refused.
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("no colon in \"{}\"", line)))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Parse(format!("empty name in \"{}\"", line)));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}
