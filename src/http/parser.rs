//! HTTP response parsing
//!
//! [`ResponseParser`] is fed whatever the transport delivers. It walks
//! status line, header block and body, and yields a [`ParseEvent::Response`]
//! every time a response is complete. The cursor survives between calls, so
//! a response may be split at any byte.

use super::chunked::ChunkedBodyParser;
use super::line::LineScanner;
use super::{Error, Headers, HttpResponse, Result, Status};
use bytes::BytesMut;
use tracing::{debug, error, warn};

/// Part of the response the parser is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePart {
    StatusLine,
    Header,
    Body,
}

/// Transfer coding of the current body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCoding {
    Identity,
    Chunked,
}

/// Something the parser wants the client to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// The server sent `Connection: close`
    ConnectionClose,
    /// A complete response
    Response(HttpResponse),
}

/// Incremental HTTP/1.x response parser
#[derive(Debug)]
pub struct ResponseParser {
    part: ResponsePart,
    coding: TransferCoding,
    line: LineScanner,
    chunked: ChunkedBodyParser,
    version: String,
    status: Status,
    reason: String,
    headers: Headers,
    content_length: Option<usize>,
    content_index: usize,
    payload: BytesMut,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            part: ResponsePart::StatusLine,
            coding: TransferCoding::Identity,
            line: LineScanner::new(),
            chunked: ChunkedBodyParser::new(),
            version: String::new(),
            status: Status::default(),
            reason: String::new(),
            headers: Headers::new(),
            content_length: None,
            content_index: 0,
            payload: BytesMut::new(),
        }
    }

    /// Part of the response expected next
    pub fn part(&self) -> ResponsePart {
        self.part
    }

    /// Transfer coding of the body being parsed
    pub fn transfer_coding(&self) -> TransferCoding {
        self.coding
    }

    /// Feed received bytes
    ///
    /// Events are appended to `events` in the order they occur. Events found
    /// before an error are kept. On error the parser is reset; the byte
    /// stream can not be resynchronized, so the connection should be closed.
    pub fn parse(&mut self, data: &[u8], events: &mut Vec<ParseEvent>) -> Result<()> {
        let result = self.parse_data(data, events);

        if let Err(err) = &result {
            error!("Response parsing failed: {}", err);
            self.reset();
        }

        result
    }

    fn parse_data(&mut self, data: &[u8], events: &mut Vec<ParseEvent>) -> Result<()> {
        let mut index = 0;

        while index < data.len() {
            match self.part {
                ResponsePart::StatusLine => {
                    if let Some(line) = self.line.next_line(data, &mut index)? {
                        self.parse_status_line(&line);
                        self.part = ResponsePart::Header;
                    }
                }

                ResponsePart::Header => {
                    if let Some(line) = self.line.next_line(data, &mut index)? {
                        if line.is_empty() {
                            self.end_of_headers(data.len() - index, events)?;
                        } else {
                            self.parse_header(&line)?;
                        }
                    }
                }

                ResponsePart::Body => match self.coding {
                    TransferCoding::Chunked => {
                        if self.chunked.parse(data, &mut index, &mut self.payload)? {
                            self.deliver(events);
                        }
                    }
                    TransferCoding::Identity => {
                        let content_length = self.content_length.unwrap_or(0);
                        let needed = content_length - self.content_index;
                        let copy_size = needed.min(data.len() - index);

                        self.payload.extend_from_slice(&data[index..index + copy_size]);
                        self.content_index += copy_size;
                        index += copy_size;

                        if self.content_index >= content_length {
                            self.deliver(events);
                        }
                    }
                },
            }
        }

        Ok(())
    }

    /// Split `HTTP-Version SP Status-Code SP Reason-Phrase`, tolerating runs of spaces
    fn parse_status_line(&mut self, line: &str) {
        debug!("Status line: {}", line);

        let (version, rest) = split_word(line);
        let (code, reason) = split_word(rest);

        self.version = version.to_string();
        self.reason = reason.to_string();
        self.status = match code.parse::<u16>() {
            Ok(code) => Status::new(code),
            Err(_) => {
                warn!("Invalid status code \"{}\".", code);
                Status::new(0)
            }
        };
    }

    /// More than [`MAX_HEADERS`](super::MAX_HEADERS) headers fail the response
    fn parse_header(&mut self, line: &str) -> Result<()> {
        match Headers::parse_header_line(line) {
            Ok((name, value)) => {
                debug!("Header: {}: {}", name, value);
                self.headers.try_insert(name, value)
            }
            Err(err) => {
                warn!("Header skipped: {}", err);
                Ok(())
            }
        }
    }

    /// Evaluate the header block and enter the body
    ///
    /// `remaining` is the number of bytes left in the current delivery.
    fn end_of_headers(&mut self, remaining: usize, events: &mut Vec<ParseEvent>) -> Result<()> {
        let close = self
            .headers
            .get_all("Connection")
            .iter()
            .any(|value| value.to_ascii_lowercase().contains("close"));
        if close {
            events.push(ParseEvent::ConnectionClose);
        }

        self.content_length = self.headers.get("Content-Length").map(|value| {
            value.trim().parse::<usize>().unwrap_or_else(|_| {
                warn!("Invalid Content-Length \"{}\".", value);
                0
            })
        });

        if let Some(coding) = self.headers.get("Transfer-Encoding") {
            if coding.eq_ignore_ascii_case("chunked") {
                self.coding = TransferCoding::Chunked;
            } else {
                return Err(Error::UnsupportedTransferCoding(coding.to_string()));
            }
        }

        self.part = ResponsePart::Body;

        if self.coding == TransferCoding::Identity {
            // Without a length, whatever is left of this delivery is the body
            let content_length = *self.content_length.get_or_insert(remaining);

            if content_length == 0 {
                self.deliver(events);
            }
        }

        Ok(())
    }

    fn deliver(&mut self, events: &mut Vec<ParseEvent>) {
        let response = HttpResponse::builder()
            .version(std::mem::take(&mut self.version))
            .status(self.status)
            .reason(std::mem::take(&mut self.reason))
            .headers(std::mem::take(&mut self.headers))
            .body(self.payload.split().freeze())
            .build();

        debug!(
            "Response {} complete, {} byte body.",
            response.status().code(),
            response.body().len()
        );

        events.push(ParseEvent::Response(response));
        self.start_next();
    }

    fn start_next(&mut self) {
        self.part = ResponsePart::StatusLine;
        self.coding = TransferCoding::Identity;
        self.status = Status::default();
        self.content_length = None;
        self.content_index = 0;
    }

    /// Drop everything parsed so far and expect a new status line
    pub fn reset(&mut self) {
        self.start_next();
        self.line.clear();
        self.chunked.reset();
        self.version.clear();
        self.reason.clear();
        self.headers.clear();
        self.payload.clear();
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split off the first space separated word, skipping the spaces after it
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(' ');

    match s.find(' ') {
        Some(pos) => (&s[..pos], s[pos..].trim_start_matches(' ')),
        None => (s, ""),
    }
}
