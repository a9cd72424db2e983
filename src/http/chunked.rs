//! Chunked transfer coding
//!
//! Decoding of `Transfer-Encoding: chunked` bodies as they trickle in, and an
//! encoder for producing such bodies.

use super::line::LineScanner;
use super::{Error, Result, CRLF};
use bytes::BytesMut;
use tracing::debug;

/// Upper bound for reserving payload space ahead of chunk data
const MAX_CHUNK_RESERVE: usize = 64 * 1024;

/// Position inside a chunked body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Expecting a chunk-size line
    ChunkSize,
    /// Copying chunk data
    ChunkData,
    /// Expecting the CRLF that ends chunk data
    ChunkDataEnd,
    /// Reading trailer lines after the last chunk
    Trailer,
}

/// Chunked body decoder
///
/// Resumable at any byte boundary. Chunk data is appended to the payload
/// buffer the caller passes in.
#[derive(Debug)]
pub struct ChunkedBodyParser {
    state: ChunkState,
    chunk_size: usize,
    chunk_index: usize,
    line: LineScanner,
}

impl ChunkedBodyParser {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedBodyParser {
            state: ChunkState::ChunkSize,
            chunk_size: 0,
            chunk_index: 0,
            line: LineScanner::new(),
        }
    }

    /// Current decoder state
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Consume bytes of `data` starting at `*index`
    ///
    /// Returns `Ok(true)` once the empty line after the trailer was read;
    /// `*index` then points at the first byte after the body. The decoder is
    /// ready for the next body at that point.
    ///
    /// A chunk-size line is parsed as hexadecimal as a whole, chunk
    /// extensions are not supported and fail with [`Error::InvalidChunkSize`].
    pub fn parse(&mut self, data: &[u8], index: &mut usize, payload: &mut BytesMut) -> Result<bool> {
        while *index < data.len() {
            match self.state {
                ChunkState::ChunkSize => {
                    if let Some(line) = self.line.next_line(data, index)? {
                        self.chunk_size = usize::from_str_radix(&line, 16)
                            .map_err(|_| Error::InvalidChunkSize(line.clone()))?;
                        self.chunk_index = 0;

                        debug!("Chunk size is {} byte.", self.chunk_size);

                        if self.chunk_size == 0 {
                            self.state = ChunkState::Trailer;
                        } else {
                            payload.reserve(self.chunk_size.min(MAX_CHUNK_RESERVE));
                            self.state = ChunkState::ChunkData;
                        }
                    }
                }

                ChunkState::ChunkData => {
                    let needed = self.chunk_size - self.chunk_index;
                    let available = data.len() - *index;
                    let copy_size = needed.min(available);

                    payload.extend_from_slice(&data[*index..*index + copy_size]);
                    *index += copy_size;
                    self.chunk_index += copy_size;

                    if self.chunk_index >= self.chunk_size {
                        self.chunk_index = 0;
                        self.state = ChunkState::ChunkDataEnd;
                    }
                }

                ChunkState::ChunkDataEnd => {
                    if self.line.next_line(data, index)?.is_some() {
                        self.state = ChunkState::ChunkSize;
                    }
                }

                ChunkState::Trailer => {
                    if let Some(line) = self.line.next_line(data, index)? {
                        if line.is_empty() {
                            debug!("Chunked transfer finished.");
                            self.reset();
                            return Ok(true);
                        }

                        debug!("Trailer: {}", line);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Reset the decoder for reuse
    pub fn reset(&mut self) {
        self.state = ChunkState::ChunkSize;
        self.chunk_size = 0;
        self.chunk_index = 0;
        self.line.clear();
    }
}

impl Default for ChunkedBodyParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode data as chunked body with chunks of at most `chunk_size` bytes
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + 16);

    for chunk in data.chunks(chunk_size.max(1)) {
        output.extend_from_slice(format!("{:x}{}", chunk.len(), CRLF).as_bytes());
        output.extend_from_slice(chunk);
        output.extend_from_slice(CRLF.as_bytes());
    }

    output.extend_from_slice(format!("0{}{}", CRLF, CRLF).as_bytes());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> (bool, usize, Vec<u8>) {
        let mut parser = ChunkedBodyParser::new();
        let mut payload = BytesMut::new();
        let mut index = 0;
        let done = parser.parse(input, &mut index, &mut payload).unwrap();
        (done, index, payload.to_vec())
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_chunked_body(b"Hello", 64), b"5\r\nHello\r\n0\r\n\r\n");
        assert_eq!(
            encode_chunked_body(b"HelloWorld!", 5),
            b"5\r\nHello\r\n5\r\nWorld\r\n1\r\n!\r\n0\r\n\r\n"
        );
        assert_eq!(encode_chunked_body(b"", 5), b"0\r\n\r\n");
    }

    #[test]
    fn test_decode_single_chunk() {
        let (done, index, body) = decode_all(b"5\r\nHello\r\n0\r\n\r\n");
        assert!(done);
        assert_eq!(index, 15);
        assert_eq!(body, b"Hello");
    }

    #[test]
    fn test_decode_multiple_chunks_bare_lf() {
        let (done, _, body) = decode_all(b"5\nHello\n6\n World\n0\n\n");
        assert!(done);
        assert_eq!(body, b"Hello World");
    }

    #[test]
    fn test_decode_hex_sizes() {
        let data = vec![b'x'; 0x1a];
        let (done, _, body) = decode_all(&encode_chunked_body(&data, 0x1a));
        assert!(done);
        assert_eq!(body.len(), 26);

        let (done, _, body) = decode_all(b"A\r\n0123456789\r\nb\r\n0123456789a\r\n0\r\n\r\n");
        assert!(done);
        assert_eq!(body.len(), 21);
    }

    #[test]
    fn test_trailers_not_in_body() {
        let (done, _, body) = decode_all(b"3\r\nabc\r\n0\r\nX-Checksum: 42\r\nX-Other: 1\r\n\r\n");
        assert!(done);
        assert_eq!(body, b"abc");
    }

    #[test]
    fn test_stops_after_body() {
        let input = b"2\r\nhi\r\n0\r\n\r\nHTTP/1.1 200 OK\r\n";
        let (done, index, _) = decode_all(input);
        assert!(done);
        assert_eq!(&input[index..], b"HTTP/1.1 200 OK\r\n");
    }

    #[test]
    fn test_incremental() {
        let input = b"5\r\nHello\r\n7\r\n, World\r\n0\r\n\r\n";
        let mut parser = ChunkedBodyParser::new();
        let mut payload = BytesMut::new();

        for (i, byte) in input.iter().enumerate() {
            let mut index = 0;
            let done = parser
                .parse(std::slice::from_ref(byte), &mut index, &mut payload)
                .unwrap();
            assert_eq!(index, 1);
            assert_eq!(done, i == input.len() - 1);
        }

        assert_eq!(&payload[..], b"Hello, World");
        assert_eq!(parser.state(), ChunkState::ChunkSize);
    }

    #[test]
    fn test_state_progression() {
        let mut parser = ChunkedBodyParser::new();
        let mut payload = BytesMut::new();

        let mut index = 0;
        parser.parse(b"4\r\nab", &mut index, &mut payload).unwrap();
        assert_eq!(parser.state(), ChunkState::ChunkData);

        let mut index = 0;
        parser.parse(b"cd", &mut index, &mut payload).unwrap();
        assert_eq!(parser.state(), ChunkState::ChunkDataEnd);

        let mut index = 0;
        parser.parse(b"\r\n0\r\n", &mut index, &mut payload).unwrap();
        assert_eq!(parser.state(), ChunkState::Trailer);
    }

    #[test]
    fn test_chunk_extension_rejected() {
        let mut parser = ChunkedBodyParser::new();
        let mut payload = BytesMut::new();
        let mut index = 0;

        let result = parser.parse(b"5;name=value\r\nHello\r\n0\r\n\r\n", &mut index, &mut payload);
        assert!(matches!(result, Err(Error::InvalidChunkSize(s)) if s == "5;name=value"));
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut parser = ChunkedBodyParser::new();
        let mut payload = BytesMut::new();
        let mut index = 0;

        assert!(matches!(
            parser.parse(b"zz\r\n", &mut index, &mut payload),
            Err(Error::InvalidChunkSize(_))
        ));
    }
}
