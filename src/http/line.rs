//! Incremental line scanning
//!
//! Lines may arrive split over any number of transport deliveries. The
//! scanner keeps the unfinished part and hands out complete lines with the
//! terminator removed. Both `\r\n` and a bare `\n` end a line. A line
//! longer than [`MAX_LINE_LENGTH`] is refused.

use super::{Error, Result, MAX_LINE_LENGTH};
use bytes::BytesMut;

/// Accumulates a line across calls
#[derive(Debug, Default)]
pub struct LineScanner {
    partial: BytesMut,
}

impl LineScanner {
    /// Create a new, empty scanner
    pub fn new() -> Self {
        LineScanner {
            partial: BytesMut::with_capacity(128),
        }
    }

    /// Scan `data` from `*index` for the end of the current line
    ///
    /// On success the line (without terminator) is returned and `*index`
    /// points past the terminator. Otherwise all remaining bytes are kept and
    /// `*index` is moved to the end of `data`.
    ///
    /// Fails with [`Error::Parse`] once the line, terminator included, would
    /// exceed [`MAX_LINE_LENGTH`] bytes.
    pub fn next_line(&mut self, data: &[u8], index: &mut usize) -> Result<Option<String>> {
        let rest = &data[*index..];
        let end = rest.iter().position(|&b| b == b'\n');
        let take = end.map_or(rest.len(), |pos| pos + 1);

        if self.partial.len() + take > MAX_LINE_LENGTH {
            let held = self.partial.len();
            self.partial.clear();
            return Err(Error::Parse(format!(
                "line longer than {} bytes ({} held)",
                MAX_LINE_LENGTH, held
            )));
        }

        match end {
            Some(pos) => {
                self.partial.extend_from_slice(&rest[..pos]);
                *index += pos + 1;

                if self.partial.last() == Some(&b'\r') {
                    self.partial.truncate(self.partial.len() - 1);
                }

                let line = self.partial.split();
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None => {
                self.partial.extend_from_slice(rest);
                *index = data.len();
                Ok(None)
            }
        }
    }

    /// Number of bytes held for the unfinished line
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}
