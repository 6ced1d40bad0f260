//! Response framing.
//!
//! Two shapes of response exist: a bare integer status line, and a sized
//! reply (integer length, that many payload bytes, then `\n`). Both are
//! decoded by small state machines fed by the client; the machines never
//! touch the stream themselves.

use crate::error::{IioError, Result};

/// Longest integer line accepted before the framing is declared broken.
pub(crate) const MAX_LINE: usize = 1024;

/// Accumulates `read_line` chunks into one integer status line.
///
/// Blank lines before the number are skipped.
#[derive(Debug, Default)]
pub(crate) struct IntegerLine {
    line: Vec<u8>,
}

impl IntegerLine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the value once a complete non-empty line has
    /// been seen.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<Option<i64>> {
        self.line.extend_from_slice(chunk);
        if self.line.last() != Some(&b'\n') {
            if self.line.len() >= MAX_LINE {
                return Err(IioError::protocol("status line too long"));
            }
            return Ok(None);
        }

        let line = std::mem::take(&mut self.line);
        let text = std::str::from_utf8(&line)
            .map_err(|_| IioError::protocol("status line is not UTF-8"))?
            .trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }
        text.trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| IioError::protocol(format!("expected an integer, got {text:?}")))
    }
}

/// Where a sized reply is in its framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Waiting for the length line
    Length,
    /// `remaining` payload bytes still to come
    Payload { remaining: usize },
    /// Waiting for the trailing `\n`
    Terminator,
    /// Complete
    Done,
}

/// Decoder for `<len>\n<len bytes>\n` replies.
///
/// A payload longer than `limit` is still consumed from the wire so the
/// next exchange starts on a line boundary; [`finish`](Self::finish) then
/// reports an I/O error.
#[derive(Debug)]
pub(crate) struct SizedReply {
    stage: Stage,
    limit: usize,
    overflow: bool,
    payload: Vec<u8>,
}

impl SizedReply {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            stage: Stage::Length,
            limit,
            overflow: false,
            payload: Vec::new(),
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether payload bytes are being discarded.
    pub(crate) fn is_draining(&self) -> bool {
        self.overflow
    }

    /// Record the length line. Negative values are remote errno codes.
    pub(crate) fn set_length(&mut self, value: i64) -> Result<()> {
        if self.stage != Stage::Length {
            return Err(IioError::protocol("length received twice"));
        }
        if value < 0 {
            self.stage = Stage::Done;
            return Err(IioError::from_errno(errno_of(value)));
        }
        let len = usize::try_from(value)
            .map_err(|_| IioError::protocol(format!("reply length {value} out of range")))?;
        self.overflow = len > self.limit;
        if !self.overflow {
            self.payload.reserve(len.min(1 << 16));
        }
        self.stage = if len == 0 {
            Stage::Terminator
        } else {
            Stage::Payload { remaining: len }
        };
        Ok(())
    }

    /// Record payload bytes; `chunk` must not exceed the remaining count.
    pub(crate) fn push_payload(&mut self, chunk: &[u8]) -> Result<()> {
        let Stage::Payload { remaining } = self.stage else {
            return Err(IioError::protocol("unexpected payload"));
        };
        if chunk.len() > remaining {
            return Err(IioError::protocol("payload longer than announced"));
        }
        if !self.overflow {
            self.payload.extend_from_slice(chunk);
        }
        let remaining = remaining - chunk.len();
        self.stage = if remaining == 0 {
            Stage::Terminator
        } else {
            Stage::Payload { remaining }
        };
        Ok(())
    }

    /// Account for `len` payload bytes consumed without being stored.
    pub(crate) fn skip_payload(&mut self, len: usize) -> Result<()> {
        let Stage::Payload { remaining } = self.stage else {
            return Err(IioError::protocol("unexpected payload"));
        };
        if len > remaining {
            return Err(IioError::protocol("payload longer than announced"));
        }
        let remaining = remaining - len;
        self.stage = if remaining == 0 {
            Stage::Terminator
        } else {
            Stage::Payload { remaining }
        };
        Ok(())
    }

    pub(crate) fn set_terminator(&mut self, byte: u8) -> Result<()> {
        if self.stage != Stage::Terminator {
            return Err(IioError::protocol("unexpected terminator"));
        }
        self.stage = Stage::Done;
        if byte != b'\n' {
            return Err(IioError::protocol(format!(
                "reply terminated by {byte:#04x} instead of a newline"
            )));
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>> {
        if self.stage != Stage::Done {
            return Err(IioError::protocol("reply incomplete"));
        }
        if self.overflow {
            return Err(IioError::from_errno(libc::EIO));
        }
        Ok(self.payload)
    }
}

/// Clamp a remote status value into an errno.
pub(crate) fn errno_of(value: i64) -> i32 {
    i32::try_from(value.unsigned_abs()).unwrap_or(libc::EIO)
}

/// Turn a status value into `Ok(value)` or the error it encodes.
pub(crate) fn check_status(value: i64) -> Result<i64> {
    if value < 0 {
        Err(IioError::from_errno(errno_of(value)))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_line_skips_blank_lines() {
        let mut parser = IntegerLine::new();
        assert_eq!(parser.feed(b"\n").unwrap(), None);
        assert_eq!(parser.feed(b"\r\n").unwrap(), None);
        assert_eq!(parser.feed(b"4").unwrap(), None);
        assert_eq!(parser.feed(b"2\n").unwrap(), Some(42));
        assert_eq!(parser.feed(b"-22\n").unwrap(), Some(-22));
    }

    #[test]
    fn test_integer_line_rejects_garbage() {
        let mut parser = IntegerLine::new();
        let err = parser.feed(b"abc\n").unwrap_err();
        assert!(matches!(err, IioError::Protocol { .. }));

        let mut parser = IntegerLine::new();
        let err = parser.feed(&[b'1'; MAX_LINE]).unwrap_err();
        assert!(matches!(err, IioError::Protocol { .. }));
    }

    #[test]
    fn test_sized_reply_stages() {
        let mut reply = SizedReply::new(16);
        assert_eq!(reply.stage(), Stage::Length);
        reply.set_length(5).unwrap();
        assert_eq!(reply.stage(), Stage::Payload { remaining: 5 });
        reply.push_payload(b"12").unwrap();
        assert_eq!(reply.stage(), Stage::Payload { remaining: 3 });
        reply.push_payload(b"345").unwrap();
        assert_eq!(reply.stage(), Stage::Terminator);
        reply.set_terminator(b'\n').unwrap();
        assert_eq!(reply.stage(), Stage::Done);
        assert_eq!(reply.finish().unwrap(), b"12345");
    }

    #[test]
    fn test_sized_reply_empty_payload() {
        let mut reply = SizedReply::new(16);
        reply.set_length(0).unwrap();
        assert_eq!(reply.stage(), Stage::Terminator);
        reply.set_terminator(b'\n').unwrap();
        assert!(reply.finish().unwrap().is_empty());
    }

    #[test]
    fn test_sized_reply_overflow_drains() {
        let mut reply = SizedReply::new(2);
        reply.set_length(4).unwrap();
        assert!(reply.is_draining());
        reply.skip_payload(4).unwrap();
        reply.set_terminator(b'\n').unwrap();
        let err = reply.finish().unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_sized_reply_negative_length() {
        let mut reply = SizedReply::new(8);
        let err = reply.set_length(-i64::from(libc::ENOENT)).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(reply.stage(), Stage::Done);
    }

    #[test]
    fn test_sized_reply_bad_terminator() {
        let mut reply = SizedReply::new(8);
        reply.set_length(1).unwrap();
        reply.push_payload(b"x").unwrap();
        assert!(reply.set_terminator(b'x').is_err());
    }

    #[test]
    fn test_check_status() {
        assert_eq!(check_status(3).unwrap(), 3);
        assert!(check_status(-i64::from(libc::ETIMEDOUT)).unwrap_err().is_timeout());
    }
}
