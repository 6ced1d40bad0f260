//! Byte-stream abstraction the wire client runs over.

use std::time::Duration;

use crate::error::{IioError, Result};

/// A bidirectional byte stream to an iiod daemon.
///
/// Implementations may return short counts from every method; the client
/// retries and accumulates as needed. Returning `Ok(0)` means the peer
/// closed the connection.
pub trait ByteStream: Send {
    /// Write some bytes, returning how many were written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read some bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read up to and including the next `\n`, or until `buf` is full.
    ///
    /// May return a partial line if the underlying transport delivers one;
    /// callers accumulate until they see the terminator. The default reads
    /// one byte at a time.
    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..filled + 1])?;
            if n == 0 {
                break;
            }
            filled += 1;
            if buf[filled - 1] == b'\n' {
                break;
            }
        }
        Ok(filled)
    }

    /// Per-call I/O timeout; `None` blocks forever.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let _ = timeout;
        Ok(())
    }
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_line(buf)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_timeout(timeout)
    }
}

pub(crate) fn is_interrupted(err: &IioError) -> bool {
    matches!(err, IioError::Io(e) if e.kind() == std::io::ErrorKind::Interrupted)
}
