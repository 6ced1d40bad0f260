//! Request/response engine for the iiod text protocol.
//!
//! [`IiodClient`] owns one [`ByteStream`] behind a mutex. Every high-level
//! method holds the lock for its whole exchange, so concurrent callers never
//! interleave request and response lines. Callers that need several
//! exchanges to appear atomic take the lock themselves with
//! [`IiodClient::lock`] and use the [`ClientGuard`] primitives.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::context::Version;
use crate::error::{IioError, Result};
use crate::lock::{IioMutex, IioMutexGuard};
use crate::mask::ChannelsMask;

use super::command::{AttrTarget, Command};
use super::reply::{check_status, errno_of, IntegerLine, SizedReply, Stage, MAX_LINE};
use super::stream::{is_interrupted, ByteStream};

const DISCARD_CHUNK: usize = 256;

struct Connection {
    stream: Box<dyn ByteStream>,
    timeout: Option<Duration>,
}

/// Client side of one iiod connection.
pub struct IiodClient {
    conn: IioMutex<Connection>,
}

impl std::fmt::Debug for IiodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IiodClient").finish_non_exhaustive()
    }
}

/// Exclusive access to the connection.
///
/// Dropping the guard releases the connection for other callers.
pub struct ClientGuard<'a> {
    conn: IioMutexGuard<'a, Connection>,
}

// =============================================================================
// Stream primitives
// =============================================================================

impl ClientGuard<'_> {
    fn deadline(&self) -> Option<Instant> {
        self.conn.timeout.map(|t| Instant::now() + t)
    }

    fn check_deadline(deadline: Option<Instant>) -> Result<()> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Err(IioError::Timeout),
            _ => Ok(()),
        }
    }

    /// Write all of `data`, retrying short and interrupted writes.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let deadline = self.deadline();
        let mut written = 0;
        while written < data.len() {
            match self.conn.stream.write(&data[written..]) {
                Ok(0) => return Err(IioError::BrokenPipe),
                Ok(n) => written += n,
                Err(e) if is_interrupted(&e) => {}
                Err(e) => return Err(e),
            }
            if written < data.len() {
                Self::check_deadline(deadline)?;
            }
        }
        Ok(())
    }

    /// Fill all of `buf`, retrying short and interrupted reads.
    pub fn read_all(&mut self, buf: &mut [u8]) -> Result<()> {
        let deadline = self.deadline();
        let mut filled = 0;
        while filled < buf.len() {
            match self.conn.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(IioError::BrokenPipe),
                Ok(n) => filled += n,
                Err(e) if is_interrupted(&e) => {}
                Err(e) => return Err(e),
            }
            if filled < buf.len() {
                Self::check_deadline(deadline)?;
            }
        }
        Ok(())
    }

    /// Read and drop `len` bytes.
    pub fn discard(&mut self, mut len: usize) -> Result<()> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        while len > 0 {
            let n = len.min(DISCARD_CHUNK);
            self.read_all(&mut scratch[..n])?;
            len -= n;
        }
        Ok(())
    }

    /// Read one integer status line, skipping blank lines.
    pub fn read_integer(&mut self) -> Result<i64> {
        let deadline = self.deadline();
        let mut parser = IntegerLine::new();
        let mut buf = [0u8; MAX_LINE];
        loop {
            let n = match self.conn.stream.read_line(&mut buf) {
                Ok(0) => return Err(IioError::BrokenPipe),
                Ok(n) => n,
                Err(e) if is_interrupted(&e) => continue,
                Err(e) => return Err(e),
            };
            if let Some(value) = parser.feed(&buf[..n])? {
                trace!(value, "iiod status");
                return Ok(value);
            }
            Self::check_deadline(deadline)?;
        }
    }

    /// Read one text line, without its terminator.
    pub fn read_text_line(&mut self) -> Result<String> {
        let deadline = self.deadline();
        let mut line = Vec::new();
        let mut buf = [0u8; MAX_LINE];
        loop {
            let n = match self.conn.stream.read_line(&mut buf) {
                Ok(0) => return Err(IioError::BrokenPipe),
                Ok(n) => n,
                Err(e) if is_interrupted(&e) => continue,
                Err(e) => return Err(e),
            };
            line.extend_from_slice(&buf[..n]);
            if line.last() == Some(&b'\n') {
                break;
            }
            if line.len() >= MAX_LINE {
                return Err(IioError::protocol("line too long"));
            }
            Self::check_deadline(deadline)?;
        }
        let text = String::from_utf8(line).map_err(|_| IioError::protocol("line is not UTF-8"))?;
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send one request line.
    pub fn send(&mut self, cmd: &Command<'_>) -> Result<()> {
        let line = cmd.to_string();
        debug!(request = %line.trim_end(), "iiod request");
        self.write_all(line.as_bytes())
    }

    /// Send a request and read its integer status, without interpreting it.
    pub fn exec(&mut self, cmd: &Command<'_>) -> Result<i64> {
        self.send(cmd)?;
        self.read_integer()
    }

    /// Send a request and fail on a negative status.
    pub fn exec_status(&mut self, cmd: &Command<'_>) -> Result<i64> {
        let status = self.exec(cmd)?;
        check_status(status)
    }

    /// Read a sized reply whose length line is still on the wire.
    pub fn read_sized(&mut self, limit: usize) -> Result<Vec<u8>> {
        self.drive_sized(SizedReply::new(limit))
    }

    /// Read the rest of a sized reply whose length was already received.
    fn read_sized_with_length(&mut self, length: i64, limit: usize) -> Result<Vec<u8>> {
        let mut reply = SizedReply::new(limit);
        reply.set_length(length)?;
        self.drive_sized(reply)
    }

    fn drive_sized(&mut self, mut reply: SizedReply) -> Result<Vec<u8>> {
        let mut chunk = [0u8; DISCARD_CHUNK];
        loop {
            match reply.stage() {
                Stage::Length => {
                    let value = self.read_integer()?;
                    reply.set_length(value)?;
                }
                Stage::Payload { remaining } if reply.is_draining() => {
                    self.discard(remaining)?;
                    reply.skip_payload(remaining)?;
                }
                Stage::Payload { remaining } => {
                    let n = remaining.min(chunk.len());
                    self.read_all(&mut chunk[..n])?;
                    reply.push_payload(&chunk[..n])?;
                }
                Stage::Terminator => {
                    let mut byte = [0u8; 1];
                    self.read_all(&mut byte)?;
                    reply.set_terminator(byte[0])?;
                }
                Stage::Done => return reply.finish(),
            }
        }
    }
}

// =============================================================================
// Protocol operations
// =============================================================================

impl IiodClient {
    /// Wrap a connected stream.
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self {
            conn: IioMutex::new(Connection {
                stream,
                timeout: None,
            }),
        }
    }

    /// Take exclusive use of the connection.
    pub fn lock(&self) -> ClientGuard<'_> {
        ClientGuard {
            conn: self.conn.lock(),
        }
    }

    /// Set the local I/O timeout (`None` = block forever).
    pub fn set_stream_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let mut guard = self.lock();
        guard.conn.stream.set_timeout(timeout)?;
        guard.conn.timeout = timeout;
        Ok(())
    }

    /// `VERSION`: daemon version.
    pub fn version(&self) -> Result<Version> {
        let mut guard = self.lock();
        guard.send(&Command::Version)?;
        let line = guard.read_text_line()?;
        parse_version(&line)
    }

    /// `PRINT`: the daemon's XML topology.
    pub fn print_xml(&self) -> Result<String> {
        let mut guard = self.lock();
        guard.send(&Command::Print)?;
        let xml = guard.read_sized(usize::MAX)?;
        debug!(bytes = xml.len(), "Received topology document");
        String::from_utf8(xml).map_err(|_| IioError::protocol("topology document is not UTF-8"))
    }

    /// `TIMEOUT`: ask the daemon to use `timeout_ms` for its own I/O.
    ///
    /// Daemons that do not know the command answer `-EINVAL`; that is
    /// accepted as success.
    pub fn set_remote_timeout(&self, timeout_ms: u32) -> Result<()> {
        let status = self.lock().exec(&Command::Timeout { timeout_ms })?;
        if status == -i64::from(libc::EINVAL) {
            debug!(timeout_ms, "Daemon does not support TIMEOUT");
            return Ok(());
        }
        check_status(status).map(|_| ())
    }

    /// `OPEN`: start a buffer session.
    pub fn open(&self, dev: &str, samples: usize, cyclic: bool, mask: &ChannelsMask) -> Result<()> {
        let cmd = Command::Open {
            dev,
            samples,
            mask_hex: mask.to_hex(),
            cyclic,
        };
        self.lock().exec_status(&cmd).map(|_| ())
    }

    /// `CLOSE`: end the buffer session.
    pub fn close(&self, dev: &str) -> Result<()> {
        self.lock().exec_status(&Command::Close { dev }).map(|_| ())
    }

    /// `READ`: copy an attribute value into `dst`.
    ///
    /// Returns the value length. A value that does not fit is drained from
    /// the wire and reported as an I/O error.
    pub fn read_attr(
        &self,
        dev: &str,
        target: AttrTarget<'_>,
        attr: &str,
        dst: &mut [u8],
    ) -> Result<usize> {
        let mut guard = self.lock();
        guard.send(&Command::ReadAttr { dev, target, attr })?;
        let value = guard.read_sized(dst.len())?;
        dst[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    /// `WRITE`: set an attribute. Returns the count the daemon reports.
    pub fn write_attr(
        &self,
        dev: &str,
        target: AttrTarget<'_>,
        attr: &str,
        src: &[u8],
    ) -> Result<usize> {
        let mut guard = self.lock();
        guard.send(&Command::WriteAttr {
            dev,
            target,
            attr,
            len: src.len(),
        })?;
        guard.write_all(src)?;
        let status = check_status(guard.read_integer()?)?;
        usize::try_from(status).map_err(|_| IioError::protocol("write count out of range"))
    }

    /// `READBUF`: read `dst.len()` bytes of samples.
    ///
    /// The daemon sends the data in chunks; the first chunk is preceded by
    /// the mask of channels present in the data, which is stored in `mask`.
    /// Returns the number of bytes received.
    pub fn read_buffer(&self, dev: &str, dst: &mut [u8], mask: &mut ChannelsMask) -> Result<usize> {
        if dst.is_empty() {
            return Err(IioError::invalid("READBUF of zero bytes"));
        }
        let mut guard = self.lock();
        guard.send(&Command::ReadBuf {
            dev,
            len: dst.len(),
        })?;

        let mut received = 0;
        let mut mask_seen = false;
        while received < dst.len() {
            let chunk = guard.read_integer()?;
            if chunk < 0 {
                return Err(IioError::from_errno(errno_of(chunk)));
            }
            if chunk == 0 {
                break;
            }
            let chunk = usize::try_from(chunk)
                .ok()
                .filter(|&c| c <= dst.len() - received)
                .ok_or_else(|| {
                    IioError::protocol(format!("READBUF chunk of {chunk} bytes overruns the buffer"))
                })?;

            if !mask_seen {
                let mut hex = vec![0u8; mask.word_count() * 8 + 1];
                guard.read_all(&mut hex)?;
                let hex = std::str::from_utf8(&hex)
                    .map_err(|_| IioError::protocol("channel mask is not ASCII"))?;
                mask.set_from_hex(hex)?;
                mask_seen = true;
            }

            guard.read_all(&mut dst[received..received + chunk])?;
            received += chunk;
        }

        trace!(device = dev, bytes = received, "READBUF complete");
        Ok(received)
    }

    /// `WRITEBUF`: submit samples. Returns `src.len()` on success.
    pub fn write_buffer(&self, dev: &str, src: &[u8]) -> Result<usize> {
        let mut guard = self.lock();
        guard.exec_status(&Command::WriteBuf {
            dev,
            len: src.len(),
        })?;
        guard.write_all(src)?;
        check_status(guard.read_integer()?)?;
        Ok(src.len())
    }

    /// `GETTRIG`: name of the trigger associated with `dev`, if any.
    pub fn get_trigger(&self, dev: &str) -> Result<Option<String>> {
        let mut guard = self.lock();
        let len = guard.exec_status(&Command::GetTrigger { dev })?;
        // An empty name means no trigger is assigned, not a missing device.
        if len == 0 {
            return Ok(None);
        }
        let name = guard.read_sized_with_length(len, MAX_LINE)?;
        String::from_utf8(name)
            .map(Some)
            .map_err(|_| IioError::protocol("trigger name is not UTF-8"))
    }

    /// `SETTRIG`: associate a trigger, or with `None` remove it.
    pub fn set_trigger(&self, dev: &str, trigger: Option<&str>) -> Result<()> {
        self.lock()
            .exec_status(&Command::SetTrigger { dev, trigger })
            .map(|_| ())
    }

    /// `SET ... BUFFERS_COUNT`
    pub fn set_kernel_buffers_count(&self, dev: &str, count: u32) -> Result<()> {
        self.lock()
            .exec_status(&Command::SetBuffersCount { dev, count })
            .map(|_| ())
    }
}

fn parse_version(line: &str) -> Result<Version> {
    let mut parts = line.trim().splitn(3, '.');
    let mut number = |what: &str| -> Result<u32> {
        parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| IioError::protocol(format!("bad {what} version in {line:?}")))
    };
    let major = number("major")?;
    let minor = number("minor")?;
    let git_tag = parts.next().unwrap_or_default().trim().to_string();
    Ok(Version {
        major,
        minor,
        git_tag,
    })
}
