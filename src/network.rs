//! TCP transport to an iiod daemon.
//!
//! URIs have the form `ip:<host>` or `ip:<host>:<port>`; IPv6 literals go in
//! brackets (`ip:[fe80::1]:30431`). On connect the daemon's topology is
//! fetched with `PRINT` and the context's timeout is applied.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ContextParams;
use crate::context::Context;
use crate::error::{IioError, Result};
use crate::iiod::{ByteStream, IiodClient};
use crate::remote::RemoteBackend;
use crate::xml;

/// Port iiod listens on.
pub const DEFAULT_PORT: u16 = 30431;

/// Timeout used when the caller does not choose one.
pub const DEFAULT_TIMEOUT_MS: u32 = 5000;

/// [`ByteStream`] over a TCP socket.
pub struct TcpByteStream {
    reader: BufReader<TcpStream>,
}

impl TcpByteStream {
    /// Wrap a connected socket. Nagle's algorithm is disabled since every
    /// request waits for its reply.
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }
}

impl ByteStream for TcpByteStream {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.reader.get_mut().write(data)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.reader.fill_buf()?;
        if available.is_empty() {
            return Ok(0);
        }
        let end = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => available.len(),
        }
        .min(buf.len());
        buf[..end].copy_from_slice(&available[..end]);
        self.reader.consume(end);
        Ok(end)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let socket = self.reader.get_ref();
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        Ok(())
    }
}

/// Split `host[:port]` with bracketed IPv6 support.
pub(crate) fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let bad = || IioError::invalid(format!("invalid network address '{addr}'"));

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| bad())?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(bad()),
        };
        return Ok((host.to_string(), port));
    }

    let (host, port) = match addr.matches(':').count() {
        0 => (addr, DEFAULT_PORT),
        1 => {
            let (host, port) = addr.split_once(':').ok_or_else(bad)?;
            (host, port.parse().map_err(|_| bad())?)
        }
        // Bare IPv6 literal
        _ => (addr, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(bad());
    }
    Ok((host.to_string(), port))
}

fn open_socket(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = IioError::not_found(format!("host '{host}'"));
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "Connection attempt failed");
                last_err = e.into();
            }
        }
    }
    Err(last_err)
}

/// Connect to the daemon at `host:port` and build a context from its
/// topology.
pub fn connect(host: &str, port: u16, params: &ContextParams) -> Result<Context> {
    let timeout_ms = params.timeout_or(DEFAULT_TIMEOUT_MS);
    let timeout = crate::lock::timeout_from_ms(timeout_ms);

    let socket = open_socket(host, port, timeout)?;
    let peer = socket.peer_addr().ok();
    let mut stream = TcpByteStream::new(socket)?;
    stream.set_timeout(timeout)?;

    let client = IiodClient::new(Box::new(stream));
    client.set_stream_timeout(timeout)?;
    let xml_doc = client.print_xml()?;
    let mut desc = xml::parse(&xml_doc)?;

    desc.name = "network".to_string();
    let address = peer.map_or_else(|| host.to_string(), |addr| addr.ip().to_string());
    desc.set_attr("ip,ip-addr", address);
    desc.set_attr("uri", uri_for(host, port));

    let reconnect_host = host.to_string();
    let reconnect_params = *params;
    let backend = RemoteBackend::new("network", client).with_reconnect(Box::new(move || {
        connect(&reconnect_host, port, &reconnect_params)
    }));

    let ctx = Context::new(Arc::new(backend), desc)?;
    if let Err(e) = ctx.set_timeout(timeout_ms) {
        warn!(host, error = %e, "Unable to apply timeout");
    }
    info!(host, port, devices = ctx.devices_count(), "Connected to iiod");
    Ok(ctx)
}

fn uri_for(host: &str, port: u16) -> String {
    let host = if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    if port == DEFAULT_PORT {
        format!("ip:{host}")
    } else {
        format!("ip:{host}:{port}")
    }
}

/// Create a context from the part of an `ip:` URI after the prefix.
pub fn create_context(addr: &str, params: &ContextParams) -> Result<Context> {
    let (host, port) = parse_host_port(addr)?;
    connect(&host, port, params)
}
