//! Serial-line transport to an iiod daemon.
//!
//! URIs have the form `serial:<port>[,<baud>[,<settings>]]`, where settings
//! is `<data bits><parity><stop bits>[<flow>]`, for example
//! `serial:/dev/ttyUSB0,115200,8n1x`. Parity is one of `n`, `o`, `e`; flow
//! control is `x` (XON/XOFF), `r` (RTS/CTS) or omitted.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{info, warn};

use crate::config::ContextParams;
use crate::context::Context;
use crate::error::{IioError, Result};
use crate::iiod::{ByteStream, IiodClient};
use crate::remote::RemoteBackend;
use crate::xml;

/// Baud rate used when the URI does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Timeout used when the caller does not choose one.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Line settings parsed from a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// Parse the part of a `serial:` URI after the prefix.
    pub fn parse(args: &str) -> Result<Self> {
        let bad = || IioError::invalid(format!("invalid serial URI '{args}'"));
        let mut parts = args.split(',');

        let port = parts.next().filter(|p| !p.is_empty()).ok_or_else(bad)?;
        let baud_rate = match parts.next() {
            Some(baud) => baud.parse().map_err(|_| bad())?,
            None => DEFAULT_BAUD_RATE,
        };

        let mut settings = Self {
            port: port.to_string(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        };

        if let Some(line) = parts.next() {
            let mut chars = line.chars();
            settings.data_bits = match chars.next() {
                Some('5') => DataBits::Five,
                Some('6') => DataBits::Six,
                Some('7') => DataBits::Seven,
                Some('8') => DataBits::Eight,
                _ => return Err(bad()),
            };
            settings.parity = match chars.next() {
                Some('n') => Parity::None,
                Some('o') => Parity::Odd,
                Some('e') => Parity::Even,
                _ => return Err(bad()),
            };
            settings.stop_bits = match chars.next() {
                Some('1') => StopBits::One,
                Some('2') => StopBits::Two,
                _ => return Err(bad()),
            };
            settings.flow_control = match chars.next() {
                None => FlowControl::None,
                Some('x') => FlowControl::Software,
                Some('r') => FlowControl::Hardware,
                Some(_) => return Err(bad()),
            };
            if chars.next().is_some() {
                return Err(bad());
            }
        }

        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(settings)
    }
}

/// [`ByteStream`] over a serial port.
pub struct SerialByteStream {
    port: Box<dyn SerialPort>,
}

impl SerialByteStream {
    /// Open the port described by `settings`.
    pub fn open(settings: &SerialSettings, timeout: Duration) -> Result<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(timeout)
            .open()
            .map_err(|e| IioError::Transport {
                errno: libc::EIO,
                message: format!("failed to open serial port '{}': {e}", settings.port),
            })?;
        Ok(Self { port })
    }
}

impl ByteStream for SerialByteStream {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.port.read(buf)?)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        // A serial port always has a read timeout; "forever" is a long one.
        let timeout = timeout.unwrap_or(Duration::from_secs(u64::from(u32::MAX)));
        self.port.set_timeout(timeout).map_err(|e| IioError::Transport {
            errno: libc::EIO,
            message: e.to_string(),
        })
    }
}

/// Open the serial port and build a context from the daemon's topology.
pub fn create_context(args: &str, params: &ContextParams) -> Result<Context> {
    let settings = SerialSettings::parse(args)?;
    let timeout_ms = params.timeout_or(DEFAULT_TIMEOUT_MS);
    let timeout = Duration::from_millis(u64::from(timeout_ms));

    let stream = SerialByteStream::open(&settings, timeout)?;
    let client = IiodClient::new(Box::new(stream));
    client.set_stream_timeout(Some(timeout))?;

    let xml_doc = client.print_xml()?;
    let mut desc = xml::parse(&xml_doc)?;
    desc.name = "serial".to_string();
    desc.set_attr("uri", format!("serial:{args}"));

    let backend = RemoteBackend::new("serial", client);
    let ctx = Context::new(Arc::new(backend), desc)?;
    if let Err(e) = ctx.set_timeout(timeout_ms) {
        warn!(port = %settings.port, error = %e, "Unable to apply timeout");
    }
    info!(
        port = %settings.port,
        baud = settings.baud_rate,
        devices = ctx.devices_count(),
        "Connected to iiod over serial"
    );
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let s = SerialSettings::parse("/dev/ttyUSB0").unwrap();
        assert_eq!(s.port, "/dev/ttyUSB0");
        assert_eq!(s.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(s.data_bits, DataBits::Eight);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.stop_bits, StopBits::One);
        assert_eq!(s.flow_control, FlowControl::None);
    }

    #[test]
    fn test_parse_full() {
        let s = SerialSettings::parse("/dev/ttyACM1,57600,7e2r").unwrap();
        assert_eq!(s.baud_rate, 57600);
        assert_eq!(s.data_bits, DataBits::Seven);
        assert_eq!(s.parity, Parity::Even);
        assert_eq!(s.stop_bits, StopBits::Two);
        assert_eq!(s.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn test_parse_errors() {
        assert!(SerialSettings::parse("").is_err());
        assert!(SerialSettings::parse("/dev/ttyS0,fast").is_err());
        assert!(SerialSettings::parse("/dev/ttyS0,9600,9n1").is_err());
        assert!(SerialSettings::parse("/dev/ttyS0,9600,8q1").is_err());
        assert!(SerialSettings::parse("/dev/ttyS0,9600,8n1z").is_err());
        assert!(SerialSettings::parse("/dev/ttyS0,9600,8n1,extra").is_err());
    }
}
