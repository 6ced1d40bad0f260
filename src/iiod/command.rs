//! Request lines of the iiod text protocol.
//!
//! The `Display` output of a [`Command`] is exactly what goes on the wire,
//! `\r\n` included. Spelling and argument order must match what deployed
//! daemons parse.

use std::fmt;

/// Addressee of an attribute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget<'a> {
    /// Device attribute
    Device,
    /// Debug attribute
    Debug,
    /// Buffer attribute
    Buffer,
    /// Channel attribute
    Channel {
        /// Channel id
        id: &'a str,
        /// Output channel
        output: bool,
    },
}

impl fmt::Display for AttrTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => Ok(()),
            Self::Debug => f.write_str(" DEBUG"),
            Self::Buffer => f.write_str(" BUFFER"),
            Self::Channel { id, output: false } => write!(f, " INPUT {id}"),
            Self::Channel { id, output: true } => write!(f, " OUTPUT {id}"),
        }
    }
}

/// One request line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command<'a> {
    /// `VERSION`
    Version,
    /// `PRINT`: fetch the topology document
    Print,
    /// `TIMEOUT <ms>`
    Timeout { timeout_ms: u32 },
    /// `OPEN <dev> <samples> <mask>[ CYCLIC]`
    Open {
        dev: &'a str,
        samples: usize,
        mask_hex: String,
        cyclic: bool,
    },
    /// `CLOSE <dev>`
    Close { dev: &'a str },
    /// `READ <dev> [target] <attr>`
    ReadAttr {
        dev: &'a str,
        target: AttrTarget<'a>,
        attr: &'a str,
    },
    /// `WRITE <dev> [target] <attr> <len>`, followed by `len` raw bytes
    WriteAttr {
        dev: &'a str,
        target: AttrTarget<'a>,
        attr: &'a str,
        len: usize,
    },
    /// `READBUF <dev> <len>`
    ReadBuf { dev: &'a str, len: usize },
    /// `WRITEBUF <dev> <len>`
    WriteBuf { dev: &'a str, len: usize },
    /// `GETTRIG <dev>`
    GetTrigger { dev: &'a str },
    /// `SETTRIG <dev> [<trigger>]`
    SetTrigger {
        dev: &'a str,
        trigger: Option<&'a str>,
    },
    /// `SET <dev> BUFFERS_COUNT <n>`
    SetBuffersCount { dev: &'a str, count: u32 },
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version => f.write_str("VERSION"),
            Self::Print => f.write_str("PRINT"),
            Self::Timeout { timeout_ms } => write!(f, "TIMEOUT {timeout_ms}"),
            Self::Open {
                dev,
                samples,
                mask_hex,
                cyclic,
            } => {
                write!(f, "OPEN {dev} {samples} {mask_hex}")?;
                if *cyclic {
                    f.write_str(" CYCLIC")?;
                }
                Ok(())
            }
            Self::Close { dev } => write!(f, "CLOSE {dev}"),
            Self::ReadAttr { dev, target, attr } => write!(f, "READ {dev}{target} {attr}"),
            Self::WriteAttr {
                dev,
                target,
                attr,
                len,
            } => write!(f, "WRITE {dev}{target} {attr} {len}"),
            Self::ReadBuf { dev, len } => write!(f, "READBUF {dev} {len}"),
            Self::WriteBuf { dev, len } => write!(f, "WRITEBUF {dev} {len}"),
            Self::GetTrigger { dev } => write!(f, "GETTRIG {dev}"),
            Self::SetTrigger { dev, trigger } => match trigger {
                Some(trigger) => write!(f, "SETTRIG {dev} {trigger}"),
                None => write!(f, "SETTRIG {dev}"),
            },
            Self::SetBuffersCount { dev, count } => write!(f, "SET {dev} BUFFERS_COUNT {count}"),
        }?;
        f.write_str("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_requests() {
        let dev = "iio:device0";
        let cases = [
            (AttrTarget::Device, "READ iio:device0 sampling_frequency\r\n"),
            (AttrTarget::Debug, "READ iio:device0 DEBUG sampling_frequency\r\n"),
            (AttrTarget::Buffer, "READ iio:device0 BUFFER sampling_frequency\r\n"),
            (
                AttrTarget::Channel {
                    id: "voltage0",
                    output: false,
                },
                "READ iio:device0 INPUT voltage0 sampling_frequency\r\n",
            ),
            (
                AttrTarget::Channel {
                    id: "altvoltage1",
                    output: true,
                },
                "READ iio:device0 OUTPUT altvoltage1 sampling_frequency\r\n",
            ),
        ];
        for (target, expected) in cases {
            let cmd = Command::ReadAttr {
                dev,
                target,
                attr: "sampling_frequency",
            };
            assert_eq!(cmd.to_string(), expected);
        }

        let cmd = Command::WriteAttr {
            dev,
            target: AttrTarget::Channel {
                id: "voltage0",
                output: false,
            },
            attr: "scale",
            len: 6,
        };
        assert_eq!(cmd.to_string(), "WRITE iio:device0 INPUT voltage0 scale 6\r\n");
    }

    #[test]
    fn test_open_framing() {
        let cmd = Command::Open {
            dev: "iio:device0",
            samples: 256,
            mask_hex: "0000000000000003".into(),
            cyclic: false,
        };
        assert_eq!(cmd.to_string(), "OPEN iio:device0 256 0000000000000003\r\n");

        let cmd = Command::Open {
            dev: "iio:device1",
            samples: 4,
            mask_hex: "00000001".into(),
            cyclic: true,
        };
        assert_eq!(cmd.to_string(), "OPEN iio:device1 4 00000001 CYCLIC\r\n");
    }

    #[test]
    fn test_misc_requests() {
        assert_eq!(Command::Version.to_string(), "VERSION\r\n");
        assert_eq!(Command::Print.to_string(), "PRINT\r\n");
        assert_eq!(
            Command::Timeout { timeout_ms: 2500 }.to_string(),
            "TIMEOUT 2500\r\n"
        );
        assert_eq!(Command::Close { dev: "d" }.to_string(), "CLOSE d\r\n");
        assert_eq!(
            Command::ReadBuf { dev: "d", len: 64 }.to_string(),
            "READBUF d 64\r\n"
        );
        assert_eq!(
            Command::WriteBuf { dev: "d", len: 8 }.to_string(),
            "WRITEBUF d 8\r\n"
        );
        assert_eq!(Command::GetTrigger { dev: "d" }.to_string(), "GETTRIG d\r\n");
        assert_eq!(
            Command::SetTrigger {
                dev: "d",
                trigger: Some("trigger0")
            }
            .to_string(),
            "SETTRIG d trigger0\r\n"
        );
        assert_eq!(
            Command::SetTrigger {
                dev: "d",
                trigger: None
            }
            .to_string(),
            "SETTRIG d\r\n"
        );
        assert_eq!(
            Command::SetBuffersCount { dev: "d", count: 4 }.to_string(),
            "SET d BUFFERS_COUNT 4\r\n"
        );
    }
}
