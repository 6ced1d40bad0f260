//! Shared helpers for integration tests.
//!
//! [`FakeIiod`] is an in-memory iiod daemon: a [`ByteStream`] that parses the
//! request lines written to it and queues the replies a real daemon would
//! send. It records every request and counts requests that arrive while an
//! earlier reply is still unread, which would mean two exchanges
//! interleaved on the wire.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_iio::iiod::{ByteStream, IiodClient};
use rust_iio::remote::RemoteBackend;
use rust_iio::{Context, Result};

pub const TOPOLOGY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<context name="local" description="fake daemon">
  <context-attribute name="hw_model" value="Test board" />
  <device id="iio:device1" name="dac">
    <channel id="altvoltage0" type="output">
      <scan-element index="0" format="le:u16/16&gt;&gt;0" />
      <attribute name="raw" />
    </channel>
  </device>
  <device id="iio:device0" name="adc" label="adc0">
    <channel id="temp" type="input">
      <attribute name="input" />
    </channel>
    <channel id="voltage1" type="input">
      <scan-element index="1" format="le:s16/16&gt;&gt;0" />
      <attribute name="raw" />
    </channel>
    <channel id="voltage0" type="input">
      <scan-element index="0" format="le:s16/16&gt;&gt;0" scale="0.5" />
      <attribute name="raw" />
      <attribute name="scale" />
    </channel>
    <attribute name="sampling_frequency" />
    <debug-attribute name="direct_reg_access" />
    <buffer-attribute name="length" />
  </device>
  <device id="trigger0" name="sysfstrig0" />
</context>"#;

/// Largest chunk the fake daemon sends per READBUF block.
const READBUF_CHUNK: usize = 6;

enum Pending {
    Attr { key: String, len: usize },
    Buf { dev: String, len: usize },
}

#[derive(Default)]
struct Daemon {
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    pending: Option<Pending>,
    requests: Vec<String>,
    interleaved: usize,
    attrs: HashMap<String, Vec<u8>>,
    open: HashMap<String, String>,
    samples: VecDeque<u8>,
    triggers: HashMap<String, String>,
    buffers_count: HashMap<String, u32>,
}

impl Daemon {
    fn reply(&mut self, text: &str) {
        self.outbox.extend(text.as_bytes());
    }

    fn reply_sized(&mut self, payload: &[u8]) {
        self.reply(&format!("{}\n", payload.len()));
        self.outbox.extend(payload);
        self.outbox.push_back(b'\n');
    }

    fn feed(&mut self, data: &[u8]) {
        self.inbox.extend_from_slice(data);
        loop {
            match self.pending.take() {
                Some(pending) => {
                    let len = match &pending {
                        Pending::Attr { len, .. } | Pending::Buf { len, .. } => *len,
                    };
                    if self.inbox.len() < len {
                        self.pending = Some(pending);
                        return;
                    }
                    let payload: Vec<u8> = self.inbox.drain(..len).collect();
                    self.complete(pending, payload);
                }
                None => {
                    let Some(end) = self.inbox.iter().position(|&b| b == b'\n') else {
                        return;
                    };
                    let line: Vec<u8> = self.inbox.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&line)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if !self.outbox.is_empty() {
                        self.interleaved += 1;
                    }
                    self.requests.push(line.clone());
                    self.handle(&line);
                }
            }
        }
    }

    fn complete(&mut self, pending: Pending, payload: Vec<u8>) {
        match pending {
            Pending::Attr { key, len } => {
                let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
                self.attrs.insert(key, payload[..end].to_vec());
                self.reply(&format!("{len}\n"));
            }
            Pending::Buf { dev, len } => {
                if self.open.contains_key(&dev) {
                    self.samples.extend(payload);
                    self.reply(&format!("{len}\n"));
                } else {
                    self.reply("-9\n");
                }
            }
        }
    }

    /// Splits `<dev> [target] <attr> [len]` into a storage key and the
    /// remaining tokens.
    fn attr_key<'t>(tokens: &'t [&'t str]) -> Option<(String, &'t [&'t str])> {
        let (dev, rest) = tokens.split_first()?;
        let (target, rest) = match rest.first().copied() {
            Some("DEBUG") | Some("BUFFER") => (rest[0].to_string(), &rest[1..]),
            Some("INPUT") | Some("OUTPUT") => (format!("{} {}", rest[0], rest.get(1)?), &rest[2..]),
            _ => (String::new(), rest),
        };
        let (attr, rest) = rest.split_first()?;
        Some((format!("{dev}|{target}|{attr}"), rest))
    }

    fn handle(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = tokens.split_first() else {
            return;
        };
        match cmd {
            "VERSION" => self.reply("0.26.fake0ff\n"),
            "PRINT" => self.reply_sized(TOPOLOGY.as_bytes()),
            "TIMEOUT" => self.reply("0\n"),
            "OPEN" => match args {
                [dev, _samples, mask, ..] => {
                    self.open.insert(dev.to_string(), mask.to_string());
                    self.reply("0\n");
                }
                _ => self.reply("-22\n"),
            },
            "CLOSE" => match args.first().and_then(|dev| self.open.remove(*dev)) {
                Some(_) => self.reply("0\n"),
                None => self.reply("-9\n"),
            },
            "READ" => match Self::attr_key(args) {
                Some((key, [])) => match self.attrs.get(&key).cloned() {
                    Some(value) => self.reply_sized(&value),
                    None => self.reply("-2\n"),
                },
                _ => self.reply("-22\n"),
            },
            "WRITE" => match Self::attr_key(args) {
                Some((key, [len])) => match len.parse() {
                    Ok(len) => self.pending = Some(Pending::Attr { key, len }),
                    Err(_) => self.reply("-22\n"),
                },
                _ => self.reply("-22\n"),
            },
            "READBUF" => self.read_buffer(args),
            "WRITEBUF" => match args {
                [dev, len] if self.open.contains_key(*dev) => match len.parse() {
                    Ok(len) => {
                        self.reply("0\n");
                        self.pending = Some(Pending::Buf {
                            dev: dev.to_string(),
                            len,
                        });
                    }
                    Err(_) => self.reply("-22\n"),
                },
                _ => self.reply("-9\n"),
            },
            "GETTRIG" => {
                let name = args
                    .first()
                    .and_then(|dev| self.triggers.get(*dev))
                    .map(|id| if id == "trigger0" { "sysfstrig0" } else { id.as_str() })
                    .map(str::to_string);
                match name {
                    Some(name) => self.reply_sized(name.as_bytes()),
                    None => self.reply("0\n"),
                }
            }
            "SETTRIG" => match args {
                [dev] => {
                    self.triggers.remove(*dev);
                    self.reply("0\n");
                }
                [dev, trigger] => {
                    self.triggers.insert(dev.to_string(), trigger.to_string());
                    self.reply("0\n");
                }
                _ => self.reply("-22\n"),
            },
            "SET" => match args {
                [dev, "BUFFERS_COUNT", count] => match count.parse() {
                    Ok(count) => {
                        self.buffers_count.insert(dev.to_string(), count);
                        self.reply("0\n");
                    }
                    Err(_) => self.reply("-22\n"),
                },
                _ => self.reply("-22\n"),
            },
            _ => self.reply("-22\n"),
        }
    }

    fn read_buffer(&mut self, args: &[&str]) {
        let (dev, len) = match args {
            [dev, len] => match len.parse::<usize>() {
                Ok(len) => (dev.to_string(), len),
                Err(_) => return self.reply("-22\n"),
            },
            _ => return self.reply("-22\n"),
        };
        let Some(mask) = self.open.get(&dev).cloned() else {
            return self.reply("-9\n");
        };

        let total = len.min(self.samples.len());
        let data: Vec<u8> = self.samples.drain(..total).collect();
        for (i, chunk) in data.chunks(READBUF_CHUNK).enumerate() {
            self.reply(&format!("{}\n", chunk.len()));
            if i == 0 {
                self.reply(&format!("{mask}\n"));
            }
            self.outbox.extend(chunk);
        }
        if total < len {
            self.reply("0\n");
        }
    }
}

/// In-memory iiod daemon. Clones share state.
#[derive(Clone, Default)]
pub struct FakeIiod {
    daemon: Arc<Mutex<Daemon>>,
}

impl FakeIiod {
    /// Daemon serving [`TOPOLOGY`] with a few attribute values preset.
    pub fn new() -> Self {
        let fake = Self::default();
        {
            let mut d = fake.daemon.lock();
            for (key, value) in [
                ("iio:device0||sampling_frequency", "1000"),
                ("iio:device0|BUFFER|length", "0"),
                ("iio:device0|INPUT voltage0|raw", "-12"),
                ("iio:device0|INPUT voltage0|scale", "0.5"),
                ("iio:device0|INPUT voltage1|raw", "40"),
                ("iio:device0|INPUT temp|input", "21500"),
                ("iio:device1|OUTPUT altvoltage0|raw", "0"),
            ] {
                d.attrs.insert(key.to_string(), value.as_bytes().to_vec());
            }
        }
        fake
    }

    /// Request lines received so far.
    pub fn requests(&self) -> Vec<String> {
        self.daemon.lock().requests.clone()
    }

    /// Forget the request log.
    pub fn clear_requests(&self) {
        self.daemon.lock().requests.clear();
    }

    /// Requests that arrived while a reply was still unread.
    pub fn interleaved(&self) -> usize {
        self.daemon.lock().interleaved
    }

    /// Queue samples for the next READBUF.
    pub fn queue_samples(&self, data: &[u8]) {
        self.daemon.lock().samples.extend(data);
    }

    /// Samples received through WRITEBUF and not yet read back.
    pub fn take_samples(&self) -> Vec<u8> {
        self.daemon.lock().samples.drain(..).collect()
    }

    /// Mask the last OPEN of `dev` carried, if the session is open.
    pub fn open_mask(&self, dev: &str) -> Option<String> {
        self.daemon.lock().open.get(dev).cloned()
    }

    /// Stored attribute value.
    pub fn attr(&self, key: &str) -> Option<String> {
        self.daemon
            .lock()
            .attrs
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Kernel buffer count last requested for `dev`.
    pub fn buffers_count(&self, dev: &str) -> Option<u32> {
        self.daemon.lock().buffers_count.get(dev).copied()
    }
}

impl ByteStream for FakeIiod {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        // Short writes, so clients must loop.
        let n = data.len().min(11);
        self.daemon.lock().feed(&data[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut d = self.daemon.lock();
        let n = buf.len().min(d.outbox.len()).min(9);
        for (slot, byte) in buf.iter_mut().zip(d.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Context talking to `fake` through the iiod client, the way the network
/// transport builds one.
pub fn remote_context(fake: &FakeIiod) -> Context {
    let client = IiodClient::new(Box::new(fake.clone()));
    let xml = client.print_xml().unwrap();
    let desc = rust_iio::xml::parse(&xml).unwrap();
    Context::new(Arc::new(RemoteBackend::new("network", client)), desc).unwrap()
}
