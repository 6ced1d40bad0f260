//! In-memory backend.
//!
//! [`DummyBackend`] serves a small fixed topology without any hardware:
//!
//! - `iio:device0` (`dummy-adc`): scan elements `voltage0` and `voltage1`
//!   (`le:s16/16>>0`), a non-scan `temp` channel, device, debug and buffer
//!   attributes, and a register file behind `direct_reg_access`.
//! - `iio:device1` (`dummy-dac`): output scan element `altvoltage0`.
//! - `trigger0` (`dummy-trigger`): a trigger.
//!
//! Attribute values live in a map. Samples written to any device are queued
//! and handed back by the next read (loopback); tests may also queue
//! samples directly. Each open event stream has its own queue, and events
//! injected for a device reach every stream open on that device. Every operation the backend performs bumps
//! an I/O counter, so tests can prove that unsupported operations never
//! reach it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::backend::{AttrScope, Backend};
use crate::channel::{Channel, ChannelAttr, ChannelDesc, DataFormat};
use crate::config::ContextParams;
use crate::context::{Context, ContextDesc};
use crate::device::{Device, DeviceDesc};
use crate::error::{IioError, Result};
use crate::events::{Event, EventSource};
use crate::lock::{timeout_from_ms, IioCond, IioMutex};
use crate::mask::ChannelsMask;

const REG_ACCESS_ATTR: &str = "direct_reg_access";

fn s16_format(scale: Option<f64>) -> DataFormat {
    DataFormat {
        length: 16,
        bits: 16,
        is_signed: true,
        is_fully_defined: true,
        scale,
        ..Default::default()
    }
}

fn chan_attr(name: &str, filename: &str) -> ChannelAttr {
    ChannelAttr {
        name: name.to_string(),
        filename: Some(filename.to_string()),
    }
}

/// Topology served by [`DummyBackend`].
pub fn topology() -> ContextDesc {
    let mut voltage0 = ChannelDesc::new("voltage0", false).with_scan_element(0, s16_format(Some(0.5)));
    voltage0.attrs = vec![
        chan_attr("raw", "in_voltage0_raw"),
        chan_attr("scale", "in_voltage0_scale"),
        chan_attr("powerdown", "in_voltage0_powerdown"),
    ];
    let mut voltage1 = ChannelDesc::new("voltage1", false).with_scan_element(1, s16_format(None));
    voltage1.attrs = vec![
        chan_attr("raw", "in_voltage1_raw"),
        chan_attr("scale", "in_voltage1_scale"),
    ];
    let temp = ChannelDesc::new("temp", false).with_attr("input");

    let adc = DeviceDesc::new("iio:device0")
        .with_name("dummy-adc")
        .with_channel(temp)
        .with_channel(voltage1)
        .with_channel(voltage0)
        .with_attr("sampling_frequency")
        .with_attr("calibscale")
        .with_debug_attr(REG_ACCESS_ATTR)
        .with_buffer_attr("watermark")
        .with_buffer_attr("length");

    let dac_format = DataFormat {
        length: 16,
        bits: 12,
        shift: 4,
        ..Default::default()
    };
    let dac = DeviceDesc::new("iio:device1")
        .with_name("dummy-dac")
        .with_channel(
            ChannelDesc::new("altvoltage0", true)
                .with_scan_element(0, dac_format)
                .with_attr("raw"),
        )
        .with_attr("sampling_frequency");

    let trigger = DeviceDesc::new("trigger0").with_name("dummy-trigger");

    let mut desc = ContextDesc::new("dummy");
    desc.description = "In-memory test context".to_string();
    desc.set_attr("uri", "dummy:");
    desc.devices = vec![adc, dac, trigger];
    desc
}

fn initial_attrs() -> HashMap<String, Vec<u8>> {
    let values = [
        ("iio:device0/dev/sampling_frequency", "1000"),
        ("iio:device0/dev/calibscale", "1.000000"),
        ("iio:device0/buf/watermark", "1"),
        ("iio:device0/buf/length", "0"),
        ("iio:device0/in/voltage0/raw", "512"),
        ("iio:device0/in/voltage0/scale", "0.500000"),
        ("iio:device0/in/voltage0/powerdown", "0"),
        ("iio:device0/in/voltage1/raw", "-3"),
        ("iio:device0/in/voltage1/scale", "1.000000"),
        ("iio:device0/in/temp/input", "25000"),
        ("iio:device1/dev/sampling_frequency", "48000"),
        ("iio:device1/out/altvoltage0/raw", "0"),
    ];
    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
        .collect()
}

fn device_key(dev: &Device, scope: AttrScope, attr: &str) -> String {
    let scope = match scope {
        AttrScope::Device => "dev",
        AttrScope::Debug => "dbg",
        AttrScope::Buffer => "buf",
    };
    format!("{}/{scope}/{attr}", dev.id())
}

fn channel_key(chn: &Channel, attr: &str) -> String {
    let dir = if chn.is_output() { "out" } else { "in" };
    format!("{}/{dir}/{}/{attr}", chn.device().id(), chn.id())
}

#[derive(Debug)]
struct Session {
    mask: ChannelsMask,
    length: usize,
}

#[derive(Debug, Default)]
struct DummyState {
    attrs: HashMap<String, Vec<u8>>,
    registers: HashMap<u32, u32>,
    reg_selected: u32,
    sessions: HashMap<String, Session>,
    triggers: HashMap<String, String>,
    kernel_buffers: HashMap<String, u32>,
    nonblocking: HashMap<String, bool>,
    samples: VecDeque<u8>,
}

/// Pending events of one open stream.
#[derive(Debug, Default)]
struct EventQueue {
    device: String,
    queue: IioMutex<VecDeque<Event>>,
    cond: IioCond,
    closed: AtomicBool,
}

impl EventQueue {
    fn close(&self) {
        // Taking the lock orders the store against a reader about to wait.
        let _queue = self.queue.lock();
        self.closed.store(true, Ordering::SeqCst);
        self.cond.broadcast();
    }
}

/// In-memory backend; see the module documentation.
#[derive(Debug)]
pub struct DummyBackend {
    state: IioMutex<DummyState>,
    samples_ready: IioCond,
    streams: IioMutex<Vec<Weak<EventQueue>>>,
    shut_down: AtomicBool,
    io_calls: AtomicUsize,
    timeout_ms: AtomicU32,
    cancelled: AtomicBool,
    high_speed: bool,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Backend using `read`/`write` for buffer I/O.
    pub fn new() -> Self {
        Self {
            state: IioMutex::new(DummyState {
                attrs: initial_attrs(),
                ..Default::default()
            }),
            samples_ready: IioCond::new(),
            streams: IioMutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            io_calls: AtomicUsize::new(0),
            timeout_ms: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            high_speed: false,
        }
    }

    /// Backend exchanging whole blocks through `get_buffer`.
    pub fn high_speed() -> Self {
        Self {
            high_speed: true,
            ..Self::new()
        }
    }

    /// Number of operations that reached this backend.
    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Queue raw sample bytes for the next read.
    pub fn inject_samples(&self, data: &[u8]) {
        self.state.lock().samples.extend(data.iter().copied());
        self.samples_ready.broadcast();
    }

    /// Queue an event on every event stream open on `dev_id`.
    ///
    /// Returns the number of streams that received it.
    pub fn inject_event(&self, dev_id: &str, event: Event) -> usize {
        let mut streams = self.streams.lock();
        streams.retain(|stream| stream.strong_count() > 0);
        let mut delivered = 0;
        for stream in streams.iter().filter_map(Weak::upgrade) {
            if stream.device == dev_id {
                stream.queue.lock().push_back(event);
                stream.cond.broadcast();
                delivered += 1;
            }
        }
        delivered
    }

    /// Current value of an emulated register.
    pub fn register(&self, address: u32) -> Option<u32> {
        self.state.lock().registers.get(&address).copied()
    }

    /// Kernel buffer count last requested for `dev_id`.
    pub fn kernel_buffers_count(&self, dev_id: &str) -> Option<u32> {
        self.state.lock().kernel_buffers.get(dev_id).copied()
    }

    fn wait_samples(&self, dev: &Device) -> Result<()> {
        let timeout = timeout_from_ms(self.timeout_ms.load(Ordering::SeqCst));
        let mut state = self.state.lock();
        if state.nonblocking.get(dev.id()).copied().unwrap_or(false) {
            if state.samples.is_empty() {
                return Err(IioError::from_errno(libc::EAGAIN));
            }
            return Ok(());
        }
        while state.samples.is_empty() {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(IioError::from_errno(libc::EBADF));
            }
            if self.samples_ready.wait(&mut state, timeout).timed_out() {
                return Err(IioError::Timeout);
            }
        }
        Ok(())
    }

    fn take_samples(&self, dst: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let n = dst.len().min(state.samples.len());
        for (slot, byte) in dst.iter_mut().zip(state.samples.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn session_mask(&self, dev: &Device, mask: &mut ChannelsMask) -> Result<usize> {
        let state = self.state.lock();
        let session = state
            .sessions
            .get(dev.id())
            .ok_or_else(|| IioError::invalid(format!("no buffer open on '{}'", dev.id())))?;
        mask.copy_from(&session.mask)?;
        Ok(session.length)
    }

    fn write_register(&self, state: &mut DummyState, text: &str) -> Result<()> {
        let mut words = text.split_whitespace().map(crate::device::parse_long);
        let address = match words.next() {
            Some(address) => u32::try_from(address?).map_err(|_| IioError::invalid("bad register"))?,
            None => return Err(IioError::invalid("empty register access")),
        };
        state.reg_selected = address;
        if let Some(value) = words.next() {
            let value = u32::try_from(value?).map_err(|_| IioError::invalid("bad register value"))?;
            state.registers.insert(address, value);
        }
        Ok(())
    }
}

fn copy_out(value: &[u8], buf: &mut [u8]) -> Result<usize> {
    if value.len() > buf.len() {
        return Err(IioError::exhausted(format!(
            "attribute value of {} bytes",
            value.len()
        )));
    }
    buf[..value.len()].copy_from_slice(value);
    Ok(value.len())
}

fn strip_nul(data: &[u8]) -> &[u8] {
    match data.iter().position(|&b| b == 0) {
        Some(end) => &data[..end],
        None => data,
    }
}

impl Backend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn clone_context(&self, _ctx: &Context) -> Result<Context> {
        self.touch();
        let backend = if self.high_speed {
            Self::high_speed()
        } else {
            Self::new()
        };
        create_context_with(Arc::new(backend))
    }

    fn open(&self, dev: &Device, samples: usize, cyclic: bool, mask: &ChannelsMask) -> Result<()> {
        self.touch();
        let length = samples
            .checked_mul(dev.sample_size(mask)?)
            .ok_or_else(|| IioError::invalid(format!("{samples} samples overflow the buffer size")))?;
        let mut state = self.state.lock();
        if state.sessions.contains_key(dev.id()) {
            return Err(IioError::from_errno(libc::EBUSY));
        }
        state.sessions.insert(
            dev.id().to_string(),
            Session {
                mask: mask.clone(),
                length,
            },
        );
        self.cancelled.store(false, Ordering::SeqCst);
        debug!(device = %dev.id(), samples, cyclic, "Dummy buffer opened");
        Ok(())
    }

    fn close(&self, dev: &Device) -> Result<()> {
        self.touch();
        match self.state.lock().sessions.remove(dev.id()) {
            Some(_) => Ok(()),
            None => Err(IioError::from_errno(libc::EBADF)),
        }
    }

    fn read(&self, dev: &Device, dst: &mut [u8], mask: &mut ChannelsMask) -> Result<usize> {
        self.touch();
        self.session_mask(dev, mask)?;
        self.wait_samples(dev)?;
        Ok(self.take_samples(dst))
    }

    fn write(&self, dev: &Device, src: &[u8]) -> Result<usize> {
        self.touch();
        if !self.state.lock().sessions.contains_key(dev.id()) {
            return Err(IioError::from_errno(libc::EBADF));
        }
        self.inject_samples(src);
        Ok(src.len())
    }

    fn set_blocking_mode(&self, dev: &Device, blocking: bool) -> Result<()> {
        self.touch();
        self.state
            .lock()
            .nonblocking
            .insert(dev.id().to_string(), !blocking);
        Ok(())
    }

    fn set_kernel_buffers_count(&self, dev: &Device, count: u32) -> Result<()> {
        self.touch();
        self.state
            .lock()
            .kernel_buffers
            .insert(dev.id().to_string(), count);
        Ok(())
    }

    fn get_buffer(
        &self,
        dev: &Device,
        block: &mut Vec<u8>,
        bytes_used: usize,
        mask: &mut ChannelsMask,
    ) -> Result<usize> {
        if !self.high_speed {
            return Err(IioError::NotSupported);
        }
        self.touch();
        let length = self.session_mask(dev, mask)?;
        let is_output = dev.channels().any(|c| c.is_enabled(mask) && c.is_output());

        if is_output {
            if bytes_used > 0 {
                self.inject_samples(&block[..bytes_used.min(block.len())]);
            }
            *block = vec![0; length];
            return Ok(length);
        }

        self.wait_samples(dev)?;
        block.resize(length, 0);
        Ok(self.take_samples(block))
    }

    fn is_high_speed(&self, _dev: &Device) -> bool {
        self.high_speed
    }

    fn cancel(&self, dev: &Device) {
        debug!(device = %dev.id(), "Cancelling dummy buffer I/O");
        self.cancelled.store(true, Ordering::SeqCst);
        self.samples_ready.broadcast();
    }

    fn read_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.touch();
        let state = self.state.lock();
        if scope == AttrScope::Debug && attr == REG_ACCESS_ATTR {
            let value = state.registers.get(&state.reg_selected).copied().unwrap_or(0);
            return copy_out(format!("0x{value:x}").as_bytes(), buf);
        }
        match state.attrs.get(&device_key(dev, scope, attr)) {
            Some(value) => copy_out(value, buf),
            None => Err(IioError::not_found(format!("attribute '{attr}'"))),
        }
    }

    fn write_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        data: &[u8],
    ) -> Result<usize> {
        self.touch();
        if !dev.has_attr(scope, attr) {
            return Err(IioError::not_found(format!("attribute '{attr}'")));
        }
        let mut state = self.state.lock();
        let value = strip_nul(data);
        if scope == AttrScope::Debug && attr == REG_ACCESS_ATTR {
            let text = String::from_utf8_lossy(value).into_owned();
            self.write_register(&mut state, &text)?;
        } else {
            state.attrs.insert(device_key(dev, scope, attr), value.to_vec());
        }
        Ok(data.len())
    }

    fn read_channel_attr(&self, chn: &Channel, attr: &str, buf: &mut [u8]) -> Result<usize> {
        self.touch();
        match self.state.lock().attrs.get(&channel_key(chn, attr)) {
            Some(value) => copy_out(value, buf),
            None => Err(IioError::not_found(format!("attribute '{attr}'"))),
        }
    }

    fn write_channel_attr(&self, chn: &Channel, attr: &str, data: &[u8]) -> Result<usize> {
        self.touch();
        if chn.find_attr(attr).is_none() {
            return Err(IioError::not_found(format!("attribute '{attr}'")));
        }
        self.state
            .lock()
            .attrs
            .insert(channel_key(chn, attr), strip_nul(data).to_vec());
        Ok(data.len())
    }

    fn get_trigger(&self, dev: &Device) -> Result<Option<Device>> {
        self.touch();
        let state = self.state.lock();
        let Some(trigger) = state.triggers.get(dev.id()) else {
            return Ok(None);
        };
        dev.context()
            .devices()
            .find(|d| d.id() == trigger)
            .map(Some)
            .ok_or_else(|| IioError::not_found(format!("trigger '{trigger}'")))
    }

    fn set_trigger(&self, dev: &Device, trigger: Option<&Device>) -> Result<()> {
        self.touch();
        let mut state = self.state.lock();
        match trigger {
            Some(trigger) => {
                state
                    .triggers
                    .insert(dev.id().to_string(), trigger.id().to_string());
            }
            None => {
                state.triggers.remove(dev.id());
            }
        }
        Ok(())
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<()> {
        self.touch();
        self.timeout_ms.store(timeout_ms, Ordering::SeqCst);
        Ok(())
    }

    fn open_events(&self, dev: &Device) -> Result<Box<dyn EventSource>> {
        self.touch();
        let mut streams = self.streams.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(IioError::BrokenPipe);
        }
        let events = Arc::new(EventQueue {
            device: dev.id().to_string(),
            ..Default::default()
        });
        streams.push(Arc::downgrade(&events));
        Ok(Box::new(DummyEventSource {
            events,
            timeout_ms: self.timeout_ms.load(Ordering::SeqCst),
        }))
    }

    fn shutdown(&self) -> Result<()> {
        let streams = self.streams.lock();
        self.shut_down.store(true, Ordering::SeqCst);
        for stream in streams.iter().filter_map(Weak::upgrade) {
            stream.close();
        }
        Ok(())
    }
}

struct DummyEventSource {
    events: Arc<EventQueue>,
    timeout_ms: u32,
}

impl EventSource for DummyEventSource {
    fn read(&mut self, nonblock: bool) -> Result<Option<Event>> {
        let timeout = timeout_from_ms(self.timeout_ms);
        let mut queue = self.events.queue.lock();
        loop {
            if let Some(event) = queue.pop_front() {
                return Ok(Some(event));
            }
            if nonblock {
                return Ok(None);
            }
            if self.events.closed.load(Ordering::SeqCst) {
                return Err(IioError::BrokenPipe);
            }
            if self.events.cond.wait(&mut queue, timeout).timed_out() {
                return Err(IioError::Timeout);
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        debug!(device = %self.events.device, "Dummy event source closed");
        Ok(())
    }
}

/// Context over a caller-supplied backend, so tests can keep a handle on it.
pub fn create_context_with(backend: Arc<DummyBackend>) -> Result<Context> {
    Context::new(backend, topology())
}

/// Context over a fresh [`DummyBackend`].
pub fn create_context(params: &ContextParams) -> Result<Context> {
    let ctx = create_context_with(Arc::new(DummyBackend::new()))?;
    if params.timeout_ms != 0 {
        ctx.set_timeout(params.timeout_ms)?;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_is_sorted() {
        let ctx = create_context(&ContextParams::default()).unwrap();
        let ids: Vec<_> = ctx.devices().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, ["iio:device0", "iio:device1", "trigger0"]);

        let adc = ctx.find_device("dummy-adc").unwrap();
        let chans: Vec<_> = adc.channels().map(|c| c.id().to_string()).collect();
        assert_eq!(chans, ["voltage0", "voltage1", "temp"]);
        assert!(ctx.find_device("dummy-trigger").unwrap().is_trigger());
    }

    #[test]
    fn test_attribute_store() {
        let ctx = create_context(&ContextParams::default()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();
        assert_eq!(adc.read_attr_i64("sampling_frequency").unwrap(), 1000);
        adc.write_attr_i64("sampling_frequency", 2000).unwrap();
        assert_eq!(adc.read_attr("sampling_frequency").unwrap(), "2000");
        assert!(adc.read_attr("nope").unwrap_err().is_not_found());

        let v1 = adc.find_channel("voltage1", false).unwrap();
        assert_eq!(v1.read_attr_i64("raw").unwrap(), -3);
    }

    #[test]
    fn test_register_file() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = create_context_with(backend.clone()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();
        adc.reg_write(0x10, 0xbeef).unwrap();
        assert_eq!(backend.register(0x10), Some(0xbeef));
        assert_eq!(adc.reg_read(0x10).unwrap(), 0xbeef);
        assert_eq!(adc.reg_read(0x20).unwrap(), 0);
    }

    #[test]
    fn test_nonblocking_event_read() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = create_context_with(backend.clone()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();
        let mut source = backend.open_events(&adc).unwrap();
        assert_eq!(source.read(true).unwrap(), None);
        assert_eq!(backend.inject_event("iio:device0", Event::new(7, 1)), 1);
        assert_eq!(source.read(true).unwrap(), Some(Event::new(7, 1)));
    }

    #[test]
    fn test_closed_streams_are_pruned() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = create_context_with(backend.clone()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();

        let source = backend.open_events(&adc).unwrap();
        drop(source);
        assert_eq!(backend.inject_event("iio:device0", Event::new(7, 1)), 0);
        assert!(backend.streams.lock().is_empty());
    }

    #[test]
    fn test_open_rejects_overflowing_length() {
        let backend = DummyBackend::new();
        let ctx = create_context(&ContextParams::default()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();
        let mut mask = adc.create_channels_mask().unwrap();
        adc.find_channel("voltage0", false).unwrap().enable(&mut mask);

        let err = backend.open(&adc, usize::MAX, false, &mask).unwrap_err();
        assert!(matches!(err, IioError::InvalidArgument { .. }));
        assert!(backend.state.lock().sessions.is_empty());
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = create_context_with(backend.clone()).unwrap();
        let adc = ctx.find_device("iio:device0").unwrap();
        let mut mask = adc.create_channels_mask().unwrap();
        adc.find_channel("voltage0", false).unwrap().enable(&mut mask);

        backend.open(&adc, 4, false, &mask).unwrap();
        backend.set_blocking_mode(&adc, false).unwrap();
        let mut dst = [0u8; 8];
        let err = backend.read(&adc, &mut dst, &mut mask).unwrap_err();
        assert_eq!(err.errno(), libc::EAGAIN);

        backend.inject_samples(&[1, 0]);
        assert_eq!(backend.read(&adc, &mut dst, &mut mask).unwrap(), 2);
    }
}
