//! Hardware events.
//!
//! Devices report threshold crossings, gestures and similar conditions as
//! 64-bit codes with the kernel layout:
//!
//! | bits  | field                         |
//! |-------|-------------------------------|
//! | 0-15  | channel id                    |
//! | 16-31 | second channel id (diff pair) |
//! | 32-39 | channel type                  |
//! | 40-47 | modifier                      |
//! | 48-54 | direction                     |
//! | 55    | differential flag             |
//! | 56-63 | event type                    |
//!
//! [`Event::channel`] resolves a code back to a [`Channel`] of the device.

use tracing::{debug, warn};

use crate::channel::{Channel, ChannelType, Modifier};
use crate::device::Device;
use crate::error::{IioError, Result};

const DIFF_BIT: u64 = 1 << 55;

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventType {
    Thresh,
    Mag,
    Roc,
    ThreshAdaptive,
    MagAdaptive,
    Change,
    MagReferenced,
    Gesture,
}

impl EventType {
    const ALL: [Self; 8] = [
        Self::Thresh,
        Self::Mag,
        Self::Roc,
        Self::ThreshAdaptive,
        Self::MagAdaptive,
        Self::Change,
        Self::MagReferenced,
        Self::Gesture,
    ];

    /// Type for a raw kernel value.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }
}

/// Direction qualifier of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventDirection {
    Either,
    Rising,
    Falling,
    None,
    SingleTap,
    DoubleTap,
}

impl EventDirection {
    const ALL: [Self; 6] = [
        Self::Either,
        Self::Rising,
        Self::Falling,
        Self::None,
        Self::SingleTap,
        Self::DoubleTap,
    ];

    /// Direction for a raw kernel value.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }
}

/// One event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Packed event code
    pub id: u64,
    /// Kernel timestamp in nanoseconds
    pub timestamp: i64,
}

impl Event {
    /// Wrap a raw record.
    pub fn new(id: u64, timestamp: i64) -> Self {
        Self { id, timestamp }
    }

    /// Pack an event code from its fields.
    ///
    /// `chan2` is only meaningful when `diff` is set.
    pub fn encode(
        event_type: EventType,
        direction: EventDirection,
        chan_type: ChannelType,
        modifier: Modifier,
        chan: i16,
        chan2: i16,
        diff: bool,
    ) -> u64 {
        let chan_type = u64::from(chan_type_raw(chan_type));
        let modifier = u64::from(modifier_raw(modifier));
        let diff = if diff { DIFF_BIT } else { 0 };
        (event_type as u64) << 56
            | diff
            | (direction as u64 & 0x7f) << 48
            | modifier << 40
            | chan_type << 32
            | u64::from(chan2 as u16) << 16
            | u64::from(chan as u16)
    }

    /// Raw channel type field.
    pub fn raw_channel_type(&self) -> u8 {
        (self.id >> 32) as u8
    }

    /// Raw modifier field.
    pub fn raw_modifier(&self) -> u8 {
        (self.id >> 40) as u8
    }

    /// Decoded channel type.
    pub fn channel_type(&self) -> Option<ChannelType> {
        ChannelType::from_raw(self.raw_channel_type())
    }

    /// Decoded modifier.
    pub fn modifier(&self) -> Option<Modifier> {
        Modifier::from_raw(self.raw_modifier())
    }

    /// Decoded event type.
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_raw((self.id >> 56) as u8)
    }

    /// Decoded direction.
    pub fn direction(&self) -> Option<EventDirection> {
        EventDirection::from_raw(((self.id >> 48) & 0x7f) as u8)
    }

    /// Whether the event concerns a differential channel pair.
    pub fn is_differential(&self) -> bool {
        self.id & DIFF_BIT != 0
    }

    /// Channel id field; the second id of the pair when `diff` is set.
    pub fn channel_id(&self, diff: bool) -> i16 {
        let shift = if diff { 16 } else { 0 };
        (self.id >> shift) as u16 as i16
    }

    /// Resolve the channel this event refers to.
    ///
    /// Returns `None` when the event does not map onto a modelled channel;
    /// that is a normal outcome, not an error. Ids beyond the device's
    /// channel count are logged as malformed.
    pub fn channel(&self, dev: &Device, diff: bool) -> Option<Channel> {
        if diff && !self.is_differential() {
            return None;
        }

        let chid = self.channel_id(diff);
        if chid < 0 {
            return None;
        }
        if chid as usize >= dev.channels_count() {
            warn!(
                device = %dev.id(),
                channel_id = chid,
                code = format_args!("{:#018x}", self.id),
                "Event refers to a channel id beyond the device's channel count"
            );
            return None;
        }

        let chan_type = self.channel_type();
        let modifier = self.modifier();

        dev.channels().find(|chn| {
            if Some(chn.channel_type()) != chan_type || Some(chn.modifier()) != modifier {
                return false;
            }
            let index: String = chn
                .id()
                .trim_start_matches(|c: char| c.is_ascii_alphabetic())
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if index.is_empty() {
                return chid <= 0;
            }
            index.parse::<i64>().is_ok_and(|n| n == i64::from(chid))
        })
    }
}

fn chan_type_raw(chan_type: ChannelType) -> u8 {
    (0..=u8::MAX)
        .find(|&raw| ChannelType::from_raw(raw) == Some(chan_type))
        .unwrap_or(u8::MAX)
}

fn modifier_raw(modifier: Modifier) -> u8 {
    (0..=u8::MAX)
        .find(|&raw| Modifier::from_raw(raw) == Some(modifier))
        .unwrap_or(0)
}

/// Backend side of an event stream.
///
/// A backend returns one of these from
/// [`Backend::open_events`](crate::backend::Backend::open_events). Both
/// methods have defaults, so a source that can be opened but not read
/// reports [`IioError::NotSupported`].
#[allow(unused_variables)]
pub trait EventSource: Send {
    /// Read the next event.
    ///
    /// Blocking reads wait until an event arrives or the transport fails.
    /// Non-blocking reads return `Ok(None)` when nothing is pending.
    fn read(&mut self, nonblock: bool) -> Result<Option<Event>> {
        Err(IioError::NotSupported)
    }

    /// Release transport resources.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Per-device stream of hardware events.
///
/// Dropping the stream closes it; close failures are logged.
pub struct EventStream {
    dev: Device,
    source: Option<Box<dyn EventSource>>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("device", &self.dev.id())
            .field("open", &self.source.is_some())
            .finish()
    }
}

impl EventStream {
    /// Open the event stream of `dev`.
    ///
    /// # Errors
    ///
    /// [`IioError::NotSupported`] if the backend has no event support,
    /// otherwise whatever the backend reports.
    pub fn open(dev: &Device) -> Result<Self> {
        let source = dev.backend().open_events(dev)?;
        debug!(device = %dev.id(), "Event stream opened");
        Ok(Self {
            dev: dev.clone(),
            source: Some(source),
        })
    }

    /// Device this stream belongs to.
    pub fn device(&self) -> &Device {
        &self.dev
    }

    /// Read one event; see [`EventSource::read`].
    pub fn read(&mut self, nonblock: bool) -> Result<Option<Event>> {
        match self.source.as_mut() {
            Some(source) => source.read(nonblock),
            None => Err(IioError::invalid("event stream is closed")),
        }
    }

    /// Close the stream. Always releases the handle; backend failures are
    /// logged.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!(device = %self.dev.id(), error = %e, "Failed to close event stream");
            } else {
                debug!(device = %self.dev.id(), "Event stream closed");
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.release();
    }
}
