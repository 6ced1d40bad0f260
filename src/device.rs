//! Devices: one hardware function block of a context.
//!
//! A [`Device`] is a handle (context plus position) into the context's
//! arena; it never owns data. Channel and attribute lists are fixed once
//! the context is built, so the accessors here hand out borrowed slices.

use std::fmt;

use tracing::debug;

use crate::backend::{AttrScope, Backend};
use crate::channel::{attr_text, nul_terminated, Channel, ChannelDesc, UserData, ATTR_BUF_SIZE};
use crate::context::{Context, DeviceEntry};
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

/// Debug attribute used for register access.
const REG_ACCESS_ATTR: &str = "direct_reg_access";

/// Static description of a device, as produced by a backend or parsed from
/// a topology description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDesc {
    /// Stable identifier, e.g. `iio:device0`
    pub id: String,
    /// Driver-provided name
    pub name: Option<String>,
    /// Board-provided label
    pub label: Option<String>,
    /// Channels, in any order
    pub channels: Vec<ChannelDesc>,
    /// Device attribute names
    pub attrs: Vec<String>,
    /// Debug attribute names
    pub debug_attrs: Vec<String>,
    /// Buffer attribute names
    pub buffer_attrs: Vec<String>,
}

impl DeviceDesc {
    /// Empty device with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the driver name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a channel.
    pub fn with_channel(mut self, channel: ChannelDesc) -> Self {
        self.channels.push(channel);
        self
    }

    /// Append a device attribute name.
    pub fn with_attr(mut self, name: impl Into<String>) -> Self {
        self.attrs.push(name.into());
        self
    }

    /// Append a debug attribute name.
    pub fn with_debug_attr(mut self, name: impl Into<String>) -> Self {
        self.debug_attrs.push(name.into());
        self
    }

    /// Append a buffer attribute name.
    pub fn with_buffer_attr(mut self, name: impl Into<String>) -> Self {
        self.buffer_attrs.push(name.into());
        self
    }
}

/// Handle to one device of a context.
///
/// Cloning is cheap and keeps the context alive.
#[derive(Clone)]
pub struct Device {
    ctx: Context,
    index: usize,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("channels", &self.channels_count())
            .finish()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.ctx.ptr_eq(&other.ctx) && self.index == other.index
    }
}

impl Eq for Device {}

impl Device {
    pub(crate) fn new(ctx: Context, index: usize) -> Self {
        Self { ctx, index }
    }

    pub(crate) fn entry(&self) -> &DeviceEntry {
        self.ctx.device_entry(self.index)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.ctx.backend()
    }

    /// Owning context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Stable identifier, e.g. `iio:device0`.
    pub fn id(&self) -> &str {
        &self.entry().id
    }

    /// Driver-provided name.
    pub fn name(&self) -> Option<&str> {
        self.entry().name.as_deref()
    }

    /// Board-provided label.
    pub fn label(&self) -> Option<&str> {
        self.entry().label.as_deref()
    }

    /// Whether this device is a trigger: its id starts with `trigger`, it
    /// has a name and no channels.
    pub fn is_trigger(&self) -> bool {
        self.channels_count() == 0 && self.name().is_some() && self.id().starts_with("trigger")
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    /// Number of channels.
    pub fn channels_count(&self) -> usize {
        self.entry().channels.len()
    }

    /// Channel at position `index` of the sorted list.
    pub fn channel(&self, index: usize) -> Option<Channel> {
        (index < self.channels_count()).then(|| Channel::new(self.clone(), index))
    }

    /// All channels in sorted order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        (0..self.channels_count()).map(|i| Channel::new(self.clone(), i))
    }

    /// Find a channel by id or name and direction.
    pub fn find_channel(&self, name: &str, output: bool) -> Option<Channel> {
        self.channels().find(|chn| {
            chn.is_output() == output && (chn.id() == name || chn.name() == Some(name))
        })
    }

    /// Words needed by a mask for this device.
    pub fn mask_word_count(&self) -> usize {
        self.channels_count().div_ceil(32)
    }

    /// Create an all-clear mask sized for this device.
    ///
    /// # Errors
    ///
    /// [`IioError::InvalidArgument`] if the device has no channels.
    pub fn create_channels_mask(&self) -> Result<ChannelsMask> {
        ChannelsMask::new(self.channels_count())
    }

    /// Bytes per sample for the channels selected in `mask`.
    ///
    /// Every enabled scan element is aligned to its own size, channels that
    /// share a scan index share storage, and the total is padded to the
    /// largest element.
    ///
    /// # Errors
    ///
    /// [`IioError::SizeMismatch`] if `mask` was not sized for this device.
    pub fn sample_size(&self, mask: &ChannelsMask) -> Result<usize> {
        if mask.word_count() != self.mask_word_count() {
            return Err(IioError::SizeMismatch {
                expected: self.mask_word_count(),
                actual: mask.word_count(),
            });
        }

        let mut size = 0usize;
        let mut largest = 1usize;
        let mut prev_index = None;

        for chn in self.channels() {
            let Some(index) = chn.scan_index() else {
                break;
            };
            if !mask.test_bit(chn.number()) {
                continue;
            }
            if prev_index == Some(index) {
                continue;
            }
            prev_index = Some(index);

            let length = chn.data_format().sample_bytes();
            if length == 0 {
                continue;
            }
            largest = largest.max(length);
            if size % length != 0 {
                size += 2 * length - (size % length);
            } else {
                size += length;
            }
        }

        if size % largest != 0 {
            size += largest - (size % largest);
        }
        Ok(size)
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Device attribute names, sorted.
    pub fn attrs(&self) -> &[String] {
        &self.entry().attrs
    }

    /// Debug attribute names, sorted.
    pub fn debug_attrs(&self) -> &[String] {
        &self.entry().debug_attrs
    }

    /// Buffer attribute names, sorted.
    pub fn buffer_attrs(&self) -> &[String] {
        &self.entry().buffer_attrs
    }

    /// Attribute names of the given scope.
    pub fn attr_names(&self, scope: AttrScope) -> &[String] {
        match scope {
            AttrScope::Device => self.attrs(),
            AttrScope::Debug => self.debug_attrs(),
            AttrScope::Buffer => self.buffer_attrs(),
        }
    }

    /// Whether an attribute of the given scope exists.
    pub fn has_attr(&self, scope: AttrScope, name: &str) -> bool {
        self.attr_names(scope).iter().any(|a| a == name)
    }

    /// Read an attribute into `buf`, returning the number of bytes written.
    pub fn read_attr_raw(&self, scope: AttrScope, attr: &str, buf: &mut [u8]) -> Result<usize> {
        self.backend().read_device_attr(self, attr, scope, buf)
    }

    /// Write raw bytes to an attribute.
    pub fn write_attr_raw(&self, scope: AttrScope, attr: &str, data: &[u8]) -> Result<usize> {
        self.backend().write_device_attr(self, attr, scope, data)
    }

    fn read_text(&self, scope: AttrScope, attr: &str) -> Result<String> {
        let mut buf = vec![0u8; ATTR_BUF_SIZE];
        let len = self.read_attr_raw(scope, attr, &mut buf)?;
        Ok(attr_text(&buf[..len]))
    }

    fn write_text(&self, scope: AttrScope, attr: &str, value: &str) -> Result<usize> {
        self.write_attr_raw(scope, attr, &nul_terminated(value))
    }

    /// Read a device attribute as text.
    pub fn read_attr(&self, attr: &str) -> Result<String> {
        self.read_text(AttrScope::Device, attr)
    }

    /// Write a device attribute.
    pub fn write_attr(&self, attr: &str, value: &str) -> Result<usize> {
        self.write_text(AttrScope::Device, attr, value)
    }

    /// Read a debug attribute as text.
    pub fn read_debug_attr(&self, attr: &str) -> Result<String> {
        self.read_text(AttrScope::Debug, attr)
    }

    /// Write a debug attribute.
    pub fn write_debug_attr(&self, attr: &str, value: &str) -> Result<usize> {
        self.write_text(AttrScope::Debug, attr, value)
    }

    /// Read a buffer attribute as text.
    pub fn read_buffer_attr(&self, attr: &str) -> Result<String> {
        self.read_text(AttrScope::Buffer, attr)
    }

    /// Write a buffer attribute.
    pub fn write_buffer_attr(&self, attr: &str, value: &str) -> Result<usize> {
        self.write_text(AttrScope::Buffer, attr, value)
    }

    /// Read a device attribute as an integer.
    pub fn read_attr_i64(&self, attr: &str) -> Result<i64> {
        parse_long(&self.read_attr(attr)?)
    }

    /// Read a device attribute as a float.
    pub fn read_attr_f64(&self, attr: &str) -> Result<f64> {
        let text = self.read_attr(attr)?;
        text.trim()
            .parse()
            .map_err(|_| IioError::invalid(format!("'{text}' is not a number")))
    }

    /// Read a device attribute as a boolean (non-zero is true).
    pub fn read_attr_bool(&self, attr: &str) -> Result<bool> {
        Ok(self.read_attr_i64(attr)? != 0)
    }

    /// Write an integer device attribute.
    pub fn write_attr_i64(&self, attr: &str, value: i64) -> Result<()> {
        self.write_attr(attr, &value.to_string()).map(|_| ())
    }

    /// Write a float device attribute.
    pub fn write_attr_f64(&self, attr: &str, value: f64) -> Result<()> {
        self.write_attr(attr, &value.to_string()).map(|_| ())
    }

    /// Write a boolean device attribute as `1` or `0`.
    pub fn write_attr_bool(&self, attr: &str, value: bool) -> Result<()> {
        self.write_attr(attr, if value { "1" } else { "0" }).map(|_| ())
    }

    /// Write a hardware register through the `direct_reg_access` debug
    /// attribute.
    pub fn reg_write(&self, address: u32, value: u32) -> Result<()> {
        self.write_debug_attr(REG_ACCESS_ATTR, &format!("0x{address:x} 0x{value:x}"))
            .map(|_| ())
    }

    /// Read a hardware register through the `direct_reg_access` debug
    /// attribute.
    pub fn reg_read(&self, address: u32) -> Result<u32> {
        self.write_debug_attr(REG_ACCESS_ATTR, &format!("0x{address:x}"))?;
        let value = parse_long(&self.read_debug_attr(REG_ACCESS_ATTR)?)?;
        u32::try_from(value).map_err(|_| IioError::invalid(format!("register value {value} out of range")))
    }

    // ------------------------------------------------------------------------
    // Triggers and kernel buffers
    // ------------------------------------------------------------------------

    /// Trigger currently associated with this device, if any.
    pub fn trigger(&self) -> Result<Option<Device>> {
        self.backend().get_trigger(self)
    }

    /// Associate a trigger with this device, or remove it with `None`.
    ///
    /// # Errors
    ///
    /// [`IioError::InvalidArgument`] if `trigger` is not a trigger device.
    pub fn set_trigger(&self, trigger: Option<&Device>) -> Result<()> {
        if let Some(trigger) = trigger {
            if !trigger.is_trigger() {
                return Err(IioError::invalid(format!(
                    "'{}' is not a trigger",
                    trigger.id()
                )));
            }
        }
        debug!(device = %self.id(), trigger = ?trigger.map(Device::id), "Setting trigger");
        self.backend().set_trigger(self, trigger)
    }

    /// Number of blocks the kernel allocates for this device's buffer.
    pub fn set_kernel_buffers_count(&self, count: u32) -> Result<()> {
        if count == 0 {
            return Err(IioError::invalid("kernel buffer count must be non-zero"));
        }
        self.backend().set_kernel_buffers_count(self, count)
    }

    /// Attach application data, replacing any previous value.
    pub fn set_user_data(&self, data: Option<UserData>) {
        *self.entry().user_data.write() = data;
    }

    /// Application data previously attached.
    pub fn user_data(&self) -> Option<UserData> {
        self.entry().user_data.read().clone()
    }
}

/// Parse an integer the way sysfs prints them: decimal, or hexadecimal with
/// a `0x` prefix, optionally signed.
pub(crate) fn parse_long(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| IioError::invalid(format!("'{trimmed}' is not an integer")))?;
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long() {
        assert_eq!(parse_long("42").unwrap(), 42);
        assert_eq!(parse_long(" -7\n").unwrap(), -7);
        assert_eq!(parse_long("0x1f").unwrap(), 31);
        assert_eq!(parse_long("+3").unwrap(), 3);
        assert!(parse_long("abc").is_err());
        assert!(parse_long("").is_err());
    }

    #[test]
    fn test_desc_builder() {
        let desc = DeviceDesc::new("iio:device3")
            .with_name("adc")
            .with_attr("sampling_frequency")
            .with_debug_attr("direct_reg_access")
            .with_buffer_attr("length")
            .with_channel(ChannelDesc::new("voltage0", false));
        assert_eq!(desc.id, "iio:device3");
        assert_eq!(desc.name.as_deref(), Some("adc"));
        assert_eq!(desc.attrs, ["sampling_frequency"]);
        assert_eq!(desc.debug_attrs, ["direct_reg_access"]);
        assert_eq!(desc.buffer_attrs, ["length"]);
        assert_eq!(desc.channels.len(), 1);
    }
}
