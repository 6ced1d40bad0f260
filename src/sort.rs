//! Deterministic enumeration order.
//!
//! Applied once when a context is built, after every device and channel
//! has its identifying fields set:
//!
//! - devices ascending by id;
//! - scan elements before other channels, ascending by scan index, ties
//!   broken by ascending shift; other channels keep their relative order;
//! - every attribute list ascending by name.

use std::cmp::Ordering;

use crate::channel::ChannelDesc;
use crate::context::ContextDesc;
use crate::device::DeviceDesc;

/// Ordering between two channels of the same device.
pub fn compare_channels(a: &ChannelDesc, b: &ChannelDesc) -> Ordering {
    match (a.scan_index, b.scan_index) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.format.shift.cmp(&b.format.shift)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ordering between two devices.
pub fn compare_devices(a: &DeviceDesc, b: &DeviceDesc) -> Ordering {
    a.id.cmp(&b.id)
}

/// Sort a device's channels and every attribute list it holds.
pub fn sort_device(dev: &mut DeviceDesc) {
    dev.channels.sort_by(compare_channels);
    for chn in &mut dev.channels {
        chn.attrs.sort_by(|a, b| a.name.cmp(&b.name));
    }
    dev.attrs.sort();
    dev.debug_attrs.sort();
    dev.buffer_attrs.sort();
}

/// Sort a whole topology in place.
pub fn sort_context(ctx: &mut ContextDesc) {
    ctx.devices.sort_by(compare_devices);
    for dev in &mut ctx.devices {
        sort_device(dev);
    }
}
