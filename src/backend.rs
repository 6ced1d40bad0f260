//! The backend operations contract.
//!
//! Every transport implements [`Backend`]. Each method corresponds to one
//! capability; the default implementation reports
//! [`IioError::NotSupported`] without touching any I/O, so a backend only
//! overrides what it can actually do. The device model calls these methods
//! and nothing else.

use crate::channel::Channel;
use crate::context::{Context, Version};
use crate::device::Device;
use crate::error::{IioError, Result};
use crate::events::EventSource;
use crate::mask::ChannelsMask;

/// Which attribute table of a device an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrScope {
    /// Regular device attribute
    Device,
    /// Debug attribute (debugfs)
    Debug,
    /// Buffer attribute
    Buffer,
}

/// Transport-specific implementation of the device model.
///
/// All methods take `&self`; implementations synchronise internally.
#[allow(unused_variables)]
pub trait Backend: Send + Sync {
    /// Short backend name, e.g. `network`.
    fn name(&self) -> &str;

    /// Open an independent context on the same target.
    fn clone_context(&self, ctx: &Context) -> Result<Context> {
        Err(IioError::NotSupported)
    }

    /// Start a capture or playback session on `dev`.
    fn open(&self, dev: &Device, samples: usize, cyclic: bool, mask: &ChannelsMask) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// End the session started by [`open`](Self::open).
    fn close(&self, dev: &Device) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// Read raw samples. `mask` is updated with the channels actually
    /// present in the data.
    fn read(&self, dev: &Device, dst: &mut [u8], mask: &mut ChannelsMask) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Write raw samples, returning the number of bytes accepted.
    fn write(&self, dev: &Device, src: &[u8]) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// File descriptor that becomes readable when data is available.
    fn poll_fd(&self, dev: &Device) -> Result<i32> {
        Err(IioError::NotSupported)
    }

    /// Switch between blocking and non-blocking buffer I/O.
    fn set_blocking_mode(&self, dev: &Device, blocking: bool) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// Number of kernel blocks backing the device buffer.
    fn set_kernel_buffers_count(&self, dev: &Device, count: u32) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// Exchange whole blocks with a high-speed transport.
    ///
    /// For output, the first `bytes_used` bytes of `block` are submitted.
    /// In both directions `block` is replaced with the next block and its
    /// length returned; `mask` is updated as in [`read`](Self::read).
    fn get_buffer(
        &self,
        dev: &Device,
        block: &mut Vec<u8>,
        bytes_used: usize,
        mask: &mut ChannelsMask,
    ) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Whether this transport uses [`get_buffer`](Self::get_buffer)
    /// instead of [`read`](Self::read)/[`write`](Self::write).
    fn is_high_speed(&self, dev: &Device) -> bool {
        false
    }

    /// Abort blocking buffer operations on `dev`.
    fn cancel(&self, dev: &Device) {}

    /// Read a device, debug or buffer attribute.
    fn read_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        buf: &mut [u8],
    ) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Write a device, debug or buffer attribute.
    fn write_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        data: &[u8],
    ) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Read a channel attribute.
    fn read_channel_attr(&self, chn: &Channel, attr: &str, buf: &mut [u8]) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Write a channel attribute.
    fn write_channel_attr(&self, chn: &Channel, attr: &str, data: &[u8]) -> Result<usize> {
        Err(IioError::NotSupported)
    }

    /// Trigger associated with `dev`.
    fn get_trigger(&self, dev: &Device) -> Result<Option<Device>> {
        Err(IioError::NotSupported)
    }

    /// Associate (or with `None`, remove) a trigger.
    fn set_trigger(&self, dev: &Device, trigger: Option<&Device>) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// Release transport resources. Called once, before the graph is freed.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Version of the remote side.
    fn version(&self) -> Result<Version> {
        Err(IioError::NotSupported)
    }

    /// I/O timeout in milliseconds (0 = none).
    fn set_timeout(&self, timeout_ms: u32) -> Result<()> {
        Err(IioError::NotSupported)
    }

    /// Open an event source for `dev`.
    fn open_events(&self, dev: &Device) -> Result<Box<dyn EventSource>> {
        Err(IioError::NotSupported)
    }
}
