//! Backend for targets reached through an iiod daemon.
//!
//! [`RemoteBackend`] maps every backend operation onto one
//! [`IiodClient`] exchange. The network and serial transports differ only in
//! the stream they hand to the client.

use std::fmt;

use tracing::debug;

use crate::backend::{AttrScope, Backend};
use crate::channel::Channel;
use crate::context::{Context, Version};
use crate::device::Device;
use crate::error::{IioError, Result};
use crate::iiod::{AttrTarget, IiodClient};
use crate::lock::timeout_from_ms;
use crate::mask::ChannelsMask;

/// Opens a fresh context on the same target.
pub type Reconnect = Box<dyn Fn() -> Result<Context> + Send + Sync>;

/// Backend speaking the iiod protocol.
pub struct RemoteBackend {
    name: &'static str,
    client: IiodClient,
    reconnect: Option<Reconnect>,
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("name", &self.name)
            .field("reconnect", &self.reconnect.is_some())
            .finish()
    }
}

impl RemoteBackend {
    /// Backend called `name` over an established client.
    pub fn new(name: &'static str, client: IiodClient) -> Self {
        Self {
            name,
            client,
            reconnect: None,
        }
    }

    /// Enable [`Context::try_clone`] by giving the backend a way to open a
    /// new connection.
    pub fn with_reconnect(mut self, reconnect: Reconnect) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// The underlying protocol client.
    pub fn client(&self) -> &IiodClient {
        &self.client
    }
}

fn scope_target(scope: AttrScope) -> AttrTarget<'static> {
    match scope {
        AttrScope::Device => AttrTarget::Device,
        AttrScope::Debug => AttrTarget::Debug,
        AttrScope::Buffer => AttrTarget::Buffer,
    }
}

fn channel_target(chn: &Channel) -> AttrTarget<'_> {
    AttrTarget::Channel {
        id: chn.id(),
        output: chn.is_output(),
    }
}

/// Remote timeout for a local timeout: the daemon gets half, so its own
/// I/O fails before the client gives up on the reply.
fn remote_timeout_ms(timeout_ms: u32) -> u32 {
    timeout_ms / 2
}

impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn clone_context(&self, _ctx: &Context) -> Result<Context> {
        match &self.reconnect {
            Some(reconnect) => reconnect(),
            None => Err(IioError::NotSupported),
        }
    }

    fn open(&self, dev: &Device, samples: usize, cyclic: bool, mask: &ChannelsMask) -> Result<()> {
        self.client.open(dev.id(), samples, cyclic, mask)
    }

    fn close(&self, dev: &Device) -> Result<()> {
        self.client.close(dev.id())
    }

    fn read(&self, dev: &Device, dst: &mut [u8], mask: &mut ChannelsMask) -> Result<usize> {
        self.client.read_buffer(dev.id(), dst, mask)
    }

    fn write(&self, dev: &Device, src: &[u8]) -> Result<usize> {
        self.client.write_buffer(dev.id(), src)
    }

    fn set_kernel_buffers_count(&self, dev: &Device, count: u32) -> Result<()> {
        self.client.set_kernel_buffers_count(dev.id(), count)
    }

    fn read_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.client.read_attr(dev.id(), scope_target(scope), attr, buf)
    }

    fn write_device_attr(
        &self,
        dev: &Device,
        attr: &str,
        scope: AttrScope,
        data: &[u8],
    ) -> Result<usize> {
        self.client.write_attr(dev.id(), scope_target(scope), attr, data)
    }

    fn read_channel_attr(&self, chn: &Channel, attr: &str, buf: &mut [u8]) -> Result<usize> {
        self.client
            .read_attr(chn.device().id(), channel_target(chn), attr, buf)
    }

    fn write_channel_attr(&self, chn: &Channel, attr: &str, data: &[u8]) -> Result<usize> {
        self.client
            .write_attr(chn.device().id(), channel_target(chn), attr, data)
    }

    fn get_trigger(&self, dev: &Device) -> Result<Option<Device>> {
        let Some(name) = self.client.get_trigger(dev.id())? else {
            return Ok(None);
        };
        dev.context()
            .devices()
            .find(|cur| cur.is_trigger() && cur.name() == Some(name.as_str()))
            .map(Some)
            .ok_or_else(|| IioError::not_found(format!("trigger '{name}'")))
    }

    fn set_trigger(&self, dev: &Device, trigger: Option<&Device>) -> Result<()> {
        self.client.set_trigger(dev.id(), trigger.map(Device::id))
    }

    fn version(&self) -> Result<Version> {
        self.client.version()
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<()> {
        self.client.set_remote_timeout(remote_timeout_ms(timeout_ms))?;
        self.client.set_stream_timeout(timeout_from_ms(timeout_ms))?;
        debug!(backend = self.name, timeout_ms, "Timeout updated");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        debug!(backend = self.name, "Closing iiod connection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_timeout_is_half() {
        assert_eq!(remote_timeout_ms(5000), 2500);
        assert_eq!(remote_timeout_ms(1), 0);
        assert_eq!(remote_timeout_ms(0), 0);
    }

    #[test]
    fn test_scope_targets() {
        assert_eq!(scope_target(AttrScope::Device), AttrTarget::Device);
        assert_eq!(scope_target(AttrScope::Debug), AttrTarget::Debug);
        assert_eq!(scope_target(AttrScope::Buffer), AttrTarget::Buffer);
    }
}
