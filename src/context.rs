//! Contexts: the root of the device graph.
//!
//! A [`Context`] owns its devices and their channels in flat vectors.
//! [`Device`] and [`Channel`] handles refer back into those vectors by
//! position, so the graph holds no reference cycles. The backend that
//! performs the actual I/O is shared behind an `Arc<dyn Backend>`.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::channel::{Channel, ChannelDesc, ChannelType, Modifier, UserData};
use crate::device::{Device, DeviceDesc};
use crate::error::{IioError, Result};
use crate::sort;

/// Static description of a whole topology.
///
/// Backends build one of these (directly or by parsing a topology
/// document) and hand it to [`Context::new`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextDesc {
    /// Backend name, e.g. `network`
    pub name: String,
    /// Free-form description of the target
    pub description: String,
    /// Context attributes, in insertion order
    pub attrs: Vec<(String, String)>,
    /// Devices, in any order
    pub devices: Vec<DeviceDesc>,
}

impl ContextDesc {
    /// Empty topology with the given backend name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append or replace a context attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((key, value)),
        }
    }
}

/// Protocol or library version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Short git tag of the build; empty when the build has none
    pub git_tag: String,
}

impl Version {
    /// Version of this library.
    pub fn library() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            git_tag: option_env!("IIO_GIT_TAG").unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if !self.git_tag.is_empty() {
            write!(f, " (git tag: {})", self.git_tag)?;
        }
        Ok(())
    }
}

pub(crate) struct ChannelEntry {
    pub(crate) desc: ChannelDesc,
    pub(crate) chan_type: ChannelType,
    pub(crate) modifier: Modifier,
    pub(crate) user_data: RwLock<Option<UserData>>,
}

pub(crate) struct DeviceEntry {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) label: Option<String>,
    pub(crate) channels: Vec<ChannelEntry>,
    pub(crate) attrs: Vec<String>,
    pub(crate) debug_attrs: Vec<String>,
    pub(crate) buffer_attrs: Vec<String>,
    pub(crate) user_data: RwLock<Option<UserData>>,
}

impl DeviceEntry {
    fn from_desc(desc: DeviceDesc) -> Result<Self> {
        check_scan_indices(&desc)?;
        let channels = desc
            .channels
            .into_iter()
            .map(|desc| ChannelEntry {
                chan_type: ChannelType::from_channel_id(&desc.id),
                modifier: Modifier::from_channel_id(&desc.id),
                desc,
                user_data: RwLock::new(None),
            })
            .collect();

        Ok(Self {
            id: desc.id,
            name: desc.name,
            label: desc.label,
            channels,
            attrs: desc.attrs,
            debug_attrs: desc.debug_attrs,
            buffer_attrs: desc.buffer_attrs,
            user_data: RwLock::new(None),
        })
    }

    fn to_desc(&self) -> DeviceDesc {
        DeviceDesc {
            id: self.id.clone(),
            name: self.name.clone(),
            label: self.label.clone(),
            channels: self.channels.iter().map(|c| c.desc.clone()).collect(),
            attrs: self.attrs.clone(),
            debug_attrs: self.debug_attrs.clone(),
            buffer_attrs: self.buffer_attrs.clone(),
        }
    }
}

/// Scan elements of one direction may only share an index when they sit at
/// different shifts of the same storage word.
fn check_scan_indices(desc: &DeviceDesc) -> Result<()> {
    let mut seen = HashSet::new();
    for chn in &desc.channels {
        if let Some(index) = chn.scan_index {
            if !seen.insert((chn.is_output, index, chn.format.shift)) {
                return Err(IioError::invalid(format!(
                    "device '{}': duplicate scan index {} (channel '{}')",
                    desc.id, index, chn.id
                )));
            }
        }
    }
    Ok(())
}

struct ContextInner {
    backend: Arc<dyn Backend>,
    name: String,
    description: String,
    attrs: Vec<(String, String)>,
    devices: Vec<DeviceEntry>,
    timeout_ms: AtomicU32,
    xml: Option<String>,
    shut_down: AtomicBool,
}

impl ContextInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(backend = %self.name, "Shutting down context");
        if let Err(e) = self.backend.shutdown() {
            warn!(backend = %self.name, error = %e, "Backend shutdown failed");
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a connected set of devices.
///
/// Cloning is cheap; the context and its backend are released when the last
/// handle (including [`Device`] and [`Channel`] handles) is dropped.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

impl Context {
    /// Build a context from a backend and a topology description.
    ///
    /// The description is sorted into canonical order before the graph is
    /// built.
    ///
    /// # Errors
    ///
    /// [`IioError::InvalidArgument`] if a device has two scan elements with
    /// the same index and shift.
    pub fn new(backend: Arc<dyn Backend>, desc: ContextDesc) -> Result<Self> {
        Self::with_xml(backend, desc, None)
    }

    /// Like [`Context::new`], also caching the topology document the
    /// description was parsed from.
    pub fn with_xml(
        backend: Arc<dyn Backend>,
        mut desc: ContextDesc,
        xml: Option<String>,
    ) -> Result<Self> {
        sort::sort_context(&mut desc);

        let devices = desc
            .devices
            .into_iter()
            .map(DeviceEntry::from_desc)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            backend = %desc.name,
            devices = devices.len(),
            "Context created"
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                backend,
                name: desc.name,
                description: desc.description,
                attrs: desc.attrs,
                devices,
                timeout_ms: AtomicU32::new(0),
                xml,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub(crate) fn device_entry(&self, index: usize) -> &DeviceEntry {
        &self.inner.devices[index]
    }

    /// Whether two handles refer to the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Backend name, e.g. `network` or `xml`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Free-form description of the target.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Context attributes as key/value pairs.
    pub fn attrs(&self) -> &[(String, String)] {
        &self.inner.attrs
    }

    /// Value of a context attribute.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.inner
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of devices.
    pub fn devices_count(&self) -> usize {
        self.inner.devices.len()
    }

    /// Device at position `index` of the sorted list.
    pub fn device(&self, index: usize) -> Option<Device> {
        (index < self.devices_count()).then(|| Device::new(self.clone(), index))
    }

    /// All devices in sorted order.
    pub fn devices(&self) -> impl Iterator<Item = Device> + '_ {
        (0..self.devices_count()).map(|i| Device::new(self.clone(), i))
    }

    /// Find a device by id, label or name (in that order of precedence).
    pub fn find_device(&self, name: &str) -> Option<Device> {
        self.devices()
            .find(|d| d.id() == name)
            .or_else(|| self.devices().find(|d| d.label() == Some(name)))
            .or_else(|| self.devices().find(|d| d.name() == Some(name)))
    }

    /// Current I/O timeout in milliseconds (0 = none).
    pub fn timeout_ms(&self) -> u32 {
        self.inner.timeout_ms.load(Ordering::Relaxed)
    }

    /// Set the I/O timeout and forward it to the backend.
    ///
    /// Backends that have no notion of a timeout accept any value.
    pub fn set_timeout(&self, timeout_ms: u32) -> Result<()> {
        match self.backend().set_timeout(timeout_ms) {
            Ok(()) | Err(IioError::NotSupported) => {}
            Err(e) => return Err(e),
        }
        self.inner.timeout_ms.store(timeout_ms, Ordering::Relaxed);
        debug!(backend = %self.name(), timeout_ms, "Timeout updated");
        Ok(())
    }

    /// Version reported by the backend, or the library version when the
    /// backend has none of its own.
    pub fn version(&self) -> Result<Version> {
        match self.backend().version() {
            Err(IioError::NotSupported) => Ok(Version::library()),
            other => other,
        }
    }

    /// Open a second, independent context on the same target.
    pub fn try_clone(&self) -> Result<Context> {
        self.backend().clone_context(self)
    }

    /// Snapshot of the topology as a description.
    pub fn to_desc(&self) -> ContextDesc {
        ContextDesc {
            name: self.inner.name.clone(),
            description: self.inner.description.clone(),
            attrs: self.inner.attrs.clone(),
            devices: self.inner.devices.iter().map(DeviceEntry::to_desc).collect(),
        }
    }

    /// Topology document: the cached copy if the backend supplied one,
    /// otherwise freshly serialised.
    pub fn xml(&self) -> Result<String> {
        match &self.inner.xml {
            Some(xml) => Ok(xml.clone()),
            None => crate::xml::to_xml(&self.to_desc()),
        }
    }

    /// Release backend resources now.
    ///
    /// Failures are logged, never returned. Handles that outlive this call
    /// keep the graph readable but further I/O is up to the backend.
    pub fn shutdown(self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DataFormat;

    struct NullBackend;

    impl Backend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
    }

    fn s16() -> DataFormat {
        "le:s16/16>>0".parse().unwrap()
    }

    fn topology() -> ContextDesc {
        ContextDesc {
            name: "null".into(),
            description: "test".into(),
            attrs: vec![("uri".into(), "null:".into())],
            devices: vec![
                DeviceDesc::new("iio:device1").with_name("dac"),
                DeviceDesc::new("iio:device0")
                    .with_name("adc")
                    .with_channel(ChannelDesc::new("temp", false))
                    .with_channel(ChannelDesc::new("voltage1", false).with_scan_element(1, s16()))
                    .with_channel(ChannelDesc::new("voltage0", false).with_scan_element(0, s16())),
            ],
        }
    }

    #[test]
    fn test_context_sorted_on_creation() {
        let ctx = Context::new(Arc::new(NullBackend), topology()).unwrap();
        let ids: Vec<_> = ctx.devices().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, ["iio:device0", "iio:device1"]);

        let dev = ctx.device(0).unwrap();
        let chans: Vec<_> = dev.channels().map(|c| c.id().to_string()).collect();
        assert_eq!(chans, ["voltage0", "voltage1", "temp"]);
        assert_eq!(dev.channel(2).unwrap().channel_type(), ChannelType::Temp);
    }

    #[test]
    fn test_duplicate_scan_index_rejected() {
        let mut desc = topology();
        desc.devices[1]
            .channels
            .push(ChannelDesc::new("voltage9", false).with_scan_element(0, s16()));
        assert!(matches!(
            Context::new(Arc::new(NullBackend), desc),
            Err(IioError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_find_device_by_name_and_id() {
        let ctx = Context::new(Arc::new(NullBackend), topology()).unwrap();
        assert_eq!(ctx.find_device("dac").unwrap().id(), "iio:device1");
        assert_eq!(ctx.find_device("iio:device0").unwrap().name(), Some("adc"));
        assert!(ctx.find_device("nope").is_none());
        assert_eq!(ctx.attr("uri"), Some("null:"));
    }

    #[test]
    fn test_unsupported_slots_fall_back() {
        let ctx = Context::new(Arc::new(NullBackend), topology()).unwrap();
        assert_eq!(ctx.version().unwrap(), Version::library());
        ctx.set_timeout(1500).unwrap();
        assert_eq!(ctx.timeout_ms(), 1500);
        assert!(ctx.try_clone().unwrap_err().is_not_supported());
    }

    #[test]
    fn test_to_desc_matches_sorted_input() {
        let ctx = Context::new(Arc::new(NullBackend), topology()).unwrap();
        let mut expected = topology();
        sort::sort_context(&mut expected);
        assert_eq!(ctx.to_desc(), expected);
    }

    #[test]
    fn test_version_display() {
        let tagged = Version {
            major: 0,
            minor: 26,
            git_tag: "a0eca0d".to_string(),
        };
        assert_eq!(tagged.to_string(), "0.26 (git tag: a0eca0d)");

        let library = Version::library();
        assert_eq!(library.git_tag, option_env!("IIO_GIT_TAG").unwrap_or_default());
        assert_ne!(library.git_tag, env!("CARGO_PKG_VERSION_PATCH"));
        if library.git_tag.is_empty() {
            assert_eq!(library.to_string(), format!("{}.{}", library.major, library.minor));
        }
    }
}
