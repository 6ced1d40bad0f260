//! Backend registry.
//!
//! A [`BackendRegistry`] maps URI prefixes (`ip:`, `xml:`, ...) to context
//! factories. It is an ordinary value: applications build one, optionally
//! add their own transports, and create contexts through it.

use std::fmt;

use tracing::debug;

use crate::config::ContextParams;
use crate::context::Context;
use crate::error::{IioError, Result};

/// Context factory. Receives the URI with its prefix removed.
pub type BackendFactory = Box<dyn Fn(&str, &ContextParams) -> Result<Context> + Send + Sync>;

/// One registered transport.
pub struct BackendEntry {
    /// Backend name, e.g. `network`
    pub name: String,
    /// URI prefix including the colon, e.g. `ip:`
    pub uri_prefix: String,
    /// Timeout applied when the caller passes 0
    pub default_timeout_ms: u32,
    factory: BackendFactory,
}

impl fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEntry")
            .field("name", &self.name)
            .field("uri_prefix", &self.uri_prefix)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

/// Set of transports addressable by URI.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    entries: Vec<BackendEntry>,
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every transport built into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "network",
            "ip:",
            crate::network::DEFAULT_TIMEOUT_MS,
            crate::network::create_context,
        );
        registry.register("xml", "xml:", 0, |path: &str, _: &ContextParams| {
            crate::xml::create_context_from_file(path)
        });
        registry.register("dummy", "dummy:", 0, |_: &str, params: &ContextParams| {
            crate::dummy::create_context(params)
        });
        #[cfg(feature = "serial")]
        registry.register(
            "serial",
            "serial:",
            crate::serial::DEFAULT_TIMEOUT_MS,
            crate::serial::create_context,
        );
        registry
    }

    /// Register a transport. A later registration with the same prefix
    /// replaces the earlier one.
    pub fn register<F>(&mut self, name: &str, uri_prefix: &str, default_timeout_ms: u32, factory: F)
    where
        F: Fn(&str, &ContextParams) -> Result<Context> + Send + Sync + 'static,
    {
        self.entries.retain(|e| e.uri_prefix != uri_prefix);
        self.entries.push(BackendEntry {
            name: name.to_string(),
            uri_prefix: uri_prefix.to_string(),
            default_timeout_ms,
            factory: Box::new(factory),
        });
    }

    /// Registered transports, in registration order.
    pub fn entries(&self) -> &[BackendEntry] {
        &self.entries
    }

    /// Look up the transport handling `uri`.
    pub fn find(&self, uri: &str) -> Option<&BackendEntry> {
        self.entries.iter().find(|e| uri.starts_with(&e.uri_prefix))
    }

    /// Create a context from a URI such as `ip:192.168.2.1`.
    ///
    /// # Errors
    ///
    /// [`IioError::NotSupported`] if no registered transport handles the
    /// URI's prefix, otherwise whatever the transport reports.
    pub fn create_context(&self, uri: &str, params: &ContextParams) -> Result<Context> {
        let entry = self.find(uri).ok_or_else(|| {
            debug!(uri, "No backend registered for URI");
            IioError::NotSupported
        })?;
        let params = ContextParams::with_timeout(params.timeout_or(entry.default_timeout_ms));
        debug!(uri, backend = %entry.name, timeout_ms = params.timeout_ms, "Creating context");
        (entry.factory)(&uri[entry.uri_prefix.len()..], &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.find("ip:10.0.0.1").unwrap().name, "network");
        assert_eq!(registry.find("xml:/tmp/a.xml").unwrap().name, "xml");
        assert_eq!(registry.find("dummy:").unwrap().name, "dummy");
        assert!(registry.find("usb:1.2.3").is_none());
    }

    #[test]
    fn test_unknown_prefix_not_supported() {
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .create_context("usb:1.2.3", &ContextParams::default())
            .unwrap_err();
        assert!(err.is_not_supported());
    }

    #[test]
    fn test_register_replaces_prefix() {
        let mut registry = BackendRegistry::new();
        registry.register("a", "dummy:", 0, |_: &str, p: &ContextParams| {
            crate::dummy::create_context(p)
        });
        registry.register("b", "dummy:", 10, |_: &str, _: &ContextParams| {
            Err(IioError::NotSupported)
        });
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.find("dummy:").unwrap().name, "b");
    }

    #[test]
    fn test_default_timeout_applied() {
        let mut registry = BackendRegistry::new();
        registry.register("probe", "probe:", 1234, |rest: &str, p: &ContextParams| {
            assert_eq!(rest, "x");
            assert_eq!(p.timeout_ms, 1234);
            Err(IioError::not_found("probe"))
        });
        let err = registry
            .create_context("probe:x", &ContextParams::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dummy_uri() {
        let ctx = BackendRegistry::with_defaults()
            .create_context("dummy:", &ContextParams::default())
            .unwrap();
        assert_eq!(ctx.name(), "dummy");
        assert_eq!(ctx.devices_count(), 3);
    }
}
