//! # rust_iio
//!
//! Client library for Linux Industrial I/O (IIO) devices. One object model
//! (context, device, channel, buffer) is presented whatever the transport:
//! a remote `iiod` daemon over TCP or a serial line, a static XML topology,
//! or the in-memory dummy backend.
//!
//! ## Crate Structure
//!
//! - **`context`**, **`device`**, **`channel`**, **`buffer`**: the object
//!   graph. Devices and channels are arena handles into their context.
//! - **`backend`**: the `Backend` trait every transport implements. Each
//!   method defaults to `NotSupported`.
//! - **`mask`**: channel-selection bitsets.
//! - **`events`**: event streams and event-code decoding.
//! - **`iiod`**: the iiod text protocol client over an abstract byte stream.
//! - **`remote`**: `Backend` implementation on top of the iiod client.
//! - **`network`**, **`serial`** (feature `serial`), **`xml`**, **`dummy`**:
//!   transports.
//! - **`registry`**: URI-prefix dispatch to transports.
//! - **`lock`**: mutex, condition variable and thread wrappers that degrade
//!   without the `threads` feature.
//! - **`sort`**: deterministic enumeration order.
//! - **`config`**, **`logging`**: application configuration and tracing setup.
//! - **`error`**: the `IioError` type.
//!
//! ## Example
//!
//! ```no_run
//! use rust_iio::{BackendRegistry, ContextParams};
//!
//! let ctx = BackendRegistry::with_defaults()
//!     .create_context("ip:192.168.2.1", &ContextParams::default())?;
//! for dev in ctx.devices() {
//!     println!("{}: {}", dev.id(), dev.name().unwrap_or(""));
//! }
//! # Ok::<(), rust_iio::IioError>(())
//! ```

pub mod backend;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod device;
pub mod dummy;
pub mod error;
pub mod events;
pub mod iiod;
pub mod lock;
pub mod logging;
pub mod mask;
pub mod network;
pub mod registry;
pub mod remote;
#[cfg(feature = "serial")]
pub mod serial;
pub mod sort;
pub mod xml;

pub use backend::{AttrScope, Backend};
pub use buffer::Buffer;
pub use channel::{Channel, ChannelDesc, ChannelType, DataFormat, Modifier};
pub use config::{ContextParams, IioConfig};
pub use context::{Context, ContextDesc, Version};
pub use device::{Device, DeviceDesc};
pub use error::{IioError, Result};
pub use events::{Event, EventDirection, EventSource, EventStream, EventType};
pub use mask::ChannelsMask;
pub use registry::BackendRegistry;
