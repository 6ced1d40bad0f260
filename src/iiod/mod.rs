//! Client for the iiod daemon's text protocol.
//!
//! The protocol is line oriented: each request is one `\r\n` terminated
//! line, answered by an integer status line and, for some requests, a raw
//! payload. [`IiodClient`] speaks it over any [`ByteStream`]; the network and
//! serial transports only provide the stream.

mod client;
mod command;
mod reply;
mod stream;

pub use client::{ClientGuard, IiodClient};
pub use command::{AttrTarget, Command};
pub use stream::ByteStream;
