//! # OpenWire client core
//!
//! Transport, wire codec, and session/producer/consumer state machines for
//! an OpenWire messaging client: the layers between a raw TCP/TLS socket and
//! a JMS-style send/receive/transaction API, without the API itself.
//!
//! [`config::connect`] is the usual entry point: parse a connection URI,
//! dial it (directly or via [`transport::failover`]), negotiate a
//! wireformat, and hand back a started [`client::Connection`].

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod transport;
pub mod uri;

pub use client::{AckMode, Connection, ConnectionState, Consumer, Producer, Session};
pub use config::ConnectionOptions;
pub use error::{ClientError, ClientResult};
pub use model::{Destination, DestinationKind, Message};
pub use uri::ConnectionUri;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
