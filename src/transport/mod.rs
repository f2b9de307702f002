//! The transport layer (C2-C4, C6-C7, spec §4.2-§4.4, §4.6-§4.7): raw
//! sockets, the command-stream IO transport built on top of them, the
//! inactivity monitor, response correlation, and failover.

pub mod correlator;
pub mod failover;
pub mod inactivity;
pub mod io_transport;
pub mod socket;
pub mod stream;
pub mod tls;

pub use correlator::{CorrelatedResponse, Correlator};
pub use failover::{BrokerConnector, BrokerState, BrokerStatus, BrokerUri, FailoverOptions, FailoverSender, FailoverTransport};
pub use inactivity::{InactivityMonitor, InactivityState};
pub use io_transport::{IoSender, IoTransport};
pub use socket::SocketOptions;
pub use stream::AnyStream;
