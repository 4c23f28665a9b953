/// Realtime channel modules
pub mod protocol;
pub mod transport;

pub use protocol::{InboundEvent, OutboundEvent, StatusUpdate};
pub use transport::{Connector, Link, WsConnector};
