//! Networking core: wire protocol types, the two UDP transports, and the
//! node coordinator that ties them together.

pub mod discovery;
pub mod node;
pub mod protocol;
pub mod transport;

pub use node::{Node, Publisher, Subscriber};
pub use protocol::{DiscoveryEvent, RemoteEndpoint, TopicMessage};
