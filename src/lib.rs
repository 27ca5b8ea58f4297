//! Decentralized publish/subscribe for cooperating processes on the same LAN.
//!
//! Each [`Node`] publishes and subscribes to any number of named topics. Peers
//! find one another through IP multicast announces and then exchange topic
//! payloads directly over unicast UDP; there is no broker and no central
//! registry. A deadline-driven [`Scheduler`] dispatches periodic and one-shot
//! work inside a node, so a typical application is a handful of modules that
//! register publishers, subscribers, and timed tasks and then park the main
//! thread in [`Scheduler::run`].
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────────┐
//!  │                          Node                              │
//!  │                                                            │
//!  │  ┌──────────────┐        ┌───────────────────────────┐     │
//!  │  │  Discovery   │        │       DataTransport       │     │
//!  │  │ (multicast)  │        │     (unicast, framed)     │     │
//!  │  └──────┬───────┘        └──────────┬────────────────┘     │
//!  │         │ announces                 │ topic datagrams      │
//!  │  ┌──────▼─────────────────────────▼───────┐                │
//!  │  │              topic tables              │                │
//!  │  │  local pubs/subs + remote subscribers  │                │
//!  │  └────────────────────────────────────────┘                │
//!  └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is best-effort UDP: no retransmission, no ordering across
//! datagrams, no flow control. Publishing to a topic nobody subscribes to is
//! a silent no-op.

pub mod config;
pub mod logging;
pub mod module;
pub mod net;
pub mod scheduler;

pub use config::Config;
pub use module::{Module, ModuleContext, ModuleRegistry};
pub use net::node::{Node, Publisher, Subscriber};
pub use net::protocol::{DiscoveryEvent, RemoteEndpoint, TopicMessage};
pub use scheduler::{Scheduler, TaskId};

/// Errors surfaced by fallible operations (construction, config loading,
/// module creation). Runtime datagram handling never produces these; per the
/// wire protocol's best-effort contract, malformed input and send failures
/// are logged and dropped.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config file format: {0}")]
    UnsupportedConfigFormat(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("module type is not registered: {0}")]
    UnknownModuleType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
