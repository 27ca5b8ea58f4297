//! The process-local pub/sub coordinator.
//!
//! A [`Node`] owns one data transport, one discovery endpoint, the topic
//! tables, and a single-threaded tokio runtime driven by one worker thread.
//! Application threads create publisher and subscriber handles and publish
//! through them; the I/O thread feeds inbound discovery and data traffic
//! back into the tables and subscriber callbacks.
//!
//! ## Rendezvous
//!
//! Creating a publisher or subscriber multicasts a PUB_ANNOUNCE or
//! SUB_ANNOUNCE. A publisher records every SUB_ANNOUNCE for its topics; a
//! subscriber answers a PUB_ANNOUNCE for one of its topics by re-sending its
//! SUB_ANNOUNCE, so whichever side starts second makes the other re-announce.
//! Publishing then unicasts one framed datagram per known remote subscriber.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::thread;

use log::{debug, info};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::discovery::Discovery;
use super::protocol::{
    AnnounceKind, DiscoveryEvent, RemoteEndpoint, TopicMessage, DEFAULT_MULTICAST_ADDR,
    DEFAULT_MULTICAST_PORT,
};
use super::transport::DataTransport;

/// Delivery callback for a subscribed topic, invoked on the node's I/O
/// thread with `(topic, payload)`. The node's mutex is never held while a
/// callback runs.
pub type MessageCallback = dyn Fn(&str, &[u8]) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

// ────────────────────────────────────────────────────────────────────────────
// Topic tables
// ────────────────────────────────────────────────────────────────────────────

/// The four topic tables, all guarded by one mutex on the node.
#[derive(Default)]
struct TopicTables {
    /// Topics this node publishes.
    local_publishers: HashSet<String>,
    /// Topic -> delivery callbacks, in registration order.
    local_subscribers: HashMap<String, Vec<Arc<MessageCallback>>>,
    /// Topics this node subscribes to (the map's key set, kept for O(1)
    /// membership tests from the discovery path).
    local_subscribed_topics: HashSet<String>,
    /// Topic -> known remote subscriber endpoints, unique per node id.
    remote_subscribers: HashMap<String, Vec<RemoteEndpoint>>,
}

impl TopicTables {
    /// Record a remote subscriber unless the `(topic, node_id)` pair is
    /// already known. Returns whether the endpoint was inserted.
    fn upsert_remote_subscriber(&mut self, topic: &str, endpoint: RemoteEndpoint) -> bool {
        let list = self.remote_subscribers.entry(topic.to_owned()).or_default();
        if list.iter().any(|known| known.node_id == endpoint.node_id) {
            return false;
        }
        list.push(endpoint);
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Node
// ────────────────────────────────────────────────────────────────────────────

/// A process-local messaging endpoint. Cloning is cheap and clones share the
/// same underlying node; the node shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    node_name: String,
    node_id: String,
    runtime: Arc<Runtime>,
    transport: DataTransport,
    discovery: Discovery,
    tables: Mutex<TopicTables>,
    lifecycle: Mutex<Lifecycle>,
    io_thread: Mutex<Option<thread::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Node {
    /// Create a node on the default multicast group `239.255.0.1:7500`.
    pub fn new(node_name: &str) -> crate::Result<Self> {
        Self::with_multicast(node_name, DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_PORT)
    }

    /// Create a node announcing on `group:port`. Nodes only discover peers
    /// that share the same group and port.
    pub fn with_multicast(node_name: &str, group: Ipv4Addr, port: u16) -> crate::Result<Self> {
        let runtime = Arc::new(Builder::new_current_thread().enable_all().build()?);
        let transport = DataTransport::bind(runtime.handle().clone(), 0)?;
        let discovery = Discovery::bind(runtime.handle().clone(), group, port)?;
        let node_id = format!("{}-{}", node_name, Uuid::new_v4().simple());

        Ok(Self {
            inner: Arc::new(NodeInner {
                node_name: node_name.to_owned(),
                node_id,
                runtime,
                transport,
                discovery,
                tables: Mutex::new(TopicTables::default()),
                lifecycle: Mutex::new(Lifecycle::Created),
                io_thread: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    /// The unique id other nodes see in this node's announces.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// The unicast port this node receives topic data on.
    pub fn data_port(&self) -> u16 {
        self.inner.transport.local_port()
    }

    /// Start the transport and discovery receivers and spawn the I/O thread.
    /// Calling `start` on a node that is already running or stopped is a
    /// no-op.
    pub fn start(&self) {
        // Held for the whole body so a concurrent stop() observes either a
        // fully started node or none at all.
        let mut lifecycle = self.inner.lifecycle.lock();
        if *lifecycle != Lifecycle::Created {
            return;
        }
        *lifecycle = Lifecycle::Running;

        let weak = Arc::downgrade(&self.inner);
        let data_loop = self.inner.transport.start(Box::new(move |msg| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_data_message(msg);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        let discovery_loop = self.inner.discovery.start(Box::new(move |evt| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_discovery_event(evt);
            }
        }));

        // The worker thread drives both receive loops until shutdown, then
        // waits for them to wind down so no receive outlives stop().
        let runtime = self.inner.runtime.clone();
        let cancel = self.inner.cancel.clone();
        let io_thread = thread::spawn(move || {
            runtime.block_on(async move {
                cancel.cancelled().await;
                let _ = data_loop.await;
                let _ = discovery_loop.await;
            });
        });
        *self.inner.io_thread.lock() = Some(io_thread);

        info!(
            "node started: {} id={} data_port={}",
            self.inner.node_name,
            self.inner.node_id,
            self.inner.transport.local_port()
        );
    }

    /// Cancel both receivers, stop the I/O thread, and mark the node
    /// stopped. Idempotent; stopped is terminal.
    pub fn stop(&self) {
        self.inner.shutdown();
    }

    /// Register this node as a publisher of `topic` (idempotent), announce
    /// it, and return a handle.
    pub fn create_publisher(&self, topic: &str) -> Publisher {
        debug!("create_publisher topic='{}'", topic);
        self.inner.tables.lock().local_publishers.insert(topic.to_owned());
        self.inner.announce(AnnounceKind::Publisher, topic);
        Publisher {
            node: Arc::downgrade(&self.inner),
            topic: topic.to_owned(),
        }
    }

    /// Register `callback` for `topic`, announce the subscription, and
    /// return a handle. Multiple subscribers per topic are permitted;
    /// callbacks run in registration order.
    pub fn create_subscriber(
        &self,
        topic: &str,
        callback: impl Fn(&str, &[u8]) + Send + Sync + 'static,
    ) -> Subscriber {
        debug!("create_subscriber topic='{}'", topic);
        {
            let mut tables = self.inner.tables.lock();
            tables.local_subscribed_topics.insert(topic.to_owned());
            tables
                .local_subscribers
                .entry(topic.to_owned())
                .or_default()
                .push(Arc::new(callback));
        }
        self.inner.announce(AnnounceKind::Subscriber, topic);
        Subscriber {
            node: Arc::downgrade(&self.inner),
            topic: topic.to_owned(),
        }
    }

    /// Send `payload` to every known remote subscriber of `topic`. With no
    /// known subscribers this returns silently; nothing is buffered.
    pub fn publish_raw(&self, topic: &str, payload: &[u8]) {
        self.inner.publish_raw(topic, payload);
    }

    /// Number of remote endpoints currently recorded for `topic`.
    pub fn remote_subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .tables
            .lock()
            .remote_subscribers
            .get(topic)
            .map_or(0, Vec::len)
    }
}

impl NodeInner {
    fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Running => *lifecycle = Lifecycle::Stopped,
                Lifecycle::Created => {
                    // Never started, so there is no I/O thread to tear down.
                    *lifecycle = Lifecycle::Stopped;
                    return;
                }
                Lifecycle::Stopped => return,
            }
        }

        self.transport.stop();
        self.discovery.stop();
        self.cancel.cancel();

        if let Some(io_thread) = self.io_thread.lock().take() {
            let _ = io_thread.join();
        }

        info!("node stopped: {}", self.node_id);
    }

    fn announce(&self, kind: AnnounceKind, topic: &str) {
        let evt = DiscoveryEvent {
            msg_type: kind,
            topic: topic.to_owned(),
            node_id: self.node_id.clone(),
            // Receivers substitute the datagram source address.
            ip: "0.0.0.0".to_owned(),
            data_port: self.transport.local_port(),
        };
        self.discovery.send_announce(&evt);
    }

    fn publish_raw(&self, topic: &str, payload: &[u8]) {
        let endpoints = {
            let tables = self.tables.lock();
            match tables.remote_subscribers.get(topic) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for endpoint in &endpoints {
            self.transport.send_to(&endpoint.ip, endpoint.port, topic, payload);
        }
    }

    fn handle_discovery_event(&self, evt: DiscoveryEvent) {
        // Our own announces come back through multicast loopback.
        if evt.node_id == self.node_id {
            return;
        }

        match evt.msg_type {
            AnnounceKind::Subscriber => {
                let mut tables = self.tables.lock();
                if !tables.local_publishers.contains(&evt.topic) {
                    return;
                }
                let endpoint = RemoteEndpoint {
                    node_id: evt.node_id.clone(),
                    ip: evt.ip.clone(),
                    port: evt.data_port,
                };
                if tables.upsert_remote_subscriber(&evt.topic, endpoint) {
                    info!(
                        "discovered subscriber for topic '{}' at {}:{} ({})",
                        evt.topic, evt.ip, evt.data_port, evt.node_id
                    );
                }
            }
            AnnounceKind::Publisher => {
                let subscribed = self.tables.lock().local_subscribed_topics.contains(&evt.topic);
                if subscribed {
                    debug!(
                        "publisher appeared for topic '{}' at {}:{}, re-announcing subscription",
                        evt.topic, evt.ip, evt.data_port
                    );
                    // The rebound: a publisher that started after us learns
                    // our endpoint from this re-announce.
                    self.announce(AnnounceKind::Subscriber, &evt.topic);
                }
            }
        }
    }

    fn handle_data_message(&self, msg: TopicMessage) {
        let callbacks = {
            let tables = self.tables.lock();
            match tables.local_subscribers.get(&msg.topic) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for callback in &callbacks {
            callback(&msg.topic, &msg.payload);
        }
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Publisher / Subscriber handles
// ────────────────────────────────────────────────────────────────────────────

/// Handle for publishing to one topic. Holds a non-owning reference to its
/// node; once the node is gone, publishing becomes a silent no-op.
pub struct Publisher {
    node: Weak<NodeInner>,
    topic: String,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a raw byte payload.
    pub fn publish(&self, payload: &[u8]) {
        if let Some(node) = self.node.upgrade() {
            node.publish_raw(&self.topic, payload);
        }
    }

    /// Publish a UTF-8 string payload.
    pub fn publish_str(&self, text: &str) {
        self.publish(text.as_bytes());
    }

    /// Publish a fixed-width value with explicit little-endian encoding.
    pub fn publish_le<T: LePayload>(&self, value: T) {
        self.publish(&value.to_le_payload());
    }
}

/// Handle for one subscription. Dropping it does NOT remove the callback;
/// the subscription belongs to the node's tables for the node's lifetime.
pub struct Subscriber {
    node: Weak<NodeInner>,
    topic: String,
}

impl Subscriber {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the owning node is still alive.
    pub fn is_attached(&self) -> bool {
        self.node.strong_count() > 0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Typed publish support
// ────────────────────────────────────────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width primitives that can be published portably. The encoding is
/// always little-endian regardless of host byte order; anything richer than
/// a primitive needs an explicit serializer on both sides.
pub trait LePayload: sealed::Sealed {
    fn to_le_payload(self) -> Vec<u8>;
}

macro_rules! impl_le_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl LePayload for $ty {
                fn to_le_payload(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_le_payload!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(node_id: &str, port: u16) -> RemoteEndpoint {
        RemoteEndpoint {
            node_id: node_id.to_owned(),
            ip: "10.0.0.9".to_owned(),
            port,
        }
    }

    #[test]
    fn remote_subscribers_are_unique_per_node_id() {
        let mut tables = TopicTables::default();
        assert!(tables.upsert_remote_subscriber("chat", endpoint("peer-a", 4000)));
        assert!(!tables.upsert_remote_subscriber("chat", endpoint("peer-a", 4000)));
        assert!(!tables.upsert_remote_subscriber("chat", endpoint("peer-a", 4001)));
        assert_eq!(tables.remote_subscribers["chat"].len(), 1);
        // The first endpoint wins; a duplicate announce never rewrites it.
        assert_eq!(tables.remote_subscribers["chat"][0].port, 4000);
    }

    #[test]
    fn same_node_id_may_subscribe_to_many_topics() {
        let mut tables = TopicTables::default();
        assert!(tables.upsert_remote_subscriber("chat", endpoint("peer-a", 4000)));
        assert!(tables.upsert_remote_subscriber("logs", endpoint("peer-a", 4000)));
        assert_eq!(tables.remote_subscribers.len(), 2);
    }

    #[test]
    fn le_payload_encodings_are_fixed_width() {
        assert_eq!(1u64.to_le_payload(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!((-2i16).to_le_payload(), vec![0xfe, 0xff]);
        assert_eq!(1.5f32.to_le_payload(), 1.5f32.to_le_bytes().to_vec());
    }
}
