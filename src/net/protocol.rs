//! Pub/sub wire protocol.
//!
//! Two distinct datagram formats live here:
//!
//! 1. **Discovery announces** sent to the multicast group: a single JSON
//!    object per datagram, see [`DiscoveryEvent`].
//!
//! 2. **Topic data** sent unicast between nodes: a binary frame with a
//!    little-endian length-prefixed topic name followed by the raw payload,
//!    see [`encode_frame`] / [`decode_frame`].

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Constants
// ────────────────────────────────────────────────────────────────────────────

/// Default multicast group used for discovery announces.
pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Default UDP port the discovery socket binds and announces on.
pub const DEFAULT_MULTICAST_PORT: u16 = 7500;

/// Receive buffer for discovery datagrams. Announces are tiny; anything that
/// does not fit here is treated as malformed.
pub const DISCOVERY_BUFFER_SIZE: usize = 4096;

/// Receive buffer for topic data datagrams (the UDP maximum).
pub const DATA_BUFFER_SIZE: usize = 65536;

/// Size of the topic-length prefix on a data frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Longest topic name that still leaves room for the header and at least an
/// empty payload in a single datagram.
pub const MAX_TOPIC_LEN: usize = DATA_BUFFER_SIZE - FRAME_HEADER_LEN - 1;

// ────────────────────────────────────────────────────────────────────────────
// Discovery announces
// ────────────────────────────────────────────────────────────────────────────

/// The two announce flavors a node emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnounceKind {
    #[serde(rename = "PUB_ANNOUNCE")]
    Publisher,
    #[serde(rename = "SUB_ANNOUNCE")]
    Subscriber,
}

/// A discovery announce, one JSON object per multicast datagram:
///
/// ```json
/// {"msg_type":"SUB_ANNOUNCE","topic":"chat","node_id":"n-1f3b","ip":"0.0.0.0","data_port":40123}
/// ```
///
/// `data_port` is the sender's *data transport* port, not the discovery port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    pub msg_type: AnnounceKind,
    pub topic: String,
    pub node_id: String,
    /// Sender address. May be empty or `"0.0.0.0"` on the wire; receivers
    /// substitute the datagram's source address in that case.
    pub ip: String,
    pub data_port: u16,
}

impl DiscoveryEvent {
    /// Whether the `ip` field is a wildcard the receiver must replace with
    /// the observed source address.
    pub fn wants_source_ip(&self) -> bool {
        self.ip.is_empty() || self.ip == "0.0.0.0"
    }
}

/// Encode an announce into a discovery datagram.
pub fn encode_event(evt: &DiscoveryEvent) -> Vec<u8> {
    serde_json::to_vec(evt).expect("discovery event serialisation is infallible")
}

/// Try to decode an announce. Returns `None` for malformed JSON or events
/// missing required fields.
pub fn decode_event(data: &[u8]) -> Option<DiscoveryEvent> {
    serde_json::from_slice(data).ok()
}

// ────────────────────────────────────────────────────────────────────────────
// Remote endpoints and inbound messages
// ────────────────────────────────────────────────────────────────────────────

/// Another node's data-transport endpoint, learned from a SUB_ANNOUNCE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
}

/// A decoded inbound data datagram, handed to subscriber dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub remote_ip: String,
    pub remote_port: u16,
}

// ────────────────────────────────────────────────────────────────────────────
// Data framing
// ────────────────────────────────────────────────────────────────────────────

/// Encode a topic payload into a single data frame:
///
/// ```text
/// [4 bytes LE topic length][topic UTF-8 bytes][payload bytes]
/// ```
pub fn encode_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let topic_len = topic.len() as u32;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + topic.len() + payload.len());
    buf.extend_from_slice(&topic_len.to_le_bytes());
    buf.extend_from_slice(topic.as_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Try to decode a data frame into `(topic, payload)`.
///
/// Returns `None` when the datagram is shorter than five bytes, the declared
/// topic length overruns the datagram, or the topic is not UTF-8.
pub fn decode_frame(data: &[u8]) -> Option<(String, Vec<u8>)> {
    if data.len() < FRAME_HEADER_LEN + 1 {
        return None;
    }
    let topic_len = u32::from_le_bytes(data[..FRAME_HEADER_LEN].try_into().ok()?) as usize;
    if topic_len > data.len() - FRAME_HEADER_LEN {
        return None;
    }
    let topic_end = FRAME_HEADER_LEN + topic_len;
    let topic = std::str::from_utf8(&data[FRAME_HEADER_LEN..topic_end])
        .ok()?
        .to_owned();
    Some((topic, data[topic_end..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = encode_frame("t/topic", b"hello");
        let (topic, payload) = decode_frame(&frame).expect("frame must decode");
        assert_eq!(topic, "t/topic");
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn frame_round_trip_empty_payload() {
        let frame = encode_frame("bare", b"");
        let (topic, payload) = decode_frame(&frame).expect("frame must decode");
        assert_eq!(topic, "bare");
        assert!(payload.is_empty());
    }

    #[test]
    fn frame_layout_is_little_endian() {
        let frame = encode_frame("ab", &[0xff]);
        assert_eq!(&frame[..4], &[2, 0, 0, 0]);
        assert_eq!(&frame[4..6], b"ab");
        assert_eq!(&frame[6..], &[0xff]);
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert_eq!(decode_frame(&[]), None);
        assert_eq!(decode_frame(&[1, 0, 0, 0]), None);
    }

    #[test]
    fn overrunning_topic_length_is_rejected() {
        let mut frame = encode_frame("topic", b"x");
        frame[0] = 0xff;
        frame[1] = 0xff;
        assert_eq!(decode_frame(&frame), None);
    }

    #[test]
    fn non_utf8_topic_is_rejected() {
        let mut frame = encode_frame("ab", b"x");
        frame[4] = 0xc0;
        assert_eq!(decode_frame(&frame), None);
    }

    #[test]
    fn event_round_trip() {
        let evt = DiscoveryEvent {
            msg_type: AnnounceKind::Publisher,
            topic: "chat".to_owned(),
            node_id: "node-1".to_owned(),
            ip: "192.168.0.7".to_owned(),
            data_port: 40123,
        };
        let decoded = decode_event(&encode_event(&evt)).expect("event must decode");
        assert_eq!(decoded, evt);
    }

    #[test]
    fn event_wire_names_match_the_protocol() {
        let evt = DiscoveryEvent {
            msg_type: AnnounceKind::Subscriber,
            topic: "t".to_owned(),
            node_id: "n".to_owned(),
            ip: String::new(),
            data_port: 1,
        };
        let json = String::from_utf8(encode_event(&evt)).unwrap();
        assert!(json.contains("\"msg_type\":\"SUB_ANNOUNCE\""));
        assert!(json.contains("\"data_port\":1"));
    }

    #[test]
    fn malformed_event_is_rejected() {
        assert_eq!(decode_event(b"not json"), None);
        assert_eq!(decode_event(b"{\"msg_type\":\"PUB_ANNOUNCE\"}"), None);
        assert_eq!(decode_event(b"{\"msg_type\":\"NOPE\",\"topic\":\"t\",\"node_id\":\"n\",\"ip\":\"\",\"data_port\":1}"), None);
    }

    #[test]
    fn wildcard_ip_wants_substitution() {
        let mut evt = DiscoveryEvent {
            msg_type: AnnounceKind::Subscriber,
            topic: "t".to_owned(),
            node_id: "n".to_owned(),
            ip: String::new(),
            data_port: 1,
        };
        assert!(evt.wants_source_ip());
        evt.ip = "0.0.0.0".to_owned();
        assert!(evt.wants_source_ip());
        evt.ip = "10.0.0.2".to_owned();
        assert!(!evt.wants_source_ip());
    }
}
