//! Multicast UDP discovery: announce and listen.
//!
//! Every node binds the same discovery port with address reuse enabled so
//! multiple processes on one host coexist, joins the multicast group, and
//! sends announces to it. There is no periodic re-announce: a node announces
//! when a publisher or subscriber is created, and a subscriber re-announces
//! when it hears a publisher appear for one of its topics. That rebound is
//! the entire rendezvous protocol.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use log::{debug, error, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{decode_event, encode_event, DiscoveryEvent, DISCOVERY_BUFFER_SIZE};

/// Callback invoked for each well-formed inbound announce, with the `ip`
/// field already resolved. Runs on the I/O thread.
pub type EventCallback = dyn Fn(DiscoveryEvent) + Send + Sync;

pub struct Discovery {
    io: Handle,
    socket: Arc<UdpSocket>,
    /// Where announces go: `group:port`.
    target: SocketAddr,
    cancel: CancellationToken,
}

impl Discovery {
    /// Bind the shared discovery port and join `group`. `io` is the handle of
    /// the runtime that will drive the receive loop.
    pub fn bind(io: Handle, group: Ipv4Addr, port: u16) -> std::io::Result<Self> {
        let std_socket = bind_reusable_multicast(group, port)?;
        let socket = {
            let _guard = io.enter();
            UdpSocket::from_std(std_socket)?
        };
        Ok(Self {
            io,
            socket: Arc::new(socket),
            target: SocketAddr::V4(SocketAddrV4::new(group, port)),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the receive loop. Returns its join handle so the owner can await
    /// completion during shutdown.
    pub fn start(&self, callback: Box<EventCallback>) -> JoinHandle<()> {
        debug!("discovery listening on {}", self.target);
        let socket = self.socket.clone();
        let cancel = self.cancel.clone();
        self.io.spawn(receive_loop(socket, callback, cancel))
    }

    /// Stop the receive loop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Multicast one announce. Errors are logged and the announce is dropped;
    /// the rebound protocol tolerates lost announces from either side.
    pub fn send_announce(&self, evt: &DiscoveryEvent) {
        let datagram = encode_event(evt);
        if let Err(e) = self.socket.try_send_to(&datagram, self.target) {
            error!("discovery announce send failed: {}", e);
        }
    }
}

/// Bind `0.0.0.0:port` with `SO_REUSEADDR` (and `SO_REUSEPORT` where it
/// exists) via `socket2`, then join the multicast group with loopback
/// enabled so peers on the same host hear each other.
///
/// Reuse options and the group join are non-fatal: on hosts without a
/// multicast-capable route the socket still receives unicast discovery
/// traffic and data flow is unaffected.
fn bind_reusable_multicast(group: Ipv4Addr, port: u16) -> std::io::Result<std::net::UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_reuse_address(true) {
        warn!("discovery socket: SO_REUSEADDR failed (non-fatal): {}", e);
    }

    #[cfg(not(target_os = "windows"))]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!("discovery socket: SO_REUSEPORT failed (non-fatal): {}", e);
    }

    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;

    if let Err(e) = socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
        warn!("joining multicast group {} failed: {} (group reception disabled)", group, e);
    }
    if let Err(e) = socket.set_multicast_loop_v4(true) {
        warn!("discovery socket: enabling multicast loopback failed: {}", e);
    }

    Ok(socket.into())
}

async fn receive_loop(socket: Arc<UdpSocket>, callback: Box<EventCallback>, cancel: CancellationToken) {
    let mut buf = vec![0u8; DISCOVERY_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => match decode_event(&buf[..len]) {
                        Some(mut evt) => {
                            if evt.wants_source_ip() {
                                evt.ip = src.ip().to_string();
                            }
                            callback(evt);
                        }
                        None => warn!("dropping malformed discovery datagram ({} bytes) from {}", len, src),
                    },
                    Err(e) => warn!("discovery receive error: {}", e),
                }
            }
        }
    }

    debug!("discovery receive loop stopped");
}
