//! Unicast UDP data transport with length-prefixed topic framing.
//!
//! A [`DataTransport`] is a single UDP socket bound to an OS-assigned port.
//! Once started it runs one receive loop on the owning node's I/O runtime;
//! each decoded datagram is handed to the user callback on that thread.
//! Sends are fire-and-forget from any thread; delivery is whatever UDP gives
//! us.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{decode_frame, encode_frame, TopicMessage, DATA_BUFFER_SIZE, MAX_TOPIC_LEN};

/// Callback invoked for each decoded inbound datagram. Runs on the I/O
/// thread, so it must not block for long.
pub type ReceiveCallback = dyn Fn(TopicMessage) + Send + Sync;

pub struct DataTransport {
    io: Handle,
    socket: Arc<UdpSocket>,
    local_port: u16,
    cancel: CancellationToken,
}

impl DataTransport {
    /// Bind to `0.0.0.0:port` (`0` for an ephemeral port). `io` is the handle
    /// of the runtime that will drive the receive loop; the socket is created
    /// non-blocking up front so the bound port is known before any task runs.
    pub fn bind(io: Handle, port: u16) -> std::io::Result<Self> {
        let std_socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        std_socket.set_nonblocking(true)?;
        let local_port = std_socket.local_addr()?.port();
        let socket = {
            let _guard = io.enter();
            UdpSocket::from_std(std_socket)?
        };
        Ok(Self {
            io,
            socket: Arc::new(socket),
            local_port,
            cancel: CancellationToken::new(),
        })
    }

    /// The port this transport receives on. Advertised in discovery announces.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Spawn the receive loop. Returns its join handle so the owner can await
    /// completion during shutdown.
    pub fn start(&self, callback: Box<ReceiveCallback>) -> JoinHandle<()> {
        debug!("data transport listening on port {}", self.local_port);
        let socket = self.socket.clone();
        let cancel = self.cancel.clone();
        self.io.spawn(receive_loop(socket, callback, cancel))
    }

    /// Stop the receive loop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Send one framed datagram to `ip:port`. Callable from any thread.
    /// Errors are logged and the datagram is dropped; there is no retry.
    pub fn send_to(&self, ip: &str, port: u16, topic: &str, payload: &[u8]) {
        if topic.len() > MAX_TOPIC_LEN {
            error!("data send skipped, topic of {} bytes does not fit a datagram", topic.len());
            return;
        }
        let addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!("data send skipped, bad address {}:{}: {}", ip, port, e);
                return;
            }
        };
        let frame = encode_frame(topic, payload);
        if let Err(e) = self.socket.try_send_to(&frame, addr) {
            error!("data send to {} failed: {}", addr, e);
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, callback: Box<ReceiveCallback>, cancel: CancellationToken) {
    let mut buf = vec![0u8; DATA_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => match decode_frame(&buf[..len]) {
                        Some((topic, payload)) => {
                            callback(TopicMessage {
                                topic,
                                payload,
                                remote_ip: src.ip().to_string(),
                                remote_port: src.port(),
                            });
                        }
                        None => warn!("dropping malformed data datagram ({} bytes) from {}", len, src),
                    },
                    Err(e) => warn!("data receive error: {}", e),
                }
            }
        }
    }

    debug!("data transport receive loop stopped");
}
