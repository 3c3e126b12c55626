use crate::coap::{parse_address, Packet};
use crate::metrics;
use crate::oic::SendCallback;
use log::{trace, warn};
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, OnceLock};

/// Outbound side of the endpoint: serializes packets and sends them over the
/// unicast socket. Clones share the socket slot, so the registry's send
/// callback can be created before the socket is bound.
///
/// Sends go through a plain `std` handle on the unicast socket: the send path
/// runs under the registry lock and cannot wait on reactor readiness.
#[derive(Clone, Default)]
pub struct Transmitter {
    socket: Arc<OnceLock<UdpSocket>>,
}

impl Transmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a send handle on the unicast socket. Only the first call takes
    /// effect.
    pub fn install(&self, socket: UdpSocket) {
        if self.socket.set(socket).is_err() {
            warn!("Transmitter socket already installed; keeping the first one");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.socket.get().is_some()
    }

    /// Send to the address string carried by the packet.
    pub fn send_packet(&self, packet: &Packet) {
        match parse_address(packet.address()) {
            Ok(dest) => self.send_packet_to(packet, SocketAddr::V4(dest)),
            Err(e) => {
                metrics::inc_send_failures();
                warn!("Not sending mid={}: {}", packet.message_id, e);
            }
        }
    }

    /// Send to an explicit destination, ignoring the packet's address.
    pub fn send_packet_to(&self, packet: &Packet, dest: SocketAddr) {
        let Some(socket) = self.socket.get() else {
            metrics::inc_send_failures();
            warn!("Unicast socket not bound; dropping packet to {}", dest);
            return;
        };
        let bytes = packet.build();
        match socket.send_to(&bytes, dest) {
            Ok(n) => {
                metrics::inc_packets_sent();
                trace!("sent {} bytes to {} ({:?} {:?})", n, dest, packet.msg_type, packet.code);
            }
            Err(e) => {
                metrics::inc_send_failures();
                warn!("UDP send to {} failed: {}", dest, e);
            }
        }
    }

    /// Send callback for the registry.
    pub fn callback(&self) -> SendCallback {
        let tx = self.clone();
        Box::new(move |packet: &Packet| tx.send_packet(packet))
    }
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter").field("ready", &self.is_ready()).finish()
    }
}
