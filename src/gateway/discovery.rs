use super::{dispatch, lock, GatewayError, LoopSettings, RunFlag, SharedServer};
use crate::metrics;
use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Bind the well-known discovery port and join the multicast group on the
/// default interface.
pub(super) fn bind(bind_address: Ipv4Addr, port: u16, group: Ipv4Addr) -> Result<UdpSocket, GatewayError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(GatewayError::Socket)?;
    socket.set_reuse_address(true).map_err(GatewayError::ReuseAddr)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(bind_address, port));
    socket.bind(&addr.into()).map_err(|e| GatewayError::Bind { addr, source: e })?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .map_err(|e| GatewayError::Multicast { group, source: e })?;
    debug!("join_multicast_v4({}) on UNSPECIFIED", group);
    socket.set_nonblocking(true).map_err(GatewayError::Socket)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(GatewayError::Socket)
}

/// Wait-read-dispatch cycle of the discovery endpoint. Every iteration ends
/// with a registry tick.
pub(super) async fn run(socket: UdpSocket, server: SharedServer, flag: RunFlag, settings: LoopSettings) {
    let mut buf = vec![0u8; settings.recv_buffer_size];
    info!(
        "Discovery loop listening on {}",
        socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into())
    );

    while flag.is_running() {
        match timeout(settings.poll, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => {
                metrics::inc_discovery_datagrams();
                dispatch(&server, &buf[..len], peer, "discovery");
            }
            Ok(Err(e)) => {
                debug!("discovery recv error: {}", e);
                sleep(settings.poll).await;
            }
            Err(_) => {}
        }
        lock(&server).tick();
    }
    debug!("discovery loop terminated");
}
