use super::{dispatch, lock, GatewayError, LoopSettings, RunFlag, SharedServer};
use crate::metrics;
use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Bind the request/response socket on an OS-assigned port. Returns the
/// tokio socket the loop reads from and a duplicate handle for sending.
pub(super) fn bind(bind_address: Ipv4Addr) -> Result<(UdpSocket, std::net::UdpSocket), GatewayError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(GatewayError::Socket)?;
    socket.set_reuse_address(true).map_err(GatewayError::ReuseAddr)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(bind_address, 0));
    socket.bind(&addr.into()).map_err(|e| GatewayError::Bind { addr, source: e })?;
    socket.set_nonblocking(true).map_err(GatewayError::Socket)?;
    let sender: std::net::UdpSocket = socket.try_clone().map_err(GatewayError::Socket)?.into();
    let std_socket: std::net::UdpSocket = socket.into();
    let reader = UdpSocket::from_std(std_socket).map_err(GatewayError::Socket)?;
    Ok((reader, sender))
}

/// Wait-read-dispatch cycle of the unicast endpoint. Queued packets are
/// flushed every iteration, in-flight packets checked once per housekeeping
/// interval regardless of traffic.
pub(super) async fn run(socket: UdpSocket, server: SharedServer, flag: RunFlag, settings: LoopSettings) {
    let mut buf = vec![0u8; settings.recv_buffer_size];
    let mut last_check = Instant::now();
    info!(
        "Unicast loop listening on {}",
        socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into())
    );

    while flag.is_running() {
        match timeout(settings.poll, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => {
                metrics::inc_unicast_datagrams();
                dispatch(&server, &buf[..len], peer, "unicast");
            }
            Ok(Err(e)) => {
                debug!("unicast recv error: {}", e);
                sleep(settings.poll).await;
            }
            Err(_) => {}
        }

        let mut registry = lock(&server);
        registry.send_queued_packets();
        if last_check.elapsed() >= settings.housekeeping_interval {
            registry.check_packets();
            metrics::inc_housekeeping_checks();
            last_check = Instant::now();
        }
    }
    debug!("unicast loop terminated");
}
