//! # Device Gateway
//!
//! Runs the two network loops of the endpoint around one shared registry:
//!
//! - **unicast**: OS-assigned port, short poll (20 ms by default), flushes
//!   queued packets every iteration and checks in-flight packets once per
//!   housekeeping interval
//! - **discovery**: the well-known port joined to the multicast group, longer
//!   poll (200 ms), ticks the registry every iteration
//!
//! Both loops are Tokio tasks sharing a [`RunFlag`]. They observe a cleared
//! flag after their current poll elapses, so shutdown latency is bounded by
//! the longer poll interval.
//!
//! The registry sits behind a `std::sync::Mutex`; it is only ever locked for
//! synchronous work (dispatch, housekeeping, notification) and never across
//! an `.await`. Every packet it emits leaves through the [`Transmitter`] on the
//! unicast socket, including answers to discovery requests.
//!
//! ```rust,no_run
//! use oicbridge::gateway::{Gateway, Transmitter};
//! use oicbridge::oic::OicServer;
//!
//! # async fn demo() -> Result<(), oicbridge::gateway::GatewayError> {
//! let transmitter = Transmitter::new();
//! let server = OicServer::new("Lights", "0000B960-0000-46F7-BEC0-9E6CBD61ADC2", transmitter.callback());
//! let mut gateway = Gateway::start(&Default::default(), server, transmitter)?;
//! println!("serving on {}", gateway.unicast_addr());
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod discovery;
mod transmit;
mod unicast;

pub use transmit::Transmitter;

use crate::cbor::{self, Value};
use crate::coap::{format_address, normalize, Packet};
use crate::config::NetworkConfig;
use crate::lights::{observer_representation, NotifyValue};
use crate::logutil::hex_snippet;
use crate::metrics;
use crate::oic::{OicServer, RegistryStats};
use log::{debug, error, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

pub type SharedServer = Arc<Mutex<OicServer>>;

/// Fatal setup failures. The unicast ones abort [`Gateway::start`]; discovery
/// ones only keep the discovery loop from starting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to create UDP socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to set SO_REUSEADDR: {0}")]
    ReuseAddr(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to join multicast group {group}: {source}")]
    Multicast { group: Ipv4Addr, source: io::Error },

    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),
}

/// Process-wide running flag shared by the loops.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopSettings {
    pub poll: Duration,
    pub housekeeping_interval: Duration,
    pub recv_buffer_size: usize,
}

/// Lock the registry, recovering from poisoning.
pub(crate) fn lock(server: &SharedServer) -> MutexGuard<'_, OicServer> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parse one datagram and hand it to the registry. Unparsable datagrams are
/// counted and dropped.
pub(crate) fn dispatch(server: &SharedServer, datagram: &[u8], peer: SocketAddr, source: &str) {
    let sender = format_address(normalize(peer));
    match Packet::parse(datagram, &sender) {
        Ok(packet) => lock(server).handle_message(&packet),
        Err(e) => {
            metrics::inc_parse_failures();
            debug!(
                "{} datagram from {} dropped: {} [{}]",
                source,
                sender,
                e,
                hex_snippet(datagram, 16)
            );
        }
    }
}

fn parse_ipv4(raw: &str) -> Result<Ipv4Addr, GatewayError> {
    raw.trim()
        .parse()
        .map_err(|_| GatewayError::InvalidAddress(raw.to_string()))
}

/// A running endpoint.
pub struct Gateway {
    server: SharedServer,
    flag: RunFlag,
    unicast_addr: SocketAddr,
    discovery_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    state: GatewayState,
}

impl Gateway {
    /// Bind both sockets, start the registry and spawn the loops. Must be
    /// called from within a Tokio runtime.
    pub fn start(network: &NetworkConfig, mut server: OicServer, transmitter: Transmitter) -> Result<Self, GatewayError> {
        let bind_address = parse_ipv4(&network.bind_address)?;
        let group = parse_ipv4(&network.multicast_group)?;

        let (unicast_socket, sender) = unicast::bind(bind_address)?;
        let unicast_addr = unicast_socket.local_addr().map_err(GatewayError::Socket)?;
        transmitter.install(sender);

        server.start();
        let server: SharedServer = Arc::new(Mutex::new(server));
        let flag = RunFlag::new();
        let mut tasks = Vec::with_capacity(2);

        tasks.push(tokio::spawn(unicast::run(
            unicast_socket,
            server.clone(),
            flag.clone(),
            LoopSettings {
                poll: network.unicast_poll(),
                housekeeping_interval: network.housekeeping_interval(),
                recv_buffer_size: network.recv_buffer_size,
            },
        )));

        let discovery_addr = match discovery::bind(bind_address, network.discovery_port, group) {
            Ok(socket) => {
                let addr = socket.local_addr().ok();
                tasks.push(tokio::spawn(discovery::run(
                    socket,
                    server.clone(),
                    flag.clone(),
                    LoopSettings {
                        poll: network.discovery_poll(),
                        housekeeping_interval: network.housekeeping_interval(),
                        recv_buffer_size: network.recv_buffer_size,
                    },
                )));
                addr
            }
            Err(e) => {
                error!("Discovery loop not started: {}", e);
                None
            }
        };

        info!(
            "Gateway running: unicast {}, discovery {}",
            unicast_addr,
            discovery_addr.map(|a| a.to_string()).unwrap_or_else(|| "disabled".into())
        );

        Ok(Self {
            server,
            flag,
            unicast_addr,
            discovery_addr,
            tasks,
            state: GatewayState::Running,
        })
    }

    pub fn server(&self) -> &SharedServer {
        &self.server
    }

    pub fn unicast_addr(&self) -> SocketAddr {
        self.unicast_addr
    }

    /// `None` when the discovery socket could not be set up.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery_addr
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn stats(&self) -> RegistryStats {
        lock(&self.server).stats()
    }

    /// Push a new value of `name` to its observers. Returns the number of
    /// notifications queued; they go out on the next unicast iteration.
    pub fn notify_observers(&self, name: &str, value: &NotifyValue) -> usize {
        if self.state != GatewayState::Running {
            debug!("notify {} ignored: gateway stopped", name);
            return 0;
        }
        let representation = observer_representation(name, value);
        let payload = cbor::encode(&Value::Map(representation));
        let mut registry = lock(&self.server);
        if !registry.is_started() {
            return 0;
        }
        let queued = registry.notify(name, &payload);
        for _ in 0..queued {
            metrics::inc_notifications();
        }
        queued
    }

    /// Clear the running flag and wait for both loops to finish.
    pub async fn shutdown(&mut self) {
        if self.state == GatewayState::Stopped {
            return;
        }
        self.flag.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Gateway loop ended abnormally: {}", e);
            }
        }
        self.state = GatewayState::Stopped;
        info!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.flag.stop();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("unicast_addr", &self.unicast_addr)
            .field("discovery_addr", &self.discovery_addr)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
