//! # oicbridge - OIC light endpoint for a serial actuator
//!
//! oicbridge is the network runtime of a small smart-home device. It exposes a
//! handful of dimmable lights as OIC resources over CoAP/UDP, answers multicast
//! discovery, and forwards accepted updates to a microcontroller on a serial
//! line. Observers of a light get a confirmable notification whenever its
//! value changes.
//!
//! ## Features
//!
//! - **Two network loops**: a unicast request/response socket and a multicast
//!   discovery socket, each a Tokio task with its own poll cadence.
//! - **OIC registry**: `/oic/res` discovery with `rt=` filtering, `/oic/d`,
//!   GET/PUT/POST on lights, Observe registration and notifications.
//! - **Reliable delivery**: confirmable notifications are retransmitted with
//!   exponential back-off; retransmitted requests are answered from a
//!   duplicate-suppression cache.
//! - **Serial actuator**: one `"<channel> <value>\n"` line per accepted
//!   update, written off the network path.
//! - **Observable failures**: send, parse and serial failures are logged and
//!   counted in [`metrics`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oicbridge::actuator::{start_actuator, SerialLine};
//! use oicbridge::config::Config;
//! use oicbridge::gateway::{Gateway, Transmitter};
//! use oicbridge::lights::{build_server, NotifyValue};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!
//!     let line = SerialLine::connect(config.serial.configured_port(), config.serial.baud_rate, config.serial.write_timeout());
//!     let actuator = Arc::new(start_actuator(line));
//!     let transmitter = Transmitter::new();
//!     let server = build_server(&config, transmitter.callback(), actuator)?;
//!
//!     let mut gateway = Gateway::start(&config.network, server, transmitter)?;
//!     gateway.notify_observers("/lampa/floor", &NotifyValue::Integer(128));
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`gateway`] - unicast and discovery loops, outbound transmission
//! - [`oic`] - resource registry, observers, retransmission
//! - [`lights`] - dimmable light resources and observer representations
//! - [`actuator`] - serial output bridge
//! - [`coap`] - CoAP message codec
//! - [`cbor`] - CBOR codec for resource representations
//! - [`config`] - configuration loading and validation
//!
//! ## Architecture
//!
//! ```text
//!  unicast socket ──┐                     ┌── Transmitter ── UDP
//!                   ├── OicServer (mutex) ┤
//! discovery socket ─┘         │           └── notifications
//!                        DimmingUpdate
//!                             │
//!                      actuator writer ── serial line
//! ```

pub mod actuator;
pub mod cbor;
pub mod coap;
pub mod config;
pub mod gateway;
pub mod lights;
pub mod logutil;
pub mod metrics;
pub mod oic;
