//! Test utilities & fixtures.
//! Loopback gateway with a recording actuator, plus a tiny CoAP client.

use oicbridge::actuator::OutputSink;
use oicbridge::cbor::{self, Map, Value};
use oicbridge::coap::{format_address, Code, MessageType, Packet, CONTENT_FORMAT_CBOR, OPTION_CONTENT_FORMAT};
use oicbridge::config::Config;
use oicbridge::gateway::{Gateway, Transmitter};
use oicbridge::lights::build_server;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

pub const DEVICE_ID: &str = "0000B960-0000-46F7-BEC0-9E6CBD61ADC2";

/// Output sink that remembers every (channel, value) it was given.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<(u8, i64)>>);

#[allow(dead_code)]
impl Recorder {
    pub fn calls(&self) -> Vec<(u8, i64)> {
        self.0.lock().unwrap().clone()
    }
}

impl OutputSink for Recorder {
    fn set_output(&self, channel: u8, value: i64) {
        self.0.lock().unwrap().push((channel, value));
    }
}

/// Default three-lamp config bound to loopback, discovery on an ephemeral port.
pub fn loopback_config() -> Config {
    let mut cfg = Config::default();
    cfg.device.name = "Test Lights".into();
    cfg.device.uuid = DEVICE_ID.into();
    cfg.network.bind_address = "127.0.0.1".into();
    cfg.network.discovery_port = 0;
    cfg
}

pub fn start_gateway(cfg: &Config) -> (Gateway, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let transmitter = Transmitter::new();
    let server = build_server(cfg, transmitter.callback(), recorder.clone()).expect("registry");
    let gateway = Gateway::start(&cfg.network, server, transmitter).expect("gateway start");
    (gateway, recorder)
}

pub struct Client {
    pub socket: UdpSocket,
    next_mid: u16,
}

#[allow(dead_code)]
impl Client {
    pub async fn new() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.expect("client bind"),
            next_mid: 0x1000,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub fn request(&mut self, msg_type: MessageType, code: Code, path: &str) -> Packet {
        self.next_mid += 1;
        let mut p = Packet::new(msg_type, code, self.next_mid, "unused");
        p.token = vec![0xCA, 0xFE];
        p.set_uri_path(path);
        p
    }

    pub fn put_level(&mut self, path: &str, level: i64) -> Packet {
        let mut p = self.request(MessageType::Confirmable, Code::PUT, path);
        p.add_uint_option(OPTION_CONTENT_FORMAT, CONTENT_FORMAT_CBOR as u32);
        let mut body = Map::new();
        body.append("dimmingSetting", level);
        p.payload = cbor::encode(&Value::Map(body));
        p
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) {
        self.socket.send_to(&packet.build(), to).await.expect("client send");
    }

    pub async fn send_raw(&self, bytes: &[u8], to: SocketAddr) {
        self.socket.send_to(bytes, to).await.expect("client send");
    }

    /// Next packet with its source, or None after `wait`.
    pub async fn recv(&self, wait: Duration) -> Option<(Packet, SocketAddr)> {
        let mut buf = [0u8; 1500];
        let (n, from) = tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
        let packet = Packet::parse(&buf[..n], &format_address(from)).ok()?;
        Some((packet, from))
    }
}

#[allow(dead_code)]
pub fn body_map(packet: &Packet) -> Map {
    match cbor::decode(&packet.payload).expect("cbor payload") {
        Value::Map(m) => m,
        other => panic!("expected map, got {:?}", other),
    }
}
