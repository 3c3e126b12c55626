//! # OIC Resource Registry
//!
//! [`OicServer`] is the dispatch side of the device: it owns the registered
//! resources, answers discovery (`/oic/res`) and device (`/oic/d`) queries,
//! runs resource update behaviors, tracks observers, and keeps confirmable
//! packets alive until they are acknowledged.
//!
//! The server never touches a socket. Every packet it emits goes through the
//! send callback given to [`OicServer::new`]; responses are sent as soon as a
//! request is handled, notifications are queued and flushed by
//! [`OicServer::send_queued_packets`].
//!
//! ## Housekeeping
//!
//! - [`OicServer::send_queued_packets`] every unicast loop iteration
//! - [`OicServer::check_packets`] about once per second (retransmission and
//!   give-up of unacknowledged confirmable packets)
//! - [`OicServer::tick`] every discovery loop iteration (duplicate
//!   suppression expiry)
//!
//! The server is not internally synchronized; the gateway keeps it behind a
//! mutex shared by both network loops and the notification path.

mod observe;
mod resource;
mod transaction;

pub use observe::{Observer, ObserverList};
pub use resource::{OicResource, UpdateError, UpdateHandler};
pub use transaction::{ACK_TIMEOUT, EXCHANGE_LIFETIME, MAX_RETRANSMIT};

use crate::cbor::{self, Map, Value};
use crate::coap::{Code, MessageType, Packet, CONTENT_FORMAT_CBOR, OPTION_CONTENT_FORMAT, OPTION_OBSERVE};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use transaction::{DuplicateCache, Expiry, InFlight};

pub const DISCOVERY_PATH: &str = "/oic/res";
pub const DEVICE_PATH: &str = "/oic/d";
pub const DEVICE_RESOURCE_TYPE: &str = "oic.wk.d";
/// Interface version (`icv`) reported on `/oic/d`.
pub const SPEC_VERSION: &str = "core.1.1.0";
pub const DATA_MODEL_VERSION: &str = "res.1.1.0";

/// Policy bits advertised per link: discoverable | observable.
const LINK_POLICY_BITMAP: i64 = 0x03;

const CONTENT_FORMAT_UNSUPPORTED: Code = Code::new(4, 15);

/// Invoked with every outbound packet.
pub type SendCallback = Box<dyn Fn(&Packet) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource path {0} is already registered")]
    DuplicatePath(String),

    #[error("resource path {0:?} must start with '/'")]
    InvalidPath(String),
}

/// Housekeeping and dispatch counters for one registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub handled: u64,
    pub duplicates: u64,
    pub check_runs: u64,
    pub ticks: u64,
    pub retransmissions: u64,
    pub gave_up: u64,
}

pub struct OicServer {
    name: String,
    device_id: String,
    send: SendCallback,
    resources: BTreeMap<String, OicResource>,
    observers: ObserverList,
    queue: VecDeque<(Packet, Option<String>)>,
    in_flight: Vec<InFlight>,
    recent: DuplicateCache,
    next_mid: u16,
    started: bool,
    stats: RegistryStats,
}

impl OicServer {
    pub fn new(name: impl Into<String>, device_id: impl Into<String>, send: SendCallback) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            send,
            resources: BTreeMap::new(),
            observers: ObserverList::default(),
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            recent: DuplicateCache::default(),
            next_mid: rand::random(),
            started: false,
            stats: RegistryStats::default(),
        }
    }

    pub fn add_resource(&mut self, resource: OicResource) -> Result<(), RegistryError> {
        let path = resource.path().to_string();
        if !path.starts_with('/') {
            return Err(RegistryError::InvalidPath(path));
        }
        if self.resources.contains_key(&path) || path == DISCOVERY_PATH || path == DEVICE_PATH {
            return Err(RegistryError::DuplicatePath(path));
        }
        debug!("Registered resource {} ({})", path, resource.resource_type());
        self.resources.insert(path, resource);
        Ok(())
    }

    /// Begin serving. Packets handled before this are ignored.
    pub fn start(&mut self) {
        info!(
            "OIC server '{}' ({}) serving {} resources",
            self.name,
            self.device_id,
            self.resources.len()
        );
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn resource(&self, path: &str) -> Option<&OicResource> {
        self.resources.get(path)
    }

    pub fn resources(&self) -> impl Iterator<Item = &OicResource> {
        self.resources.values()
    }

    pub fn observers(&self) -> &ObserverList {
        &self.observers
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    fn fresh_mid(&mut self) -> u16 {
        self.next_mid = self.next_mid.wrapping_add(1);
        self.next_mid
    }

    pub fn handle_message(&mut self, packet: &Packet) {
        self.handle_message_at(packet, Instant::now());
    }

    pub fn handle_message_at(&mut self, packet: &Packet, now: Instant) {
        if !self.started {
            debug!("Dropping packet from {} before server start", packet.address());
            return;
        }
        self.stats.handled += 1;
        match packet.msg_type {
            MessageType::Acknowledgement => self.settle(packet, false),
            MessageType::Reset => self.settle(packet, true),
            MessageType::Confirmable | MessageType::NonConfirmable if packet.code.is_request() => {
                self.handle_request(packet, now)
            }
            MessageType::Confirmable if packet.code.is_empty() => {
                // CoAP ping
                let rst = Packet::new(MessageType::Reset, Code::EMPTY, packet.message_id, packet.address());
                (self.send)(&rst);
            }
            _ => trace!(
                "Ignoring {:?} {:?} from {}",
                packet.msg_type,
                packet.code,
                packet.address()
            ),
        }
    }

    fn settle(&mut self, packet: &Packet, reset: bool) {
        let Some(pos) = self
            .in_flight
            .iter()
            .position(|f| f.matches(packet.address(), packet.message_id))
        else {
            trace!("Unmatched {:?} mid={} from {}", packet.msg_type, packet.message_id, packet.address());
            return;
        };
        let done = self.in_flight.remove(pos);
        if reset && done.observed_path.is_some() {
            if self.observers.cancel(packet.address(), &done.packet.token) {
                info!("Observer {} cancelled by reset", packet.address());
            }
        }
    }

    fn handle_request(&mut self, req: &Packet, now: Instant) {
        let confirmable = req.msg_type == MessageType::Confirmable;
        if confirmable {
            if let Some(cached) = self.recent.lookup(req.address(), req.message_id) {
                self.stats.duplicates += 1;
                debug!("Duplicate mid={} from {}", req.message_id, req.address());
                if let Some(resp) = cached {
                    (self.send)(resp);
                }
                return;
            }
        }

        let path = req.uri_path();
        debug!("{:?} {} from {} mid={}", req.code, path, req.address(), req.message_id);
        let response = match path.as_str() {
            DISCOVERY_PATH => self.discovery_response(req),
            DEVICE_PATH => Some(self.device_response(req)),
            _ => Some(self.resource_response(req, &path)),
        };

        if let Some(ref resp) = response {
            (self.send)(resp);
        }
        if confirmable {
            self.recent.remember(req.address(), req.message_id, response, now);
        }
    }

    fn cbor_response(&mut self, req: &Packet, code: Code, body: &Value) -> Packet {
        let mid = self.fresh_mid();
        let mut resp = req.response(code, mid);
        resp.add_uint_option(OPTION_CONTENT_FORMAT, CONTENT_FORMAT_CBOR as u32);
        resp.payload = cbor::encode(body);
        resp
    }

    fn empty_response(&mut self, req: &Packet, code: Code) -> Packet {
        let mid = self.fresh_mid();
        req.response(code, mid)
    }

    /// `None` means stay silent: a non-confirmable (multicast) query that
    /// matched nothing.
    fn discovery_response(&mut self, req: &Packet) -> Option<Packet> {
        if req.code != Code::GET {
            return Some(self.empty_response(req, Code::METHOD_NOT_ALLOWED));
        }
        let rt_filter: Vec<String> = req
            .uri_query()
            .iter()
            .filter_map(|q| q.strip_prefix("rt=").map(str::to_string))
            .collect();

        let links: Vec<Value> = self
            .resources
            .values()
            .filter(|r| rt_filter.is_empty() || rt_filter.iter().any(|rt| rt == r.resource_type()))
            .map(|r| {
                let mut policy = Map::new();
                policy.append("bm", LINK_POLICY_BITMAP);
                let mut link = Map::new();
                link.append("href", r.path());
                link.append("rt", r.resource_type());
                link.append("if", r.interfaces().join(" "));
                link.append("p", policy);
                Value::Map(link)
            })
            .collect();

        if links.is_empty() && req.msg_type == MessageType::NonConfirmable {
            debug!("Discovery from {} matched no resources; not answering", req.address());
            return None;
        }

        let mut device = Map::new();
        device.append("di", self.device_id.as_str());
        device.append("n", self.name.as_str());
        device.append("links", links);
        let body = Value::Array(vec![Value::Map(device)]);
        Some(self.cbor_response(req, Code::CONTENT, &body))
    }

    fn device_response(&mut self, req: &Packet) -> Packet {
        if req.code != Code::GET {
            return self.empty_response(req, Code::METHOD_NOT_ALLOWED);
        }
        let mut body = Map::new();
        body.append("rt", DEVICE_RESOURCE_TYPE);
        body.append("n", self.name.as_str());
        body.append("di", self.device_id.as_str());
        body.append("icv", SPEC_VERSION);
        body.append("dmv", DATA_MODEL_VERSION);
        self.cbor_response(req, Code::CONTENT, &Value::Map(body))
    }

    fn resource_response(&mut self, req: &Packet, path: &str) -> Packet {
        let Some(resource) = self.resources.get_mut(path) else {
            return self.empty_response(req, Code::NOT_FOUND);
        };
        match req.code {
            Code::GET => {
                let body = Value::Map(resource.representation().clone());
                let observe = match req.observe() {
                    Some(0) => {
                        self.observers.register(path, req.address(), &req.token);
                        info!("{} now observing {}", req.address(), path);
                        Some(self.observers.current_sequence(path))
                    }
                    Some(1) => {
                        self.observers.deregister(path, req.address());
                        info!("{} stopped observing {}", req.address(), path);
                        None
                    }
                    _ => None,
                };
                let mut resp = self.cbor_response(req, Code::CONTENT, &body);
                if let Some(seq) = observe {
                    resp.add_uint_option(OPTION_OBSERVE, seq);
                }
                resp
            }
            Code::PUT | Code::POST => {
                if let Some(cf) = req.content_format() {
                    if cf != CONTENT_FORMAT_CBOR {
                        return self.empty_response(req, CONTENT_FORMAT_UNSUPPORTED);
                    }
                }
                let update = match cbor::decode(&req.payload) {
                    Ok(Value::Map(m)) => m,
                    Ok(_) => {
                        debug!("Update for {} is not a map", path);
                        return self.empty_response(req, Code::BAD_REQUEST);
                    }
                    Err(e) => {
                        debug!("Undecodable update for {}: {}", path, e);
                        return self.empty_response(req, Code::BAD_REQUEST);
                    }
                };
                if let Err(e) = resource.apply_update(&update) {
                    warn!("Update for {} from {} rejected: {}", path, req.address(), e);
                    return self.empty_response(req, Code::BAD_REQUEST);
                }
                let payload = cbor::encode(&Value::Map(resource.representation().clone()));
                self.notify(path, &payload);
                self.empty_response(req, Code::CHANGED)
            }
            _ => self.empty_response(req, Code::METHOD_NOT_ALLOWED),
        }
    }

    /// Queue a confirmable notification carrying `payload` (encoded CBOR) to
    /// every observer of `path`. Returns the number of notifications queued.
    pub fn notify(&mut self, path: &str, payload: &[u8]) -> usize {
        let targets: Vec<Observer> = self.observers.for_path(path).cloned().collect();
        if targets.is_empty() {
            trace!("notify {}: no observers", path);
            return 0;
        }
        let seq = self.observers.next_sequence(path);
        for obs in &targets {
            let mid = self.fresh_mid();
            let mut p = Packet::new(MessageType::Confirmable, Code::CONTENT, mid, obs.address.clone());
            p.token = obs.token.clone();
            p.add_uint_option(OPTION_OBSERVE, seq);
            p.add_uint_option(OPTION_CONTENT_FORMAT, CONTENT_FORMAT_CBOR as u32);
            p.payload = payload.to_vec();
            self.queue.push_back((p, Some(path.to_string())));
        }
        debug!("notify {}: {} observers, seq={}", path, targets.len(), seq);
        targets.len()
    }

    pub fn send_queued_packets(&mut self) {
        self.send_queued_packets_at(Instant::now());
    }

    pub fn send_queued_packets_at(&mut self, now: Instant) {
        while let Some((packet, observed_path)) = self.queue.pop_front() {
            (self.send)(&packet);
            if packet.msg_type == MessageType::Confirmable {
                self.in_flight.push(InFlight::new(packet, observed_path, now));
            }
        }
    }

    pub fn check_packets(&mut self) {
        self.check_packets_at(Instant::now());
    }

    /// Retransmit confirmable packets whose timer expired and give up on
    /// those past the retransmission limit.
    pub fn check_packets_at(&mut self, now: Instant) {
        self.stats.check_runs += 1;
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].next_attempt > now {
                i += 1;
                continue;
            }
            match self.in_flight[i].expire(now) {
                Expiry::Retransmit => {
                    self.stats.retransmissions += 1;
                    let f = &self.in_flight[i];
                    debug!(
                        "Retransmit mid={} to {} (attempt {})",
                        f.packet.message_id,
                        f.packet.address(),
                        f.retransmits
                    );
                    (self.send)(&f.packet);
                    i += 1;
                }
                Expiry::GiveUp => {
                    let f = self.in_flight.remove(i);
                    self.stats.gave_up += 1;
                    warn!(
                        "No ACK for mid={} from {} after {} retransmits",
                        f.packet.message_id,
                        f.packet.address(),
                        MAX_RETRANSMIT
                    );
                    if let Some(path) = f.observed_path {
                        self.observers.deregister(&path, f.packet.address());
                        info!("Dropped unresponsive observer {} of {}", f.packet.address(), path);
                    }
                }
            }
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.stats.ticks += 1;
        let expired = self.recent.expire(now);
        if expired > 0 {
            trace!("Expired {} duplicate-suppression entries", expired);
        }
    }
}

impl std::fmt::Debug for OicServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OicServer")
            .field("name", &self.name)
            .field("device_id", &self.device_id)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("observers", &self.observers.len())
            .field("in_flight", &self.in_flight.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::OPTION_URI_QUERY;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const PEER: &str = "192.168.1.50 41000";

    fn set_level(rep: &mut Map, update: &Map) -> Result<(), UpdateError> {
        match update.get("dimmingSetting") {
            Some(Value::Integer(v)) => {
                rep.insert("dimmingSetting", *v);
                Ok(())
            }
            Some(_) => Err(UpdateError::WrongType {
                field: "dimmingSetting".into(),
                expected: "an integer",
            }),
            None => Err(UpdateError::MissingField("dimmingSetting".into())),
        }
    }

    fn server() -> (OicServer, Arc<Mutex<Vec<Packet>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let mut s = OicServer::new(
            "Test Lamp",
            "0000B960-0000-46F7-BEC0-9E6CBD61ADC2",
            Box::new(move |p: &Packet| sink.lock().unwrap().push(p.clone())),
        );
        let mut rep = Map::new();
        rep.append("rt", "oic.r.light.dimming");
        rep.append("dimmingSetting", 5);
        rep.append("range", "0,255");
        s.add_resource(OicResource::new(
            "/lampa/floor",
            "oic.r.light.dimming",
            "oic.if.rw",
            set_level,
            rep,
        ))
        .unwrap();
        s.start();
        (s, sent)
    }

    fn request(t: MessageType, code: Code, mid: u16, path: &str) -> Packet {
        let mut p = Packet::new(t, code, mid, PEER);
        p.token = vec![0x11, 0x22];
        p.set_uri_path(path);
        p
    }

    fn put(mid: u16, level: i64) -> Packet {
        let mut p = request(MessageType::Confirmable, Code::PUT, mid, "/lampa/floor");
        let mut body = Map::new();
        body.append("dimmingSetting", level);
        p.payload = cbor::encode(&Value::Map(body));
        p
    }

    fn take(sent: &Arc<Mutex<Vec<Packet>>>) -> Vec<Packet> {
        std::mem::take(&mut *sent.lock().unwrap())
    }

    #[test]
    fn rejects_duplicate_and_relative_paths() {
        let (mut s, _) = server();
        let dup = OicResource::new("/lampa/floor", "t", "oic.if.rw", set_level, Map::new());
        assert_eq!(
            s.add_resource(dup),
            Err(RegistryError::DuplicatePath("/lampa/floor".into()))
        );
        let rel = OicResource::new("lampa", "t", "oic.if.rw", set_level, Map::new());
        assert_eq!(s.add_resource(rel), Err(RegistryError::InvalidPath("lampa".into())));
    }

    #[test]
    fn ignores_traffic_before_start() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let mut s = OicServer::new("n", "d", Box::new(move |p: &Packet| sink.lock().unwrap().push(p.clone())));
        s.handle_message(&request(MessageType::Confirmable, Code::GET, 1, DISCOVERY_PATH));
        assert!(take(&sent).is_empty());
        assert_eq!(s.stats().handled, 0);
    }

    #[test]
    fn discovery_lists_resources() {
        let (mut s, sent) = server();
        s.handle_message(&request(MessageType::NonConfirmable, Code::GET, 9, DISCOVERY_PATH));
        let out = take(&sent);
        assert_eq!(out.len(), 1);
        let resp = &out[0];
        assert_eq!(resp.code, Code::CONTENT);
        assert_eq!(resp.address(), PEER);
        assert_eq!(resp.token, vec![0x11, 0x22]);
        let body = cbor::decode(&resp.payload).unwrap();
        let device = body.as_array().unwrap()[0].as_map().unwrap();
        assert_eq!(device.get("di").and_then(Value::as_str), Some(s.device_id()));
        let links = device.get("links").and_then(Value::as_array).unwrap();
        assert_eq!(links.len(), 1);
        let link = links[0].as_map().unwrap();
        assert_eq!(link.get("href").and_then(Value::as_str), Some("/lampa/floor"));
        assert_eq!(link.get("if").and_then(Value::as_str), Some("oic.if.rw"));
    }

    #[test]
    fn multicast_discovery_with_unmatched_filter_is_silent() {
        let (mut s, sent) = server();
        let mut req = request(MessageType::NonConfirmable, Code::GET, 9, DISCOVERY_PATH);
        req.add_option(OPTION_URI_QUERY, b"rt=oic.r.switch.binary".to_vec());
        s.handle_message(&req);
        assert!(take(&sent).is_empty());

        let mut req = request(MessageType::NonConfirmable, Code::GET, 10, DISCOVERY_PATH);
        req.add_option(OPTION_URI_QUERY, b"rt=oic.r.light.dimming".to_vec());
        s.handle_message(&req);
        assert_eq!(take(&sent).len(), 1);
    }

    #[test]
    fn device_resource_reports_identity() {
        let (mut s, sent) = server();
        s.handle_message(&request(MessageType::Confirmable, Code::GET, 3, DEVICE_PATH));
        let out = take(&sent);
        let body = cbor::decode(&out[0].payload).unwrap();
        let m = body.as_map().unwrap();
        assert_eq!(m.get("rt").and_then(Value::as_str), Some(DEVICE_RESOURCE_TYPE));
        assert_eq!(m.get("n").and_then(Value::as_str), Some("Test Lamp"));
        assert_eq!(out[0].msg_type, MessageType::Acknowledgement);
        assert_eq!(out[0].message_id, 3);
    }

    #[test]
    fn put_updates_representation_and_answers_changed() {
        let (mut s, sent) = server();
        s.handle_message(&put(20, 128));
        let out = take(&sent);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, Code::CHANGED);
        let rep = s.resource("/lampa/floor").unwrap().representation();
        assert_eq!(rep.get("dimmingSetting"), Some(&Value::Integer(128)));
        assert_eq!(rep.get("range").and_then(Value::as_str), Some("0,255"));
    }

    #[test]
    fn bad_updates_get_bad_request() {
        let (mut s, sent) = server();
        let mut p = put(21, 1);
        p.payload = vec![0x01];
        s.handle_message(&p);
        let mut q = put(22, 1);
        q.payload = vec![0xFF, 0x00];
        s.handle_message(&q);
        let mut r = put(23, 1);
        r.payload = cbor::encode(&Value::Map(Map::new()));
        s.handle_message(&r);
        let codes: Vec<Code> = take(&sent).iter().map(|p| p.code).collect();
        assert_eq!(codes, vec![Code::BAD_REQUEST; 3]);
        let rep = s.resource("/lampa/floor").unwrap().representation();
        assert_eq!(rep.get("dimmingSetting"), Some(&Value::Integer(5)));
    }

    #[test]
    fn unknown_path_and_method() {
        let (mut s, sent) = server();
        s.handle_message(&request(MessageType::Confirmable, Code::GET, 30, "/lampa/attic"));
        s.handle_message(&request(MessageType::Confirmable, Code::DELETE, 31, "/lampa/floor"));
        let codes: Vec<Code> = take(&sent).iter().map(|p| p.code).collect();
        assert_eq!(codes, vec![Code::NOT_FOUND, Code::METHOD_NOT_ALLOWED]);
    }

    #[test]
    fn duplicate_confirmable_request_is_answered_from_cache() {
        let (mut s, sent) = server();
        s.handle_message(&put(40, 10));
        // peer changes its mind, but reuses the mid: must not be applied
        s.handle_message(&put(40, 99));
        let out = take(&sent);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], out[1]);
        assert_eq!(s.stats().duplicates, 1);
        let rep = s.resource("/lampa/floor").unwrap().representation();
        assert_eq!(rep.get("dimmingSetting"), Some(&Value::Integer(10)));
    }

    #[test]
    fn duplicate_cache_expires_on_tick() {
        let (mut s, _sent) = server();
        let t0 = Instant::now();
        s.handle_message_at(&put(41, 10), t0);
        s.tick_at(t0 + EXCHANGE_LIFETIME + Duration::from_secs(1));
        s.handle_message_at(&put(41, 77), t0 + EXCHANGE_LIFETIME + Duration::from_secs(2));
        let rep = s.resource("/lampa/floor").unwrap().representation();
        assert_eq!(rep.get("dimmingSetting"), Some(&Value::Integer(77)));
        assert_eq!(s.stats().ticks, 1);
    }

    #[test]
    fn observe_then_update_queues_notification() {
        let (mut s, sent) = server();
        let mut obs = request(MessageType::Confirmable, Code::GET, 50, "/lampa/floor");
        obs.add_uint_option(OPTION_OBSERVE, 0);
        s.handle_message(&obs);
        let resp = take(&sent).remove(0);
        assert!(resp.observe().is_some());
        assert_eq!(s.observers().len(), 1);

        s.handle_message(&put(51, 200));
        // only the 2.04 goes out immediately; the notification waits in the queue
        assert_eq!(take(&sent).len(), 1);
        assert_eq!(s.queued_count(), 1);

        s.send_queued_packets();
        let notes = take(&sent);
        assert_eq!(notes.len(), 1);
        let n = &notes[0];
        assert_eq!(n.msg_type, MessageType::Confirmable);
        assert_eq!(n.token, vec![0x11, 0x22]);
        assert!(n.observe().unwrap() > resp.observe().unwrap());
        let body = cbor::decode(&n.payload).unwrap();
        assert_eq!(body.as_map().unwrap().get("dimmingSetting"), Some(&Value::Integer(200)));
        assert_eq!(s.in_flight_count(), 1);

        // ACK settles it
        let ack = Packet::new(MessageType::Acknowledgement, Code::EMPTY, n.message_id, PEER);
        s.handle_message(&ack);
        assert_eq!(s.in_flight_count(), 0);
    }

    #[test]
    fn observe_deregistration() {
        let (mut s, _sent) = server();
        let mut obs = request(MessageType::Confirmable, Code::GET, 60, "/lampa/floor");
        obs.add_uint_option(OPTION_OBSERVE, 0);
        s.handle_message(&obs);
        let mut stop = request(MessageType::Confirmable, Code::GET, 61, "/lampa/floor");
        stop.add_uint_option(OPTION_OBSERVE, 1);
        s.handle_message(&stop);
        assert!(s.observers().is_empty());
        assert_eq!(s.notify("/lampa/floor", &[0xA0]), 0);
    }

    #[test]
    fn reset_cancels_observation() {
        let (mut s, sent) = server();
        let mut obs = request(MessageType::Confirmable, Code::GET, 70, "/lampa/floor");
        obs.add_uint_option(OPTION_OBSERVE, 0);
        s.handle_message(&obs);
        assert_eq!(s.notify("/lampa/floor", &[0xA0]), 1);
        s.send_queued_packets();
        let n = take(&sent).pop().unwrap();
        let rst = Packet::new(MessageType::Reset, Code::EMPTY, n.message_id, PEER);
        s.handle_message(&rst);
        assert!(s.observers().is_empty());
        assert_eq!(s.in_flight_count(), 0);
    }

    #[test]
    fn unacknowledged_notification_is_retransmitted_then_dropped() {
        let (mut s, sent) = server();
        let mut obs = request(MessageType::Confirmable, Code::GET, 80, "/lampa/floor");
        obs.add_uint_option(OPTION_OBSERVE, 0);
        s.handle_message(&obs);
        s.notify("/lampa/floor", &[0xA0]);
        let t0 = Instant::now();
        s.send_queued_packets_at(t0);
        take(&sent);

        // nothing due yet
        s.check_packets_at(t0 + Duration::from_millis(500));
        assert!(take(&sent).is_empty());

        let mut t = t0;
        for _ in 0..MAX_RETRANSMIT {
            t += Duration::from_secs(60);
            s.check_packets_at(t);
        }
        assert_eq!(take(&sent).len(), MAX_RETRANSMIT as usize);
        assert_eq!(s.stats().retransmissions, MAX_RETRANSMIT as u64);

        s.check_packets_at(t + Duration::from_secs(120));
        assert_eq!(s.stats().gave_up, 1);
        assert_eq!(s.in_flight_count(), 0);
        assert!(s.observers().is_empty());
    }

    #[test]
    fn ping_gets_reset() {
        let (mut s, sent) = server();
        let ping = Packet::new(MessageType::Confirmable, Code::EMPTY, 90, PEER);
        s.handle_message(&ping);
        let out = take(&sent);
        assert_eq!(out[0].msg_type, MessageType::Reset);
        assert_eq!(out[0].message_id, 90);
    }
}
