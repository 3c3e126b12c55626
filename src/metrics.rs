//! Process-wide counters for the gateway's best-effort paths.
//!
//! Nothing here changes behavior: serial writes and UDP sends stay
//! fire-and-forget, but their failures become countable.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static UNICAST_DATAGRAMS: AtomicU64 = AtomicU64::new(0);
static DISCOVERY_DATAGRAMS: AtomicU64 = AtomicU64::new(0);
static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);
static PACKETS_SENT: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static HOUSEKEEPING_CHECKS: AtomicU64 = AtomicU64::new(0);
static ACTUATOR_WRITES: AtomicU64 = AtomicU64::new(0);
static ACTUATOR_FAILURES: AtomicU64 = AtomicU64::new(0);
static NOTIFICATIONS: AtomicU64 = AtomicU64::new(0);

pub fn inc_unicast_datagrams() {
    UNICAST_DATAGRAMS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_discovery_datagrams() {
    DISCOVERY_DATAGRAMS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_parse_failures() {
    PARSE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_sent() {
    PACKETS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_housekeeping_checks() {
    HOUSEKEEPING_CHECKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_actuator_writes() {
    ACTUATOR_WRITES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_actuator_failures() {
    ACTUATOR_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_notifications() {
    NOTIFICATIONS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub unicast_datagrams: u64,
    pub discovery_datagrams: u64,
    pub parse_failures: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
    pub housekeeping_checks: u64,
    pub actuator_writes: u64,
    pub actuator_failures: u64,
    pub notifications: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        unicast_datagrams: UNICAST_DATAGRAMS.load(Ordering::Relaxed),
        discovery_datagrams: DISCOVERY_DATAGRAMS.load(Ordering::Relaxed),
        parse_failures: PARSE_FAILURES.load(Ordering::Relaxed),
        packets_sent: PACKETS_SENT.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        housekeeping_checks: HOUSEKEEPING_CHECKS.load(Ordering::Relaxed),
        actuator_writes: ACTUATOR_WRITES.load(Ordering::Relaxed),
        actuator_failures: ACTUATOR_FAILURES.load(Ordering::Relaxed),
        notifications: NOTIFICATIONS.load(Ordering::Relaxed),
    }
}
