use crate::coap::Packet;
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// RFC 7252 transmission parameters.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const ACK_RANDOM_FACTOR: f64 = 1.5;
pub const MAX_RETRANSMIT: u8 = 4;
pub const EXCHANGE_LIFETIME: Duration = Duration::from_secs(247);

/// Upper bound on remembered responses for duplicate suppression.
const MAX_RECENT: usize = 128;

/// A confirmable packet waiting for its ACK.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub packet: Packet,
    pub next_attempt: Instant,
    pub timeout: Duration,
    pub retransmits: u8,
    /// Set when the packet is an observe notification; giving up on it ends
    /// the observation.
    pub observed_path: Option<String>,
}

impl InFlight {
    pub fn new(packet: Packet, observed_path: Option<String>, now: Instant) -> Self {
        let factor = rand::thread_rng().gen_range(1.0..ACK_RANDOM_FACTOR);
        let timeout = ACK_TIMEOUT.mul_f64(factor);
        Self {
            packet,
            next_attempt: now + timeout,
            timeout,
            retransmits: 0,
            observed_path,
        }
    }

    pub fn matches(&self, address: &str, message_id: u16) -> bool {
        self.packet.message_id == message_id && self.packet.address() == address
    }
}

/// What to do with an in-flight packet whose timer expired.
#[derive(Debug, PartialEq, Eq)]
pub enum Expiry {
    Retransmit,
    GiveUp,
}

impl InFlight {
    pub fn expire(&mut self, now: Instant) -> Expiry {
        if self.retransmits >= MAX_RETRANSMIT {
            return Expiry::GiveUp;
        }
        self.retransmits += 1;
        self.timeout *= 2;
        self.next_attempt = now + self.timeout;
        Expiry::Retransmit
    }
}

#[derive(Debug)]
struct Recent {
    address: String,
    message_id: u16,
    response: Option<Packet>,
    seen_at: Instant,
}

/// Remembers recently answered confirmable requests so that a retransmitted
/// request gets the same answer instead of running its handler twice.
#[derive(Debug, Default)]
pub struct DuplicateCache {
    entries: VecDeque<Recent>,
}

impl DuplicateCache {
    pub fn lookup(&self, address: &str, message_id: u16) -> Option<Option<&Packet>> {
        self.entries
            .iter()
            .find(|r| r.message_id == message_id && r.address == address)
            .map(|r| r.response.as_ref())
    }

    pub fn remember(&mut self, address: &str, message_id: u16, response: Option<Packet>, now: Instant) {
        if self.entries.len() >= MAX_RECENT {
            self.entries.pop_front();
        }
        self.entries.push_back(Recent {
            address: address.to_string(),
            message_id,
            response,
            seen_at: now,
        });
    }

    /// Drop entries older than the exchange lifetime; returns how many went.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|r| now.saturating_duration_since(r.seen_at) < EXCHANGE_LIFETIME);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
