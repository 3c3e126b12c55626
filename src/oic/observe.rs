use std::collections::HashMap;

/// Observe sequence numbers are 24-bit on the wire.
const SEQ_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub path: String,
    pub address: String,
    pub token: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct ObserverList {
    observers: Vec<Observer>,
    sequence: HashMap<String, u32>,
}

impl ObserverList {
    /// Register `address` on `path`. A peer observes a path at most once; a
    /// second registration replaces the token.
    pub fn register(&mut self, path: &str, address: &str, token: &[u8]) {
        match self
            .observers
            .iter_mut()
            .find(|o| o.path == path && o.address == address)
        {
            Some(existing) => existing.token = token.to_vec(),
            None => self.observers.push(Observer {
                path: path.to_string(),
                address: address.to_string(),
                token: token.to_vec(),
            }),
        }
    }

    pub fn deregister(&mut self, path: &str, address: &str) -> bool {
        let before = self.observers.len();
        self.observers
            .retain(|o| !(o.path == path && o.address == address));
        before != self.observers.len()
    }

    /// Drop whatever observation `address` holds under `token`.
    pub fn cancel(&mut self, address: &str, token: &[u8]) -> bool {
        let before = self.observers.len();
        self.observers
            .retain(|o| !(o.address == address && o.token == token));
        before != self.observers.len()
    }

    pub fn for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Observer> + 'a {
        self.observers.iter().filter(move |o| o.path == path)
    }

    pub fn next_sequence(&mut self, path: &str) -> u32 {
        let seq = self.sequence.entry(path.to_string()).or_insert(1);
        *seq = (*seq + 1) & SEQ_MASK;
        *seq
    }

    pub fn current_sequence(&self, path: &str) -> u32 {
        self.sequence.get(path).copied().unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
