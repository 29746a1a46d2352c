//! Peer table and IP activity tracker (C4).
//!
//! The peer table is mutated by the dispatcher (on PROFILE receipt) and by
//! the discovery callback (on mDNS browse results); both run on the receive
//! task, so the table itself needs no locking beyond what `Controller`
//! already applies to its collections. The IP tracker is purely advisory —
//! it never gates delivery, only feeds `ipstats`.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub user_id: String,
    pub display_name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub avatar_type: Option<String>,
    pub avatar_data: Option<Vec<u8>>,
    pub last_seen: u64,
}

impl PeerRecord {
    pub fn new(user_id: String, display_name: String, ip: Ipv4Addr, port: u16) -> Self {
        PeerRecord {
            user_id,
            display_name,
            ip,
            port,
            avatar_type: None,
            avatar_data: None,
            last_seen: now_unix(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = now_unix();
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<String, PeerRecord>,
}

#[derive(Debug)]
pub enum HandleResolveError {
    Unknown(String),
    Ambiguous(String, Vec<String>),
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable::default()
    }

    /// Inserts on first sight, updates fields + `last_seen` on repeats.
    pub fn upsert(&mut self, user_id: &str, display_name: &str, ip: Ipv4Addr, port: u16) {
        match self.peers.get_mut(user_id) {
            Some(record) => {
                record.display_name = display_name.to_string();
                record.ip = ip;
                record.port = port;
                record.touch();
            }
            None => {
                self.peers.insert(
                    user_id.to_string(),
                    PeerRecord::new(user_id.to_string(), display_name.to_string(), ip, port),
                );
            }
        }
    }

    pub fn set_avatar(&mut self, user_id: &str, mime: String, data: Vec<u8>) {
        if let Some(record) = self.peers.get_mut(user_id) {
            record.avatar_type = Some(mime);
            record.avatar_data = Some(data);
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&PeerRecord> {
        self.peers.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut PeerRecord> {
        self.peers.get_mut(user_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerRecord> {
        self.peers.values_mut()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.peers.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Resolves a short handle (the part before `@`) or a full `user@ip` to
    /// the unique full UserID via prefix match. A handle that matches more
    /// than one peer is an ambiguity error, not a silent pick.
    pub fn resolve(&self, handle: &str) -> Result<String, HandleResolveError> {
        if self.peers.contains_key(handle) {
            return Ok(handle.to_string());
        }

        let prefix = format!("{}@", handle);
        let matches: Vec<String> = self
            .peers
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect();

        match matches.len() {
            0 => Err(HandleResolveError::Unknown(handle.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(HandleResolveError::Ambiguous(handle.to_string(), matches)),
        }
    }
}

/// Tracks observed source IPs and a small administrative blocklist. Never
/// consulted by the dispatcher to decide whether to process a frame.
#[derive(Default)]
pub struct IpTracker {
    known_ips: HashSet<Ipv4Addr>,
    ip_to_user: HashMap<Ipv4Addr, String>,
    attempts: HashMap<Ipv4Addr, u64>,
    blocked: HashSet<Ipv4Addr>,
}

impl IpTracker {
    pub fn new() -> Self {
        IpTracker::default()
    }

    pub fn record(&mut self, ip: Ipv4Addr, user_id: Option<&str>) {
        self.known_ips.insert(ip);
        *self.attempts.entry(ip).or_insert(0) += 1;
        if let Some(user_id) = user_id {
            self.ip_to_user.insert(ip, user_id.to_string());
        }
    }

    pub fn block(&mut self, ip: Ipv4Addr) {
        self.blocked.insert(ip);
    }

    pub fn is_blocked(&self, ip: Ipv4Addr) -> bool {
        self.blocked.contains(&ip)
    }

    pub fn attempts(&self, ip: Ipv4Addr) -> u64 {
        self.attempts.get(&ip).copied().unwrap_or(0)
    }

    pub fn known_ip_count(&self) -> usize {
        self.known_ips.len()
    }

    pub fn user_for_ip(&self, ip: Ipv4Addr) -> Option<&str> {
        self.ip_to_user.get(&ip).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let mut table = PeerTable::new();
        table.upsert("alice@10.0.0.2", "Alice", ip(10, 0, 0, 2), 50999);
        let record = table.get("alice@10.0.0.2").unwrap();
        assert_eq!(record.display_name, "Alice");
    }

    #[test]
    fn resolve_unique_prefix_succeeds() {
        let mut table = PeerTable::new();
        table.upsert("alice@10.0.0.2", "Alice", ip(10, 0, 0, 2), 50999);
        assert_eq!(table.resolve("alice").unwrap(), "alice@10.0.0.2");
    }

    #[test]
    fn resolve_ambiguous_prefix_errors() {
        let mut table = PeerTable::new();
        table.upsert("al@10.0.0.2", "A", ip(10, 0, 0, 2), 50999);
        table.upsert("al@10.0.0.3", "A2", ip(10, 0, 0, 3), 50999);
        assert!(matches!(table.resolve("al"), Err(HandleResolveError::Ambiguous(_, _))));
    }

    #[test]
    fn resolve_unknown_handle_errors() {
        let table = PeerTable::new();
        assert!(matches!(table.resolve("nobody"), Err(HandleResolveError::Unknown(_))));
    }

    #[test]
    fn ip_tracker_counts_attempts_without_gating() {
        let mut tracker = IpTracker::new();
        tracker.record(ip(10, 0, 0, 2), Some("alice@10.0.0.2"));
        tracker.record(ip(10, 0, 0, 2), Some("alice@10.0.0.2"));
        assert_eq!(tracker.attempts(ip(10, 0, 0, 2)), 2);
        assert!(!tracker.is_blocked(ip(10, 0, 0, 2)));
    }
}
