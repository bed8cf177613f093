//! Tracker state: peer registry, liveness, and the matching pass.
//!
//! All mutation happens through one owner (the tracker's receive loop), so no
//! locking is needed here. Time is injected so the expiry rules are testable.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::protocol::{Message, PeerRole};

/// Expiry knobs for the housekeeping tick.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// A peer silent for longer than this is reaped.
    pub offline_threshold: Duration,
    /// A match older than this is dropped (never renewed by the transfer
    /// itself; the TCP session does not depend on the match surviving).
    pub unmatch_buffer: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            offline_threshold: Duration::from_secs(10),
            unmatch_buffer: Duration::from_secs(10),
        }
    }
}

/// One registered participant, keyed externally by its UDP source address.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub role: PeerRole,
    /// Advertised per record: a seeder's whole catalog, a leecher's one want.
    pub file_ids: Vec<String>,
    pub client_name: String,
    last_seen: Instant,
}

/// Composite key for a tracker-asserted pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MatchKey {
    seeder: SocketAddr,
    leecher: SocketAddr,
}

pub struct Registry {
    config: RegistryConfig,
    // BTreeMaps keep the matching pass deterministic within one tick.
    seeders: BTreeMap<SocketAddr, PeerRecord>,
    leechers: BTreeMap<SocketAddr, PeerRecord>,
    matches: BTreeMap<MatchKey, Instant>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            seeders: BTreeMap::new(),
            leechers: BTreeMap::new(),
            matches: BTreeMap::new(),
        }
    }

    pub fn seeder_count(&self) -> usize {
        self.seeders.len()
    }

    pub fn leecher_count(&self) -> usize {
        self.leechers.len()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Dispatch one inbound datagram already decoded by the caller.
    /// Messages outside the tracker vocabulary are ignored.
    pub fn handle_message(&mut self, from: SocketAddr, msg: Message, now: Instant) {
        match msg {
            Message::DiscoverPeer {
                type_of_peer,
                file_ids,
                client_name,
                ..
            } => self.register(from, type_of_peer, file_ids, client_name, now),
            Message::Available { type_of_peer } => self.refresh(from, type_of_peer, now),
            Message::RemoveMatch => self.remove_matches_for(from),
            other => debug!(%from, ?other, "ignoring non-tracker message"),
        }
    }

    /// Upsert a peer record. Re-registration overwrites role and catalog.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        role: PeerRole,
        file_ids: Vec<String>,
        client_name: String,
        now: Instant,
    ) {
        let record = PeerRecord {
            role,
            file_ids,
            client_name,
            last_seen: now,
        };
        if role.is_seeding() {
            self.leechers.remove(&addr);
            self.seeders.insert(addr, record);
        } else {
            self.seeders.remove(&addr);
            self.leechers.insert(addr, record);
        }
        debug!(%addr, ?role, "peer registered");
    }

    /// Refresh liveness for an existing record. Unknown peers are a no-op,
    /// not an error.
    pub fn refresh(&mut self, addr: SocketAddr, role: PeerRole, now: Instant) {
        let table = if role.is_seeding() {
            &mut self.seeders
        } else {
            &mut self.leechers
        };
        if let Some(record) = table.get_mut(&addr) {
            record.last_seen = now;
        }
    }

    /// Explicit unmatch: drop every match the peer participates in, at once.
    pub fn remove_matches_for(&mut self, addr: SocketAddr) {
        let before = self.matches.len();
        self.matches
            .retain(|key, _| key.seeder != addr && key.leecher != addr);
        if self.matches.len() != before {
            info!(%addr, removed = before - self.matches.len(), "matches removed on request");
        }
    }

    /// The housekeeping tick: expire stale peers and matches, run the
    /// matching pass, and probe liveness. Returns the datagrams to send.
    pub fn housekeeping(&mut self, now: Instant) -> Vec<(SocketAddr, Message)> {
        let offline = self.config.offline_threshold;
        self.seeders
            .retain(|_, r| now.duration_since(r.last_seen) <= offline);
        self.leechers
            .retain(|_, r| now.duration_since(r.last_seen) <= offline);

        let buffer = self.config.unmatch_buffer;
        self.matches
            .retain(|_, created| now.duration_since(*created) <= buffer);
        // Matches pointing at reaped peers go with them.
        let (seeders, leechers) = (&self.seeders, &self.leechers);
        self.matches
            .retain(|k, _| seeders.contains_key(&k.seeder) && leechers.contains_key(&k.leecher));

        let mut sends = Vec::new();
        for (&leecher_addr, leecher) in &self.leechers {
            for (&seeder_addr, seeder) in &self.seeders {
                let key = MatchKey {
                    seeder: seeder_addr,
                    leecher: leecher_addr,
                };
                let shares_file = leecher
                    .file_ids
                    .iter()
                    .any(|f| seeder.file_ids.contains(f));
                if shares_file && !self.matches.contains_key(&key) {
                    info!(seeder = %seeder_addr, leecher = %leecher_addr, "match found");
                    self.matches.insert(key, now);
                    sends.push((
                        leecher_addr,
                        Message::MatchFound {
                            id: seeder.role,
                            ip: seeder_addr.ip(),
                            port: seeder_addr.port(),
                        },
                    ));
                    sends.push((
                        seeder_addr,
                        Message::MatchFound {
                            id: leecher.role,
                            ip: leecher_addr.ip(),
                            port: leecher_addr.port(),
                        },
                    ));
                }
            }
        }

        for &addr in self.seeders.keys().chain(self.leechers.keys()) {
            sends.push((addr, Message::Ping));
        }
        sends
    }
}
