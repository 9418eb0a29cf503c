//! Dedicated-server pool.
//!
//! Servers announce themselves with ServerRegister and stay in the pool as
//! long as heartbeats keep arriving; an entry that misses the TTL is
//! evicted. Assignment reserves an entry until its player count returns to
//! zero.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{info, warn};

use crate::proto::matchmaking::{ServerHeartbeat, ServerRegister};

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub server_id: u64,
    pub ip: String,
    pub game_port: u16,
    /// 0 means unlimited.
    pub capacity: u16,
    pub current_players: u16,
    pub uptime_secs: f32,
    pub secs_since_heartbeat: f32,
    pub reserved: bool,
    /// Where ServerRegister came from; AssignLobby goes back there.
    pub control_addr: SocketAddr,
    insertion_order: u64,
}

pub struct ServerRegistry {
    servers: HashMap<u64, ServerEntry>,
    ttl_secs: f32,
    next_insertion: u64,
}

impl ServerRegistry {
    pub fn new(ttl_secs: f32) -> Self {
        Self {
            servers: HashMap::new(),
            ttl_secs,
            next_insertion: 0,
        }
    }

    /// Insert or replace a pool entry. Registrations with a zero id, empty
    /// ip or zero port are dropped.
    pub fn on_register(&mut self, reg: &ServerRegister, origin: SocketAddr) -> bool {
        if reg.server_id == 0 || reg.server_ip.is_empty() || reg.game_port == 0 {
            warn!(server_id = reg.server_id, "ignoring invalid server registration");
            return false;
        }
        let insertion_order = self.next_insertion;
        self.next_insertion += 1;
        self.servers.insert(
            reg.server_id,
            ServerEntry {
                server_id: reg.server_id,
                ip: reg.server_ip.clone(),
                game_port: reg.game_port,
                capacity: reg.capacity,
                current_players: 0,
                uptime_secs: 0.0,
                secs_since_heartbeat: 0.0,
                reserved: false,
                control_addr: origin,
                insertion_order,
            },
        );
        info!(
            server_id = reg.server_id,
            ip = %reg.server_ip,
            port = reg.game_port,
            capacity = reg.capacity,
            "server registered"
        );
        true
    }

    /// Refresh an entry from a heartbeat. A reservation is released once the
    /// server reports zero players again.
    pub fn on_heartbeat(&mut self, hb: &ServerHeartbeat) -> bool {
        let Some(entry) = self.servers.get_mut(&hb.server_id) else {
            return false;
        };
        entry.current_players = hb.current_players;
        entry.capacity = hb.capacity;
        entry.uptime_secs = hb.uptime_secs;
        entry.secs_since_heartbeat = 0.0;
        if entry.reserved && entry.current_players == 0 {
            entry.reserved = false;
        }
        true
    }

    /// Age all entries and evict those past the TTL. Returns evicted ids.
    pub fn advance(&mut self, dt: f32) -> Vec<u64> {
        let ttl = self.ttl_secs;
        let mut evicted = Vec::new();
        self.servers.retain(|&id, entry| {
            entry.secs_since_heartbeat += dt;
            if entry.secs_since_heartbeat > ttl {
                evicted.push(id);
                false
            } else {
                true
            }
        });
        for id in &evicted {
            warn!(server_id = id, "server timed out, evicting from pool");
        }
        evicted
    }

    /// Least-loaded unreserved entry with spare capacity; ties go to the
    /// earliest registration.
    pub fn pick_server(&self) -> Option<u64> {
        self.servers
            .values()
            .filter(|s| !s.reserved)
            .filter(|s| s.capacity == 0 || s.current_players < s.capacity)
            .min_by_key(|s| (s.current_players, s.insertion_order))
            .map(|s| s.server_id)
    }

    pub fn reserve(&mut self, server_id: u64) {
        if let Some(entry) = self.servers.get_mut(&server_id) {
            entry.reserved = true;
        }
    }

    pub fn get(&self, server_id: u64) -> Option<&ServerEntry> {
        self.servers.get(&server_id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(id: u64, capacity: u16) -> ServerRegister {
        ServerRegister {
            server_id: id,
            server_ip: "127.0.0.1".into(),
            game_port: 27015,
            control_port: 0,
            capacity,
        }
    }

    fn origin() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn register_validates_fields() {
        let mut pool = ServerRegistry::new(15.0);
        assert!(!pool.on_register(&reg(0, 10), origin()));
        let mut bad_ip = reg(1, 10);
        bad_ip.server_ip.clear();
        assert!(!pool.on_register(&bad_ip, origin()));
        assert!(pool.on_register(&reg(1, 10), origin()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn ttl_eviction_after_fifteen_seconds() {
        let mut pool = ServerRegistry::new(15.0);
        pool.on_register(&reg(1, 10), origin());
        assert!(pool.advance(14.9).is_empty());
        // One heartbeat resets the clock.
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 1,
            current_players: 0,
            capacity: 10,
            uptime_secs: 14.9,
        });
        assert!(pool.advance(14.9).is_empty());
        assert_eq!(pool.advance(1.0), vec![1]);
        assert!(pool.pick_server().is_none());
    }

    #[test]
    fn pick_prefers_least_loaded_then_insertion_order() {
        let mut pool = ServerRegistry::new(15.0);
        pool.on_register(&reg(1, 10), origin());
        pool.on_register(&reg(2, 10), origin());
        pool.on_register(&reg(3, 10), origin());
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 1,
            current_players: 4,
            capacity: 10,
            uptime_secs: 1.0,
        });
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 2,
            current_players: 2,
            capacity: 10,
            uptime_secs: 1.0,
        });
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 3,
            current_players: 2,
            capacity: 10,
            uptime_secs: 1.0,
        });
        // 2 and 3 tie on load; 2 registered first.
        assert_eq!(pool.pick_server(), Some(2));
    }

    #[test]
    fn reservation_blocks_pick_and_heartbeat_releases_it() {
        let mut pool = ServerRegistry::new(15.0);
        pool.on_register(&reg(1, 10), origin());
        let picked = pool.pick_server().unwrap();
        pool.reserve(picked);
        assert!(pool.get(1).unwrap().reserved);
        assert!(pool.pick_server().is_none());

        // Players joined and then the match ended.
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 1,
            current_players: 2,
            capacity: 10,
            uptime_secs: 5.0,
        });
        assert!(pool.get(1).unwrap().reserved);
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 1,
            current_players: 0,
            capacity: 10,
            uptime_secs: 9.0,
        });
        assert!(!pool.get(1).unwrap().reserved);
        assert_eq!(pool.pick_server(), Some(1));
    }

    #[test]
    fn full_server_is_not_picked() {
        let mut pool = ServerRegistry::new(15.0);
        pool.on_register(&reg(1, 2), origin());
        pool.on_heartbeat(&ServerHeartbeat {
            server_id: 1,
            current_players: 2,
            capacity: 2,
            uptime_secs: 1.0,
        });
        assert!(pool.pick_server().is_none());
    }
}
