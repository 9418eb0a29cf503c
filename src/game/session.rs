//! Client sessions on the dedicated server.
//!
//! Owns the handshake, per-client liveness, input plumbing into the world
//! and the snapshot fanout. Pure state: packet handling returns
//! [`SessionEvent`]s for the server loop to transmit or report, so the whole
//! protocol is testable without sockets.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::proto::game::{
    build_packet, parse_packet, ClientId, ConnectionAccepted, ConnectionRequest, GamePacketType,
    PlayerInput, WorldSnapshot,
};

use super::world::World;

/// Side effects of session handling, executed by the server loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Datagram to send on the game endpoint.
    Send { addr: SocketAddr, datagram: Vec<u8> },
    /// A client left (explicit Disconnect or input timeout); the
    /// coordinator must hear about it.
    Disconnected {
        client_id: ClientId,
        account_id: u64,
        team_slot: u8,
        hero_name: String,
    },
    /// A known account came back while a match is running.
    Reconnected { account_id: u64 },
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    pub client_id: ClientId,
    pub account_id: u64,
    pub username: String,
    pub hero_name: String,
    pub team_slot: u8,
    pub remote_addr: SocketAddr,
    pub secs_since_input: f32,
    pub last_input_seq: u32,
}

pub struct SessionManager {
    capacity: u16,
    client_timeout_secs: f32,
    /// Monotonic; ids are never reused within a server lifetime.
    next_client_id: ClientId,
    next_sequence: u32,
    clients: HashMap<ClientId, ClientSession>,
    by_addr: HashMap<SocketAddr, ClientId>,
    /// Accounts that dropped mid-match; their return is a reconnect.
    dropped_accounts: Vec<u64>,
}

impl SessionManager {
    pub fn new(capacity: u16, client_timeout_secs: f32) -> Self {
        Self {
            capacity,
            client_timeout_secs,
            next_client_id: 1,
            next_sequence: 1,
            clients: HashMap::new(),
            by_addr: HashMap::new(),
            dropped_accounts: Vec::new(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn session(&self, client_id: ClientId) -> Option<&ClientSession> {
        self.clients.get(&client_id)
    }

    pub fn client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.by_addr.get(&addr).copied()
    }

    /// Handle one inbound game datagram.
    pub fn handle_datagram(
        &mut self,
        world: &mut World,
        datagram: &[u8],
        from: SocketAddr,
    ) -> Vec<SessionEvent> {
        let (header, payload) = match parse_packet(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, %from, "dropping malformed game packet");
                return Vec::new();
            }
        };

        match header.packet_type {
            GamePacketType::ConnectionRequest => self.on_connection_request(world, payload, from),
            GamePacketType::ClientInput => {
                let Some(client_id) = self.client_by_addr(from) else {
                    return Vec::new();
                };
                let Ok(input) = PlayerInput::decode(payload) else {
                    warn!(client_id, "undecodable input packet");
                    return Vec::new();
                };
                if let Some(session) = self.clients.get_mut(&client_id) {
                    session.secs_since_input = 0.0;
                    if input.sequence > session.last_input_seq {
                        session.last_input_seq = input.sequence;
                    }
                }
                world.apply_input(client_id, &input);
                Vec::new()
            }
            GamePacketType::Ping => {
                let Some(client_id) = self.client_by_addr(from) else {
                    return Vec::new();
                };
                if let Some(session) = self.clients.get_mut(&client_id) {
                    session.secs_since_input = 0.0;
                }
                // Pong echoes the ping's sequence so the client can compute
                // round-trip time.
                vec![SessionEvent::Send {
                    addr: from,
                    datagram: build_packet(GamePacketType::Pong, header.sequence, &[]),
                }]
            }
            GamePacketType::Disconnect => {
                let Some(client_id) = self.client_by_addr(from) else {
                    return Vec::new();
                };
                self.drop_client(world, client_id)
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn on_connection_request(
        &mut self,
        world: &mut World,
        payload: &[u8],
        from: SocketAddr,
    ) -> Vec<SessionEvent> {
        // A repeat request from a connected address re-sends the acceptance
        // with the same id; datagrams get lost.
        if let Some(existing) = self.client_by_addr(from) {
            return vec![self.accepted_event(existing, from)];
        }

        if self.clients.len() >= self.capacity as usize {
            warn!(%from, "server full, rejecting connection");
            return vec![SessionEvent::Send {
                addr: from,
                datagram: build_packet(
                    GamePacketType::ConnectionRejected,
                    self.alloc_sequence(),
                    &[],
                ),
            }];
        }

        let request = ConnectionRequest::decode(payload).unwrap_or_default();

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        self.clients.insert(
            client_id,
            ClientSession {
                client_id,
                account_id: request.account_id,
                username: request.username.clone(),
                hero_name: request.hero_name.clone(),
                team_slot: request.team_slot_hint,
                remote_addr: from,
                secs_since_input: 0.0,
                last_input_seq: 0,
            },
        );
        self.by_addr.insert(from, client_id);
        world.add_client(client_id);
        info!(client_id, %from, account_id = request.account_id, "client connected");

        let mut events = Vec::new();
        if request.account_id != 0 {
            if let Some(pos) = self
                .dropped_accounts
                .iter()
                .position(|&a| a == request.account_id)
            {
                self.dropped_accounts.remove(pos);
                events.push(SessionEvent::Reconnected {
                    account_id: request.account_id,
                });
            }
        }
        events.push(self.accepted_event(client_id, from));
        events
    }

    fn accepted_event(&mut self, client_id: ClientId, addr: SocketAddr) -> SessionEvent {
        let payload = ConnectionAccepted {
            assigned_client_id: client_id,
        }
        .encode();
        SessionEvent::Send {
            addr,
            datagram: build_packet(
                GamePacketType::ConnectionAccepted,
                self.alloc_sequence(),
                &payload,
            ),
        }
    }

    /// Age every session; clients silent past the timeout are evicted as if
    /// they had sent Disconnect.
    pub fn advance(&mut self, world: &mut World, dt: f32) -> Vec<SessionEvent> {
        let mut timed_out = Vec::new();
        for session in self.clients.values_mut() {
            session.secs_since_input += dt;
            if session.secs_since_input > self.client_timeout_secs {
                timed_out.push(session.client_id);
            }
        }
        let mut events = Vec::new();
        for client_id in timed_out {
            warn!(client_id, "client timed out");
            events.extend(self.drop_client(world, client_id));
        }
        events
    }

    fn drop_client(&mut self, world: &mut World, client_id: ClientId) -> Option<SessionEvent> {
        let session = self.clients.remove(&client_id)?;
        self.by_addr.remove(&session.remote_addr);
        world.remove_client(client_id);
        if session.account_id != 0 {
            self.dropped_accounts.push(session.account_id);
        }
        info!(client_id, account_id = session.account_id, "client disconnected");
        Some(SessionEvent::Disconnected {
            client_id,
            account_id: session.account_id,
            team_slot: session.team_slot,
            hero_name: session.hero_name,
        })
    }

    /// One snapshot per connected client, stamped with that client's input
    /// ack.
    pub fn broadcast_snapshots(&mut self, world: &World) -> Vec<SessionEvent> {
        let mut events = Vec::with_capacity(self.clients.len());
        let targets: Vec<(ClientId, SocketAddr)> = self
            .clients
            .values()
            .map(|s| (s.client_id, s.remote_addr))
            .collect();
        for (client_id, addr) in targets {
            let snapshot: WorldSnapshot = world.snapshot_for(Some(client_id));
            if snapshot.entities.len() > crate::proto::game::MAX_SNAPSHOT_ENTITIES {
                warn!(
                    entities = snapshot.entities.len(),
                    limit = crate::proto::game::MAX_SNAPSHOT_ENTITIES,
                    "snapshot truncated to datagram bound"
                );
            }
            events.push(SessionEvent::Send {
                addr,
                datagram: build_packet(
                    GamePacketType::WorldSnapshot,
                    self.alloc_sequence(),
                    &snapshot.encode(),
                ),
            });
        }
        events
    }

    fn alloc_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }
}
