//! Dedicated game server.
//!
//! Owns the authoritative world and the client sessions, registers itself
//! with the matchmaking coordinator, heartbeats every couple of seconds and
//! reports player disconnects, reconnects and the end of its game.

pub mod session;
pub mod world;

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info};

use crate::config::GameServerConfig;
use crate::net::Endpoint;
use crate::proto::matchmaking::{
    self, AssignLobby, GameEnded, MmMessageType, PlayerDisconnected, PlayerReconnected,
    ServerHeartbeat, ServerRegister,
};
use crate::proto::{game::TEAM_NEUTRAL, MAX_DATAGRAM};

use session::{SessionEvent, SessionManager};
use world::World;

pub struct GameServer {
    endpoint: Endpoint,
    control: Endpoint,
    coordinator_addr: SocketAddr,
    config: GameServerConfig,
    server_id: u64,
    world: World,
    sessions: SessionManager,
    assigned_lobby: Option<AssignLobby>,
    uptime_secs: f32,
    secs_since_heartbeat: f32,
}

impl GameServer {
    pub async fn bind(config: GameServerConfig) -> anyhow::Result<Self> {
        let endpoint = Endpoint::bind(([0, 0, 0, 0], config.port).into()).await?;
        let control = Endpoint::bind_ephemeral().await?;
        let coordinator_ip: IpAddr = config.coordinator_ip.parse().with_context(|| {
            format!("invalid coordinator address '{}'", config.coordinator_ip)
        })?;
        let coordinator_addr = SocketAddr::new(coordinator_ip, config.coordinator_port);

        let server_id = loop {
            let id: u64 = rand::random();
            if id != 0 {
                break id;
            }
        };

        info!(
            server_id,
            port = config.port,
            coordinator = %coordinator_addr,
            capacity = config.capacity,
            tick_rate = config.tick_rate,
            "dedicated server listening"
        );

        let world = World::new(config.tick_rate);
        let sessions = SessionManager::new(config.capacity, config.client_timeout_secs);
        Ok(Self {
            endpoint,
            control,
            coordinator_addr,
            config,
            server_id,
            world,
            sessions,
            assigned_lobby: None,
            uptime_secs: 0.0,
            secs_since_heartbeat: 0.0,
        })
    }

    /// Fixed-timestep main loop; exits on ctrl-c, sending GameEnded when a
    /// lobby had been assigned.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.send_register();

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                () = tokio::time::sleep(Duration::from_millis(1)) => {}
            }

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;
            self.pump(dt);
        }

        self.send_game_ended();
        info!(server_id = self.server_id, "dedicated server shut down");
        Ok(())
    }

    fn pump(&mut self, dt: f32) {
        self.uptime_secs += dt;
        let mut buf = [0u8; MAX_DATAGRAM];

        // Coordinator control channel: currently just lobby assignments.
        while let Some((len, from)) = self.control.try_recv(&mut buf) {
            let datagram = buf[..len].to_vec();
            self.handle_control(&datagram, from);
        }

        // Client traffic into the session layer.
        while let Some((len, from)) = self.endpoint.try_recv(&mut buf) {
            let datagram = buf[..len].to_vec();
            let events = self.sessions.handle_datagram(&mut self.world, &datagram, from);
            self.process_events(events);
        }

        // Simulation; a tick boundary triggers the snapshot fanout.
        let ticks = self.world.advance_clock(dt);
        if ticks > 0 {
            let events = self.sessions.broadcast_snapshots(&self.world);
            self.process_events(events);
        }

        let events = self.sessions.advance(&mut self.world, dt);
        self.process_events(events);

        self.secs_since_heartbeat += dt;
        if self.secs_since_heartbeat >= self.config.heartbeat_interval_secs {
            self.secs_since_heartbeat = 0.0;
            self.send_heartbeat();
        }
    }

    fn handle_control(&mut self, datagram: &[u8], from: SocketAddr) {
        let (header, payload) = match matchmaking::parse_packet(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, %from, "dropping malformed control packet");
                return;
            }
        };
        if header.msg_type == MmMessageType::AssignLobby {
            if let Ok(assign) = AssignLobby::decode(payload) {
                info!(
                    lobby_id = assign.lobby_id,
                    expected_players = assign.expected_players,
                    "lobby assigned"
                );
                self.assigned_lobby = Some(assign);
            }
        }
    }

    fn process_events(&mut self, events: Vec<SessionEvent>) {
        let lobby_id = self.assigned_lobby.map_or(0, |l| l.lobby_id);
        for event in events {
            match event {
                SessionEvent::Send { addr, datagram } => self.endpoint.try_send(addr, &datagram),
                SessionEvent::Disconnected {
                    client_id,
                    account_id,
                    team_slot,
                    hero_name,
                } => {
                    debug!(client_id, account_id, "reporting disconnect to coordinator");
                    let report = PlayerDisconnected {
                        server_id: self.server_id,
                        lobby_id,
                        account_id,
                        team_slot,
                        hero_name,
                    }
                    .encode();
                    let datagram = matchmaking::build_packet(
                        MmMessageType::PlayerDisconnected,
                        0,
                        lobby_id,
                        &report,
                    );
                    self.control.try_send(self.coordinator_addr, &datagram);
                }
                SessionEvent::Reconnected { account_id } => {
                    let report = PlayerReconnected {
                        account_id,
                        lobby_id,
                    }
                    .encode();
                    let datagram = matchmaking::build_packet(
                        MmMessageType::PlayerReconnected,
                        0,
                        lobby_id,
                        &report,
                    );
                    self.control.try_send(self.coordinator_addr, &datagram);
                }
            }
        }
    }

    fn send_register(&self) {
        let register = ServerRegister {
            server_id: self.server_id,
            server_ip: self.config.advertised_ip.clone(),
            game_port: self.config.port,
            control_port: self.control.local_addr().map_or(0, |a| a.port()),
            capacity: self.config.capacity,
        }
        .encode();
        let datagram = matchmaking::build_packet(MmMessageType::ServerRegister, 0, 0, &register);
        self.control.try_send(self.coordinator_addr, &datagram);
        info!(server_id = self.server_id, "registered with coordinator");
    }

    fn send_heartbeat(&self) {
        let heartbeat = ServerHeartbeat {
            server_id: self.server_id,
            current_players: self.sessions.client_count() as u16,
            capacity: self.config.capacity,
            uptime_secs: self.uptime_secs,
        }
        .encode();
        let datagram = matchmaking::build_packet(MmMessageType::ServerHeartbeat, 0, 0, &heartbeat);
        self.control.try_send(self.coordinator_addr, &datagram);
    }

    fn send_game_ended(&self) {
        let Some(assign) = self.assigned_lobby else {
            return;
        };
        let ended = GameEnded {
            lobby_id: assign.lobby_id,
            winning_team: TEAM_NEUTRAL,
            game_duration_secs: self.world.game_time(),
        }
        .encode();
        let datagram =
            matchmaking::build_packet(MmMessageType::GameEnded, 0, assign.lobby_id, &ended);
        self.control.try_send(self.coordinator_addr, &datagram);
        info!(lobby_id = assign.lobby_id, "game ended report sent");
    }
}
