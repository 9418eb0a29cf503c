//! Matchmaking coordinator.
//!
//! Composes the coordinator endpoint, a client socket to the auth server,
//! the dedicated-server pool, the queue/lobby engine and the active-game
//! directory. One event loop owns everything: drain the coordinator socket,
//! drain the auth socket, advance every clock by the measured delta, flush
//! the engine's actions.

pub mod directory;
pub mod queue;
pub mod registry;

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::net::Endpoint;
use crate::proto::auth::{
    self, AuthMessageType, ValidateTokenRequest, ValidateTokenResponse,
};
use crate::proto::matchmaking::{
    build_packet, parse_packet, AssignLobby, CheckActiveGame, MatchCancelled, MatchReady,
    MmMessageType, PlayerDisconnected, PlayerReconnected, QueueRequest, ReconnectRequest,
    ServerHeartbeat, ServerRegister,
};
use crate::proto::{matchmaking::GameEnded, MAX_DATAGRAM};

use directory::ActiveGameDirectory;
use queue::{Action, QueueEngine, ReadyLobby};
use registry::ServerRegistry;

/// A datagram scheduled for the coordinator socket.
#[derive(Debug)]
pub struct Outbound {
    pub addr: SocketAddr,
    pub datagram: Vec<u8>,
}

/// Assign a ready lobby to a dedicated server.
///
/// Picks the least-loaded pool entry; without one the lobby is cancelled
/// with no requeue. Otherwise the server is reserved, told its lobby, the
/// directory records every player under their authenticated account id, and
/// the players learn where to connect.
pub fn start_match(
    engine: &QueueEngine,
    registry: &mut ServerRegistry,
    directory: &mut ActiveGameDirectory,
    uptime_secs: f32,
    ready: &ReadyLobby,
) -> Vec<Outbound> {
    let mut out = Vec::new();

    let Some(server_id) = registry.pick_server() else {
        warn!(lobby_id = ready.lobby_id, "no servers available, cancelling lobby");
        let cancelled = MatchCancelled {
            reason: "No servers available".into(),
            declined_by_player_id: 0,
            should_requeue: false,
        }
        .encode();
        for &pid in &ready.players {
            if let Some(addr) = engine.addr_of(pid) {
                out.push(Outbound {
                    addr,
                    datagram: build_packet(
                        MmMessageType::MatchCancelled,
                        pid,
                        ready.lobby_id,
                        &cancelled,
                    ),
                });
            }
        }
        return out;
    };

    registry.reserve(server_id);
    let server = registry.get(server_id).expect("picked server exists");
    info!(
        lobby_id = ready.lobby_id,
        server_id,
        ip = %server.ip,
        port = server.game_port,
        "lobby assigned to server"
    );

    let assign = AssignLobby {
        server_id,
        lobby_id: ready.lobby_id,
        expected_players: ready.players.len() as u16,
    }
    .encode();
    out.push(Outbound {
        addr: server.control_addr,
        datagram: build_packet(MmMessageType::AssignLobby, 0, ready.lobby_id, &assign),
    });

    let ready_payload = MatchReady {
        server_ip: server.ip.clone(),
        server_port: server.game_port,
    }
    .encode();

    for (slot, &pid) in ready.players.iter().enumerate() {
        let account_id = ready
            .account_by_player
            .get(&pid)
            .copied()
            .expect("every lobby member carries an authenticated account");
        directory.record_match_start(
            account_id,
            ready.lobby_id,
            server_id,
            &server.ip,
            server.game_port,
            slot as u8,
            uptime_secs,
        );
        if let Some(addr) = engine.addr_of(pid) {
            out.push(Outbound {
                addr,
                datagram: build_packet(
                    MmMessageType::MatchReady,
                    pid,
                    ready.lobby_id,
                    &ready_payload,
                ),
            });
        }
    }
    out
}

pub struct Coordinator {
    endpoint: Endpoint,
    auth_endpoint: Endpoint,
    auth_addr: SocketAddr,
    engine: QueueEngine,
    registry: ServerRegistry,
    directory: ActiveGameDirectory,
    uptime_secs: f32,
}

impl Coordinator {
    pub async fn bind(config: CoordinatorConfig) -> anyhow::Result<Self> {
        let endpoint = Endpoint::bind(([0, 0, 0, 0], config.port).into()).await?;
        let auth_endpoint = Endpoint::bind_ephemeral().await?;
        let auth_ip: IpAddr = config
            .auth_ip
            .parse()
            .with_context(|| format!("invalid auth server address '{}'", config.auth_ip))?;
        let auth_addr = SocketAddr::new(auth_ip, config.auth_port);

        info!(
            port = config.port,
            auth = %auth_addr,
            required_players = config.required_players,
            "matchmaking coordinator listening"
        );

        Ok(Self {
            endpoint,
            auth_endpoint,
            auth_addr,
            engine: QueueEngine::new(&config),
            registry: ServerRegistry::new(config.server_ttl_secs),
            directory: ActiveGameDirectory::new(),
            uptime_secs: 0.0,
        })
    }

    /// Event loop at ~1 kHz wake-up.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut last = Instant::now();

        loop {
            while let Some((len, from)) = self.endpoint.try_recv(&mut buf) {
                let datagram = buf[..len].to_vec();
                self.handle_datagram(&datagram, from);
            }
            while let Some((len, from)) = self.auth_endpoint.try_recv(&mut buf) {
                let datagram = buf[..len].to_vec();
                self.handle_auth_datagram(&datagram, from);
            }

            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f32();
            last = now;
            self.advance(dt);

            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn advance(&mut self, dt: f32) {
        self.uptime_secs += dt;
        self.registry.advance(dt);
        let actions = self.engine.advance(dt);
        self.execute(actions);
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let (header, payload) = match parse_packet(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, %from, "dropping malformed matchmaking packet");
                return;
            }
        };
        let player_id = header.player_id;
        let lobby_id = header.lobby_id;

        match header.msg_type {
            MmMessageType::QueueRequest => {
                let Ok(request) = QueueRequest::decode(payload) else {
                    return;
                };
                let actions = self.engine.on_queue_request(player_id, from, &request);
                self.execute(actions);
            }
            MmMessageType::QueueCancel => self.engine.on_queue_cancel(player_id),
            MmMessageType::MatchAccept => {
                let actions = self.engine.on_match_accept(player_id, lobby_id);
                self.execute(actions);
            }
            MmMessageType::MatchDecline => {
                let actions = self.engine.on_match_decline(player_id, lobby_id);
                self.execute(actions);
            }
            MmMessageType::Heartbeat => self.engine.on_heartbeat(player_id, from),

            MmMessageType::ServerRegister => {
                if let Ok(reg) = ServerRegister::decode(payload) {
                    self.registry.on_register(&reg, from);
                }
            }
            MmMessageType::ServerHeartbeat => {
                if let Ok(hb) = ServerHeartbeat::decode(payload) {
                    self.registry.on_heartbeat(&hb);
                }
            }

            MmMessageType::CheckActiveGame => {
                let Ok(check) = CheckActiveGame::decode(payload) else {
                    return;
                };
                self.engine.on_heartbeat(player_id, from);
                self.answer_check_active_game(player_id, check.account_id, from);
            }
            MmMessageType::ReconnectRequest => {
                let Ok(request) = ReconnectRequest::decode(payload) else {
                    return;
                };
                self.engine.on_heartbeat(player_id, from);
                self.answer_reconnect_request(player_id, &request, from);
            }
            MmMessageType::PlayerDisconnected => {
                if let Ok(report) = PlayerDisconnected::decode(payload) {
                    let endpoint = self
                        .registry
                        .get(report.server_id)
                        .map(|s| (s.ip.clone(), s.game_port));
                    self.directory
                        .on_player_disconnected(&report, endpoint, self.uptime_secs);
                }
            }
            MmMessageType::PlayerReconnected => {
                if let Ok(report) = PlayerReconnected::decode(payload) {
                    self.directory
                        .on_player_reconnected(report.account_id, report.lobby_id);
                }
            }
            MmMessageType::GameEnded => {
                if let Ok(ended) = GameEnded::decode(payload) {
                    info!(
                        lobby_id = ended.lobby_id,
                        winning_team = ended.winning_team,
                        duration = ended.game_duration_secs,
                        "game ended"
                    );
                    self.directory.on_game_ended(ended.lobby_id);
                }
            }

            // Coordinator-originated types bouncing back are ignored.
            _ => {}
        }
    }

    fn answer_check_active_game(&self, player_id: u64, account_id: u64, from: SocketAddr) {
        match self.directory.check_active_game(account_id, self.uptime_secs) {
            Some(info) => {
                info!(player_id, account_id, lobby_id = info.lobby_id, "active game found");
                let datagram = build_packet(
                    MmMessageType::ActiveGameInfo,
                    player_id,
                    info.lobby_id,
                    &info.encode(),
                );
                self.endpoint.try_send(from, &datagram);
            }
            None => {
                let datagram = build_packet(MmMessageType::NoActiveGame, player_id, 0, &[]);
                self.endpoint.try_send(from, &datagram);
            }
        }
    }

    fn answer_reconnect_request(
        &self,
        player_id: u64,
        request: &ReconnectRequest,
        from: SocketAddr,
    ) {
        match self.directory.reconnect_request(
            request.account_id,
            request.lobby_id,
            self.uptime_secs,
        ) {
            Some(info) => {
                info!(
                    player_id,
                    account_id = request.account_id,
                    server_ip = %info.server_ip,
                    server_port = info.server_port,
                    "reconnect approved"
                );
                let datagram = build_packet(
                    MmMessageType::ReconnectApproved,
                    player_id,
                    request.lobby_id,
                    &info.encode(),
                );
                self.endpoint.try_send(from, &datagram);
            }
            None => {
                warn!(player_id, account_id = request.account_id, "reconnect denied");
                let cancelled = MatchCancelled {
                    reason: "Game no longer exists".into(),
                    declined_by_player_id: 0,
                    should_requeue: false,
                }
                .encode();
                let datagram = build_packet(
                    MmMessageType::MatchCancelled,
                    player_id,
                    request.lobby_id,
                    &cancelled,
                );
                self.endpoint.try_send(from, &datagram);
            }
        }
    }

    fn handle_auth_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        if from != self.auth_addr {
            debug!(%from, "auth-socket datagram from unexpected source");
        }
        let (header, payload) = match auth::parse_packet(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "dropping malformed auth reply");
                return;
            }
        };
        if header.msg_type != AuthMessageType::ValidateTokenResponse {
            return;
        }
        let Ok(response) = ValidateTokenResponse::decode(payload) else {
            warn!(request_id = header.request_id, "undecodable validation response");
            return;
        };
        let actions = self.engine.on_auth_response(&response, header.request_id);
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send {
                    addr,
                    msg_type,
                    player_id,
                    lobby_id,
                    payload,
                } => {
                    let datagram = build_packet(msg_type, player_id, lobby_id, &payload);
                    self.endpoint.try_send(addr, &datagram);
                }
                Action::ValidateToken {
                    request_id,
                    session_token,
                    player_ip,
                } => {
                    let request = ValidateTokenRequest {
                        session_token,
                        ip_address: player_ip,
                    };
                    let datagram = auth::build_packet(
                        AuthMessageType::ValidateTokenRequest,
                        0,
                        request_id,
                        &request.encode(),
                    );
                    self.auth_endpoint.try_send(self.auth_addr, &datagram);
                }
                Action::LobbyReady(ready) => {
                    let outbound = start_match(
                        &self.engine,
                        &mut self.registry,
                        &mut self.directory,
                        self.uptime_secs,
                        &ready,
                    );
                    for msg in outbound {
                        self.endpoint.try_send(msg.addr, &msg.datagram);
                    }
                }
            }
        }
    }
}
