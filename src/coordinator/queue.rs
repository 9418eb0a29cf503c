//! Queue and lobby engine.
//!
//! Admission is token-gated: a QueueRequest parks in `pending` while the
//! auth server validates the session, then moves to the FIFO queue. When
//! enough players wait, a lobby forms and runs the accept protocol; full
//! acceptance hands the lobby to the coordinator for server assignment,
//! anything else cancels with selective requeue.
//!
//! The engine is pure state: every entry point returns the datagrams and
//! validation requests to issue as [`Action`]s, and the coordinator loop
//! owns the sockets. Timers advance only through [`QueueEngine::advance`].

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::proto::auth::{AuthResult, ValidateTokenResponse};
use crate::proto::matchmaking::{
    MatchAcceptStatus, MatchCancelled, MatchFound, MatchMode, MmMessageType, QueueRejected,
    QueueRequest, QueueUpdate, MAX_LOBBY_PLAYERS,
};

pub type PlayerId = u64;

/// Side effects requested by the engine, executed by the coordinator loop.
#[derive(Debug)]
pub enum Action {
    /// Send a matchmaking packet.
    Send {
        addr: SocketAddr,
        msg_type: MmMessageType,
        player_id: u64,
        lobby_id: u64,
        payload: Vec<u8>,
    },
    /// Ask the auth server to validate a session token.
    ValidateToken {
        request_id: u32,
        session_token: String,
        player_ip: String,
    },
    /// Every member accepted; assign a server and start the match.
    LobbyReady(ReadyLobby),
}

/// A lobby that finished its accept phase, detached from the engine.
#[derive(Debug, Clone)]
pub struct ReadyLobby {
    pub lobby_id: u64,
    pub mode: MatchMode,
    pub region: String,
    /// In team-slot order.
    pub players: Vec<PlayerId>,
    pub account_by_player: HashMap<PlayerId, u64>,
}

#[derive(Debug, Clone)]
struct QueuedPlayer {
    player_id: PlayerId,
    account_id: u64,
    mode: MatchMode,
    region: String,
    session_token: String,
    search_time_secs: f32,
}

#[derive(Debug, Clone)]
struct PendingValidation {
    player_id: PlayerId,
    mode: MatchMode,
    region: String,
    session_token: String,
    request_id: u32,
    age_secs: f32,
}

#[derive(Debug, Clone)]
struct Lobby {
    lobby_id: u64,
    mode: MatchMode,
    region: String,
    players: Vec<PlayerId>,
    account_by_player: HashMap<PlayerId, u64>,
    accepted: HashMap<PlayerId, bool>,
    accept_timeout_secs: f32,
    age_secs: f32,
}

impl Lobby {
    fn all_accepted(&self) -> bool {
        !self.players.is_empty() && self.accepted.values().all(|&a| a)
    }

    fn accept_status(&self, required_players: u16) -> MatchAcceptStatus {
        let mut status = MatchAcceptStatus {
            player_count: self.players.len().min(MAX_LOBBY_PLAYERS) as u16,
            required_players: u16::min(required_players, MAX_LOBBY_PLAYERS as u16),
            ..Default::default()
        };
        for (i, &pid) in self.players.iter().take(MAX_LOBBY_PLAYERS).enumerate() {
            status.player_ids[i] = pid;
            status.accepted[i] = self.accepted.get(&pid).copied().unwrap_or(false);
        }
        status
    }
}

pub struct QueueEngine {
    required_players: u16,
    accept_timeout_secs: f32,
    validation_timeout_secs: f32,
    queue_update_interval_secs: f32,

    /// Reply addresses for every player the engine has heard from.
    players: HashMap<PlayerId, SocketAddr>,
    pending: HashMap<PlayerId, PendingValidation>,
    queue: Vec<QueuedPlayer>,
    lobbies: HashMap<u64, Lobby>,

    next_request_id: u32,
    secs_since_queue_update: f32,
}

impl QueueEngine {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            required_players: config.required_players,
            accept_timeout_secs: config.accept_timeout_secs,
            validation_timeout_secs: config.auth_validation_timeout_secs,
            queue_update_interval_secs: config.queue_update_interval_secs,
            players: HashMap::new(),
            pending: HashMap::new(),
            queue: Vec::new(),
            lobbies: HashMap::new(),
            next_request_id: 1,
            secs_since_queue_update: 0.0,
        }
    }

    pub fn addr_of(&self, player_id: PlayerId) -> Option<SocketAddr> {
        self.players.get(&player_id).copied()
    }

    /// Client keepalive; refreshes the reply address.
    pub fn on_heartbeat(&mut self, player_id: PlayerId, from: SocketAddr) {
        if player_id != 0 {
            self.players.insert(player_id, from);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, player_id: PlayerId) -> bool {
        self.queue.iter().any(|q| q.player_id == player_id)
    }

    pub fn is_pending(&self, player_id: PlayerId) -> bool {
        self.pending.contains_key(&player_id)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn lobby_of(&self, player_id: PlayerId) -> Option<u64> {
        self.lobbies
            .values()
            .find(|l| l.players.contains(&player_id))
            .map(|l| l.lobby_id)
    }

    /// Token-gated queue admission.
    pub fn on_queue_request(
        &mut self,
        player_id: PlayerId,
        from: SocketAddr,
        request: &QueueRequest,
    ) -> Vec<Action> {
        if player_id == 0 {
            return Vec::new();
        }
        self.players.insert(player_id, from);

        let region = if request.region.is_empty() {
            "auto".to_string()
        } else {
            request.region.clone()
        };

        if request.session_token.is_empty() {
            warn!(player_id, "queue request without session token");
            return vec![self.reject(player_id, "Authentication required", true, false)];
        }

        // Idempotent: a player already queued or mid-validation is ignored.
        if self.is_queued(player_id) || self.is_pending(player_id) {
            return Vec::new();
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        self.pending.insert(
            player_id,
            PendingValidation {
                player_id,
                mode: request.mode,
                region,
                session_token: request.session_token.clone(),
                request_id,
                age_secs: 0.0,
            },
        );
        info!(player_id, request_id, "queue request, validating token");

        vec![Action::ValidateToken {
            request_id,
            session_token: request.session_token.clone(),
            player_ip: from.ip().to_string(),
        }]
    }

    pub fn on_queue_cancel(&mut self, player_id: PlayerId) {
        let before = self.queue.len();
        self.queue.retain(|q| q.player_id != player_id);
        self.pending.remove(&player_id);
        if self.queue.len() != before {
            info!(player_id, "player cancelled queue");
        }
    }

    /// Resolve a pending validation from the auth server's answer. Lookup is
    /// by `request_id` alone; if several entries somehow match, the oldest
    /// wins.
    pub fn on_auth_response(&mut self, response: &ValidateTokenResponse, request_id: u32) -> Vec<Action> {
        let Some(player_id) = self
            .pending
            .values()
            .filter(|pv| pv.request_id == request_id)
            .max_by(|a, b| a.age_secs.total_cmp(&b.age_secs))
            .map(|pv| pv.player_id)
        else {
            warn!(request_id, "auth response for unknown request");
            return Vec::new();
        };
        let pv = self
            .pending
            .remove(&player_id)
            .expect("pending entry exists for resolved player");

        if response.result != AuthResult::Success || response.is_banned {
            let reason = if response.is_banned {
                "Account is banned".to_string()
            } else {
                match response.result {
                    AuthResult::TokenExpired => "Session expired - please login again".to_string(),
                    AuthResult::TokenInvalid => "Invalid session token".to_string(),
                    _ if !response.error_message.is_empty() => response.error_message.clone(),
                    _ => "Authentication failed".to_string(),
                }
            };
            warn!(player_id, reason = %reason, banned = response.is_banned, "queue admission denied");
            return vec![self.reject(player_id, &reason, true, response.is_banned)];
        }

        // One queue entry per account: a second device queueing the same
        // account is turned away rather than duplicated.
        if self
            .queue
            .iter()
            .any(|q| q.account_id == response.account_id)
        {
            warn!(player_id, account_id = response.account_id, "account already queued");
            return vec![self.reject(player_id, "Account is already in queue", false, false)];
        }

        self.queue.push(QueuedPlayer {
            player_id,
            account_id: response.account_id,
            mode: pv.mode,
            region: pv.region,
            session_token: pv.session_token,
            search_time_secs: 0.0,
        });
        info!(
            player_id,
            account_id = response.account_id,
            in_queue = self.queue.len(),
            "player queued"
        );

        let mut actions = vec![self.message(player_id, MmMessageType::QueueConfirm, 0, Vec::new())];
        actions.extend(self.try_form_lobbies());
        actions
    }

    pub fn on_match_accept(&mut self, player_id: PlayerId, lobby_id: u64) -> Vec<Action> {
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            return Vec::new();
        };
        let Some(flag) = lobby.accepted.get_mut(&player_id) else {
            return Vec::new();
        };
        if *flag {
            // Duplicate accept is a no-op beyond the first.
            return Vec::new();
        }
        *flag = true;
        info!(player_id, lobby_id, "match accepted");

        let mut actions = self.broadcast_accept_status(lobby_id);
        let ready = self
            .lobbies
            .get(&lobby_id)
            .is_some_and(Lobby::all_accepted);
        if ready {
            let lobby = self.lobbies.remove(&lobby_id).expect("lobby present");
            actions.push(Action::LobbyReady(ReadyLobby {
                lobby_id: lobby.lobby_id,
                mode: lobby.mode,
                region: lobby.region,
                players: lobby.players,
                account_by_player: lobby.account_by_player,
            }));
        }
        actions
    }

    pub fn on_match_decline(&mut self, player_id: PlayerId, lobby_id: u64) -> Vec<Action> {
        let Some(lobby) = self.lobbies.remove(&lobby_id) else {
            return Vec::new();
        };
        if !lobby.accepted.contains_key(&player_id) {
            // A stranger cannot cancel someone else's lobby.
            self.lobbies.insert(lobby_id, lobby);
            return Vec::new();
        }
        warn!(player_id, lobby_id, "match declined, lobby cancelled");
        self.cancel_lobby(lobby, "Player declined", player_id)
    }

    /// Advance every timer by `dt` seconds: pending-validation timeouts,
    /// lobby accept timeouts, queue search times, periodic queue updates and
    /// lobby formation.
    pub fn advance(&mut self, dt: f32) -> Vec<Action> {
        let mut actions = Vec::new();

        // Pending validations: reject when the auth server stays silent.
        let mut timed_out = Vec::new();
        for pv in self.pending.values_mut() {
            pv.age_secs += dt;
            if pv.age_secs >= self.validation_timeout_secs {
                timed_out.push(pv.player_id);
            }
        }
        for player_id in timed_out {
            self.pending.remove(&player_id);
            warn!(player_id, "auth validation timed out");
            actions.push(self.reject(player_id, "Auth timeout", true, false));
        }

        // Lobby accept timeouts: blame the first member who never accepted.
        let mut expired = Vec::new();
        for lobby in self.lobbies.values_mut() {
            lobby.age_secs += dt;
            if lobby.age_secs >= lobby.accept_timeout_secs {
                expired.push(lobby.lobby_id);
            }
        }
        for lobby_id in expired {
            let lobby = self.lobbies.remove(&lobby_id).expect("expired lobby present");
            let blamed = lobby
                .players
                .iter()
                .find(|p| !lobby.accepted.get(p).copied().unwrap_or(false))
                .copied()
                .unwrap_or(0);
            warn!(lobby_id, blamed, "lobby accept timed out");
            actions.extend(self.cancel_lobby(lobby, "Accept timeout", blamed));
        }

        // Queue aging and periodic updates.
        for q in &mut self.queue {
            q.search_time_secs += dt;
        }
        self.secs_since_queue_update += dt;
        if self.secs_since_queue_update >= self.queue_update_interval_secs && !self.queue.is_empty()
        {
            self.secs_since_queue_update = 0.0;
            let depth = self.queue.len() as u32;
            let missing = self.required_players as i64 - self.queue.len() as i64;
            let estimated_wait_secs = missing.max(0) as f32 * 10.0;
            let updates: Vec<(PlayerId, QueueUpdate)> = self
                .queue
                .iter()
                .map(|q| {
                    (
                        q.player_id,
                        QueueUpdate {
                            players_in_queue: depth,
                            estimated_wait_secs,
                            search_time_secs: q.search_time_secs,
                            region: q.region.clone(),
                        },
                    )
                })
                .collect();
            for (player_id, update) in updates {
                actions.push(self.message(
                    player_id,
                    MmMessageType::QueueUpdate,
                    0,
                    update.encode(),
                ));
            }
        }

        actions.extend(self.try_form_lobbies());
        actions
    }

    /// FIFO lobby formation: while enough players wait, the head of the
    /// queue becomes a lobby.
    fn try_form_lobbies(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while self.queue.len() >= self.required_players as usize {
            let members: Vec<QueuedPlayer> =
                self.queue.drain(..self.required_players as usize).collect();

            let lobby_id = loop {
                let id: u64 = rand::random();
                if id != 0 && !self.lobbies.contains_key(&id) {
                    break id;
                }
            };

            let lobby = Lobby {
                lobby_id,
                mode: members[0].mode,
                region: members[0].region.clone(),
                players: members.iter().map(|m| m.player_id).collect(),
                account_by_player: members
                    .iter()
                    .map(|m| (m.player_id, m.account_id))
                    .collect(),
                accepted: members.iter().map(|m| (m.player_id, false)).collect(),
                accept_timeout_secs: self.accept_timeout_secs,
                age_secs: 0.0,
            };
            info!(lobby_id, players = lobby.players.len(), "lobby formed");

            let found = MatchFound {
                required_players: self.required_players,
                accept_timeout_secs: self.accept_timeout_secs as u16,
            };
            for &pid in &lobby.players {
                actions.push(self.message(
                    pid,
                    MmMessageType::MatchFound,
                    lobby_id,
                    found.encode(),
                ));
            }

            self.lobbies.insert(lobby_id, lobby);
            actions.extend(self.broadcast_accept_status(lobby_id));
        }
        actions
    }

    fn broadcast_accept_status(&mut self, lobby_id: u64) -> Vec<Action> {
        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            return Vec::new();
        };
        let status = lobby.accept_status(self.required_players);
        let members = lobby.players.clone();
        members
            .into_iter()
            .filter_map(|pid| {
                self.addr_of(pid).map(|addr| Action::Send {
                    addr,
                    msg_type: MmMessageType::MatchAcceptStatus,
                    player_id: pid,
                    lobby_id,
                    payload: status.encode(),
                })
            })
            .collect()
    }

    /// Cancel a removed lobby: notify everyone, requeue the members who had
    /// accepted and were not the cause.
    fn cancel_lobby(&mut self, lobby: Lobby, reason: &str, declined_by: PlayerId) -> Vec<Action> {
        let mut actions = Vec::new();
        for &pid in &lobby.players {
            let had_accepted = lobby.accepted.get(&pid).copied().unwrap_or(false);
            let should_requeue = had_accepted && pid != declined_by;

            let cancelled = MatchCancelled {
                reason: reason.to_string(),
                declined_by_player_id: declined_by,
                should_requeue,
            };
            if let Some(addr) = self.addr_of(pid) {
                actions.push(Action::Send {
                    addr,
                    msg_type: MmMessageType::MatchCancelled,
                    player_id: pid,
                    lobby_id: lobby.lobby_id,
                    payload: cancelled.encode(),
                });
            }

            if should_requeue {
                let account_id = lobby.account_by_player.get(&pid).copied().unwrap_or(0);
                self.queue.push(QueuedPlayer {
                    player_id: pid,
                    account_id,
                    mode: lobby.mode,
                    region: lobby.region.clone(),
                    session_token: String::new(),
                    search_time_secs: 0.0,
                });
                info!(player_id = pid, "requeued after cancelled match");
            }
        }
        actions
    }

    fn reject(
        &self,
        player_id: PlayerId,
        reason: &str,
        auth_failed: bool,
        is_banned: bool,
    ) -> Action {
        let payload = QueueRejected {
            reason: reason.to_string(),
            auth_failed,
            is_banned,
        }
        .encode();
        self.message(player_id, MmMessageType::QueueRejected, 0, payload)
    }

    fn message(
        &self,
        player_id: PlayerId,
        msg_type: MmMessageType,
        lobby_id: u64,
        payload: Vec<u8>,
    ) -> Action {
        // The address is known for any player who reached us; fall back to
        // an unspecified address that the endpoint will fail to send to.
        let addr = self
            .addr_of(player_id)
            .unwrap_or_else(|| "0.0.0.0:0".parse().expect("static addr parses"));
        Action::Send {
            addr,
            msg_type,
            player_id,
            lobby_id,
            payload,
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
