//! MMP1 protocol family: queueing, the lobby accept protocol, the dedicated
//! server pool, and the reconnect directory, all spoken with the
//! matchmaking coordinator.
//!
//! Header layout (28 bytes): magic u32, version u16, type u16,
//! payload_size u32, player_id u64, lobby_id u64.

use bytes::{Buf, BufMut};

use super::{ensure_len, put_fixed_str, read_fixed_str, WireError};

/// `'MMP1'` interpreted as a little-endian u32.
pub const MM_MAGIC: u32 = u32::from_le_bytes(*b"MMP1");
pub const MM_VERSION: u16 = 1;
pub const COORDINATOR_PORT: u16 = 27016;

pub const HEADER_SIZE: usize = 28;

pub const IP_MAX: usize = 46;
pub const REGION_MAX: usize = 16;
pub const REASON_MAX: usize = 128;
pub const SESSION_TOKEN_MAX: usize = 65;
pub const HERO_NAME_MAX: usize = 32;
pub const MAX_LOBBY_PLAYERS: usize = 10;

/// Matchmaking message types. Numbering is stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MmMessageType {
    // Client -> coordinator
    QueueRequest = 1,
    QueueCancel = 2,
    MatchAccept = 3,
    MatchDecline = 4,
    CheckActiveGame = 5,
    ReconnectRequest = 6,
    Heartbeat = 7,

    // Coordinator -> client
    QueueConfirm = 10,
    QueueUpdate = 11,
    QueueRejected = 12,
    MatchFound = 13,
    MatchAcceptStatus = 14,
    MatchReady = 15,
    MatchCancelled = 16,
    ActiveGameInfo = 17,
    NoActiveGame = 18,
    ReconnectApproved = 19,

    // Dedicated server <-> coordinator
    ServerRegister = 20,
    ServerHeartbeat = 21,
    AssignLobby = 22,
    PlayerDisconnected = 23,
    PlayerReconnected = 24,
    GameEnded = 25,

    Error = 255,
}

impl MmMessageType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::QueueRequest,
            2 => Self::QueueCancel,
            3 => Self::MatchAccept,
            4 => Self::MatchDecline,
            5 => Self::CheckActiveGame,
            6 => Self::ReconnectRequest,
            7 => Self::Heartbeat,
            10 => Self::QueueConfirm,
            11 => Self::QueueUpdate,
            12 => Self::QueueRejected,
            13 => Self::MatchFound,
            14 => Self::MatchAcceptStatus,
            15 => Self::MatchReady,
            16 => Self::MatchCancelled,
            17 => Self::ActiveGameInfo,
            18 => Self::NoActiveGame,
            19 => Self::ReconnectApproved,
            20 => Self::ServerRegister,
            21 => Self::ServerHeartbeat,
            22 => Self::AssignLobby,
            23 => Self::PlayerDisconnected,
            24 => Self::PlayerReconnected,
            25 => Self::GameEnded,
            255 => Self::Error,
            _ => return None,
        })
    }
}

/// Parsed matchmaking packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmHeader {
    pub msg_type: MmMessageType,
    pub payload_size: u32,
    pub player_id: u64,
    pub lobby_id: u64,
}

/// Build `[header][payload]` for the matchmaking wire.
pub fn build_packet(
    msg_type: MmMessageType,
    player_id: u64,
    lobby_id: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.put_u32_le(MM_MAGIC);
    out.put_u16_le(MM_VERSION);
    out.put_u16_le(msg_type as u16);
    out.put_u32_le(payload.len() as u32);
    out.put_u64_le(player_id);
    out.put_u64_le(lobby_id);
    out.put_slice(payload);
    out
}

/// Parse a matchmaking packet, returning the header and a borrowed payload
/// slice.
pub fn parse_packet(datagram: &[u8]) -> Result<(MmHeader, &[u8]), WireError> {
    if datagram.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            need: HEADER_SIZE,
            have: datagram.len(),
        });
    }
    let mut buf = datagram;
    let magic = buf.get_u32_le();
    if magic != MM_MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = buf.get_u16_le();
    if version != MM_VERSION {
        return Err(WireError::BadVersion(version));
    }
    let raw_type = buf.get_u16_le();
    let msg_type = MmMessageType::from_u16(raw_type).ok_or(WireError::UnknownType(raw_type))?;
    let payload_size = buf.get_u32_le();
    let player_id = buf.get_u64_le();
    let lobby_id = buf.get_u64_le();

    let available = datagram.len() - HEADER_SIZE;
    if payload_size as usize > available {
        return Err(WireError::PayloadOverrun {
            declared: payload_size,
            available,
        });
    }
    let payload = &datagram[HEADER_SIZE..HEADER_SIZE + payload_size as usize];
    Ok((
        MmHeader {
            msg_type,
            payload_size,
            player_id,
            lobby_id,
        },
        payload,
    ))
}

/// Match modes. Only the discriminants travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MatchMode {
    #[default]
    AllPick = 0,
    AllRandom = 1,
    Ranked = 2,
}

impl MatchMode {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::AllRandom,
            2 => Self::Ranked,
            _ => Self::AllPick,
        }
    }
}

// ---- Client payloads ----

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueRequest {
    pub mode: MatchMode,
    pub region: String,
    pub session_token: String,
}

impl QueueRequest {
    pub const SIZE: usize = 1 + REGION_MAX + SESSION_TOKEN_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u8(self.mode as u8);
        put_fixed_str(&mut buf, REGION_MAX, &self.region);
        put_fixed_str(&mut buf, SESSION_TOKEN_MAX, &self.session_token);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            mode: MatchMode::from_u8(buf.get_u8()),
            region: read_fixed_str(&mut buf, REGION_MAX),
            session_token: read_fixed_str(&mut buf, SESSION_TOKEN_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueUpdate {
    pub players_in_queue: u32,
    pub estimated_wait_secs: f32,
    pub search_time_secs: f32,
    pub region: String,
}

impl QueueUpdate {
    pub const SIZE: usize = 4 + 4 + 4 + REGION_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u32_le(self.players_in_queue);
        buf.put_f32_le(self.estimated_wait_secs);
        buf.put_f32_le(self.search_time_secs);
        put_fixed_str(&mut buf, REGION_MAX, &self.region);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            players_in_queue: buf.get_u32_le(),
            estimated_wait_secs: buf.get_f32_le(),
            search_time_secs: buf.get_f32_le(),
            region: read_fixed_str(&mut buf, REGION_MAX),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueRejected {
    pub reason: String,
    pub auth_failed: bool,
    pub is_banned: bool,
}

impl QueueRejected {
    pub const SIZE: usize = REASON_MAX + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, REASON_MAX, &self.reason);
        buf.put_u8(u8::from(self.auth_failed));
        buf.put_u8(u8::from(self.is_banned));
        buf.put_bytes(0, 6);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let reason = read_fixed_str(&mut buf, REASON_MAX);
        let auth_failed = buf.get_u8() != 0;
        let is_banned = buf.get_u8() != 0;
        buf.advance(6);
        Ok(Self {
            reason,
            auth_failed,
            is_banned,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchFound {
    pub required_players: u16,
    pub accept_timeout_secs: u16,
}

impl MatchFound {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u16_le(self.required_players);
        buf.put_u16_le(self.accept_timeout_secs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            required_players: buf.get_u16_le(),
            accept_timeout_secs: buf.get_u16_le(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAcceptStatus {
    pub player_count: u16,
    pub required_players: u16,
    pub player_ids: [u64; MAX_LOBBY_PLAYERS],
    pub accepted: [bool; MAX_LOBBY_PLAYERS],
}

impl Default for MatchAcceptStatus {
    fn default() -> Self {
        Self {
            player_count: 0,
            required_players: 0,
            player_ids: [0; MAX_LOBBY_PLAYERS],
            accepted: [false; MAX_LOBBY_PLAYERS],
        }
    }
}

impl MatchAcceptStatus {
    pub const SIZE: usize = 4 + MAX_LOBBY_PLAYERS * 8 + MAX_LOBBY_PLAYERS;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u16_le(self.player_count);
        buf.put_u16_le(self.required_players);
        for id in self.player_ids {
            buf.put_u64_le(id);
        }
        for flag in self.accepted {
            buf.put_u8(u8::from(flag));
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let player_count = buf.get_u16_le();
        let required_players = buf.get_u16_le();
        let mut player_ids = [0u64; MAX_LOBBY_PLAYERS];
        for id in &mut player_ids {
            *id = buf.get_u64_le();
        }
        let mut accepted = [false; MAX_LOBBY_PLAYERS];
        for flag in &mut accepted {
            *flag = buf.get_u8() != 0;
        }
        Ok(Self {
            player_count,
            required_players,
            player_ids,
            accepted,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchReady {
    pub server_ip: String,
    pub server_port: u16,
}

impl MatchReady {
    pub const SIZE: usize = IP_MAX + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, IP_MAX, &self.server_ip);
        buf.put_u16_le(self.server_port);
        buf.put_u16_le(0);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let server_ip = read_fixed_str(&mut buf, IP_MAX);
        let server_port = buf.get_u16_le();
        buf.advance(2);
        Ok(Self {
            server_ip,
            server_port,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchCancelled {
    pub reason: String,
    /// 0 when the cancellation was not attributable to a specific player.
    pub declined_by_player_id: u64,
    pub should_requeue: bool,
}

impl MatchCancelled {
    pub const SIZE: usize = REASON_MAX + 8 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, REASON_MAX, &self.reason);
        buf.put_u64_le(self.declined_by_player_id);
        buf.put_u8(u8::from(self.should_requeue));
        buf.put_bytes(0, 7);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let reason = read_fixed_str(&mut buf, REASON_MAX);
        let declined_by_player_id = buf.get_u64_le();
        let should_requeue = buf.get_u8() != 0;
        buf.advance(7);
        Ok(Self {
            reason,
            declined_by_player_id,
            should_requeue,
        })
    }
}

// ---- Server pool payloads ----

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerRegister {
    pub server_id: u64,
    pub server_ip: String,
    pub game_port: u16,
    pub control_port: u16,
    pub capacity: u16,
}

impl ServerRegister {
    pub const SIZE: usize = 8 + IP_MAX + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.server_id);
        put_fixed_str(&mut buf, IP_MAX, &self.server_ip);
        buf.put_u16_le(self.game_port);
        buf.put_u16_le(self.control_port);
        buf.put_u16_le(self.capacity);
        buf.put_u16_le(0);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let server_id = buf.get_u64_le();
        let server_ip = read_fixed_str(&mut buf, IP_MAX);
        let game_port = buf.get_u16_le();
        let control_port = buf.get_u16_le();
        let capacity = buf.get_u16_le();
        buf.advance(2);
        Ok(Self {
            server_id,
            server_ip,
            game_port,
            control_port,
            capacity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerHeartbeat {
    pub server_id: u64,
    pub current_players: u16,
    pub capacity: u16,
    pub uptime_secs: f32,
}

impl ServerHeartbeat {
    pub const SIZE: usize = 8 + 2 + 2 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.server_id);
        buf.put_u16_le(self.current_players);
        buf.put_u16_le(self.capacity);
        buf.put_f32_le(self.uptime_secs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            server_id: buf.get_u64_le(),
            current_players: buf.get_u16_le(),
            capacity: buf.get_u16_le(),
            uptime_secs: buf.get_f32_le(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssignLobby {
    pub server_id: u64,
    pub lobby_id: u64,
    pub expected_players: u16,
}

impl AssignLobby {
    pub const SIZE: usize = 8 + 8 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.server_id);
        buf.put_u64_le(self.lobby_id);
        buf.put_u16_le(self.expected_players);
        buf.put_u16_le(0);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let server_id = buf.get_u64_le();
        let lobby_id = buf.get_u64_le();
        let expected_players = buf.get_u16_le();
        buf.advance(2);
        Ok(Self {
            server_id,
            lobby_id,
            expected_players,
        })
    }
}

// ---- Reconnect payloads ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckActiveGame {
    pub account_id: u64,
}

impl CheckActiveGame {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.account_id);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            account_id: buf.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectRequest {
    pub account_id: u64,
    pub lobby_id: u64,
}

impl ReconnectRequest {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.account_id);
        buf.put_u64_le(self.lobby_id);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            account_id: buf.get_u64_le(),
            lobby_id: buf.get_u64_le(),
        })
    }
}

/// Payload of both ActiveGameInfo and ReconnectApproved. An approval carries
/// `disconnect_time_secs` of 0.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActiveGameInfo {
    pub lobby_id: u64,
    pub account_id: u64,
    pub server_ip: String,
    pub server_port: u16,
    pub team_slot: u8,
    pub can_reconnect: bool,
    pub hero_name: String,
    pub game_time_secs: f32,
    pub disconnect_time_secs: f32,
}

impl ActiveGameInfo {
    pub const SIZE: usize = 8 + 8 + IP_MAX + 2 + 1 + 1 + HERO_NAME_MAX + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.lobby_id);
        buf.put_u64_le(self.account_id);
        put_fixed_str(&mut buf, IP_MAX, &self.server_ip);
        buf.put_u16_le(self.server_port);
        buf.put_u8(self.team_slot);
        buf.put_u8(u8::from(self.can_reconnect));
        put_fixed_str(&mut buf, HERO_NAME_MAX, &self.hero_name);
        buf.put_f32_le(self.game_time_secs);
        buf.put_f32_le(self.disconnect_time_secs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            lobby_id: buf.get_u64_le(),
            account_id: buf.get_u64_le(),
            server_ip: read_fixed_str(&mut buf, IP_MAX),
            server_port: buf.get_u16_le(),
            team_slot: buf.get_u8(),
            can_reconnect: buf.get_u8() != 0,
            hero_name: read_fixed_str(&mut buf, HERO_NAME_MAX),
            game_time_secs: buf.get_f32_le(),
            disconnect_time_secs: buf.get_f32_le(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerDisconnected {
    pub server_id: u64,
    pub lobby_id: u64,
    pub account_id: u64,
    pub team_slot: u8,
    pub hero_name: String,
}

impl PlayerDisconnected {
    pub const SIZE: usize = 8 + 8 + 8 + 8 + HERO_NAME_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.server_id);
        buf.put_u64_le(self.lobby_id);
        buf.put_u64_le(self.account_id);
        buf.put_u8(self.team_slot);
        buf.put_bytes(0, 7);
        put_fixed_str(&mut buf, HERO_NAME_MAX, &self.hero_name);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let server_id = buf.get_u64_le();
        let lobby_id = buf.get_u64_le();
        let account_id = buf.get_u64_le();
        let team_slot = buf.get_u8();
        buf.advance(7);
        Ok(Self {
            server_id,
            lobby_id,
            account_id,
            team_slot,
            hero_name: read_fixed_str(&mut buf, HERO_NAME_MAX),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerReconnected {
    pub account_id: u64,
    pub lobby_id: u64,
}

impl PlayerReconnected {
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.account_id);
        buf.put_u64_le(self.lobby_id);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            account_id: buf.get_u64_le(),
            lobby_id: buf.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameEnded {
    pub lobby_id: u64,
    pub winning_team: i32,
    pub game_duration_secs: f32,
}

impl GameEnded {
    pub const SIZE: usize = 8 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.lobby_id);
        buf.put_i32_le(self.winning_team);
        buf.put_f32_le(self.game_duration_secs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            lobby_id: buf.get_u64_le(),
            winning_team: buf.get_i32_le(),
            game_duration_secs: buf.get_f32_le(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub const SIZE: usize = REASON_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        put_fixed_str(&mut buf, REASON_MAX, &self.message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            message: read_fixed_str(&mut buf, REASON_MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let pkt = build_packet(MmMessageType::MatchAccept, 11, 22, &[]);
        assert_eq!(pkt.len(), HEADER_SIZE);
        let (header, payload) = parse_packet(&pkt).unwrap();
        assert_eq!(header.msg_type, MmMessageType::MatchAccept);
        assert_eq!(header.player_id, 11);
        assert_eq!(header.lobby_id, 22);
        assert!(payload.is_empty());
    }

    #[test]
    fn rejects_foreign_magic() {
        // An AUTH packet must not parse as matchmaking.
        let pkt = crate::proto::auth::build_packet(
            crate::proto::auth::AuthMessageType::LoginRequest,
            0,
            1,
            &[],
        );
        assert_eq!(parse_packet(&pkt), Err(WireError::BadMagic));
    }

    #[test]
    fn queue_request_roundtrip() {
        let req = QueueRequest {
            mode: MatchMode::Ranked,
            region: "eu-west".into(),
            session_token: "d".repeat(64),
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), QueueRequest::SIZE);
        assert_eq!(QueueRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn accept_status_roundtrip() {
        let mut status = MatchAcceptStatus {
            player_count: 2,
            required_players: 2,
            ..Default::default()
        };
        status.player_ids[0] = 100;
        status.player_ids[1] = 200;
        status.accepted[0] = true;
        let bytes = status.encode();
        assert_eq!(bytes.len(), MatchAcceptStatus::SIZE);
        assert_eq!(MatchAcceptStatus::decode(&bytes).unwrap(), status);
    }

    #[test]
    fn active_game_info_roundtrip() {
        let info = ActiveGameInfo {
            lobby_id: 9,
            account_id: 42,
            server_ip: "127.0.0.1".into(),
            server_port: 27015,
            team_slot: 0,
            can_reconnect: true,
            hero_name: "Warrior".into(),
            game_time_secs: 120.5,
            disconnect_time_secs: 3.0,
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), ActiveGameInfo::SIZE);
        assert_eq!(ActiveGameInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn player_disconnected_roundtrip() {
        let report = PlayerDisconnected {
            server_id: 5,
            lobby_id: 9,
            account_id: 42,
            team_slot: 1,
            hero_name: "Ranger".into(),
        };
        assert_eq!(
            PlayerDisconnected::decode(&report.encode()).unwrap(),
            report
        );
    }

    #[test]
    fn short_payload_is_rejected() {
        let bytes = vec![0u8; QueueRequest::SIZE - 1];
        assert!(matches!(
            QueueRequest::decode(&bytes),
            Err(WireError::Truncated { .. })
        ));
    }
}
