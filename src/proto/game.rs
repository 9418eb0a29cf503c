//! Game packet family, spoken between clients and a dedicated server.
//!
//! The header is intentionally minimal (7 bytes, no magic) because these
//! packets are the per-tick hot path: `type u8, sequence u32,
//! payload_size u16`. Unknown types are ignored silently.

use bytes::{Buf, BufMut};

use super::{ensure_len, put_fixed_str, read_fixed_str, WireError, MAX_DATAGRAM};

pub const GAME_PORT: u16 = 27015;
pub const HEADER_SIZE: usize = 7;

pub const USERNAME_MAX: usize = 32;
pub const HERO_NAME_MAX: usize = 32;

/// Stable network identifier of a replicated entity. 0 is invalid.
pub type NetworkId = u32;
pub const INVALID_NETWORK_ID: NetworkId = 0;

/// Server-assigned client identifier. 0 is invalid.
pub type ClientId = u32;
pub const INVALID_CLIENT_ID: ClientId = 0;

pub type TeamId = i32;
pub const TEAM_NEUTRAL: TeamId = 0;
pub const TEAM_BLUE: TeamId = 1;
pub const TEAM_RED: TeamId = 2;

pub type Vec3 = [f32; 3];
pub type Quat = [f32; 4];

/// Identity quaternion, w-first.
pub const QUAT_IDENTITY: Quat = [1.0, 0.0, 0.0, 0.0];

/// The most entities one snapshot datagram will carry. The encoder truncates
/// beyond this bound rather than emit an oversized datagram.
pub const MAX_SNAPSHOT_ENTITIES: usize =
    (MAX_DATAGRAM - HEADER_SIZE - WorldSnapshot::FIXED_SIZE) / EntityRecord::SIZE;

/// Game packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GamePacketType {
    ConnectionRequest = 1,
    ConnectionAccepted = 2,
    ConnectionRejected = 3,
    Disconnect = 4,
    Ping = 5,
    Pong = 6,
    ClientInput = 7,
    WorldSnapshot = 8,
    GameEvent = 9,
}

impl GamePacketType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::ConnectionRequest,
            2 => Self::ConnectionAccepted,
            3 => Self::ConnectionRejected,
            4 => Self::Disconnect,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::ClientInput,
            8 => Self::WorldSnapshot,
            9 => Self::GameEvent,
            _ => return None,
        })
    }
}

/// Parsed game packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameHeader {
    pub packet_type: GamePacketType,
    pub sequence: u32,
    pub payload_size: u16,
}

pub fn build_packet(packet_type: GamePacketType, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.put_u8(packet_type as u8);
    out.put_u32_le(sequence);
    out.put_u16_le(payload.len() as u16);
    out.put_slice(payload);
    out
}

pub fn parse_packet(datagram: &[u8]) -> Result<(GameHeader, &[u8]), WireError> {
    if datagram.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            need: HEADER_SIZE,
            have: datagram.len(),
        });
    }
    let mut buf = datagram;
    let raw_type = buf.get_u8();
    let packet_type =
        GamePacketType::from_u8(raw_type).ok_or(WireError::UnknownType(u16::from(raw_type)))?;
    let sequence = buf.get_u32_le();
    let payload_size = buf.get_u16_le();

    let available = datagram.len() - HEADER_SIZE;
    if payload_size as usize > available {
        return Err(WireError::PayloadOverrun {
            declared: u32::from(payload_size),
            available,
        });
    }
    let payload = &datagram[HEADER_SIZE..HEADER_SIZE + payload_size as usize];
    Ok((
        GameHeader {
            packet_type,
            sequence,
            payload_size,
        },
        payload,
    ))
}

fn put_vec3(buf: &mut impl BufMut, v: Vec3) {
    for c in v {
        buf.put_f32_le(c);
    }
}

fn get_vec3(buf: &mut impl Buf) -> Vec3 {
    [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()]
}

fn put_quat(buf: &mut impl BufMut, q: Quat) {
    for c in q {
        buf.put_f32_le(c);
    }
}

fn get_quat(buf: &mut impl Buf) -> Quat {
    [
        buf.get_f32_le(),
        buf.get_f32_le(),
        buf.get_f32_le(),
        buf.get_f32_le(),
    ]
}

/// Connection handshake request. Carries the client's account identity so
/// the server can report disconnects to the coordinator by account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionRequest {
    pub account_id: u64,
    pub team_slot_hint: u8,
    pub username: String,
    pub hero_name: String,
}

impl ConnectionRequest {
    pub const SIZE: usize = 8 + 8 + USERNAME_MAX + HERO_NAME_MAX;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u64_le(self.account_id);
        buf.put_u8(self.team_slot_hint);
        buf.put_bytes(0, 7);
        put_fixed_str(&mut buf, USERNAME_MAX, &self.username);
        put_fixed_str(&mut buf, HERO_NAME_MAX, &self.hero_name);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let account_id = buf.get_u64_le();
        let team_slot_hint = buf.get_u8();
        buf.advance(7);
        Ok(Self {
            account_id,
            team_slot_hint,
            username: read_fixed_str(&mut buf, USERNAME_MAX),
            hero_name: read_fixed_str(&mut buf, HERO_NAME_MAX),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionAccepted {
    pub assigned_client_id: ClientId,
}

impl ConnectionAccepted {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u32_le(self.assigned_client_id);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        Ok(Self {
            assigned_client_id: buf.get_u32_le(),
        })
    }
}

/// Input command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum InputCommand {
    #[default]
    None = 0,
    Move = 1,
    AttackMove = 2,
    AttackTarget = 3,
    CastAbility = 4,
    UseItem = 5,
    Stop = 6,
    Hold = 7,
}

impl InputCommand {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Move,
            2 => Self::AttackMove,
            3 => Self::AttackTarget,
            4 => Self::CastAbility,
            5 => Self::UseItem,
            6 => Self::Stop,
            7 => Self::Hold,
            _ => Self::None,
        }
    }
}

/// Ability target kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TargetKind {
    #[default]
    None = 0,
    Position = 1,
    Unit = 2,
    Direction = 3,
}

impl TargetKind {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Position,
            2 => Self::Unit,
            3 => Self::Direction,
            _ => Self::None,
        }
    }
}

/// Player input command, sent from client to server. Fixed 76-byte layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerInput {
    pub sequence: u32,
    pub client_tick: u32,
    pub command: InputCommand,
    pub target_position: Vec3,
    pub move_direction: Vec3,
    pub target_entity: NetworkId,
    pub ability_index: i32,
    pub ability_target_kind: TargetKind,
    pub ability_target_position: Vec3,
    pub ability_target_entity: NetworkId,
    pub item_slot: i32,
    pub shift_queued: bool,
    pub attack_move: bool,
    /// Client send time, used for lag compensation.
    pub timestamp: f32,
}

impl PlayerInput {
    pub const SIZE: usize = 76;

    pub fn move_to(sequence: u32, position: Vec3) -> Self {
        Self {
            sequence,
            command: InputCommand::Move,
            target_position: position,
            ability_index: -1,
            item_slot: -1,
            ..Default::default()
        }
    }

    pub fn attack_target(sequence: u32, target: NetworkId) -> Self {
        Self {
            sequence,
            command: InputCommand::AttackTarget,
            target_entity: target,
            ability_index: -1,
            item_slot: -1,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.client_tick);
        buf.put_u8(self.command as u8);
        buf.put_bytes(0, 3);
        put_vec3(&mut buf, self.target_position);
        put_vec3(&mut buf, self.move_direction);
        buf.put_u32_le(self.target_entity);
        buf.put_i32_le(self.ability_index);
        buf.put_u8(self.ability_target_kind as u8);
        buf.put_bytes(0, 3);
        put_vec3(&mut buf, self.ability_target_position);
        buf.put_u32_le(self.ability_target_entity);
        buf.put_i32_le(self.item_slot);
        buf.put_u8(u8::from(self.shift_queued));
        buf.put_u8(u8::from(self.attack_move));
        buf.put_bytes(0, 2);
        buf.put_f32_le(self.timestamp);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::SIZE)?;
        let sequence = buf.get_u32_le();
        let client_tick = buf.get_u32_le();
        let command = InputCommand::from_u8(buf.get_u8());
        buf.advance(3);
        let target_position = get_vec3(&mut buf);
        let move_direction = get_vec3(&mut buf);
        let target_entity = buf.get_u32_le();
        let ability_index = buf.get_i32_le();
        let ability_target_kind = TargetKind::from_u8(buf.get_u8());
        buf.advance(3);
        let ability_target_position = get_vec3(&mut buf);
        let ability_target_entity = buf.get_u32_le();
        let item_slot = buf.get_i32_le();
        let shift_queued = buf.get_u8() != 0;
        let attack_move = buf.get_u8() != 0;
        buf.advance(2);
        let timestamp = buf.get_f32_le();
        Ok(Self {
            sequence,
            client_tick,
            command,
            target_position,
            move_direction,
            target_entity,
            ability_index,
            ability_target_kind,
            ability_target_position,
            ability_target_entity,
            item_slot,
            shift_queued,
            attack_move,
            timestamp,
        })
    }
}

/// Entity classes carried in the snapshot for client-side presentation.
pub mod entity_type {
    pub const UNKNOWN: u8 = 0;
    pub const HERO: u8 = 1;
    pub const CREEP: u8 = 2;
    pub const TOWER: u8 = 3;
}

/// One replicated entity inside a snapshot. Fixed 62-byte record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityRecord {
    pub network_id: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
    pub health: f32,
    pub max_health: f32,
    pub mana: f32,
    pub max_mana: f32,
    pub state_flags: u32,
    pub team: TeamId,
    pub entity_type: u8,
    /// The client controlling this entity, or `INVALID_CLIENT_ID`.
    pub owner_client_id: ClientId,
}

impl EntityRecord {
    pub const SIZE: usize = 4 + 12 + 16 + 4 * 4 + 4 + 4 + 1 + 1 + 4;

    fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.network_id);
        put_vec3(buf, self.position);
        put_quat(buf, self.rotation);
        buf.put_f32_le(self.health);
        buf.put_f32_le(self.max_health);
        buf.put_f32_le(self.mana);
        buf.put_f32_le(self.max_mana);
        buf.put_u32_le(self.state_flags);
        buf.put_i32_le(self.team);
        buf.put_u8(self.entity_type);
        buf.put_u8(0);
        buf.put_u32_le(self.owner_client_id);
    }

    fn decode_from(buf: &mut impl Buf) -> Self {
        let network_id = buf.get_u32_le();
        let position = get_vec3(buf);
        let rotation = get_quat(buf);
        let health = buf.get_f32_le();
        let max_health = buf.get_f32_le();
        let mana = buf.get_f32_le();
        let max_mana = buf.get_f32_le();
        let state_flags = buf.get_u32_le();
        let team = buf.get_i32_le();
        let entity_type = buf.get_u8();
        buf.advance(1);
        let owner_client_id = buf.get_u32_le();
        Self {
            network_id,
            position,
            rotation,
            health,
            max_health,
            mana,
            max_mana,
            state_flags,
            team,
            entity_type,
            owner_client_id,
        }
    }
}

/// Full world state at a tick, broadcast to every connected client.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub tick: u32,
    pub server_time: f32,
    pub game_time: f32,
    pub current_wave: i32,
    pub time_to_next_wave: f32,
    /// Last input sequence the server processed for the receiving client.
    pub last_processed_input: u32,
    pub entities: Vec<EntityRecord>,
}

impl WorldSnapshot {
    /// Size of the snapshot prefix before the entity records.
    pub const FIXED_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4 + 2 + 2;

    pub fn find_entity(&self, id: NetworkId) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.network_id == id)
    }

    /// Encode, truncating past `MAX_SNAPSHOT_ENTITIES` so the datagram stays
    /// within bounds. Truncation is reported by the caller's logging.
    pub fn encode(&self) -> Vec<u8> {
        let count = self.entities.len().min(MAX_SNAPSHOT_ENTITIES);
        let mut buf = Vec::with_capacity(Self::FIXED_SIZE + count * EntityRecord::SIZE);
        buf.put_u32_le(self.tick);
        buf.put_f32_le(self.server_time);
        buf.put_f32_le(self.game_time);
        buf.put_i32_le(self.current_wave);
        buf.put_f32_le(self.time_to_next_wave);
        buf.put_u32_le(self.last_processed_input);
        buf.put_u16_le(count as u16);
        buf.put_u16_le(0);
        for entity in &self.entities[..count] {
            entity.encode_into(&mut buf);
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        ensure_len(&buf, Self::FIXED_SIZE)?;
        let tick = buf.get_u32_le();
        let server_time = buf.get_f32_le();
        let game_time = buf.get_f32_le();
        let current_wave = buf.get_i32_le();
        let time_to_next_wave = buf.get_f32_le();
        let last_processed_input = buf.get_u32_le();
        let count = buf.get_u16_le() as usize;
        buf.advance(2);
        ensure_len(&buf, count * EntityRecord::SIZE)?;
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(EntityRecord::decode_from(&mut buf));
        }
        Ok(Self {
            tick,
            server_time,
            game_time,
            current_wave,
            time_to_next_wave,
            last_processed_input,
            entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let pkt = build_packet(GamePacketType::Ping, 77, &[]);
        assert_eq!(pkt.len(), HEADER_SIZE);
        let (header, payload) = parse_packet(&pkt).unwrap();
        assert_eq!(header.packet_type, GamePacketType::Ping);
        assert_eq!(header.sequence, 77);
        assert!(payload.is_empty());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut pkt = build_packet(GamePacketType::Ping, 1, &[]);
        pkt[0] = 200;
        assert_eq!(parse_packet(&pkt), Err(WireError::UnknownType(200)));
    }

    #[test]
    fn player_input_roundtrip() {
        let input = PlayerInput {
            sequence: 9,
            client_tick: 300,
            command: InputCommand::CastAbility,
            target_position: [1.0, 0.0, 2.0],
            move_direction: [0.0, 0.0, 1.0],
            target_entity: 12,
            ability_index: 2,
            ability_target_kind: TargetKind::Position,
            ability_target_position: [5.0, 0.0, -3.5],
            ability_target_entity: 0,
            item_slot: -1,
            shift_queued: true,
            attack_move: false,
            timestamp: 12.25,
        };
        let bytes = input.encode();
        assert_eq!(bytes.len(), PlayerInput::SIZE);
        assert_eq!(PlayerInput::decode(&bytes).unwrap(), input);
    }

    #[test]
    fn snapshot_roundtrip() {
        let snapshot = WorldSnapshot {
            tick: 30,
            server_time: 1.0,
            game_time: 1.0,
            current_wave: 0,
            time_to_next_wave: 29.0,
            last_processed_input: 4,
            entities: vec![
                EntityRecord {
                    network_id: 1,
                    position: [10.0, 0.0, 10.0],
                    rotation: QUAT_IDENTITY,
                    health: 600.0,
                    max_health: 600.0,
                    mana: 300.0,
                    max_mana: 300.0,
                    state_flags: 0,
                    team: TEAM_BLUE,
                    entity_type: entity_type::HERO,
                    owner_client_id: 1,
                },
                EntityRecord {
                    network_id: 2,
                    position: [-10.0, 0.0, -10.0],
                    rotation: QUAT_IDENTITY,
                    health: 600.0,
                    max_health: 600.0,
                    mana: 300.0,
                    max_mana: 300.0,
                    state_flags: 0,
                    team: TEAM_RED,
                    entity_type: entity_type::HERO,
                    owner_client_id: 2,
                },
            ],
        };
        let bytes = snapshot.encode();
        let decoded = WorldSnapshot::decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.find_entity(2).unwrap().team, TEAM_RED);
        assert!(decoded.find_entity(99).is_none());
    }

    #[test]
    fn snapshot_encoder_truncates_at_bound() {
        let snapshot = WorldSnapshot {
            tick: 1,
            entities: (0..MAX_SNAPSHOT_ENTITIES as u32 + 8)
                .map(|i| EntityRecord {
                    network_id: i + 1,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let bytes = snapshot.encode();
        assert!(bytes.len() + HEADER_SIZE <= MAX_DATAGRAM);
        let decoded = WorldSnapshot::decode(&bytes).unwrap();
        assert_eq!(decoded.entities.len(), MAX_SNAPSHOT_ENTITIES);
    }
}
