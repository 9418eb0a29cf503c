//! Authoritative world simulation.
//!
//! A deterministic fixed-timestep world: real time accumulates and the
//! simulation steps in whole tick intervals, never fractions. Entities live
//! in an arena keyed by a stable `NetworkId`; heroes belong to clients,
//! creeps march in waves. Clients' inputs are advisory, the world is the
//! sole authority, and it knows nothing about the transport.

use std::collections::HashMap;

use crate::proto::game::{
    entity_type, ClientId, EntityRecord, InputCommand, NetworkId, PlayerInput, Quat, TeamId, Vec3,
    WorldSnapshot, QUAT_IDENTITY, TEAM_BLUE, TEAM_RED,
};

pub const DEFAULT_TICK_RATE: u32 = 30;

const HERO_MAX_HEALTH: f32 = 600.0;
const HERO_MAX_MANA: f32 = 300.0;
const HERO_MOVE_SPEED: f32 = 5.0;
const HERO_HEALTH_REGEN: f32 = 1.5;
const HERO_MANA_REGEN: f32 = 2.0;
const ABILITY_MANA_COST: f32 = 50.0;

const CREEP_MAX_HEALTH: f32 = 250.0;
const CREEP_MOVE_SPEED: f32 = 3.5;
const WAVE_INTERVAL_SECS: f32 = 30.0;

const ARRIVE_EPSILON: f32 = 0.05;

fn team_spawn(team: TeamId) -> Vec3 {
    if team == TEAM_BLUE {
        [-40.0, 0.0, -40.0]
    } else {
        [40.0, 0.0, 40.0]
    }
}

fn opposing_spawn(team: TeamId) -> Vec3 {
    if team == TEAM_BLUE {
        team_spawn(TEAM_RED)
    } else {
        team_spawn(TEAM_BLUE)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum EntityKind {
    Hero { owner: ClientId },
    Creep { goal: Vec3 },
}

#[derive(Debug, Clone)]
struct Entity {
    network_id: NetworkId,
    kind: EntityKind,
    position: Vec3,
    rotation: Quat,
    health: f32,
    max_health: f32,
    mana: f32,
    max_mana: f32,
    team: TeamId,
    move_target: Option<Vec3>,
}

#[derive(Debug, Clone, Copy)]
struct ClientState {
    controlled_entity: NetworkId,
    last_input_seq: u32,
}

pub struct World {
    tick_interval: f32,
    /// Accumulated in f64: thirty f32 intervals sum past 1.0 and would
    /// short a whole tick every second.
    accumulator: f64,
    interval_f64: f64,
    current_tick: u32,
    server_time: f32,
    game_time: f32,

    next_network_id: NetworkId,
    entities: HashMap<NetworkId, Entity>,
    clients: HashMap<ClientId, ClientState>,

    current_wave: i32,
    time_to_next_wave: f32,
}

impl World {
    pub fn new(tick_rate: u32) -> Self {
        let rate = tick_rate.max(1);
        let interval_f64 = 1.0 / f64::from(rate);
        Self {
            tick_interval: interval_f64 as f32,
            accumulator: 0.0,
            interval_f64,
            current_tick: 0,
            server_time: 0.0,
            game_time: 0.0,
            next_network_id: 1,
            entities: HashMap::new(),
            clients: HashMap::new(),
            current_wave: 0,
            time_to_next_wave: WAVE_INTERVAL_SECS,
        }
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn game_time(&self) -> f32 {
        self.game_time
    }

    pub fn tick_interval(&self) -> f32 {
        self.tick_interval
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn controlled_entity(&self, client_id: ClientId) -> Option<NetworkId> {
        self.clients.get(&client_id).map(|c| c.controlled_entity)
    }

    /// Feed real elapsed time; the world steps at its fixed interval as many
    /// times as fit. Returns the number of ticks stepped.
    pub fn advance_clock(&mut self, dt: f32) -> u32 {
        self.accumulator += f64::from(dt);
        let mut stepped = 0;
        while self.accumulator >= self.interval_f64 {
            self.accumulator -= self.interval_f64;
            self.step(self.tick_interval);
            stepped += 1;
        }
        stepped
    }

    /// Spawn a hero for a new client. Teams alternate by join order.
    pub fn add_client(&mut self, client_id: ClientId) {
        if self.clients.contains_key(&client_id) {
            return;
        }
        let team = if self.clients.len() % 2 == 0 {
            TEAM_BLUE
        } else {
            TEAM_RED
        };
        let network_id = self.alloc_network_id();
        self.entities.insert(
            network_id,
            Entity {
                network_id,
                kind: EntityKind::Hero { owner: client_id },
                position: team_spawn(team),
                rotation: QUAT_IDENTITY,
                health: HERO_MAX_HEALTH,
                max_health: HERO_MAX_HEALTH,
                mana: HERO_MAX_MANA,
                max_mana: HERO_MAX_MANA,
                team,
                move_target: None,
            },
        );
        self.clients.insert(
            client_id,
            ClientState {
                controlled_entity: network_id,
                last_input_seq: 0,
            },
        );
    }

    /// Despawn a client's hero and forget the client.
    pub fn remove_client(&mut self, client_id: ClientId) {
        if let Some(state) = self.clients.remove(&client_id) {
            self.entities.remove(&state.controlled_entity);
        }
    }

    /// Apply one input command. A client without a controlled entity is a
    /// no-op; stale sequences still steer (datagrams reorder) but never
    /// regress the acknowledged sequence.
    pub fn apply_input(&mut self, client_id: ClientId, input: &PlayerInput) {
        let Some(state) = self.clients.get_mut(&client_id) else {
            return;
        };
        if input.sequence > state.last_input_seq {
            state.last_input_seq = input.sequence;
        }
        let controlled = state.controlled_entity;

        let chase_position = match input.command {
            InputCommand::AttackTarget => self
                .entities
                .get(&input.target_entity)
                .map(|target| target.position),
            _ => None,
        };

        let Some(entity) = self.entities.get_mut(&controlled) else {
            return;
        };
        match input.command {
            InputCommand::Move | InputCommand::AttackMove => {
                entity.move_target = Some(input.target_position);
            }
            InputCommand::AttackTarget => {
                entity.move_target = chase_position;
            }
            InputCommand::Stop | InputCommand::Hold => {
                entity.move_target = None;
            }
            InputCommand::CastAbility | InputCommand::UseItem => {
                if entity.mana >= ABILITY_MANA_COST {
                    entity.mana -= ABILITY_MANA_COST;
                }
            }
            InputCommand::None => {}
        }
    }

    /// One fixed tick: movement, regeneration, creep waves.
    fn step(&mut self, dt: f32) {
        self.current_tick += 1;
        self.server_time += dt;
        self.game_time += dt;

        let mut arrived_creeps = Vec::new();
        for entity in self.entities.values_mut() {
            if let Some(target) = entity.move_target {
                let speed = match entity.kind {
                    EntityKind::Hero { .. } => HERO_MOVE_SPEED,
                    EntityKind::Creep { .. } => CREEP_MOVE_SPEED,
                };
                if move_toward(&mut entity.position, target, speed * dt) {
                    entity.move_target = None;
                    if let EntityKind::Creep { .. } = entity.kind {
                        arrived_creeps.push(entity.network_id);
                    }
                }
            }
            if let EntityKind::Hero { .. } = entity.kind {
                entity.health = (entity.health + HERO_HEALTH_REGEN * dt).min(entity.max_health);
                entity.mana = (entity.mana + HERO_MANA_REGEN * dt).min(entity.max_mana);
            }
        }
        // A creep that reached the opposing spawn leaves the map.
        for id in arrived_creeps {
            self.entities.remove(&id);
        }

        self.time_to_next_wave -= dt;
        if self.time_to_next_wave <= 0.0 {
            self.time_to_next_wave += WAVE_INTERVAL_SECS;
            self.current_wave += 1;
            self.spawn_wave();
        }
    }

    fn spawn_wave(&mut self) {
        for team in [TEAM_BLUE, TEAM_RED] {
            let goal = opposing_spawn(team);
            let network_id = self.alloc_network_id();
            self.entities.insert(
                network_id,
                Entity {
                    network_id,
                    kind: EntityKind::Creep { goal },
                    position: team_spawn(team),
                    rotation: QUAT_IDENTITY,
                    health: CREEP_MAX_HEALTH,
                    max_health: CREEP_MAX_HEALTH,
                    mana: 0.0,
                    max_mana: 0.0,
                    team,
                    move_target: Some(goal),
                },
            );
        }
    }

    /// Serialize the world for one receiving client. `owner_client_id` marks
    /// entities controlled by known clients; the ack field carries the
    /// receiver's last processed input sequence.
    pub fn snapshot_for(&self, receiver: Option<ClientId>) -> WorldSnapshot {
        let mut entities: Vec<EntityRecord> = self
            .entities
            .values()
            .map(|entity| EntityRecord {
                network_id: entity.network_id,
                position: entity.position,
                rotation: entity.rotation,
                health: entity.health,
                max_health: entity.max_health,
                mana: entity.mana,
                max_mana: entity.max_mana,
                state_flags: 0,
                team: entity.team,
                entity_type: match entity.kind {
                    EntityKind::Hero { .. } => entity_type::HERO,
                    EntityKind::Creep { .. } => entity_type::CREEP,
                },
                owner_client_id: match entity.kind {
                    EntityKind::Hero { owner } if self.clients.contains_key(&owner) => owner,
                    _ => crate::proto::game::INVALID_CLIENT_ID,
                },
            })
            .collect();
        // Stable order keeps snapshots deterministic across identical states.
        entities.sort_unstable_by_key(|e| e.network_id);

        WorldSnapshot {
            tick: self.current_tick,
            server_time: self.server_time,
            game_time: self.game_time,
            current_wave: self.current_wave,
            time_to_next_wave: self.time_to_next_wave,
            last_processed_input: receiver
                .and_then(|c| self.clients.get(&c))
                .map_or(0, |c| c.last_input_seq),
            entities,
        }
    }

    fn alloc_network_id(&mut self) -> NetworkId {
        let id = self.next_network_id;
        self.next_network_id += 1;
        id
    }
}

/// Move `position` toward `target` by at most `max_step`; true on arrival.
fn move_toward(position: &mut Vec3, target: Vec3, max_step: f32) -> bool {
    let delta = [
        target[0] - position[0],
        target[1] - position[1],
        target[2] - position[2],
    ];
    let dist = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
    if dist <= max_step || dist < ARRIVE_EPSILON {
        *position = target;
        return true;
    }
    let scale = max_step / dist;
    position[0] += delta[0] * scale;
    position[1] += delta[1] * scale;
    position[2] += delta[2] * scale;
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulates_whole_ticks() {
        let mut world = World::new(30);
        // Less than one interval: nothing happens.
        assert_eq!(world.advance_clock(0.02), 0);
        assert_eq!(world.current_tick(), 0);
        // The remainder carries over.
        assert_eq!(world.advance_clock(0.02), 1);
        assert_eq!(world.current_tick(), 1);
        // A 1-second burst catches up in whole ticks.
        assert_eq!(world.advance_clock(1.0), 30);
        assert_eq!(world.current_tick(), 31);
    }

    #[test]
    fn tick_count_at_one_second_matches_rate() {
        let mut world = World::new(30);
        let mut ticks = 0;
        for _ in 0..10 {
            ticks += world.advance_clock(0.1);
        }
        assert_eq!(ticks, 30);
    }

    #[test]
    fn clients_get_heroes_on_alternating_teams() {
        let mut world = World::new(30);
        world.add_client(1);
        world.add_client(2);
        assert_eq!(world.entity_count(), 2);

        let snapshot = world.snapshot_for(Some(1));
        let hero1 = snapshot
            .entities
            .iter()
            .find(|e| e.owner_client_id == 1)
            .unwrap();
        let hero2 = snapshot
            .entities
            .iter()
            .find(|e| e.owner_client_id == 2)
            .unwrap();
        assert_eq!(hero1.team, TEAM_BLUE);
        assert_eq!(hero2.team, TEAM_RED);
        assert_eq!(hero1.entity_type, entity_type::HERO);
        assert_ne!(hero1.network_id, hero2.network_id);
    }

    #[test]
    fn add_client_is_idempotent_and_remove_despawns() {
        let mut world = World::new(30);
        world.add_client(1);
        world.add_client(1);
        assert_eq!(world.entity_count(), 1);
        world.remove_client(1);
        assert_eq!(world.entity_count(), 0);
        assert!(world.controlled_entity(1).is_none());
    }

    #[test]
    fn input_without_client_is_a_noop() {
        let mut world = World::new(30);
        world.apply_input(7, &PlayerInput::move_to(1, [5.0, 0.0, 5.0]));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn move_command_walks_the_hero_at_fixed_rate() {
        let mut world = World::new(30);
        world.add_client(1);
        let start = team_spawn(TEAM_BLUE);
        let target = [start[0] + 10.0, start[1], start[2]];
        world.apply_input(1, &PlayerInput::move_to(1, target));

        // One second of simulation covers HERO_MOVE_SPEED units.
        world.advance_clock(1.0);
        let snapshot = world.snapshot_for(Some(1));
        let hero = snapshot.find_entity(world.controlled_entity(1).unwrap()).unwrap();
        assert!((hero.position[0] - (start[0] + HERO_MOVE_SPEED)).abs() < 0.01);

        // Stop clears the target; the hero stays put.
        let stop = PlayerInput {
            sequence: 2,
            command: InputCommand::Stop,
            ..Default::default()
        };
        world.apply_input(1, &stop);
        let before = hero.position;
        world.advance_clock(1.0);
        let after = world.snapshot_for(Some(1));
        let hero_after = after.find_entity(world.controlled_entity(1).unwrap()).unwrap();
        assert_eq!(hero_after.position, before);
    }

    #[test]
    fn input_sequence_is_acknowledged_monotonically() {
        let mut world = World::new(30);
        world.add_client(1);
        world.apply_input(1, &PlayerInput::move_to(5, [1.0, 0.0, 0.0]));
        world.apply_input(1, &PlayerInput::move_to(3, [2.0, 0.0, 0.0]));
        let snapshot = world.snapshot_for(Some(1));
        assert_eq!(snapshot.last_processed_input, 5);
        // An unknown receiver acks nothing.
        assert_eq!(world.snapshot_for(None).last_processed_input, 0);
    }

    #[test]
    fn creep_wave_spawns_every_interval() {
        let mut world = World::new(30);
        world.add_client(1);
        // Just before the wave: only the hero.
        world.advance_clock(29.9);
        assert_eq!(world.entity_count(), 1);
        world.advance_clock(0.2);
        let snapshot = world.snapshot_for(None);
        assert_eq!(snapshot.current_wave, 1);
        let creeps: Vec<_> = snapshot
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type::CREEP)
            .collect();
        assert_eq!(creeps.len(), 2);
        assert!(creeps.iter().any(|c| c.team == TEAM_BLUE));
        assert!(creeps.iter().any(|c| c.team == TEAM_RED));
        // Creeps have no owner.
        assert!(creeps.iter().all(|c| c.owner_client_id == 0));
    }

    #[test]
    fn snapshots_are_deterministically_ordered() {
        let mut world = World::new(30);
        world.add_client(1);
        world.add_client(2);
        world.advance_clock(31.0);
        let ids: Vec<_> = world
            .snapshot_for(None)
            .entities
            .iter()
            .map(|e| e.network_id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn ability_cast_spends_mana() {
        let mut world = World::new(30);
        world.add_client(1);
        let cast = PlayerInput {
            sequence: 1,
            command: InputCommand::CastAbility,
            ability_index: 0,
            ..Default::default()
        };
        world.apply_input(1, &cast);
        let hero_id = world.controlled_entity(1).unwrap();
        let snapshot = world.snapshot_for(Some(1));
        let hero = snapshot.find_entity(hero_id).unwrap();
        assert!((hero.mana - (HERO_MAX_MANA - ABILITY_MANA_COST)).abs() < f32::EPSILON);
    }
}
