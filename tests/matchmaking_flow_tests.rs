//! End-to-end matchmaking scenarios, driving the coordinator's engines and
//! the dedicated server's session layer with synthetic packets: the happy
//! path, decline-with-requeue, banned accounts, auth timeouts,
//! disconnect/reconnect, and server-pool starvation.

use std::net::SocketAddr;

use warlane_server::config::CoordinatorConfig;
use warlane_server::coordinator::directory::ActiveGameDirectory;
use warlane_server::coordinator::queue::{Action, QueueEngine, ReadyLobby};
use warlane_server::coordinator::registry::ServerRegistry;
use warlane_server::coordinator::{start_match, Outbound};
use warlane_server::game::session::{SessionEvent, SessionManager};
use warlane_server::game::world::World;
use warlane_server::proto::auth::{AuthResult, ValidateTokenResponse};
use warlane_server::proto::game::{
    self, entity_type, ConnectionAccepted, ConnectionRequest, GamePacketType,
};
use warlane_server::proto::matchmaking::{
    self, ActiveGameInfo, MatchCancelled, MatchMode, MatchReady, MmMessageType,
    PlayerDisconnected, QueueRejected, QueueRequest, ServerHeartbeat, ServerRegister,
};

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        required_players: 2,
        ..Default::default()
    }
}

fn queue_request(token: &str) -> QueueRequest {
    QueueRequest {
        mode: MatchMode::AllPick,
        region: "auto".into(),
        session_token: token.into(),
    }
}

fn auth_success(account_id: u64) -> ValidateTokenResponse {
    ValidateTokenResponse {
        result: AuthResult::Success,
        is_banned: false,
        account_id,
        expires_at: u64::MAX,
        error_message: String::new(),
    }
}

fn request_id_of(actions: &[Action]) -> u32 {
    actions
        .iter()
        .find_map(|a| match a {
            Action::ValidateToken { request_id, .. } => Some(*request_id),
            _ => None,
        })
        .expect("queue request issues a validation")
}

fn admit(engine: &mut QueueEngine, player_id: u64, port: u16, account_id: u64) -> Vec<Action> {
    let actions = engine.on_queue_request(player_id, addr(port), &queue_request("tok"));
    let request_id = request_id_of(&actions);
    engine.on_auth_response(&auth_success(account_id), request_id)
}

fn ready_lobby(actions: Vec<Action>) -> ReadyLobby {
    actions
        .into_iter()
        .find_map(|a| match a {
            Action::LobbyReady(ready) => Some(ready),
            _ => None,
        })
        .expect("all accepted yields a ready lobby")
}

fn register_server(registry: &mut ServerRegistry, server_id: u64) {
    registry.on_register(
        &ServerRegister {
            server_id,
            server_ip: "127.0.0.1".into(),
            game_port: 27015,
            control_port: 0,
            capacity: 10,
        },
        addr(39000),
    );
}

/// Run two players through queue, accept and assignment; returns the ready
/// lobby and the outbound start-match traffic.
fn play_until_match(
    engine: &mut QueueEngine,
    registry: &mut ServerRegistry,
    directory: &mut ActiveGameDirectory,
) -> (ReadyLobby, Vec<Outbound>) {
    admit(engine, 1, 5000, 42);
    admit(engine, 2, 5001, 43);
    let lobby_id = engine.lobby_of(1).unwrap();
    engine.on_match_accept(1, lobby_id);
    let ready = ready_lobby(engine.on_match_accept(2, lobby_id));
    let outbound = start_match(engine, registry, directory, 100.0, &ready);
    (ready, outbound)
}

#[test]
fn scenario_happy_path_queue_to_snapshot() {
    let mut engine = QueueEngine::new(&coordinator_config());
    let mut registry = ServerRegistry::new(15.0);
    let mut directory = ActiveGameDirectory::new();
    register_server(&mut registry, 7);

    let (ready, outbound) = play_until_match(&mut engine, &mut registry, &mut directory);

    // The sole registered server got the lobby and is now reserved.
    assert!(registry.get(7).unwrap().reserved);
    let mut match_ready_count = 0;
    let mut assign_seen = false;
    for msg in &outbound {
        let (header, payload) = matchmaking::parse_packet(&msg.datagram).unwrap();
        match header.msg_type {
            MmMessageType::AssignLobby => {
                assign_seen = true;
                assert_eq!(msg.addr, addr(39000), "assignment goes to the control address");
            }
            MmMessageType::MatchReady => {
                let ready_payload = MatchReady::decode(payload).unwrap();
                assert_eq!(ready_payload.server_ip, "127.0.0.1");
                assert_eq!(ready_payload.server_port, 27015);
                match_ready_count += 1;
            }
            other => panic!("unexpected start-match message {other:?}"),
        }
    }
    assert!(assign_seen);
    assert_eq!(match_ready_count, 2);

    // Directory holds one record per authenticated account.
    assert_eq!(directory.get(42).unwrap().lobby_id, ready.lobby_id);
    assert_eq!(directory.get(43).unwrap().team_slot, 1);

    // Both clients connect to the dedicated server and get ids 1 and 2.
    let mut world = World::new(30);
    let mut sessions = SessionManager::new(10, 10.0);
    let connect = |account_id: u64| {
        game::build_packet(
            GamePacketType::ConnectionRequest,
            1,
            &ConnectionRequest {
                account_id,
                team_slot_hint: 0,
                username: "p".into(),
                hero_name: "Warrior".into(),
            }
            .encode(),
        )
    };
    let events = sessions.handle_datagram(&mut world, &connect(42), addr(6000));
    let id1 = accepted_id(&events);
    let events = sessions.handle_datagram(&mut world, &connect(43), addr(6001));
    let id2 = accepted_id(&events);
    assert_eq!((id1, id2), (1, 2));

    // At tick 30 every client's snapshot shows both heroes, each tagged
    // with its owner.
    world.advance_clock(1.0);
    assert_eq!(world.current_tick(), 30);
    let events = sessions.broadcast_snapshots(&world);
    assert_eq!(events.len(), 2);
    for event in events {
        let SessionEvent::Send { datagram, .. } = event else {
            panic!("fanout only sends");
        };
        let (header, payload) = game::parse_packet(&datagram).unwrap();
        assert_eq!(header.packet_type, GamePacketType::WorldSnapshot);
        let snapshot = game::WorldSnapshot::decode(payload).unwrap();
        assert_eq!(snapshot.tick, 30);
        assert_eq!(snapshot.entities.len(), 2);
        assert!(snapshot.entities.iter().any(|e| e.owner_client_id == id1));
        assert!(snapshot.entities.iter().any(|e| e.owner_client_id == id2));
    }
}

fn accepted_id(events: &[SessionEvent]) -> u32 {
    for event in events {
        if let SessionEvent::Send { datagram, .. } = event {
            let (header, payload) = game::parse_packet(datagram).unwrap();
            if header.packet_type == GamePacketType::ConnectionAccepted {
                return ConnectionAccepted::decode(payload).unwrap().assigned_client_id;
            }
        }
    }
    panic!("no acceptance among {events:?}");
}

#[test]
fn scenario_decline_cancels_and_requeues_the_accepter() {
    let mut engine = QueueEngine::new(&coordinator_config());
    admit(&mut engine, 1, 5000, 42);
    admit(&mut engine, 2, 5001, 43);
    let lobby_id = engine.lobby_of(1).unwrap();

    engine.on_match_accept(1, lobby_id);
    let actions = engine.on_match_decline(2, lobby_id);

    let mut flags = Vec::new();
    for action in &actions {
        if let Action::Send {
            msg_type: MmMessageType::MatchCancelled,
            player_id,
            payload,
            ..
        } = action
        {
            let cancelled = MatchCancelled::decode(payload).unwrap();
            flags.push((*player_id, cancelled.should_requeue));
        }
    }
    flags.sort_unstable();
    assert_eq!(flags, vec![(1, true), (2, false)]);

    // After the message the queue contains exactly player 1.
    assert_eq!(engine.queue_len(), 1);
    assert!(engine.is_queued(1));
    assert!(!engine.is_queued(2));
}

#[test]
fn scenario_banned_account_is_rejected_and_not_queued() {
    let mut engine = QueueEngine::new(&coordinator_config());
    let actions = engine.on_queue_request(1, addr(5000), &queue_request("tok"));
    let request_id = request_id_of(&actions);

    // Validation succeeds but flags the ban.
    let response = ValidateTokenResponse {
        result: AuthResult::Success,
        is_banned: true,
        account_id: 42,
        expires_at: u64::MAX,
        error_message: String::new(),
    };
    let actions = engine.on_auth_response(&response, request_id);

    let rejection = actions
        .iter()
        .find_map(|a| match a {
            Action::Send {
                msg_type: MmMessageType::QueueRejected,
                payload,
                ..
            } => Some(QueueRejected::decode(payload).unwrap()),
            _ => None,
        })
        .expect("ban produces a rejection");
    assert!(rejection.auth_failed);
    assert!(rejection.is_banned);
    assert_eq!(rejection.reason, "Account is banned");
    assert_eq!(engine.queue_len(), 0);
}

#[test]
fn scenario_auth_timeout_rejects_after_five_seconds() {
    let mut engine = QueueEngine::new(&coordinator_config());
    engine.on_queue_request(1, addr(5000), &queue_request("tok"));

    // The auth server never answers; tick forward in small steps.
    let mut actions = Vec::new();
    for _ in 0..50 {
        actions.extend(engine.advance(0.1));
    }
    let rejection = actions
        .into_iter()
        .find_map(|a| match a {
            Action::Send {
                msg_type: MmMessageType::QueueRejected,
                payload,
                ..
            } => Some(QueueRejected::decode(&payload).unwrap()),
            _ => None,
        })
        .expect("timeout produces a rejection");
    assert_eq!(rejection.reason, "Auth timeout");
    assert!(rejection.auth_failed);
    assert!(!engine.is_pending(1));
    assert_eq!(engine.queue_len(), 0);
}

#[test]
fn scenario_disconnect_and_reconnect_via_directory() {
    let mut engine = QueueEngine::new(&coordinator_config());
    let mut registry = ServerRegistry::new(15.0);
    let mut directory = ActiveGameDirectory::new();
    register_server(&mut registry, 7);
    let (ready, _) = play_until_match(&mut engine, &mut registry, &mut directory);
    let lobby_id = ready.lobby_id;

    // Mid-match, client for account 42 goes silent on the dedicated server.
    let mut world = World::new(30);
    let mut sessions = SessionManager::new(10, 10.0);
    let connect = game::build_packet(
        GamePacketType::ConnectionRequest,
        1,
        &ConnectionRequest {
            account_id: 42,
            team_slot_hint: 0,
            username: "p".into(),
            hero_name: "Warrior".into(),
        }
        .encode(),
    );
    sessions.handle_datagram(&mut world, &connect, addr(6000));

    let events = sessions.advance(&mut world, 10.5);
    let SessionEvent::Disconnected {
        account_id,
        team_slot,
        hero_name,
        ..
    } = &events[0]
    else {
        panic!("timeout evicts the client");
    };

    // The server's report reaches the coordinator.
    let report = PlayerDisconnected {
        server_id: 7,
        lobby_id,
        account_id: *account_id,
        team_slot: *team_slot,
        hero_name: hero_name.clone(),
    };
    let endpoint = registry.get(7).map(|s| (s.ip.clone(), s.game_port));
    directory.on_player_disconnected(&report, endpoint, 160.0);

    // The restarted client asks where to go.
    let info: ActiveGameInfo = directory.check_active_game(42, 170.0).unwrap();
    assert_eq!(info.lobby_id, lobby_id);
    assert_eq!(info.server_ip, "127.0.0.1");
    assert_eq!(info.server_port, 27015);
    assert_eq!(info.team_slot, 0);
    assert_eq!(info.hero_name, "Warrior");
    assert!(info.can_reconnect);

    let approval = directory.reconnect_request(42, lobby_id, 175.0).unwrap();
    assert_eq!(approval.server_ip, info.server_ip);
    assert_eq!(approval.server_port, info.server_port);
    assert_eq!(approval.disconnect_time_secs, 0.0);

    // Back on the server, the returning account is recognized.
    let events = sessions.handle_datagram(&mut world, &connect, addr(6002));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Reconnected { account_id: 42 })));
    directory.on_player_reconnected(42, lobby_id);
    assert!(directory.check_active_game(42, 180.0).is_none());

    // Game over purges the directory.
    directory.on_game_ended(lobby_id);
    assert!(directory.reconnect_request(42, lobby_id, 200.0).is_none());
}

#[test]
fn scenario_heartbeat_ttl_starves_the_pool() {
    let mut engine = QueueEngine::new(&coordinator_config());
    let mut registry = ServerRegistry::new(15.0);
    let mut directory = ActiveGameDirectory::new();
    register_server(&mut registry, 7);

    // One heartbeat, then 16 seconds of silence.
    registry.on_heartbeat(&ServerHeartbeat {
        server_id: 7,
        current_players: 0,
        capacity: 10,
        uptime_secs: 1.0,
    });
    assert_eq!(registry.advance(16.0), vec![7]);

    // A lobby formed in that window finds no server and is cancelled with
    // no requeue.
    admit(&mut engine, 1, 5000, 42);
    admit(&mut engine, 2, 5001, 43);
    let lobby_id = engine.lobby_of(1).unwrap();
    engine.on_match_accept(1, lobby_id);
    let ready = ready_lobby(engine.on_match_accept(2, lobby_id));

    let outbound = start_match(&mut engine, &mut registry, &mut directory, 50.0, &ready);
    assert_eq!(outbound.len(), 2);
    for msg in &outbound {
        let (header, payload) = matchmaking::parse_packet(&msg.datagram).unwrap();
        assert_eq!(header.msg_type, MmMessageType::MatchCancelled);
        let cancelled = MatchCancelled::decode(payload).unwrap();
        assert_eq!(cancelled.reason, "No servers available");
        assert!(!cancelled.should_requeue);
        assert_eq!(cancelled.declined_by_player_id, 0);
    }
    assert_eq!(engine.queue_len(), 0, "nobody is requeued");
    assert!(directory.is_empty());
}

#[test]
fn world_heroes_spawn_apart_and_march_on_command() {
    // Sanity pass over the simulation the snapshots are built from.
    let mut world = World::new(30);
    world.add_client(1);
    world.add_client(2);
    let snapshot = world.snapshot_for(Some(1));
    let h1 = snapshot.entities.iter().find(|e| e.owner_client_id == 1).unwrap();
    let h2 = snapshot.entities.iter().find(|e| e.owner_client_id == 2).unwrap();
    assert_ne!(h1.team, h2.team);
    assert_ne!(h1.position, h2.position);
    assert!(snapshot
        .entities
        .iter()
        .all(|e| e.entity_type == entity_type::HERO));

    let target = [h1.position[0] + 3.0, h1.position[1], h1.position[2]];
    world.apply_input(1, &game::PlayerInput::move_to(1, target));
    world.advance_clock(2.0);
    let after = world.snapshot_for(Some(1));
    let h1_after = after.entities.iter().find(|e| e.owner_client_id == 1).unwrap();
    assert_eq!(h1_after.position, target, "hero arrives within two seconds");
    assert_eq!(after.last_processed_input, 1);
}
