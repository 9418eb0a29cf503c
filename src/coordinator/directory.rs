//! Active-game directory: where should this player go if they come back?
//!
//! One record per account, created when a match starts and removed when the
//! lobby's game ends. The directory is the sole authority for reconnect
//! endpoints; dedicated servers only report, they never advertise.

use std::collections::HashMap;

use tracing::info;

use crate::proto::matchmaking::{ActiveGameInfo, PlayerDisconnected};

#[derive(Debug, Clone)]
pub struct ActiveGameRecord {
    pub lobby_id: u64,
    pub account_id: u64,
    pub server_id: u64,
    pub server_ip: String,
    pub server_port: u16,
    pub team_slot: u8,
    pub hero_name: String,
    /// Coordinator uptime when the match started.
    pub game_start_time: f32,
    /// Coordinator uptime at disconnect; meaningless unless disconnected.
    pub disconnect_time: f32,
    pub is_disconnected: bool,
}

#[derive(Default)]
pub struct ActiveGameDirectory {
    games: HashMap<u64, ActiveGameRecord>,
}

impl ActiveGameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly started match for one player. Keyed strictly by the
    /// authenticated account id.
    pub fn record_match_start(
        &mut self,
        account_id: u64,
        lobby_id: u64,
        server_id: u64,
        server_ip: &str,
        server_port: u16,
        team_slot: u8,
        uptime: f32,
    ) {
        self.games.insert(
            account_id,
            ActiveGameRecord {
                lobby_id,
                account_id,
                server_id,
                server_ip: server_ip.to_string(),
                server_port,
                team_slot,
                hero_name: String::new(),
                game_start_time: uptime,
                disconnect_time: 0.0,
                is_disconnected: false,
            },
        );
    }

    /// Apply a disconnect report from a dedicated server. Upserts so a
    /// record survives a coordinator that never saw the match start.
    /// `server_endpoint` resolves the reported server id to (ip, port) when
    /// the server is still in the pool.
    pub fn on_player_disconnected(
        &mut self,
        report: &PlayerDisconnected,
        server_endpoint: Option<(String, u16)>,
        uptime: f32,
    ) {
        let record = self
            .games
            .entry(report.account_id)
            .or_insert_with(|| ActiveGameRecord {
                lobby_id: report.lobby_id,
                account_id: report.account_id,
                server_id: report.server_id,
                server_ip: String::new(),
                server_port: 0,
                team_slot: report.team_slot,
                hero_name: String::new(),
                game_start_time: uptime,
                disconnect_time: 0.0,
                is_disconnected: false,
            });
        record.lobby_id = report.lobby_id;
        record.server_id = report.server_id;
        record.team_slot = report.team_slot;
        record.hero_name = report.hero_name.clone();
        record.disconnect_time = uptime;
        record.is_disconnected = true;
        if let Some((ip, port)) = server_endpoint {
            record.server_ip = ip;
            record.server_port = port;
        }
        info!(
            account_id = report.account_id,
            lobby_id = report.lobby_id,
            hero = %report.hero_name,
            "player disconnect recorded"
        );
    }

    /// Clear the disconnect flags once the server reports the player back.
    pub fn on_player_reconnected(&mut self, account_id: u64, lobby_id: u64) {
        if let Some(record) = self.games.get_mut(&account_id) {
            if record.lobby_id == lobby_id {
                record.is_disconnected = false;
                record.disconnect_time = 0.0;
                info!(account_id, lobby_id, "player reconnect recorded");
            }
        }
    }

    /// Drop every record belonging to the ended lobby. Returns the purged
    /// account ids.
    pub fn on_game_ended(&mut self, lobby_id: u64) -> Vec<u64> {
        let purged: Vec<u64> = self
            .games
            .iter()
            .filter(|(_, r)| r.lobby_id == lobby_id)
            .map(|(&account, _)| account)
            .collect();
        for account in &purged {
            self.games.remove(account);
        }
        if !purged.is_empty() {
            info!(lobby_id, players = purged.len(), "active games purged");
        }
        purged
    }

    /// Answer CheckActiveGame: only a disconnected record is reported.
    pub fn check_active_game(&self, account_id: u64, uptime: f32) -> Option<ActiveGameInfo> {
        let record = self.games.get(&account_id)?;
        if !record.is_disconnected {
            return None;
        }
        Some(ActiveGameInfo {
            lobby_id: record.lobby_id,
            account_id: record.account_id,
            server_ip: record.server_ip.clone(),
            server_port: record.server_port,
            team_slot: record.team_slot,
            can_reconnect: true,
            hero_name: record.hero_name.clone(),
            game_time_secs: uptime - record.game_start_time,
            disconnect_time_secs: uptime - record.disconnect_time,
        })
    }

    /// Answer ReconnectRequest: the (account, lobby) pair must match the
    /// stored record. Approval reports a zero disconnect time.
    pub fn reconnect_request(
        &self,
        account_id: u64,
        lobby_id: u64,
        uptime: f32,
    ) -> Option<ActiveGameInfo> {
        let record = self.games.get(&account_id)?;
        if record.lobby_id != lobby_id {
            return None;
        }
        Some(ActiveGameInfo {
            lobby_id: record.lobby_id,
            account_id,
            server_ip: record.server_ip.clone(),
            server_port: record.server_port,
            team_slot: record.team_slot,
            can_reconnect: true,
            hero_name: record.hero_name.clone(),
            game_time_secs: uptime - record.game_start_time,
            disconnect_time_secs: 0.0,
        })
    }

    pub fn get(&self, account_id: u64) -> Option<&ActiveGameRecord> {
        self.games.get(&account_id)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(account_id: u64, lobby_id: u64) -> PlayerDisconnected {
        PlayerDisconnected {
            server_id: 5,
            lobby_id,
            account_id,
            team_slot: 0,
            hero_name: "Warrior".into(),
        }
    }

    #[test]
    fn connected_players_have_no_reported_game() {
        let mut dir = ActiveGameDirectory::new();
        dir.record_match_start(42, 9, 5, "127.0.0.1", 27015, 0, 100.0);
        // Still connected: CheckActiveGame says nothing.
        assert!(dir.check_active_game(42, 120.0).is_none());
        // But a reconnect request for the right lobby is honored.
        assert!(dir.reconnect_request(42, 9, 120.0).is_some());
    }

    #[test]
    fn disconnect_then_check_then_reconnect() {
        let mut dir = ActiveGameDirectory::new();
        dir.record_match_start(42, 9, 5, "127.0.0.1", 27015, 0, 100.0);
        dir.on_player_disconnected(&report(42, 9), Some(("127.0.0.1".into(), 27015)), 130.0);

        let info = dir.check_active_game(42, 150.0).unwrap();
        assert_eq!(info.lobby_id, 9);
        assert_eq!(info.server_ip, "127.0.0.1");
        assert_eq!(info.server_port, 27015);
        assert_eq!(info.hero_name, "Warrior");
        assert!(info.can_reconnect);
        assert_eq!(info.game_time_secs, 50.0);
        assert_eq!(info.disconnect_time_secs, 20.0);

        let approval = dir.reconnect_request(42, 9, 150.0).unwrap();
        assert_eq!(approval.disconnect_time_secs, 0.0);

        dir.on_player_reconnected(42, 9);
        assert!(dir.check_active_game(42, 160.0).is_none());
    }

    #[test]
    fn reconnect_requires_matching_lobby() {
        let mut dir = ActiveGameDirectory::new();
        dir.on_player_disconnected(&report(42, 9), None, 10.0);
        assert!(dir.reconnect_request(42, 8, 20.0).is_none());
        assert!(dir.reconnect_request(41, 9, 20.0).is_none());
    }

    #[test]
    fn disconnect_report_upserts_when_start_was_missed() {
        let mut dir = ActiveGameDirectory::new();
        dir.on_player_disconnected(&report(42, 9), Some(("10.0.0.1".into(), 28000)), 5.0);
        let info = dir.check_active_game(42, 6.0).unwrap();
        assert_eq!(info.server_ip, "10.0.0.1");
        assert_eq!(info.server_port, 28000);
    }

    #[test]
    fn game_ended_purges_the_whole_lobby() {
        let mut dir = ActiveGameDirectory::new();
        dir.record_match_start(42, 9, 5, "127.0.0.1", 27015, 0, 0.0);
        dir.record_match_start(43, 9, 5, "127.0.0.1", 27015, 1, 0.0);
        dir.record_match_start(44, 10, 5, "127.0.0.1", 27015, 0, 0.0);

        let mut purged = dir.on_game_ended(9);
        purged.sort_unstable();
        assert_eq!(purged, vec![42, 43]);
        assert_eq!(dir.len(), 1);
        assert!(dir.get(44).is_some());
    }

    #[test]
    fn one_record_per_account() {
        let mut dir = ActiveGameDirectory::new();
        dir.record_match_start(42, 9, 5, "127.0.0.1", 27015, 0, 0.0);
        dir.record_match_start(42, 10, 6, "127.0.0.2", 27016, 1, 1.0);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.get(42).unwrap().lobby_id, 10);
    }
}
