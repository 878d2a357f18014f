// src/models/server.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Game titles this service knows how to talk to. Each supported title maps
/// onto a protocol family in the factory table; a title without a mapping is
/// rejected before any network traffic happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    Quake3Arena,
    CallOfDuty,
    CallOfDuty2,
    CallOfDuty4,
    UrbanTerror,
    CounterStrikeSource,
    TeamFortress2,
    DayOfDefeatSource,
    GarrysMod,
    UnrealTournament2004,
}

impl GameType {
    pub const ALL: [GameType; 10] = [
        GameType::Quake3Arena,
        GameType::CallOfDuty,
        GameType::CallOfDuty2,
        GameType::CallOfDuty4,
        GameType::UrbanTerror,
        GameType::CounterStrikeSource,
        GameType::TeamFortress2,
        GameType::DayOfDefeatSource,
        GameType::GarrysMod,
        GameType::UnrealTournament2004,
    ];
}

/// Registration payload handed over by the server registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server_id: String,
    pub game_type: GameType,
    pub hostname: String,
    pub query_port: u16,
    /// Defaults to `query_port`; both families commonly share the number.
    pub rcon_port: Option<u16>,
    pub rcon_password: String,
}

impl ServerConfig {
    pub fn query_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.query_port)
    }

    pub fn rcon_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.rcon_port.unwrap_or(self.query_port))
    }
}

/// One player as reported by the unauthenticated query protocol.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlayer {
    pub name: String,
    pub normalized_name: String,
    pub score: i32,
    pub ping: Option<i32>,
    pub duration_secs: Option<f32>,
}

/// Result of a single status probe. Built fresh on every query, never patched.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub server_name: String,
    pub map: String,
    pub game_mod: String,
    pub max_players: i32,
    pub player_count: i32,
    pub server_params: HashMap<String, String>,
    pub players: Vec<QueryPlayer>,
}

/// One player as reported by an RCON "status" listing.
#[derive(Debug, Clone, Serialize)]
pub struct RconPlayer {
    pub num: i32,
    pub guid: String,
    pub name: String,
    pub normalized_name: String,
    pub ip_address: String,
    pub rate: Option<i32>,
}

/// Union of a query player and an optionally-attached RCON player, joined by
/// normalized name. Query presence is authoritative: an entry only exists
/// here while the latest query response contains the player.
#[derive(Debug, Clone, Serialize)]
pub struct MergedPlayer {
    pub name: String,
    pub normalized_name: String,
    pub score: i32,
    pub ping: Option<i32>,
    pub duration_secs: Option<f32>,
    pub num: Option<i32>,
    pub guid: Option<String>,
    pub ip_address: Option<String>,
    pub rate: Option<i32>,
}

impl MergedPlayer {
    pub fn from_query(player: &QueryPlayer) -> Self {
        Self {
            name: player.name.clone(),
            normalized_name: player.normalized_name.clone(),
            score: player.score,
            ping: player.ping,
            duration_secs: player.duration_secs,
            num: None,
            guid: None,
            ip_address: None,
            rate: None,
        }
    }

    pub fn has_rcon_fields(&self) -> bool {
        self.guid.is_some()
    }

    pub fn attach_rcon(&mut self, player: &RconPlayer) {
        self.num = Some(player.num);
        self.guid = Some(player.guid.clone());
        self.ip_address = Some(player.ip_address.clone());
        self.rate = player.rate;
    }
}

/// The externally visible result of one poll.
#[derive(Debug, Clone, Serialize)]
pub struct GameServerStatus {
    pub server_id: String,
    pub game_type: GameType,
    pub hostname: String,
    pub query_port: u16,
    pub max_players: i32,
    pub server_name: String,
    pub map: String,
    pub game_mod: String,
    pub player_count: i32,
    pub players: Vec<MergedPlayer>,
    pub timestamp: u64,
}

/// Latest raw RCON player listing, kept separately from the merged snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RconStatus {
    pub server_id: String,
    pub players: Vec<RconPlayer>,
    pub synced_at: u64,
}
