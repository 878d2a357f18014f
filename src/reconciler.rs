// src/reconciler.rs
use crate::config::Config;
use crate::errors::MonitorError;
use crate::models::server::{
    GameServerStatus, MergedPlayer, QueryPlayer, RconPlayer, ServerConfig,
};
use crate::protocol::factory;
use crate::protocol::query::QueryClient;
use crate::protocol::rcon::RconClient;
use crate::utils::unix_now;
use log::{debug, error, warn};
use std::time::{Duration, Instant};

/// Result of one poll: the merged snapshot, plus the raw RCON listing when
/// this poll performed an RCON refresh.
#[derive(Debug)]
pub struct PollOutcome {
    pub status: GameServerStatus,
    pub rcon_players: Option<Vec<RconPlayer>>,
}

/// Per-server merge engine. Query data decides who is on the server; RCON
/// data only enriches players the query already reported. One instance owns
/// its state for as long as the server is monitored and must not be polled
/// from two tasks at once; the registry wraps each instance in a lock.
#[derive(Debug)]
pub struct Reconciler {
    server: ServerConfig,
    query: QueryClient,
    rcon: RconClient,
    merged: Vec<MergedPlayer>,
    last_rcon_sync: Option<Instant>,
    rcon_stale_after: Duration,
}

impl Reconciler {
    pub fn from_config(server: ServerConfig, config: &Config) -> Result<Self, MonitorError> {
        let query = factory::create_query_client(&server, config)?;
        let rcon = factory::create_rcon_client(&server, config, None)?;
        Ok(Self::new(server, query, rcon, config.rcon_stale_after()))
    }

    pub fn new(
        server: ServerConfig,
        query: QueryClient,
        rcon: RconClient,
        rcon_stale_after: Duration,
    ) -> Self {
        Self {
            server,
            query,
            rcon,
            merged: Vec::new(),
            last_rcon_sync: None,
            rcon_stale_after,
        }
    }

    pub async fn poll(&mut self) -> Result<PollOutcome, MonitorError> {
        // Query errors fail the whole poll; a stale snapshot is worse than
        // none.
        let response = self.query.get_server_status().await?;

        let mut needs_query_sync = false;
        let mut needs_rcon_sync = false;
        for player in &response.players {
            match self
                .merged
                .iter()
                .find(|m| m.normalized_name == player.normalized_name)
            {
                None => {
                    needs_query_sync = true;
                    needs_rcon_sync = true;
                }
                Some(existing) if !existing.has_rcon_fields() => needs_rcon_sync = true,
                Some(_) => {}
            }
        }
        // Presence is owned by the query side: an entry whose player no
        // longer shows up must drop out even when nobody joined.
        if self.merged.iter().any(|m| {
            !response
                .players
                .iter()
                .any(|p| p.normalized_name == m.normalized_name)
        }) {
            needs_query_sync = true;
        }
        if self.rcon_is_stale() {
            needs_query_sync = true;
            needs_rcon_sync = true;
        }

        if needs_query_sync {
            self.merged = rebuild_merged(&self.merged, &response.players);
        }

        let mut rcon_players = None;
        if needs_rcon_sync {
            match self.rcon.get_players().await {
                Ok(players) => {
                    attach_rcon_players(&mut self.merged, &players);
                    self.last_rcon_sync = Some(Instant::now());
                    rcon_players = Some(players);
                }
                // The snapshot is still valid without enrichment, so RCON
                // failures degrade instead of failing the poll; whatever was
                // attached on earlier polls is kept.
                Err(MonitorError::RconAuthenticationFailed) => {
                    error!(
                        "rcon password rejected for {}; refusing to retry until it changes",
                        self.server.server_id
                    );
                }
                Err(e) => {
                    warn!("rcon refresh failed for {}: {}", self.server.server_id, e);
                }
            }
        }

        let status = GameServerStatus {
            server_id: self.server.server_id.clone(),
            game_type: self.server.game_type,
            hostname: self.server.hostname.clone(),
            query_port: self.server.query_port,
            max_players: response.max_players,
            server_name: response.server_name,
            map: response.map,
            game_mod: response.game_mod,
            player_count: response.player_count,
            players: self.merged.clone(),
            timestamp: unix_now(),
        };
        Ok(PollOutcome {
            status,
            rcon_players,
        })
    }

    /// Control commands reuse the same channel (and, for the Source family,
    /// the same authenticated connection) as the player-list refresh.
    pub fn rcon_client(&mut self) -> &mut RconClient {
        &mut self.rcon
    }

    fn rcon_is_stale(&self) -> bool {
        match self.last_rcon_sync {
            Some(at) => at.elapsed() > self.rcon_stale_after,
            None => true,
        }
    }
}

/// Rebuilds the merged list from the latest query players, carrying forward
/// RCON-derived fields for names that were already known. Duplicate
/// normalized names keep the first occurrence.
fn rebuild_merged(previous: &[MergedPlayer], players: &[QueryPlayer]) -> Vec<MergedPlayer> {
    let mut rebuilt: Vec<MergedPlayer> = Vec::with_capacity(players.len());
    for player in players {
        if rebuilt
            .iter()
            .any(|m| m.normalized_name == player.normalized_name)
        {
            debug!("dropping duplicate player name {:?}", player.name);
            continue;
        }
        let mut entry = MergedPlayer::from_query(player);
        if let Some(known) = previous
            .iter()
            .find(|m| m.normalized_name == player.normalized_name)
        {
            if known.has_rcon_fields() {
                entry.num = known.num;
                entry.guid = known.guid.clone();
                entry.ip_address = known.ip_address.clone();
                entry.rate = known.rate;
            }
        }
        rebuilt.push(entry);
    }
    rebuilt
}

/// Attaches RCON fields to matching merged players. A listed player the
/// query never reported is dropped; it must not conjure up a presence the
/// query side disagrees with. Returns how many were dropped.
fn attach_rcon_players(merged: &mut [MergedPlayer], players: &[RconPlayer]) -> usize {
    let mut orphans = 0;
    for player in players {
        match merged
            .iter_mut()
            .find(|m| m.normalized_name == player.normalized_name)
        {
            Some(entry) if !entry.has_rcon_fields() => entry.attach_rcon(player),
            Some(_) => {}
            None => {
                warn!("dropping rcon player {:?} with no query match", player.name);
                orphans += 1;
            }
        }
    }
    orphans
}
