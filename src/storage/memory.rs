// src/storage/memory.rs
use crate::config::Config;
use crate::errors::MonitorError;
use crate::models::server::{GameServerStatus, RconStatus, ServerConfig};
use crate::reconciler::Reconciler;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory registry of monitored servers and their latest snapshots.
///
/// Reconcilers carry private mutable state, so each one sits behind its own
/// async lock: polls for the same server serialize, different servers poll
/// in parallel.
pub struct MonitorStorage {
    reconcilers: DashMap<String, Arc<Mutex<Reconciler>>>,
    query_snapshots: DashMap<String, GameServerStatus>,
    rcon_snapshots: DashMap<String, RconStatus>,
    config: Config,
}

impl MonitorStorage {
    pub fn new(config: Config) -> Self {
        Self {
            reconcilers: DashMap::new(),
            query_snapshots: DashMap::new(),
            rcon_snapshots: DashMap::new(),
            config,
        }
    }

    /// Registers a server, replacing any existing monitor under the same id.
    /// A replacement starts from scratch; snapshots of the old configuration
    /// go with it.
    pub fn add_monitor(&self, server: ServerConfig) -> Result<(), MonitorError> {
        if !self.reconcilers.contains_key(&server.server_id)
            && self.reconcilers.len() >= self.config.max_monitored_servers
        {
            return Err(MonitorError::CapacityExceeded(
                self.config.max_monitored_servers,
            ));
        }

        let id = server.server_id.clone();
        let reconciler = Reconciler::from_config(server, &self.config)?;
        self.query_snapshots.remove(&id);
        self.rcon_snapshots.remove(&id);
        self.reconcilers.insert(id, Arc::new(Mutex::new(reconciler)));
        Ok(())
    }

    pub fn remove_monitor(&self, id: &str) -> bool {
        self.query_snapshots.remove(id);
        self.rcon_snapshots.remove(id);
        self.reconcilers.remove(id).is_some()
    }

    pub fn reconciler(&self, id: &str) -> Result<Arc<Mutex<Reconciler>>, MonitorError> {
        self.reconcilers
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::ServerNotFound(id.to_string()))
    }

    pub fn record_query_snapshot(&self, status: GameServerStatus) {
        self.query_snapshots.insert(status.server_id.clone(), status);
    }

    pub fn record_rcon_snapshot(&self, status: RconStatus) {
        self.rcon_snapshots.insert(status.server_id.clone(), status);
    }

    pub fn query_snapshot(&self, id: &str) -> Result<GameServerStatus, MonitorError> {
        if !self.reconcilers.contains_key(id) {
            return Err(MonitorError::ServerNotFound(id.to_string()));
        }
        self.query_snapshots
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::SnapshotNotFound(id.to_string()))
    }

    pub fn rcon_snapshot(&self, id: &str) -> Result<RconStatus, MonitorError> {
        if !self.reconcilers.contains_key(id) {
            return Err(MonitorError::ServerNotFound(id.to_string()));
        }
        self.rcon_snapshots
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MonitorError::SnapshotNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::GameType;

    fn server(id: &str, game_type: GameType) -> ServerConfig {
        ServerConfig {
            server_id: id.to_string(),
            game_type,
            hostname: "198.51.100.7".to_string(),
            query_port: 28960,
            rcon_port: None,
            rcon_password: "secret".to_string(),
        }
    }

    #[test]
    fn monitors_register_and_remove() {
        let storage = MonitorStorage::new(Config::default());
        storage
            .add_monitor(server("srv-1", GameType::CallOfDuty4))
            .unwrap();

        assert!(storage.reconciler("srv-1").is_ok());
        assert!(matches!(
            storage.reconciler("srv-2").unwrap_err(),
            MonitorError::ServerNotFound(_)
        ));

        assert!(storage.remove_monitor("srv-1"));
        assert!(!storage.remove_monitor("srv-1"));
    }

    #[test]
    fn unsupported_game_type_is_rejected_at_registration() {
        let storage = MonitorStorage::new(Config::default());
        let err = storage
            .add_monitor(server("srv-1", GameType::UnrealTournament2004))
            .unwrap_err();
        assert!(matches!(err, MonitorError::UnsupportedGameType(_)));
        assert!(storage.reconciler("srv-1").is_err());
    }

    #[test]
    fn capacity_blocks_new_monitors_but_not_replacements() {
        let config = Config {
            max_monitored_servers: 1,
            ..Config::default()
        };
        let storage = MonitorStorage::new(config);
        storage
            .add_monitor(server("srv-1", GameType::CallOfDuty4))
            .unwrap();

        let err = storage
            .add_monitor(server("srv-2", GameType::TeamFortress2))
            .unwrap_err();
        assert!(matches!(err, MonitorError::CapacityExceeded(1)));

        // Re-registering the existing id is a replacement, not growth.
        storage
            .add_monitor(server("srv-1", GameType::TeamFortress2))
            .unwrap();
    }

    #[test]
    fn snapshots_are_missing_until_recorded() {
        let storage = MonitorStorage::new(Config::default());
        storage
            .add_monitor(server("srv-1", GameType::CallOfDuty4))
            .unwrap();

        assert!(matches!(
            storage.query_snapshot("srv-1").unwrap_err(),
            MonitorError::SnapshotNotFound(_)
        ));
        assert!(matches!(
            storage.query_snapshot("nope").unwrap_err(),
            MonitorError::ServerNotFound(_)
        ));

        storage.record_rcon_snapshot(RconStatus {
            server_id: "srv-1".to_string(),
            players: Vec::new(),
            synced_at: 0,
        });
        assert!(storage.rcon_snapshot("srv-1").is_ok());
    }

    #[test]
    fn replacement_discards_stale_snapshots() {
        let storage = MonitorStorage::new(Config::default());
        storage
            .add_monitor(server("srv-1", GameType::CallOfDuty4))
            .unwrap();
        storage.record_rcon_snapshot(RconStatus {
            server_id: "srv-1".to_string(),
            players: Vec::new(),
            synced_at: 0,
        });

        storage
            .add_monitor(server("srv-1", GameType::TeamFortress2))
            .unwrap();
        assert!(matches!(
            storage.rcon_snapshot("srv-1").unwrap_err(),
            MonitorError::SnapshotNotFound(_)
        ));
    }
}
