// src/protocol/factory.rs
use crate::config::Config;
use crate::errors::MonitorError;
use crate::models::server::{GameType, ServerConfig};
use crate::protocol::query::{Quake3Query, QueryClient, SourceQuery};
use crate::protocol::rcon::{Quake3Rcon, RconClient, SourceRcon};
use crate::protocol::ProtocolFamily;
use lazy_static::lazy_static;
use log::info;
use std::collections::HashMap;
use std::time::Duration;

lazy_static! {
    /// Which wire dialect each supported title speaks. Titles absent from
    /// this table are rejected before any socket is opened.
    static ref PROTOCOL_TABLE: HashMap<GameType, ProtocolFamily> = {
        let mut table = HashMap::new();
        table.insert(GameType::Quake3Arena, ProtocolFamily::Quake3);
        table.insert(GameType::CallOfDuty, ProtocolFamily::Quake3);
        table.insert(GameType::CallOfDuty2, ProtocolFamily::Quake3);
        table.insert(GameType::CallOfDuty4, ProtocolFamily::Quake3);
        table.insert(GameType::UrbanTerror, ProtocolFamily::Quake3);
        table.insert(GameType::CounterStrikeSource, ProtocolFamily::Source);
        table.insert(GameType::TeamFortress2, ProtocolFamily::Source);
        table.insert(GameType::DayOfDefeatSource, ProtocolFamily::Source);
        table.insert(GameType::GarrysMod, ProtocolFamily::Source);
        table
    };
}

pub fn protocol_family(game_type: GameType) -> Result<ProtocolFamily, MonitorError> {
    PROTOCOL_TABLE
        .get(&game_type)
        .copied()
        .ok_or(MonitorError::UnsupportedGameType(game_type))
}

/// Logs the table once at startup so an operator can see which titles this
/// build will accept.
pub fn log_protocol_table() {
    for game_type in GameType::ALL {
        match PROTOCOL_TABLE.get(&game_type) {
            Some(family) => info!("{game_type:?} -> {family:?}"),
            None => info!("{game_type:?} -> unsupported"),
        }
    }
}

pub fn create_query_client(
    server: &ServerConfig,
    config: &Config,
) -> Result<QueryClient, MonitorError> {
    let client = match protocol_family(server.game_type)? {
        ProtocolFamily::Quake3 => {
            QueryClient::Quake3(Quake3Query::new(server.query_addr(), config.query_timeout()))
        }
        ProtocolFamily::Source => {
            QueryClient::Source(SourceQuery::new(server.query_addr(), config.query_timeout()))
        }
    };
    Ok(client)
}

pub fn create_rcon_client(
    server: &ServerConfig,
    config: &Config,
    retry_override: Option<Vec<Duration>>,
) -> Result<RconClient, MonitorError> {
    let delays = retry_override.unwrap_or_else(|| config.rcon_retry_delays());
    let client = match protocol_family(server.game_type)? {
        ProtocolFamily::Quake3 => RconClient::Quake3(Quake3Rcon::new(
            server.rcon_addr(),
            server.rcon_password.clone(),
            config.rcon_timeout(),
            delays,
        )),
        ProtocolFamily::Source => RconClient::Source(SourceRcon::new(
            server.rcon_addr(),
            server.rcon_password.clone(),
            config.rcon_timeout(),
            delays,
        )),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(game_type: GameType) -> ServerConfig {
        ServerConfig {
            server_id: "srv-1".to_string(),
            game_type,
            hostname: "198.51.100.7".to_string(),
            query_port: 28960,
            rcon_port: None,
            rcon_password: "secret".to_string(),
        }
    }

    #[test]
    fn every_title_resolves_or_is_rejected_deliberately() {
        for game_type in GameType::ALL {
            let expected = match game_type {
                GameType::Quake3Arena
                | GameType::CallOfDuty
                | GameType::CallOfDuty2
                | GameType::CallOfDuty4
                | GameType::UrbanTerror => Some(ProtocolFamily::Quake3),
                GameType::CounterStrikeSource
                | GameType::TeamFortress2
                | GameType::DayOfDefeatSource
                | GameType::GarrysMod => Some(ProtocolFamily::Source),
                GameType::UnrealTournament2004 => None,
            };
            assert_eq!(protocol_family(game_type).ok(), expected);
        }
    }

    #[test]
    fn unsupported_title_fails_both_factories_before_io() {
        let config = Config::default();
        let server = server(GameType::UnrealTournament2004);

        let err = create_query_client(&server, &config).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::UnsupportedGameType(GameType::UnrealTournament2004)
        ));

        let err = create_rcon_client(&server, &config, None).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::UnsupportedGameType(GameType::UnrealTournament2004)
        ));
    }

    #[test]
    fn factories_pick_the_family_variant() {
        let config = Config::default();

        let query = create_query_client(&server(GameType::CallOfDuty4), &config).unwrap();
        assert!(matches!(query, QueryClient::Quake3(_)));

        let query = create_query_client(&server(GameType::TeamFortress2), &config).unwrap();
        assert!(matches!(query, QueryClient::Source(_)));

        let rcon = create_rcon_client(&server(GameType::UrbanTerror), &config, None).unwrap();
        assert!(matches!(rcon, RconClient::Quake3(_)));

        let rcon = create_rcon_client(&server(GameType::GarrysMod), &config, None).unwrap();
        assert!(matches!(rcon, RconClient::Source(_)));
    }
}
