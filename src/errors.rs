// src/errors.rs
use crate::models::server::GameType;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Everything that can go wrong between the HTTP surface and the wire.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Raised by a factory before any I/O when a game type has no protocol
    /// mapping.
    #[error("game type {0:?} has no protocol mapping")]
    UnsupportedGameType(GameType),
    /// The server did not answer the status probe in time.
    #[error("query to {0} timed out")]
    QueryTimeout(String),
    /// The status probe answered, but the payload did not parse.
    #[error("query response could not be parsed: {0}")]
    QueryProtocolError(String),
    /// Socket-level failure while sending or receiving the status probe.
    #[error("query socket error")]
    QuerySocketError(#[source] std::io::Error),
    /// The RCON password was rejected. Fatal for the credential; never
    /// retried automatically.
    #[error("rcon password rejected by server")]
    RconAuthenticationFailed,
    /// Transient connection-level RCON failure; subject to the backoff list.
    #[error("rcon connection failed")]
    RconConnectionError(#[source] std::io::Error),
    /// Every configured retry delay was spent without a usable connection.
    #[error("rcon unavailable after {0} attempts")]
    RconUnavailable(usize),
    /// Bytes remained after the second body terminator of an RCON packet.
    #[error("rcon packet has trailing bytes after the body terminators")]
    ExtraDataInResponse,
    /// The RCON packet was shorter than its header or missing a terminator.
    #[error("malformed rcon packet: {0}")]
    MalformedPacket(&'static str),
    #[error("server {0} is not monitored")]
    ServerNotFound(String),
    #[error("no status snapshot recorded yet for server {0}")]
    SnapshotNotFound(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("maximum number of monitored servers ({0}) reached")]
    CapacityExceeded(usize),
    #[error("failed to extract client IP")]
    MissingPeerIp,
}

impl ResponseError for MonitorError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedGameType(_) | Self::CapacityExceeded(_) | Self::MissingPeerIp => {
                StatusCode::BAD_REQUEST
            }
            Self::ServerNotFound(_) | Self::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            // Protocol and transport failures mean the upstream game server
            // misbehaved, not the caller.
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body(self.to_string())
    }
}
