// src/handlers/servers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info};

use crate::errors::MonitorError;
use crate::handlers::PollRateLimiter;
use crate::models::server::{RconStatus, ServerConfig};
use crate::storage::memory::MonitorStorage;
use crate::utils::{extract_peer_ip, unix_now};

pub async fn register_server(
    storage: web::Data<MonitorStorage>,
    body: web::Json<ServerConfig>,
) -> Result<HttpResponse, MonitorError> {
    let server = body.into_inner();
    info!(
        "registering monitor for {} ({:?} at {})",
        server.server_id,
        server.game_type,
        server.query_addr()
    );
    storage.add_monitor(server)?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn delete_server(
    storage: web::Data<MonitorStorage>,
    path: web::Path<String>,
) -> Result<HttpResponse, MonitorError> {
    let id = path.into_inner();
    if storage.remove_monitor(&id) {
        debug!("removed monitor {}", id);
        Ok(HttpResponse::Ok().finish())
    } else {
        Err(MonitorError::ServerNotFound(id))
    }
}

pub async fn poll_server(
    req: HttpRequest,
    storage: web::Data<MonitorStorage>,
    path: web::Path<String>,
    rate_limiter: web::Data<PollRateLimiter>,
) -> Result<HttpResponse, MonitorError> {
    let peer_ip = extract_peer_ip(&req)?;

    // Rate limiting
    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("rate limit exceeded for poll from {}", peer_ip);
        return Err(MonitorError::RateLimitExceeded);
    }

    let id = path.into_inner();
    let reconciler = storage.reconciler(&id)?;

    // Polls for the same server serialize here; other servers stay free.
    let outcome = reconciler.lock().await.poll().await?;

    if let Some(players) = outcome.rcon_players {
        storage.record_rcon_snapshot(RconStatus {
            server_id: id.clone(),
            players,
            synced_at: unix_now(),
        });
    }
    storage.record_query_snapshot(outcome.status.clone());

    debug!(
        "poll of {} saw {} players on {}",
        id, outcome.status.player_count, outcome.status.map
    );
    Ok(HttpResponse::Ok().json(outcome.status))
}
