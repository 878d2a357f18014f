// src/handlers/control.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, info};
use serde::Deserialize;

use crate::errors::MonitorError;
use crate::handlers::PollRateLimiter;
use crate::storage::memory::MonitorStorage;
use crate::utils::extract_peer_ip;

/// Control actions forwarded over the server's RCON channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    Say { message: String },
    Kick { player_num: i32 },
    ChangeMap { map: String },
    Restart,
    RestartMap,
    NextMap,
    MapRotation,
}

pub async fn control_server(
    req: HttpRequest,
    storage: web::Data<MonitorStorage>,
    path: web::Path<String>,
    body: web::Json<ControlCommand>,
    rate_limiter: web::Data<PollRateLimiter>,
) -> Result<HttpResponse, MonitorError> {
    let peer_ip = extract_peer_ip(&req)?;

    // Control traffic hits the game server just like polls do, so it shares
    // the poll limiter.
    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("rate limit exceeded for control command from {}", peer_ip);
        return Err(MonitorError::RateLimitExceeded);
    }

    let id = path.into_inner();
    let command = body.into_inner();
    info!("issuing {:?} to {}", command, id);

    let reconciler = storage.reconciler(&id)?;
    let mut reconciler = reconciler.lock().await;
    let rcon = reconciler.rcon_client();

    let output = match command {
        ControlCommand::Say { message } => {
            rcon.say(&message).await?;
            String::new()
        }
        ControlCommand::Kick { player_num } => {
            rcon.kick(player_num).await?;
            String::new()
        }
        ControlCommand::ChangeMap { map } => {
            rcon.change_map(&map).await?;
            String::new()
        }
        ControlCommand::Restart => {
            rcon.restart().await?;
            String::new()
        }
        ControlCommand::RestartMap => {
            rcon.restart_map().await?;
            String::new()
        }
        ControlCommand::NextMap => {
            rcon.next_map().await?;
            String::new()
        }
        ControlCommand::MapRotation => rcon.map_rotation().await?,
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({ "output": output })))
}
