// src/handlers/status.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::error;

use crate::errors::MonitorError;
use crate::handlers::StatusRateLimiter;
use crate::storage::memory::MonitorStorage;
use crate::utils::extract_peer_ip;

pub async fn get_query_status(
    req: HttpRequest,
    storage: web::Data<MonitorStorage>,
    path: web::Path<String>,
    rate_limiter: web::Data<StatusRateLimiter>,
) -> Result<HttpResponse, MonitorError> {
    let peer_ip = extract_peer_ip(&req)?;
    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("rate limit exceeded for status read from {}", peer_ip);
        return Err(MonitorError::RateLimitExceeded);
    }

    let snapshot = storage.query_snapshot(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn get_rcon_status(
    req: HttpRequest,
    storage: web::Data<MonitorStorage>,
    path: web::Path<String>,
    rate_limiter: web::Data<StatusRateLimiter>,
) -> Result<HttpResponse, MonitorError> {
    let peer_ip = extract_peer_ip(&req)?;
    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("rate limit exceeded for status read from {}", peer_ip);
        return Err(MonitorError::RateLimitExceeded);
    }

    let snapshot = storage.rcon_snapshot(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(snapshot))
}
