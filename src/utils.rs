// src/utils.rs
use crate::errors::MonitorError;
use actix_web::HttpRequest;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn extract_peer_ip(req: &HttpRequest) -> Result<IpAddr, MonitorError> {
    match req.peer_addr() {
        Some(addr) => Ok(addr.ip()),
        None => Err(MonitorError::MissingPeerIp),
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
