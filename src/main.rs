// src/main.rs
mod config;
mod errors;
mod handlers;
mod models;
mod protocol;
mod reconciler;
mod storage;
mod utils;

use actix_web::{web, App, HttpServer};
use env_logger::Env;
use governor::RateLimiter;
use log::info;

use crate::config::Config;
use crate::handlers::{PollRateLimiter, StatusRateLimiter};
use crate::storage::memory::MonitorStorage;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger only once at the start
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env();

    protocol::factory::log_protocol_table();

    // Get bind address and port from environment or use defaults
    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind = format!("{}:{}", bind_address, port);

    let storage = web::Data::new(MonitorStorage::new(config.clone()));

    // Set up rate limiters using config
    let poll_rate_limiter =
        web::Data::new(PollRateLimiter(RateLimiter::keyed(config.poll_quota())));
    let status_rate_limiter =
        web::Data::new(StatusRateLimiter(RateLimiter::keyed(config.status_quota())));

    info!("Starting server on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(storage.clone())
            .app_data(poll_rate_limiter.clone())
            .app_data(status_rate_limiter.clone())
            .route("/", web::get().to(handlers::index::index))
            .route("/servers", web::post().to(handlers::servers::register_server))
            .route("/servers/{id}", web::delete().to(handlers::servers::delete_server))
            .route("/servers/{id}/poll", web::post().to(handlers::servers::poll_server))
            .route(
                "/servers/{id}/command",
                web::post().to(handlers::control::control_server),
            )
            .route(
                "/servers/{id}/status/query",
                web::get().to(handlers::status::get_query_status),
            )
            .route(
                "/servers/{id}/status/rcon",
                web::get().to(handlers::status::get_rcon_status),
            )
    })
    .bind(&bind)?
    .run()
    .await
}
