pub mod control;
pub mod index;
pub mod servers;
pub mod status;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use std::net::IpAddr;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Limits how often any one caller may trigger live polls; each poll costs
/// the upstream game server real traffic.
pub struct PollRateLimiter(pub IpRateLimiter);

/// Limits snapshot reads separately from polls.
pub struct StatusRateLimiter(pub IpRateLimiter);
