use governor::Quota;
use std::env;
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    // Protocol timeouts
    pub query_timeout_ms: u64,
    pub rcon_timeout_ms: u64,

    // Reconciliation
    pub rcon_stale_secs: u64,
    pub rcon_retry_delays_ms: Vec<u64>,

    // Rate limiting configs
    pub poll_period_secs: u64,
    pub poll_burst_limit: u32,
    pub status_period_secs: u64,
    pub status_burst_limit: u32,

    // Registry limits
    pub max_monitored_servers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query_timeout_ms: 2000,
            rcon_timeout_ms: 3000,
            rcon_stale_secs: 30,
            rcon_retry_delays_ms: vec![250, 500, 1000, 2000],
            poll_period_secs: 1,
            poll_burst_limit: 10,
            status_period_secs: 1,
            status_burst_limit: 60,
            max_monitored_servers: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            query_timeout_ms: env::var("QUERY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),

            rcon_timeout_ms: env::var("RCON_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),

            rcon_stale_secs: env::var("RCON_STALE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),

            rcon_retry_delays_ms: env::var("RCON_RETRY_DELAYS_MS")
                .ok()
                .map(|v| parse_delay_list(&v))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| vec![250, 500, 1000, 2000]),

            poll_period_secs: env::var("POLL_PERIOD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),

            poll_burst_limit: env::var("POLL_BURST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            status_period_secs: env::var("STATUS_PERIOD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),

            status_burst_limit: env::var("STATUS_BURST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            max_monitored_servers: env::var("MAX_MONITORED_SERVERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn rcon_timeout(&self) -> Duration {
        Duration::from_millis(self.rcon_timeout_ms)
    }

    pub fn rcon_stale_after(&self) -> Duration {
        Duration::from_secs(self.rcon_stale_secs)
    }

    pub fn rcon_retry_delays(&self) -> Vec<Duration> {
        self.rcon_retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn poll_quota(&self) -> Quota {
        Quota::with_period(Duration::from_secs(self.poll_period_secs))
            .unwrap()
            .allow_burst(NonZeroU32::new(self.poll_burst_limit).unwrap())
    }

    pub fn status_quota(&self) -> Quota {
        Quota::with_period(Duration::from_secs(self.status_period_secs))
            .unwrap()
            .allow_burst(NonZeroU32::new(self.status_burst_limit).unwrap())
    }
}

fn parse_delay_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_list_parses_and_skips_junk() {
        assert_eq!(parse_delay_list("250,500,1000"), vec![250, 500, 1000]);
        assert_eq!(parse_delay_list(" 100 , x, 200 "), vec![100, 200]);
        assert!(parse_delay_list("").is_empty());
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.rcon_stale_secs, 30);
        assert_eq!(config.rcon_retry_delays().len(), 4);
        assert!(config.query_timeout() < config.rcon_timeout());
    }
}
