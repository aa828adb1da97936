use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "metron metrics collection agent")]
pub struct Args {
    /// Server address, host:port or a full http(s) URL
    #[clap(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Pre-shared HMAC signing key; empty disables signing
    #[clap(short = 'k', long, env = "KEY", default_value = "")]
    pub key: String,

    /// Path to the server's public key PEM; empty disables payload encryption
    #[clap(long, value_name = "FILE", env = "CRYPTO_KEY", default_value = "")]
    pub crypto_key: String,

    /// Seconds between metric sampling ticks
    #[clap(short = 'p', long, value_name = "SECONDS", env = "POLL_INTERVAL", default_value_t = 2)]
    pub poll_interval: u64,

    /// Seconds between report ticks
    #[clap(
        short = 'r',
        long,
        value_name = "SECONDS",
        env = "REPORT_INTERVAL",
        default_value_t = 10
    )]
    pub report_interval: u64,

    /// Number of delivery workers
    #[clap(
        short = 'l',
        long,
        value_name = "N",
        env = "RATE_LIMIT",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub rate_limit: u16,

    /// Deliver whole snapshots as one batch request when the server supports it
    #[clap(
        long,
        env = "USE_BATCHING",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub use_batching: bool,

    /// Delivery attempts per report before giving up until the next tick
    #[clap(long, value_name = "N", env = "RETRY_COUNT", default_value_t = 3)]
    pub retry_count: u32,

    /// Initial retry backoff in seconds
    #[clap(long, value_name = "SECONDS", env = "RETRY_WAIT_TIME", default_value_t = 1)]
    pub retry_wait_time: u64,

    /// Retry backoff ceiling in seconds
    #[clap(long, value_name = "SECONDS", env = "RETRY_MAX_WAIT_TIME", default_value_t = 5)]
    pub retry_max_wait_time: u64,

    /// Comma-separated metric names to collect; '*' selects the full set
    #[clap(
        short = 'm',
        long,
        env = "AGT_METRICS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub metrics: Vec<String>,

    /// Keep quiet and only log errors
    #[clap(short, long, conflicts_with = "verbose", default_value_t = false)]
    pub quiet: bool,

    #[clap(
        short = 'v',
        long,
        conflicts_with = "quiet",
        action = clap::ArgAction::Count,
        help = "Output details about sampling and delivery; repeat for more detail"
    )]
    pub verbose: u8,
}

impl Args {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn retry_wait_time(&self) -> Duration {
        Duration::from_secs(self.retry_wait_time)
    }

    pub fn retry_max_wait_time(&self) -> Duration {
        Duration::from_secs(self.retry_max_wait_time)
    }

    /// Base URL for the server, with an `http://` scheme added when absent.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_gets_a_scheme() {
        let args = Args::parse_from(["agent", "--address", "localhost:9090"]);
        assert_eq!(args.base_url(), "http://localhost:9090");
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let args = Args::parse_from(["agent", "--address", "https://metrics.example.com"]);
        assert_eq!(args.base_url(), "https://metrics.example.com");
    }

    #[test]
    fn metrics_list_splits_on_commas() {
        let args = Args::parse_from(["agent", "--metrics", "TotalMemory,FreeMemory"]);
        assert_eq!(args.metrics, vec!["TotalMemory", "FreeMemory"]);
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["agent"]);
        assert_eq!(args.poll_interval, 2);
        assert_eq!(args.report_interval, 10);
        assert_eq!(args.rate_limit, 5);
        assert!(args.use_batching);
        assert_eq!(args.retry_count, 3);
        assert_eq!(args.metrics, vec!["*"]);
    }
}
