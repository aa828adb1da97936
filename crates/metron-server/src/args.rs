use std::time::Duration;

use clap::Parser;
use ipnet::IpNet;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "metron metrics ingestion server")]
pub struct Args {
    /// Address to listen on, host:port
    #[clap(short = 'a', long, env = "ADDRESS", default_value = "localhost:8080")]
    pub address: String,

    /// Pre-shared HMAC signing key; empty disables signature checking
    #[clap(short = 'k', long, env = "KEY", default_value = "")]
    pub key: String,

    /// Path to the private key PEM; empty disables payload decryption
    #[clap(long, value_name = "FILE", env = "CRYPTO_KEY", default_value = "")]
    pub crypto_key: String,

    /// CIDR of admitted agents; empty admits everyone
    #[clap(short = 't', long, value_name = "CIDR", env = "TRUSTED_SUBNET", default_value = "")]
    pub trusted_subnet: String,

    /// Seconds between snapshots of the in-memory store; 0 snapshots on every write
    #[clap(
        short = 'i',
        long,
        value_name = "SECONDS",
        env = "STORE_INTERVAL",
        default_value_t = 300
    )]
    pub store_interval: u64,

    /// Snapshot file for the in-memory store; empty disables snapshots
    #[clap(short = 'f', long, value_name = "FILE", env = "FILE_STORAGE_PATH", default_value = "")]
    pub file_storage_path: String,

    /// Load the snapshot file at boot
    #[clap(
        short = 'r',
        long,
        env = "RESTORE",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub restore: bool,

    /// Postgres DSN; set selects the SQL store, empty selects the in-memory store
    #[clap(short = 'd', long, env = "DATABASE_DSN", default_value = "")]
    pub database_dsn: String,

    /// Connection pool size for the SQL store
    #[clap(long, value_name = "N", env = "DATABASE_MAX_CONN", default_value_t = 10)]
    pub database_max_conn: u32,

    /// Seconds between background liveness pings of the SQL pool
    #[clap(
        long,
        value_name = "SECONDS",
        env = "DATABASE_PING_INTERVAL",
        default_value_t = 5
    )]
    pub database_ping_interval: u64,

    /// Keep quiet and only log errors
    #[clap(short, long, conflicts_with = "verbose", default_value_t = false)]
    pub quiet: bool,

    #[clap(
        short = 'v',
        long,
        conflicts_with = "quiet",
        action = clap::ArgAction::Count,
        help = "Output details about requests and storage; repeat for more detail"
    )]
    pub verbose: u8,
}

impl Args {
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval)
    }

    pub fn database_ping_interval(&self) -> Duration {
        Duration::from_secs(self.database_ping_interval)
    }

    /// Parsed trusted subnet; `None` when not configured.
    pub fn trusted_subnet(&self) -> Result<Option<IpNet>, ipnet::AddrParseError> {
        if self.trusted_subnet.is_empty() {
            Ok(None)
        } else {
            self.trusted_subnet.parse().map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::parse_from(["server"]);
        assert_eq!(args.address, "localhost:8080");
        assert_eq!(args.store_interval, 300);
        assert!(!args.restore);
        assert!(args.database_dsn.is_empty());
        assert_eq!(args.trusted_subnet().unwrap(), None);
    }

    #[test]
    fn trusted_subnet_parses_cidr() {
        let args = Args::parse_from(["server", "--trusted-subnet", "192.168.1.0/24"]);
        let net = args.trusted_subnet().unwrap().unwrap();
        assert!(net.contains(&"192.168.1.42".parse::<std::net::IpAddr>().unwrap()));
        assert!(!net.contains(&"10.0.0.1".parse::<std::net::IpAddr>().unwrap()));
    }

    #[test]
    fn malformed_subnet_is_an_error() {
        let args = Args::parse_from(["server", "--trusted-subnet", "not-a-cidr"]);
        assert!(args.trusted_subnet().is_err());
    }
}
