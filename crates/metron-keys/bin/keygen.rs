//! Generates the RSA pair consumed by `metron-agent` (public half) and
//! `metron-server` (private half).

use clap::Parser;
use metron_keys::{generate_key_pair, write_key_pair};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Generate a metron payload-encryption key pair")]
struct Args {
    /// Output path for the private key (server side)
    #[clap(long, value_name = "FILE", default_value = "private.pem")]
    private: String,

    /// Output path for the public key (agent side)
    #[clap(long, value_name = "FILE", default_value = "public.pem")]
    public: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let private_key =
        generate_key_pair().unwrap_or_else(|e| panic!("generating RSA key pair: {e}"));

    write_key_pair(&private_key, &args.private, &args.public)
        .unwrap_or_else(|e| panic!("writing key pair: {e}"));

    info!("wrote private key to {}", args.private);
    info!("wrote public key to {}", args.public);
}
