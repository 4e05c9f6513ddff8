#![warn(missing_docs)]
//! ClaudeFS client config check: validates client options and prints the SETVOLUME options they produce

use anyhow::Context;
use claudefs_client::negotiate::NegotiatedPrograms;
use claudefs_client::setvolume::build_options;
use claudefs_client::{ClientOptions, HandshakeConfig, RpcProgram};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cfs-client-check <options.json>");
        std::process::exit(1);
    }

    let raw = std::fs::read_to_string(&args[1])
        .with_context(|| format!("reading {}", args[1]))?;
    let options: ClientOptions = serde_json::from_str(&raw).context("parsing client options")?;
    let config = HandshakeConfig::new(options)?;
    tracing::info!(client = config.name(), "client options are valid");

    let negotiated = NegotiatedPrograms {
        fops: Some(RpcProgram::fops()),
        mgmt: None,
    };
    for (key, value) in build_options(&config, &negotiated).iter() {
        println!("{} = {}", key, value);
    }
    Ok(())
}
