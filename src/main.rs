// src/main.rs
use std::process::exit;
use anyhow::Result;
use clap::Parser;
use tracing::{error, Level};

use surface_discovery::cli::{App, Args};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match App::new(args).run().await {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    }
}
