//! CLI entry point for a single relay node. Loads a node config, binds the
//! listening socket, optionally dials out to a bootstrap peer, and runs the
//! `mio` loop until interrupted.

use clap::Parser;
use crc_core::{logging, BootstrapConfig, Node, NodeConfig};
use std::process;
use std::sync::atomic::Ordering;

/// Runs a Clemson Relay Chat node.
#[derive(Parser)]
#[command(name = "crc-server", author, version, about)]
struct Cli {
    /// Path to the node's JSON config file.
    config: String,

    /// Overrides the listening port from the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the log file path from the config file.
    #[arg(long)]
    log_file: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match NodeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {}: {}", cli.config, err);
            process::exit(1);
        }
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }

    let log = logging::init(config.log_file.as_deref());

    let mut node = match Node::bind(&config, log.clone()) {
        Ok(node) => node,
        Err(err) => {
            slog::error!(log, "failed to bind node"; "error" => %err);
            process::exit(1);
        }
    };

    if let Some(bootstrap) = config.bootstrap.clone() {
        if let Err(err) = node.connect_bootstrap(&bootstrap as &BootstrapConfig) {
            slog::error!(log, "failed to connect to bootstrap server"; "error" => %err);
            process::exit(1);
        }
    }

    let shutdown = node.shutdown_handle();
    ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed))
        .expect("failed to install Ctrl-C handler");

    slog::info!(log, "node starting"; "id" => config.id, "name" => &config.server_name);

    if let Err(err) = node.run() {
        slog::error!(log, "node loop exited with error"; "error" => %err);
        process::exit(1);
    }
}
