//! qkdnet node check
//!
//! Loads configuration, brings up the configured secured links on a node
//! with no transport attached, and reports each key buffer. Exits non-zero
//! when the configuration or any link is rejected.

use clap::Parser;
use qkdnet::{Config, EventQueue, Node, NullTransport};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// QKD key-buffer node
#[derive(Parser, Debug)]
#[command(name = "qkdnet", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    dump_config: bool,
}

fn main() {
    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("qkdnet starting");

    let (config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if args.dump_config {
        match config.to_yaml() {
            Ok(yaml) => {
                print!("{}", yaml);
                return;
            }
            Err(e) => {
                error!("Failed to serialize configuration: {}", e);
                std::process::exit(1);
            }
        }
    }

    if config.links.is_empty() {
        warn!("No links configured");
    }

    let mut node = match Node::new(config, EventQueue::new(), NullTransport) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    let failures = match node.start(0) {
        Ok(failures) => failures,
        Err(e) => {
            error!("Failed to start node: {}", e);
            std::process::exit(1);
        }
    };

    for link in node.links().iter() {
        let buffer = link.buffer();
        info!(
            link = %link.key(),
            minimum = buffer.minimum(),
            threshold = buffer.threshold(),
            maximum = buffer.maximum(),
            current = buffer.current(),
            level = %buffer.level(),
            "Key buffer ready"
        );
    }

    for failure in &failures {
        error!(error = %failure, "Link rejected");
    }

    info!(
        node = %node.id(),
        links = node.links().len(),
        rejected = failures.len(),
        charging = node.charging().active_sessions(),
        "Node started"
    );

    node.shutdown();

    if !failures.is_empty() {
        std::process::exit(2);
    }
}
