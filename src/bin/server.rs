//! tunmux Server Binary
//!
//! Usage: tunmux-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Generate new server configuration
//!   -h, --help           Print help information

use std::env;

use tunmux::config::{Config, ConfigFile, Role};
use tunmux::MuxServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; RUST_LOG overrides (e.g. RUST_LOG=tunmux=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-g" | "--generate" => {
            generate_config()?;
        }
        "-c" | "--config" => {
            if args.len() < 3 {
                eprintln!("Error: --config requires a file path");
                return Ok(());
            }
            run_server(&args[2]).await?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"tunmux Server - multiplexed tunnel endpoint

USAGE:
    tunmux-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -g, --generate          Generate new server configuration
    -h, --help              Print help information

EXAMPLES:
    Generate a new configuration:
        tunmux-server --generate > server.toml

    Run the server:
        tunmux-server --config server.toml
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let config = Config::sample(Role::Server);
    let config_file = ConfigFile::from_config(&config);

    println!("# tunmux Server Configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", config_file.to_toml()?);

    Ok(())
}

async fn run_server(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    if config.role != Role::Server {
        anyhow::bail!("{} is not a server configuration", config_path);
    }
    let listen = config
        .listen
        .clone()
        .ok_or_else(|| anyhow::anyhow!("listen address missing"))?;

    tracing::info!("Starting tunmux server on {}", listen);
    tracing::info!("Upstream: {:?}", config.upstream);

    let dialer = config.build_dialer().await?;
    let mut server = MuxServer::new(dialer, config.mux.clone());
    if let Some(path) = &config.websocket_path {
        server = server.with_websocket_path(path);
    }

    tokio::select! {
        result = server.listen(&listen) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    let stats = server.stats();
    tracing::info!(
        "Served {} endpoints ({} dial failures, {:.1} B/s)",
        stats.endpoints_opened,
        stats.dial_failures,
        stats.throughput_bps()
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
