//! tunmux Client Binary
//!
//! Usage: tunmux-client [OPTIONS]
//!
//! Options:
//!   -t, --test <FILE> <HOST:PORT>             Dial a target through the upstream
//!   -l, --local <FILE> <LISTEN> <IP:PORT>     Forward a local port through the upstream
//!   -g, --generate                            Generate new client configuration
//!   -h, --help                                Print help information

use std::env;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use tunmux::config::{Config, ConfigFile, Role};
use tunmux::forward::{serve_flows, TcpFlowListener};
use tunmux::Dialer;

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
        "-t" | "--test" => {
            if args.len() < 4 {
                eprintln!("Error: --test requires a config file path and a target");
                return Ok(());
            }
            test_connection(&args[2], &args[3]).await?;
        }
        "-l" | "--local" => {
            if args.len() < 5 {
                eprintln!("Error: --local requires a config file path, a listen address and a target");
                return Ok(());
            }
            run_local_forward(&args[2], &args[3], &args[4]).await?;
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
        r#"tunmux Client - TCP flow forwarder

USAGE:
    tunmux-client [OPTIONS]

OPTIONS:
    -t, --test <FILE> <HOST:PORT>             Dial a target through the configured upstream
    -l, --local <FILE> <LISTEN> <IP:PORT>     Forward a local port through the upstream
    -g, --generate                            Generate new client configuration
    -h, --help                                Print help information

EXAMPLES:
    Generate a new configuration:
        tunmux-client --generate > client.toml

    Check that the tunnel reaches a destination:
        tunmux-client --test client.toml 93.184.216.34:80

    Tunnel over WebSocket: set upstream.addr = "ws://<server>:8080/<secret>"

    Forward 127.0.0.1:8000 to a remote web server:
        tunmux-client --local client.toml 127.0.0.1:8000 93.184.216.34:80
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let config = Config::sample(Role::Client);
    let config_file = ConfigFile::from_config(&config);

    println!("# tunmux Client Configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", config_file.to_toml()?);

    Ok(())
}

fn load_client_config(path: &str) -> anyhow::Result<Config> {
    let config = Config::load(path)?;
    if config.role != Role::Client {
        anyhow::bail!("{} is not a client configuration", path);
    }
    Ok(config)
}

async fn test_connection(config_path: &str, target: &str) -> anyhow::Result<()> {
    let config = load_client_config(config_path)?;

    tracing::info!("Testing {} through {:?}", target, config.upstream);

    let dialer = config.build_dialer().await?;
    let started = Instant::now();

    match dialer.dial("tcp", target).await {
        Ok(mut stream) => {
            tracing::info!("Connected to {} in {:?}", target, started.elapsed());
            stream.shutdown().await?;
            tracing::info!("Connection closed successfully");
        }
        Err(e) => {
            tracing::error!("Connection failed: {}", e);
        }
    }

    Ok(())
}

async fn run_local_forward(config_path: &str, listen: &str, target: &str) -> anyhow::Result<()> {
    let config = load_client_config(config_path)?;
    let target: SocketAddr = target
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid target {}: {}", target, e))?;

    let dialer = config.build_dialer().await?;
    let listener = TcpListener::bind(listen).await?;
    let flows = TcpFlowListener::fixed(listener, target);

    tracing::info!("Forwarding {} to {} via {:?}", flows.local_addr()?, target, config.upstream);

    tokio::select! {
        _ = serve_flows(flows, dialer) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
