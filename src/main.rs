//! Huddle chat server
//!
//! Hosts the real-time synchronization engine behind community chatrooms,
//! event/meetup chats, and direct messages.
//!
//! Usage:
//!   cargo run -- server                    # Run the chat server
//!   cargo run -- server --port 4433        # Run on a specific port

use std::env;
use std::time::Duration;

use huddle::server::channel::{Channel, ChannelAccess};
use huddle::{ChannelKey, ChatServer, ServerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Huddle - Real-Time Chat Synchronization Engine");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!();
    println!("PROTOCOL:");
    println!("    One QUIC connection per chat view. A bidirectional control");
    println!("    stream carries the auth handshake, history sync, messages,");
    println!("    reactions, and moderation; typing presence rides datagrams.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433 // default port
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    10000 // default
}

async fn run_server(args: &[String]) -> anyhow::Result<()> {
    let port = parse_port(args);
    let max_connections = parse_max_connections(args);

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        idle_timeout: Duration::from_secs(300),
        ..Default::default()
    };

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Backfill window: {} messages", config.backfill_limit);

    let mut server = ChatServer::new(config);

    // Seed an open lobby chatroom; event/meetup/DM channels are
    // registered by the surrounding platform as conversations appear
    server
        .registry()
        .register(Channel::new(
            ChannelKey::chatroom(1),
            "Lobby".to_string(),
            ChannelAccess::Open,
            0,
        ))
        .await;

    // Start server (this will run indefinitely)
    if let Err(e) = server.start().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
