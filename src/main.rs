//! punch-rendezvous
//!
//! Rendezvous server for NAT hole punching, plus a minimal peer client.
//!
//! Usage:
//!   Server:        punch-rendezvous serve --bind 0.0.0.0:9988
//!   Peer:          punch-rendezvous client --server 203.0.113.1:9988 --address 198.51.100.4 --port 40000 --nat-type 5
//!   Introduce to:  punch-rendezvous client --server 203.0.113.1:9988 --address 198.51.100.4 --port 40000 --connect 2

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use punch_rendezvous::config::{load_server_config, ServerConfigBuilder};
use punch_rendezvous::signaling::{run_rendezvous_server, PeerId, PeerRecord, RendezvousClient};

#[derive(Parser)]
#[command(name = "punch-rendezvous")]
#[command(version)]
#[command(about = "Rendezvous server for NAT hole punching")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the rendezvous server
    Serve {
        /// Path to a TOML config file
        /// (default: ~/.config/punch-rendezvous/server.toml, if it exists)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on (default: 0.0.0.0:9988)
        #[arg(short, long)]
        bind: Option<String>,

        /// Seconds an unenrolled peer may stay silent before it is dropped (0 waits forever)
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Seconds allowed for reading a payload or writing a reply
        #[arg(long)]
        io_timeout: Option<u64>,
    },
    /// Enroll with a server, optionally introduce ourselves to a peer, then wait for introductions
    Client {
        /// Rendezvous server address (e.g., 203.0.113.1:9988)
        #[arg(short, long)]
        server: String,

        /// Our externally observed IP address
        #[arg(short, long)]
        address: IpAddr,

        /// Our externally observed port
        #[arg(short, long)]
        port: u16,

        /// NAT type code (0 blocked, 1 open, 2 full cone, 3 restricted, 4 port-restricted, 5 symmetric, 6 error)
        #[arg(short, long, default_value_t = 0)]
        nat_type: u16,

        /// Store the address as dotted text instead of binary
        #[arg(long)]
        text_address: bool,

        /// Peer ID to look up and notify after enrolling
        #[arg(long)]
        connect: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.mode {
        Mode::Serve {
            config,
            bind,
            idle_timeout,
            io_timeout,
        } => {
            let file_config = load_server_config(config.as_deref())?;
            let resolved = ServerConfigBuilder::new()
                .apply_defaults()
                .apply_config(file_config.as_ref())
                .apply_cli(bind, idle_timeout, io_timeout)
                .build()?;

            log::info!("Starting rendezvous server on {}", resolved.bind);
            run_rendezvous_server(&resolved)
                .await
                .context("Rendezvous server failed")
        }
        Mode::Client {
            server,
            address,
            port,
            nat_type,
            text_address,
            connect,
        } => {
            let record = if text_address {
                PeerRecord::from_text(&address.to_string(), port, nat_type)?
            } else {
                PeerRecord::from_ip(address, port, nat_type)
            };
            run_client(&server, record, connect.map(PeerId::new)).await
        }
    }
}

async fn run_client(server: &str, record: PeerRecord, connect: Option<PeerId>) -> Result<()> {
    let mut client = RendezvousClient::connect(server)
        .await
        .with_context(|| format!("Failed to connect to rendezvous server {}", server))?;

    client.enroll(record).await.context("Failed to enroll")?;

    if let Some(target) = connect {
        match client.get_peer_info(target).await? {
            Some(peer) => {
                log::info!("Connecting to peer {} at {}", target, peer);
                client.notify_peer(target).await?;
            }
            None => log::warn!("Peer {} offline", target),
        }
    }

    log::info!("Waiting for introductions...");
    loop {
        let peer = client
            .wait_for_introduction()
            .await
            .context("Lost connection to rendezvous server")?;
        log::info!("Ready to connect to {}", peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_nat_type_help_lists_every_code() {
        let command = Args::command();
        let client = command
            .get_subcommands()
            .find(|sub| sub.get_name() == "client")
            .unwrap();
        let nat_type = client
            .get_arguments()
            .find(|arg| arg.get_id() == "nat_type")
            .unwrap();
        let help = nat_type.get_help().unwrap().to_string();
        assert!(help.contains("5 symmetric, 6 error"));
    }
}
