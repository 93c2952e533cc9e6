//! Rookery session server binary.
//!
//! Run with: `cargo run -p rookery-server -- --bind 127.0.0.1:3000`

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use rookery_server::{
    DEFAULT_SESSION_ID, INITIAL_CLOCK_MS, OfferPolicy, Server, ServerConfig, dispatch, transport,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "rookery-server", version, about = "Two-player board-game session server")]
struct Args {
    /// Address to listen on for websocket connections.
    #[arg(long, env = "ROOKERY_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Starting time per side in milliseconds.
    #[arg(long, env = "ROOKERY_INITIAL_CLOCK_MS", default_value_t = INITIAL_CLOCK_MS)]
    initial_clock_ms: u64,

    /// Reject draw and rematch accepts that answer no offer.
    #[arg(long, env = "ROOKERY_VERIFY_OFFERS")]
    verify_offers: bool,

    /// Session joined when neither the client nor the URL names one.
    #[arg(long, env = "ROOKERY_DEFAULT_SESSION", default_value = DEFAULT_SESSION_ID)]
    default_session: String,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            initial_clock_ms: self.initial_clock_ms,
            offer_policy: if self.verify_offers {
                OfferPolicy::Verified
            } else {
                OfferPolicy::Trusting
            },
            default_session_id: self.default_session.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rookery_server=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.server_config();
    info!(?config, "starting");

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "listening");

    let (handle, dispatcher) = dispatch::spawn(Server::new(config));

    tokio::select! {
        result = transport::serve(listener, handle) => result.context("transport failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    dispatcher.abort();
    Ok(())
}
