use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    api::router,
    engine::EngineConfig,
    instrument::AssetCode,
    scenario::{ScenarioConfig, run_scenario},
    state::AppState,
    utils::shutdown_token,
};

/// Limit order matching engine with an HTTP API
#[derive(Parser)]
#[command(name = "clob-engine")]
#[command(version, about = "A central limit order book with account balances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8000")]
        addr: String,

        /// Asset every book is priced in
        #[arg(long, default_value = "BRL")]
        quote: AssetCode,

        /// Tradable base asset; repeat for more than one book
        #[arg(long = "asset", default_value = "BTC")]
        assets: Vec<AssetCode>,
    },

    /// Run the contract scenario against a running server
    Scenario {
        /// Base URL including the version prefix
        #[arg(long, default_value = "http://localhost:8000/v1")]
        api_base: String,

        /// Number of one-for-one trade rounds (at most 50)
        #[arg(long, default_value_t = 10)]
        rounds: u32,

        #[arg(long, default_value = "BTC")]
        base: String,

        #[arg(long, default_value = "BRL")]
        quote: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn serve(addr: String, quote: AssetCode, assets: Vec<AssetCode>) -> anyhow::Result<()> {
    let state = AppState::new(EngineConfig { quote, assets }).context("invalid instrument set")?;
    let app = router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    let shutdown = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("server stopped");
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Commands::Serve {
            addr,
            quote,
            assets,
        } => serve(addr, quote, assets).await,
        Commands::Scenario {
            api_base,
            rounds,
            base,
            quote,
        } => {
            let cfg = ScenarioConfig {
                api_base,
                base_asset: base,
                quote_asset: quote,
                rounds,
            };
            run_scenario(&cfg).await?;
            info!("scenario passed");
            Ok(())
        }
    }
}
