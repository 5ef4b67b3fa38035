use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stock_ticker::clock::{Clock, SystemClock};
use stock_ticker::config::Config;
use stock_ticker::engine::{RandomDraws, StockMachine, TickDriver};
use stock_ticker::repo::Backends;
use stock_ticker::state::MachineStateStore;

#[derive(Parser)]
#[command(name = "stock-ticker")]
#[command(about = "Simulated stock market tick job", version)]
struct Cli {
    /// Scheduler state file. Overrides STOCKS_STATE_PATH.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tick on a timer. Runs forever unless --ticks is given.
    Run {
        #[arg(short, long)]
        ticks: Option<u64>,
    },
    /// Tick whenever the scheduler state is written, until Ctrl-C.
    Watch {
        /// How often to re-read the state file for outside edits.
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },
    /// Allow future ticks.
    Enable,
    /// Stop future ticks. A tick in flight still finishes.
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Basic logging: set RUST_LOG=info (or debug) to see output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    dotenv().ok();

    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    if let Some(path) = cli.state {
        cfg.state_path = Some(path);
    }

    let state = Arc::new(match &cfg.state_path {
        Some(path) => MachineStateStore::open(path)
            .await
            .with_context(|| format!("open state {}", path.display()))?,
        None => MachineStateStore::in_memory(None),
    });

    match cli.command {
        Command::Enable => write_enabled(&state, true).await?,
        Command::Disable => write_enabled(&state, false).await?,
        Command::Run { ticks } => {
            // 0 means unbounded, same as leaving it out.
            let limit = ticks.filter(|n| *n > 0);
            build_driver(&cfg, state).await?.run_loop(limit).await?;
        }
        Command::Watch { poll_ms } => {
            build_driver(&cfg, state)
                .await?
                .with_poll(Duration::from_millis(poll_ms.max(1)))
                .run_watch(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
    }

    Ok(())
}

async fn write_enabled(state: &MachineStateStore, enabled: bool) -> Result<()> {
    let s = state.set_enabled(enabled).await?;
    let path = state.path().map(|p| p.display().to_string());
    info!(
        enabled = s.enabled,
        last_tick = s.last_tick,
        path = path.as_deref().unwrap_or(":memory:"),
        "machine state written"
    );
    Ok(())
}

async fn build_driver(cfg: &Config, state: Arc<MachineStateStore>) -> Result<TickDriver> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = Backends::from_config(cfg, clock.clone()).await?;
    info!(?backends, tickers = cfg.tickers.len(), tick_ms = cfg.tick_ms, "starting");

    let machine = Arc::new(StockMachine::new(
        cfg.tickers.clone(),
        backends,
        Arc::new(RandomDraws),
    ));
    Ok(TickDriver::new(machine, state, clock, cfg.tick_period()))
}
