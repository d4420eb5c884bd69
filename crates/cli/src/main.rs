//! Command Line Interface for the trading-safety control plane.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use prettytable::{Table, row};
use rust_decimal::Decimal;
use sentinel_data::Storage;
use sentinel_domain::entities::KillSwitchState;
use sentinel_domain::enums::KillSwitchTrigger;
use sentinel_execution::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod paper;

use config::SentinelConfig;
use paper::{PaperMarket, PositionCloser, PriceFileFeed};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Trading-safety control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the kill switch state and its conditions
    Status,
    /// Halt trading
    Trigger {
        /// Why trading is halted
        #[arg(short, long)]
        reason: String,

        /// Operator name
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Resume trading after a trigger
    Recover {
        /// Operator name
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Halt trading manually, without auto-recovery
    Pause {
        /// Why trading is paused
        #[arg(short, long, default_value = "manual pause")]
        reason: String,

        /// Operator name
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// End a manual pause
    Resume {
        /// Operator name
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Publish a risk metric read by the kill switch (e.g. drawdown_pct 12.5)
    Metric {
        /// Metric name
        name: String,

        /// Metric value
        value: Decimal,
    },
    /// List persisted positions
    Positions,
    /// Paper trading: all components against a JSON price file
    Run {
        /// Price file, reloaded on every sync interval
        #[arg(short, long)]
        prices: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SentinelConfig::from_env()?;

    match cli.command {
        Commands::Status => {
            let kill_switch = persisted_kill_switch(&config).await?;
            print_state(&kill_switch.get_state().await);
            print_conditions(&kill_switch).await;
        }
        Commands::Trigger { reason, by } => {
            let kill_switch = persisted_kill_switch(&config).await?;
            let state = kill_switch
                .trigger(KillSwitchTrigger::Manual, &by, &reason)
                .await?;
            print_state(&state);
        }
        Commands::Recover { by } => {
            let kill_switch = persisted_kill_switch(&config).await?;
            print_state(&kill_switch.recover(&by).await?);
        }
        Commands::Pause { reason, by } => {
            let kill_switch = persisted_kill_switch(&config).await?;
            print_state(&kill_switch.pause(&by, &reason).await?);
        }
        Commands::Resume { by } => {
            let kill_switch = persisted_kill_switch(&config).await?;
            print_state(&kill_switch.resume(&by).await?);
        }
        Commands::Metric { name, value } => {
            let storage = connect(&config, true).await?;
            storage
                .metrics(config.kill_switch.metrics_prefix.clone())
                .set_metric(&name, value)
                .await?;
            println!("✅ {} = {}", name, value);
        }
        Commands::Positions => {
            let storage = connect(&config, true).await?;
            let positions = storage
                .positions(config.tracker.key_prefix.clone(), config.tracker.persistence_ttl)
                .load_all(config.tracker.scan_page_size)
                .await?;
            print_positions(&positions);
        }
        Commands::Run { prices } => run(config, prices).await?,
    }

    Ok(())
}

/// Opens the configured store. Operator commands act on shared state, so
/// they refuse to fall back to the in-process store.
async fn connect(config: &SentinelConfig, require_redis: bool) -> Result<Storage> {
    match &config.redis_url {
        Some(url) => Storage::connect_redis(url)
            .await
            .with_context(|| format!("cannot connect to {url}")),
        None if require_redis => bail!("{} must be set for this command", config::REDIS_URL),
        None => {
            warn!("No Redis configured, state will not survive a restart");
            Ok(Storage::in_memory())
        }
    }
}

async fn persisted_kill_switch(config: &SentinelConfig) -> Result<KillSwitch> {
    let storage = connect(config, true).await?;
    let kill_switch = KillSwitch::new(
        storage.kill_switch(config.kill_switch.state_key.clone()),
        storage.metrics(config.kill_switch.metrics_prefix.clone()),
        config.kill_switch.clone(),
    );
    kill_switch.load_persisted_state().await?;
    Ok(kill_switch)
}

fn print_state(state: &KillSwitchState) {
    let icon = if state.is_trading_allowed() { "✅" } else { "🛑" };
    println!("{} Kill switch: {}", icon, state.status);
    if let Some(trigger) = state.trigger {
        println!("   Trigger:       {}", trigger);
    }
    if let Some(reason) = &state.reason {
        println!("   Reason:        {}", reason);
    }
    if let (Some(by), Some(at)) = (&state.triggered_by, state.triggered_at) {
        println!("   Since:         {} (by {})", at.format("%Y-%m-%d %H:%M:%S"), by);
    }
    if let Some(at) = state.auto_recover_at {
        println!("   Auto-recovery: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let (Some(by), Some(at)) = (&state.recovered_by, state.recovered_at) {
        println!("   Last recovery: {} (by {})", at.format("%Y-%m-%d %H:%M:%S"), by);
    }
}

async fn print_conditions(kill_switch: &KillSwitch) {
    let mut table = Table::new();
    table.add_row(row!["Condition", "Metric", "Threshold", "Active"]);
    for c in kill_switch.conditions().await {
        table.add_row(row![c.name, c.metric, c.threshold, if c.is_active { "yes" } else { "no" }]);
    }
    table.printstd();
}

fn print_positions(positions: &[sentinel_domain::entities::TrackedPosition]) {
    if positions.is_empty() {
        println!("No persisted positions");
        return;
    }
    let mut table = Table::new();
    table.add_row(row![
        "Position", "Exchange", "Symbol", "Side", "Size", "Entry", "Mark", "uPnL", "Status", "Last sync"
    ]);
    for tracked in positions {
        let p = &tracked.position;
        let last_sync = tracked
            .last_sync_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(row![
            p.position_id,
            p.exchange,
            p.symbol,
            p.side,
            p.size,
            p.entry_price,
            p.current_price,
            p.unrealized_pl.round_dp(2),
            format!("{:?}", p.status),
            last_sync
        ]);
    }
    table.printstd();
}

async fn run(config: SentinelConfig, prices: PathBuf) -> Result<()> {
    let storage = connect(&config, false).await?;

    println!("📈 Loading paper market from {}...", prices.display());
    let market = PaperMarket::load(&prices).await?;
    let feed = Arc::new(StaticPriceFeed::new());
    feed.replace_all(market.flat_prices()).await;
    let price_file = Arc::new(PriceFileFeed::new(prices, feed.clone()));

    let executor: Arc<dyn OrderExecutor> = Arc::new(SimulatedExecutor::default());
    let console: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);

    let tracker = Arc::new(PositionTracker::new(
        feed.clone(),
        storage.positions(config.tracker.key_prefix.clone(), config.tracker.persistence_ttl),
        config.tracker.clone(),
    ));
    let kill_switch = Arc::new(
        KillSwitch::new(
            storage.kill_switch(config.kill_switch.state_key.clone()),
            storage.metrics(config.kill_switch.metrics_prefix.clone()),
            config.kill_switch.clone(),
        )
        .with_notifier(console.clone()),
    );
    let engine = Arc::new(StopLossEngine::new(
        feed.clone(),
        executor.clone(),
        config.stop_loss.clone(),
    ));
    let stop_notifier = MultiNotifier::new()
        .with(console.clone())
        .with(Arc::new(PositionCloser::new(tracker.clone())));
    let auto_executor = Arc::new(
        AutoExecutor::new(engine.clone(), config.auto_executor.clone())
            .with_notifier(Arc::new(stop_notifier)),
    );
    let liquidation = Arc::new(
        LiquidationService::new(
            tracker.clone(),
            executor,
            kill_switch.clone(),
            config.liquidation.clone(),
        )
        .with_notifier(console),
    );

    kill_switch.start().await?;
    tracker.start().await?;

    for fill in market.fills()? {
        tracker.on_fill(fill).await?;
    }
    for tracked in tracker.get_open_positions().await {
        let p = &tracked.position;
        if engine.get_stop_loss_by_position(&p.position_id).await.is_some() {
            continue;
        }
        let params = StopLossParams::new(
            &p.position_id,
            &p.exchange,
            &p.symbol,
            p.side,
            p.entry_price,
            p.size,
        );
        if let Err(e) = engine.create_stop_loss(params).await {
            warn!(position_id = %p.position_id, error = %e, "No stop-loss for position");
        }
    }

    auto_executor.start().await?;
    liquidation.start().await?;

    let reload = BackgroundLoop::new("price-file");
    reload
        .start(config.tracker.sync_interval, move || {
            let price_file = Arc::clone(&price_file);
            async move { price_file.refresh().await }
        })
        .await?;

    println!(
        "🛡️  Sentinel running: {} positions, {} stop-losses. Press Ctrl-C to stop.",
        tracker.get_open_positions().await.len(),
        engine.active_orders().await.len()
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    reload.stop().await;
    liquidation.stop().await;
    auto_executor.stop().await;
    tracker.stop().await;
    kill_switch.stop().await;

    let positions = tracker.stats().await;
    let executions = auto_executor.get_stats().await;
    let liquidations = liquidation.get_daily_stats().await;
    println!("\n📊 Session summary");
    println!("   Open positions:     {}", positions.open_positions);
    println!("   Closed positions:   {}", positions.closed_positions);
    println!("   Liquidated:         {}", positions.liquidated_positions);
    println!("   Unrealized PnL:     {}", positions.total_unrealized_pl.round_dp(2));
    println!("   Stop-loss checks:   {}", executions.total_checks);
    println!(
        "   Stop-loss triggers: {} ({} ok, {} failed)",
        executions.triggers, executions.successful, executions.failed
    );
    println!("   Liquidations today: {}", liquidations.count);
    print_state(&kill_switch.get_state().await);

    Ok(())
}
