use clap::Parser;
use ladderbot::api::{BalanceProvider, ExecutionAdapter, KrakenClient, MarketDataProvider};
use ladderbot::config::BotConfig;
use ladderbot::execution::{PairTrader, PaperExchange};
use ladderbot::persistence::{StateStore, TradeJournal};
use ladderbot::strategy::LadderEngine;
use ladderbot::{health, Result, TradingPair};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(name = "ladderbot")]
#[command(about = "RSI ladder trading bot for Kraken spot pairs", long_about = None)]
#[command(version)]
struct Cli {
    /// Optional config file (toml/yaml/json), overridden by LADDERBOT_* env vars
    #[arg(short, long)]
    config: Option<String>,

    /// Simulate fills in memory instead of placing real orders
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle per pair, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = if cli.dry_run {
        BotConfig::load_paper(cli.config.as_deref())?
    } else {
        BotConfig::load(cli.config.as_deref())?
    };
    setup_logging();

    tracing::info!("🚀 Ladderbot starting{}", if config.dry_run { " (PAPER MODE)" } else { "" });
    log_configuration(&config)?;

    let kraken = Arc::new(
        KrakenClient::new(&config.exchange_url, config.credentials())?
            .with_order_confirmation(config.order_confirm_attempts, config.order_confirm_delay()),
    );
    match kraken.server_time().await {
        Ok(time) => tracing::info!("✅ Connected to Kraken (server time {})", time),
        Err(e) => tracing::warn!("⚠️  Kraken time check failed: {} (continuing)", e),
    }

    let mut traders = Vec::new();
    for pair in config.pairs() {
        traders.push(build_trader(&config, pair, Arc::clone(&kraken)).await?);
    }

    if cli.once {
        for trader in &mut traders {
            let outcome = trader.run_cycle().await;
            tracing::info!("{}: {:?}", trader.pair(), outcome);
        }
        tracing::info!("👋 Single cycle complete");
        return Ok(());
    }

    tracing::info!("\n🔄 Spawning {} pair loop(s)...", traders.len());

    let mut tasks = JoinSet::new();
    for trader in traders {
        let poll_interval = config.poll_interval();
        tasks.spawn(async move {
            let pair = trader.pair().symbol.clone();
            trader.run_forever(poll_interval).await;
            pair
        });
    }

    let health_port = config.health_port;
    let health_task = tokio::spawn(async move { health::serve(health_port).await });

    tracing::info!("\nPress Ctrl+C to stop...\n");

    // Wait for Ctrl+C or task failure
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        Some(result) = tasks.join_next() => {
            tracing::error!("Trading loop exited: {:?}", result);
        }
        result = health_task => {
            tracing::error!("Health server exited: {:?}", result);
        }
    }

    tasks.shutdown().await;
    tracing::info!("👋 Ladderbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ladderbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(config: &BotConfig) -> Result<()> {
    let ladder = config.ladder_config()?;

    tracing::info!("\n📊 Configuration:");
    for pair in config.pairs() {
        tracing::info!("  Pair: {} ({} / {})", pair.symbol, pair.base_asset, pair.quote_asset);
    }
    tracing::info!(
        "  Candles: {} x {}m, poll every {}s",
        config.candle_count,
        config.timeframe,
        config.poll_interval_seconds
    );
    for rung in &ladder.buy_rungs {
        tracing::info!("  Buy rung: RSI <= {} → {:.0}% of quote", rung.threshold, rung.fraction * 100.0);
    }
    for rung in &ladder.sell_rungs {
        tracing::info!("  Sell rung: RSI >= {} → {:.0}% of base", rung.threshold, rung.fraction * 100.0);
    }
    tracing::info!(
        "  Resets: buy above {}, sell below {}",
        ladder.rebuy_reset_threshold,
        ladder.resell_reset_threshold
    );
    match config.stop_loss_pct {
        Some(pct) => tracing::info!(
            "  Stop-loss: {:.1}% (ATR multiplier {})",
            pct * 100.0,
            config.stop_loss_atr_multiplier
        ),
        None => tracing::info!("  Stop-loss: disabled"),
    }
    if config.require_price_above_ema || config.require_macd_above_signal {
        tracing::info!(
            "  Trend filters: price > EMA {}, MACD > signal {}",
            config.require_price_above_ema,
            config.require_macd_above_signal
        );
    }
    if let Some(cap) = config.max_exposure_pct {
        tracing::info!("  Buys pause above {:.0}% exposure", cap * 100.0);
    }
    Ok(())
}

async fn build_trader(
    config: &BotConfig,
    pair: TradingPair,
    kraken: Arc<KrakenClient>,
) -> Result<PairTrader> {
    let market: Arc<dyn MarketDataProvider> = kraken.clone();
    let (balances, executor): (Arc<dyn BalanceProvider>, Arc<dyn ExecutionAdapter>) =
        if config.dry_run {
            let paper = Arc::new(PaperExchange::new(config.paper_balances(), config.paper_fee_pct));
            (paper.clone() as Arc<dyn BalanceProvider>, paper as Arc<dyn ExecutionAdapter>)
        } else {
            (kraken.clone() as Arc<dyn BalanceProvider>, kraken as Arc<dyn ExecutionAdapter>)
        };

    let engine = LadderEngine::new(config.ladder_config()?);
    let mut trader = PairTrader::new(
        pair.clone(),
        market,
        balances,
        executor,
        engine,
        config.trader_settings(),
    )
    .with_journal(TradeJournal::new(config.journal_path()));

    if let Some(stop_loss) = config.stop_loss()? {
        trader = trader.with_stop_loss(stop_loss);
    }

    let store = StateStore::for_pair(&config.state_dir, &pair.symbol);
    let trader = trader.with_state_store(store).await?;
    Ok(trader)
}
