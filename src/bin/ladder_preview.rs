use anyhow::Context;
use ladderbot::api::{KrakenClient, MarketDataProvider};
use ladderbot::config::BotConfig;
use ladderbot::indicators::IndicatorSnapshot;
use ladderbot::strategy::{CycleState, LadderEngine};
use ladderbot::Balances;

/// Fetch live candles and show what the ladder would do, without trading.
///
/// Uses paper balances from the config and a fresh ladder state.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("\n╔══════════════════════════════════════════════════════╗");
    println!("║     RSI LADDER PREVIEW (no orders placed)            ║");
    println!("╚══════════════════════════════════════════════════════╝\n");

    let config_file = std::env::args().nth(1);
    let config =
        BotConfig::load_paper(config_file.as_deref()).context("Failed to load configuration")?;

    let ladder = config.ladder_config()?;
    let kraken = KrakenClient::new(&config.exchange_url, None)?;
    let balances = Balances::new(config.paper_quote_balance, config.paper_base_balance);

    for pair in config.pairs() {
        println!("\n═══════════════════════════════════════════════════════");
        println!("{} ({} / {})", pair.symbol, pair.base_asset, pair.quote_asset);
        println!("═══════════════════════════════════════════════════════\n");

        let candles = match kraken
            .fetch_candles(&pair.symbol, &config.timeframe, config.candle_count)
            .await
        {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                println!("⚠️  No candles for {} - skipping", pair.symbol);
                continue;
            }
            Err(e) => {
                println!("⚠️  Failed to fetch {}: {} - skipping", pair.symbol, e);
                continue;
            }
        };

        let snapshot = IndicatorSnapshot::from_candles(&candles, &config.indicator_settings())
            .with_context(|| format!("Invalid candles for {}", pair.symbol))?;
        let Some(last) = candles.last() else {
            continue;
        };

        println!("✓ Loaded {} candles, last close ${:.2} at {}", candles.len(), last.close, last.timestamp);
        println!("  RSI:  {}", show(snapshot.rsi));
        println!("  EMA:  {}", show(snapshot.ema));
        println!("  ATR:  {}", show(snapshot.atr));
        match snapshot.macd {
            Some(m) => println!(
                "  MACD: {:.4} (signal {:.4}, histogram {:.4})",
                m.macd, m.signal, m.histogram
            ),
            None => println!("  MACD: n/a"),
        }

        let mut engine = LadderEngine::with_state(ladder.clone(), CycleState::default());
        match engine.evaluate(snapshot.rsi, last.close, balances) {
            Some(intent) => println!(
                "\n→ Fresh ladder would {} {:?} ({})",
                intent.side.to_string().to_uppercase(),
                intent.size(),
                intent.trigger_reason
            ),
            None => println!("\n→ Fresh ladder would HOLD"),
        }

        if let Some(stop_loss) = config.stop_loss()? {
            println!(
                "  Stop distance at this volatility: {:.2}%",
                stop_loss.stop_pct(last.close, snapshot.atr) * 100.0
            );
        }
    }

    println!();
    Ok(())
}

fn show(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "n/a (not enough candles)".to_string(),
    }
}
