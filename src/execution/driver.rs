use super::retry::{retry_with_backoff, RetryPolicy};
use crate::api::{BalanceProvider, ExecutionAdapter, MarketDataProvider};
use crate::error::{DataUnavailableError, ExecutionError};
use crate::indicators::{IndicatorSettings, IndicatorSnapshot};
use crate::models::{Balances, OrderRequest, OrderResult, TradeIntent, TradeSide, TradingPair};
use crate::persistence::{JournalEntry, PersistedState, StateStore, TradeJournal, TradeOutcome};
use crate::risk::{StopLoss, StopTrigger};
use crate::strategy::{CycleState, LadderEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Per-pair loop settings that are not part of the ladder itself
#[derive(Debug, Clone)]
pub struct TraderSettings {
    /// Candle interval in minutes, as the exchange expects it
    pub timeframe: String,
    pub candle_count: usize,
    pub indicators: IndicatorSettings,
    pub retry: RetryPolicy,
    /// Undo the optimistic rung marking when an order fails
    pub rollback_on_failure: bool,
    /// No trade unless the close is above the EMA
    pub require_price_above_ema: bool,
    /// No trade unless the MACD line is above its signal
    pub require_macd_above_signal: bool,
    /// Buys pause while base value exceeds this share of the portfolio
    pub max_exposure_pct: Option<f64>,
    /// Only recorded in the journal; the adapter decides what really happens
    pub dry_run: bool,
}

impl Default for TraderSettings {
    fn default() -> Self {
        Self {
            timeframe: "60".to_string(),
            candle_count: 100,
            indicators: IndicatorSettings::default(),
            retry: RetryPolicy::default(),
            rollback_on_failure: true,
            require_price_above_ema: false,
            require_macd_above_signal: false,
            max_exposure_pct: None,
            dry_run: false,
        }
    }
}

/// What a single cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Data was missing, stale or invalid; state untouched
    Skipped(String),
    NoTrade { rsi: Option<f64> },
    /// A trend filter held the ladder back; no rung was evaluated
    Blocked { gate: String },
    Executed {
        intent: TradeIntent,
        result: OrderResult,
    },
    Failed { intent: TradeIntent, error: String },
}

/// Drives one ladder engine against live (or paper) exchange adapters
///
/// Owns its engine exclusively; run one `PairTrader` per task.
pub struct PairTrader {
    pair: TradingPair,
    market: Arc<dyn MarketDataProvider>,
    balances: Arc<dyn BalanceProvider>,
    executor: Arc<dyn ExecutionAdapter>,
    engine: LadderEngine,
    stop_loss: Option<StopLoss>,
    store: Option<StateStore>,
    journal: Option<TradeJournal>,
    settings: TraderSettings,
    last_candle_ts: Option<DateTime<Utc>>,
    last_saved: Option<PersistedState>,
}

impl PairTrader {
    pub fn new(
        pair: TradingPair,
        market: Arc<dyn MarketDataProvider>,
        balances: Arc<dyn BalanceProvider>,
        executor: Arc<dyn ExecutionAdapter>,
        engine: LadderEngine,
        settings: TraderSettings,
    ) -> Self {
        Self {
            pair,
            market,
            balances,
            executor,
            engine,
            stop_loss: None,
            store: None,
            journal: None,
            settings,
            last_candle_ts: None,
            last_saved: None,
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: StopLoss) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Persist state to `store`, resuming from it if a file already exists
    pub async fn with_state_store(mut self, store: StateStore) -> anyhow::Result<Self> {
        if let Some(saved) = store.load().await? {
            tracing::info!(
                "📂 {}: restored ladder state from {} (last buy RSI {:.2}, bought {:?}, sold {:?})",
                self.pair,
                store.path().display(),
                saved.cycle.last_buy_rsi,
                saved.cycle.rungs_bought,
                saved.cycle.rungs_sold
            );
            self.engine = LadderEngine::with_state(self.engine.config().clone(), saved.cycle.clone());
            if let (Some(stop_loss), Some(position)) = (self.stop_loss.take(), saved.position) {
                self.stop_loss = Some(stop_loss.with_position(position));
            }
            self.last_saved = Some(saved);
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn state(&self) -> &CycleState {
        self.engine.state()
    }

    pub fn stop_loss(&self) -> Option<&StopLoss> {
        self.stop_loss.as_ref()
    }

    /// Poll until the task is cancelled
    pub async fn run_forever(mut self, poll_interval: Duration) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let outcome = self.run_cycle().await;
            tracing::debug!("{}: cycle outcome {:?}", self.pair, outcome);
        }
    }

    /// Fetch, compute, decide, and (maybe) execute once
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        tracing::info!("🔄 {}: starting cycle", self.pair);

        let candles = match self.fetch_candles().await {
            Ok(candles) => candles,
            Err(e) => return self.skip(format!("market data unavailable: {}", e)),
        };

        let Some(latest) = candles.last() else {
            return self.skip("exchange returned no candles".to_string());
        };
        let price = latest.close;
        let latest_ts = latest.timestamp;

        if let Some(previous) = self.last_candle_ts {
            if latest_ts < previous {
                return self.skip(format!(
                    "latest candle {} is older than previously seen {}",
                    latest_ts, previous
                ));
            }
        }

        let snapshot = match IndicatorSnapshot::from_candles(&candles, &self.settings.indicators) {
            Ok(snapshot) => snapshot,
            Err(e) => return self.skip(format!("invalid market data: {}", e)),
        };
        self.last_candle_ts = Some(latest_ts);
        self.log_snapshot(price, candles.len(), &snapshot);

        let balances = match self.fetch_balances().await {
            Ok(balances) => balances,
            Err(e) => return self.skip(format!("balances unavailable: {}", e)),
        };
        tracing::info!(
            "  💰 Balances: {:.2} {} / {:.8} {}",
            balances.quote_available,
            self.pair.quote_asset,
            balances.base_available,
            self.pair.base_asset
        );

        if let Some(outcome) = self.check_stop_loss(price, snapshot.atr, balances, snapshot.rsi).await {
            return outcome;
        }

        if let Some(gate) = self.trend_gate(price, &snapshot) {
            tracing::info!("  🚧 {}: no trade, {}", self.pair, gate);
            return CycleOutcome::Blocked { gate };
        }

        let buying_power = self.buying_power(price, balances);
        let outcome = match self.engine.evaluate(snapshot.rsi, price, buying_power) {
            None => CycleOutcome::NoTrade { rsi: snapshot.rsi },
            Some(intent) => self.execute(intent, snapshot.rsi, balances).await,
        };

        self.persist().await;
        outcome
    }

    async fn fetch_candles(&self) -> Result<Vec<crate::models::Candle>, DataUnavailableError> {
        let market = Arc::clone(&self.market);
        let symbol = self.pair.symbol.as_str();
        let timeframe = self.settings.timeframe.as_str();
        let count = self.settings.candle_count;

        retry_with_backoff(
            &self.settings.retry,
            "candle fetch",
            is_retryable_fetch,
            || market.fetch_candles(symbol, timeframe, count),
        )
        .await
    }

    async fn fetch_balances(&self) -> Result<Balances, DataUnavailableError> {
        let provider = Arc::clone(&self.balances);
        let pair = &self.pair;

        retry_with_backoff(
            &self.settings.retry,
            "balance fetch",
            is_retryable_fetch,
            || provider.fetch_balances(pair),
        )
        .await
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let executor = Arc::clone(&self.executor);

        let result = retry_with_backoff(
            &self.settings.retry,
            "order submission",
            ExecutionError::is_transient,
            || executor.submit_order(request),
        )
        .await?;

        if !result.accepted {
            return Err(ExecutionError::Rejected("exchange did not accept the order".to_string()));
        }
        Ok(result)
    }

    /// First enabled trend filter that fails, if any. Undefined indicators fail.
    fn trend_gate(&self, price: f64, snapshot: &IndicatorSnapshot) -> Option<String> {
        if self.settings.require_price_above_ema {
            match snapshot.ema {
                Some(ema) if price > ema => {}
                Some(ema) => return Some(format!("price {:.2} not above EMA {:.2}", price, ema)),
                None => return Some("EMA undefined".to_string()),
            }
        }
        if self.settings.require_macd_above_signal {
            match snapshot.macd {
                Some(m) if m.macd > m.signal => {}
                Some(m) => {
                    return Some(format!("MACD {:.4} not above signal {:.4}", m.macd, m.signal))
                }
                None => return Some("MACD undefined".to_string()),
            }
        }
        None
    }

    /// Hide the quote balance from the ladder once exposure passes the cap,
    /// so buys stop while sells and resets carry on
    fn buying_power(&self, price: f64, balances: Balances) -> Balances {
        let Some(cap) = self.settings.max_exposure_pct else {
            return balances;
        };
        let base_value = balances.base_available * price;
        let portfolio = balances.quote_available + base_value;
        if portfolio <= 0.0 {
            return balances;
        }

        let exposure = base_value / portfolio;
        if exposure <= cap {
            return balances;
        }
        tracing::info!(
            "  🚧 {}: exposure {:.1}% above cap {:.1}%, buys paused",
            self.pair,
            exposure * 100.0,
            cap * 100.0
        );
        Balances {
            quote_available: 0.0,
            ..balances
        }
    }

    async fn execute(&mut self, intent: TradeIntent, rsi: Option<f64>, balances: Balances) -> CycleOutcome {
        let request = OrderRequest::from_intent(&self.pair.symbol, &intent);
        tracing::info!(
            "  🚀 {}: submitting {} {:?} ({})",
            self.pair,
            intent.side.to_string().to_uppercase(),
            request.size,
            intent.trigger_reason
        );

        match self.submit(&request).await {
            Ok(result) => {
                tracing::info!(
                    "  ✅ {}: {} filled (order {:?})",
                    self.pair,
                    intent.side,
                    result.order_id
                );
                self.track_fill(&intent, &request, &result, balances);
                self.journal(&request, &intent.trigger_reason, rsi, filled(&result)).await;
                CycleOutcome::Executed { intent, result }
            }
            Err(e) => {
                tracing::error!("  ❌ {}: order failed: {}", self.pair, e);
                if self.settings.rollback_on_failure {
                    self.engine.release_pending();
                }
                let error = e.to_string();
                self.journal(
                    &request,
                    &intent.trigger_reason,
                    rsi,
                    TradeOutcome::Failed { error: error.clone() },
                )
                .await;
                CycleOutcome::Failed { intent, error }
            }
        }
    }

    /// Liquidate the bot's own position when price breaks the stop
    async fn check_stop_loss(
        &mut self,
        price: f64,
        atr: Option<f64>,
        balances: Balances,
        rsi: Option<f64>,
    ) -> Option<CycleOutcome> {
        let trigger: StopTrigger = self.stop_loss.as_ref()?.check(price, atr)?;
        let quantity = trigger.quantity.min(balances.base_available);

        tracing::warn!(
            "  🛑 {}: STOP-LOSS price ${:.2} <= stop ${:.2} (entry ${:.2}, stop {:.2}%)",
            self.pair,
            price,
            trigger.stop_price,
            trigger.average_entry,
            trigger.stop_pct * 100.0
        );

        if quantity < self.engine.config().min_base_trade_size {
            tracing::warn!(
                "    Tracked position no longer held ({:.8} available), clearing it",
                balances.base_available
            );
            if let Some(stop_loss) = self.stop_loss.as_mut() {
                stop_loss.clear();
            }
            self.persist().await;
            return None;
        }

        let mut intent = TradeIntent::sell(quantity, 0.0, price);
        intent.trigger_reason = format!(
            "stop-loss: price {:.2} <= {:.2}",
            price, trigger.stop_price
        );
        let request = OrderRequest::from_intent(&self.pair.symbol, &intent);

        let outcome = match self.submit(&request).await {
            Ok(result) => {
                tracing::info!("  ✅ {}: stop-loss sold {:.8}", self.pair, quantity);
                if let Some(stop_loss) = self.stop_loss.as_mut() {
                    stop_loss.clear();
                }
                self.engine.reset();
                self.journal(&request, &intent.trigger_reason, rsi, filled(&result)).await;
                CycleOutcome::Executed { intent, result }
            }
            Err(e) => {
                tracing::error!("  ❌ {}: stop-loss order failed: {}", self.pair, e);
                let error = e.to_string();
                self.journal(
                    &request,
                    &intent.trigger_reason,
                    rsi,
                    TradeOutcome::Failed { error: error.clone() },
                )
                .await;
                CycleOutcome::Failed { intent, error }
            }
        };

        self.persist().await;
        Some(outcome)
    }

    /// Update the tracked position from what the exchange reports filling
    fn track_fill(
        &mut self,
        intent: &TradeIntent,
        request: &OrderRequest,
        result: &OrderResult,
        before: Balances,
    ) {
        let Some(stop_loss) = self.stop_loss.as_mut() else {
            return;
        };
        let price = result.filled_price.unwrap_or(request.reference_price);
        let quantity = result
            .filled_quantity
            .unwrap_or_else(|| request.size.base_volume(price));

        match intent.side {
            TradeSide::Buy => stop_loss.record_buy(quantity, price),
            TradeSide::Sell => stop_loss.record_sell_from(quantity, before.base_available),
        }
    }

    async fn journal(
        &self,
        request: &OrderRequest,
        reason: &str,
        rsi: Option<f64>,
        outcome: TradeOutcome,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };

        let entry = JournalEntry {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            pair: self.pair.symbol.clone(),
            side: request.side,
            size: request.size,
            reference_price: request.reference_price,
            reason: reason.to_string(),
            rsi,
            dry_run: self.settings.dry_run,
            outcome,
        };

        if let Err(e) = journal.append(&entry).await {
            tracing::error!("Failed to write trade journal: {:#}", e);
        }
    }

    /// Save only when something changed since the last write
    async fn persist(&mut self) {
        let Some(store) = &self.store else {
            return;
        };

        let current = PersistedState {
            cycle: self.engine.state().clone(),
            position: self.stop_loss.as_ref().map(|s| s.position()),
        };
        if self.last_saved.as_ref() == Some(&current) {
            return;
        }

        match store.save(&current).await {
            Ok(()) => self.last_saved = Some(current),
            Err(e) => tracing::error!("Failed to save ladder state: {:#}", e),
        }
    }

    fn skip(&self, reason: String) -> CycleOutcome {
        tracing::warn!("  ⏭️  {}: cycle skipped, {}", self.pair, reason);
        CycleOutcome::Skipped(reason)
    }

    fn log_snapshot(&self, price: f64, candles: usize, snapshot: &IndicatorSnapshot) {
        let fmt = |value: Option<f64>| match value {
            Some(v) => format!("{:.2}", v),
            None => "n/a".to_string(),
        };
        let macd = match snapshot.macd {
            Some(m) => format!("{:.2}/{:.2}/{:.2}", m.macd, m.signal, m.histogram),
            None => "n/a".to_string(),
        };

        tracing::info!(
            "  📊 {} price ${:.2} | RSI {} | EMA {} | ATR {} | MACD {} ({} candles)",
            self.pair,
            price,
            fmt(snapshot.rsi),
            fmt(snapshot.ema),
            fmt(snapshot.atr),
            macd,
            candles
        );
    }
}

/// Bad credentials will not fix themselves between attempts
fn is_retryable_fetch(error: &DataUnavailableError) -> bool {
    !matches!(error, DataUnavailableError::Credentials(_))
}

fn filled(result: &OrderResult) -> TradeOutcome {
    TradeOutcome::Filled {
        order_id: result.order_id.clone(),
        filled_price: result.filled_price,
    }
}
