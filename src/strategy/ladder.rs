use crate::error::ConfigError;
use crate::models::{Balances, TradeIntent, TradeSide};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `last_buy_rsi` value meaning "no buy since the last reset"
pub const LAST_BUY_RSI_SENTINEL: f64 = 100.0;

/// One (threshold, fraction) step of a buy or sell ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    /// RSI level that triggers the rung
    pub threshold: f64,
    /// Share of the available balance to trade, in (0, 1]
    pub fraction: f64,
}

impl Rung {
    pub fn new(threshold: f64, fraction: f64) -> Result<Self, ConfigError> {
        let rung = format!("{}:{}", threshold, fraction);
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::InvalidRung {
                rung,
                reason: "threshold must be within 0..=100".to_string(),
            });
        }
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(ConfigError::InvalidRung {
                rung,
                reason: "fraction must be within (0, 1]".to_string(),
            });
        }
        Ok(Self {
            threshold,
            fraction,
        })
    }
}

/// Parse a ladder written as `threshold:fraction` pairs, e.g. `47:0.10,42:0.20`
pub fn parse_rungs(input: &str) -> Result<Vec<Rung>, ConfigError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let invalid = |reason: &str| ConfigError::InvalidRung {
                rung: part.to_string(),
                reason: reason.to_string(),
            };
            let (threshold, fraction) = part
                .split_once(':')
                .ok_or_else(|| invalid("expected threshold:fraction"))?;
            let threshold: f64 = threshold
                .trim()
                .parse()
                .map_err(|_| invalid("threshold is not a number"))?;
            let fraction: f64 = fraction
                .trim()
                .parse()
                .map_err(|_| invalid("fraction is not a number"))?;
            Rung::new(threshold, fraction)
        })
        .collect()
}

/// Ladder configuration, immutable for the lifetime of a run
///
/// Rungs are evaluated in the order given here; the first matching rung wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    pub buy_rungs: Vec<Rung>,
    pub sell_rungs: Vec<Rung>,
    /// RSI strictly above this clears the buy ladder
    pub rebuy_reset_threshold: f64,
    /// RSI strictly below this clears the sell ladder
    pub resell_reset_threshold: f64,
    pub min_quote_trade_size: f64,
    pub min_base_trade_size: f64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            buy_rungs: vec![
                Rung { threshold: 47.0, fraction: 0.10 },
                Rung { threshold: 42.0, fraction: 0.20 },
                Rung { threshold: 37.0, fraction: 0.30 },
                Rung { threshold: 32.0, fraction: 0.40 },
            ],
            sell_rungs: vec![
                Rung { threshold: 73.0, fraction: 0.40 },
                Rung { threshold: 77.0, fraction: 0.30 },
                Rung { threshold: 81.0, fraction: 0.20 },
                Rung { threshold: 85.0, fraction: 0.10 },
            ],
            rebuy_reset_threshold: 47.0,
            resell_reset_threshold: 47.0,
            min_quote_trade_size: 5.0,
            min_base_trade_size: 0.0001,
        }
    }
}

impl LadderConfig {
    /// Check rung bounds and that no rung sits on the far side of its reset
    /// threshold, which would re-arm and fire that rung every cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rung in self.buy_rungs.iter().chain(&self.sell_rungs) {
            Rung::new(rung.threshold, rung.fraction)?;
        }

        if let Some(rung) = self
            .buy_rungs
            .iter()
            .find(|r| r.threshold > self.rebuy_reset_threshold)
        {
            return Err(ConfigError::Invalid {
                name: "buy_rungs",
                reason: format!(
                    "rung {} is above rebuy_reset_threshold {}",
                    rung.threshold, self.rebuy_reset_threshold
                ),
            });
        }

        if let Some(rung) = self
            .sell_rungs
            .iter()
            .find(|r| r.threshold < self.resell_reset_threshold)
        {
            return Err(ConfigError::Invalid {
                name: "sell_rungs",
                reason: format!(
                    "rung {} is below resell_reset_threshold {}",
                    rung.threshold, self.resell_reset_threshold
                ),
            });
        }

        if self.min_quote_trade_size < 0.0 || self.min_base_trade_size < 0.0 {
            return Err(ConfigError::Invalid {
                name: "min_trade_size",
                reason: "minimum trade sizes cannot be negative".to_string(),
            });
        }

        Ok(())
    }
}

/// Mutable ladder progress; serialized as the persisted state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleState {
    pub last_buy_rsi: f64,
    pub rungs_bought: Vec<f64>,
    pub rungs_sold: Vec<f64>,
}

impl Default for CycleState {
    fn default() -> Self {
        Self {
            last_buy_rsi: LAST_BUY_RSI_SENTINEL,
            rungs_bought: Vec::new(),
            rungs_sold: Vec::new(),
        }
    }
}

impl CycleState {
    pub fn has_bought(&self, threshold: f64) -> bool {
        self.rungs_bought.contains(&threshold)
    }

    pub fn has_sold(&self, threshold: f64) -> bool {
        self.rungs_sold.contains(&threshold)
    }
}

/// Why a rung did not fire this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RungSkip {
    /// RSI has not reached the threshold
    NotReached,
    /// Already traded since the last reset
    AlreadyTraded,
    /// Buy RSI is not strictly below the previous buy's RSI
    NotBelowLastBuy,
}

impl fmt::Display for RungSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RungSkip::NotReached => write!(f, "threshold not reached"),
            RungSkip::AlreadyTraded => write!(f, "already traded this cycle"),
            RungSkip::NotBelowLastBuy => write!(f, "not below last buy RSI"),
        }
    }
}

/// Rung marked by the latest evaluation, kept so a failed order can undo it
#[derive(Debug, Clone, Copy)]
struct PendingRung {
    side: TradeSide,
    threshold: f64,
    previous_last_buy_rsi: f64,
}

/// RSI ladder state machine for one trading pair
///
/// Performs no I/O. One instance per pair; callers serialize access.
#[derive(Debug, Clone)]
pub struct LadderEngine {
    config: LadderConfig,
    state: CycleState,
    pending: Option<PendingRung>,
}

impl LadderEngine {
    pub fn new(config: LadderConfig) -> Self {
        Self::with_state(config, CycleState::default())
    }

    /// Resume from a previously persisted state
    pub fn with_state(config: LadderConfig, state: CycleState) -> Self {
        Self {
            config,
            state,
            pending: None,
        }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Decide on at most one trade for this cycle
    ///
    /// Sells are checked before buys. Rungs are marked as soon as an intent
    /// is returned; see [`LadderEngine::release_pending`] for undoing that
    /// when the order fails.
    pub fn evaluate(
        &mut self,
        rsi: Option<f64>,
        price: f64,
        balances: Balances,
    ) -> Option<TradeIntent> {
        self.pending = None;

        let rsi = match rsi {
            Some(value) if value.is_finite() => value,
            _ => {
                tracing::info!("    → No RSI available, skipping ladder this cycle");
                return None;
            }
        };

        self.apply_resets(rsi);

        if let Some(intent) = self.evaluate_sells(rsi, price, balances) {
            return Some(intent);
        }

        if let Some(intent) = self.evaluate_buys(rsi, price, balances) {
            return Some(intent);
        }

        tracing::info!(
            "    → HOLD: RSI {:.2} matched no open rung (buy <= {:?}, sell >= {:?}, bought: {:?}, sold: {:?}, last buy RSI: {:.2})",
            rsi,
            thresholds(&self.config.buy_rungs),
            thresholds(&self.config.sell_rungs),
            self.state.rungs_bought,
            self.state.rungs_sold,
            self.state.last_buy_rsi
        );
        None
    }

    /// Reason `rung` cannot buy at `rsi`, or `None` if it may
    pub fn buy_skip(&self, rung: &Rung, rsi: f64) -> Option<RungSkip> {
        if rsi > rung.threshold {
            Some(RungSkip::NotReached)
        } else if self.state.has_bought(rung.threshold) {
            Some(RungSkip::AlreadyTraded)
        } else if rsi >= self.state.last_buy_rsi {
            Some(RungSkip::NotBelowLastBuy)
        } else {
            None
        }
    }

    /// Reason `rung` cannot sell at `rsi`, or `None` if it may
    pub fn sell_skip(&self, rung: &Rung, rsi: f64) -> Option<RungSkip> {
        if rsi < rung.threshold {
            Some(RungSkip::NotReached)
        } else if self.state.has_sold(rung.threshold) {
            Some(RungSkip::AlreadyTraded)
        } else {
            None
        }
    }

    /// Undo the rung marked by the most recent `evaluate` call
    ///
    /// Returns false when that call produced no intent.
    pub fn release_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        match pending.side {
            TradeSide::Buy => {
                self.state.rungs_bought.retain(|&t| t != pending.threshold);
                self.state.last_buy_rsi = pending.previous_last_buy_rsi;
            }
            TradeSide::Sell => {
                self.state.rungs_sold.retain(|&t| t != pending.threshold);
            }
        }

        tracing::warn!(
            "    ↩ Released {} rung {} after failed order",
            pending.side,
            pending.threshold
        );
        true
    }

    /// Start a fresh cycle, e.g. after a full liquidation
    pub fn reset(&mut self) {
        self.state = CycleState::default();
        self.pending = None;
        tracing::info!("    🔄 Ladder fully reset");
    }

    fn apply_resets(&mut self, rsi: f64) {
        let buy_ladder_armed = !self.state.rungs_bought.is_empty()
            || self.state.last_buy_rsi != LAST_BUY_RSI_SENTINEL;
        if rsi > self.config.rebuy_reset_threshold && buy_ladder_armed {
            tracing::info!(
                "    🔄 RSI {:.2} > rebuy threshold {}: buy ladder reset (was {:?})",
                rsi,
                self.config.rebuy_reset_threshold,
                self.state.rungs_bought
            );
            self.state.rungs_bought.clear();
            self.state.last_buy_rsi = LAST_BUY_RSI_SENTINEL;
        }

        if rsi < self.config.resell_reset_threshold && !self.state.rungs_sold.is_empty() {
            tracing::info!(
                "    🔄 RSI {:.2} < resell threshold {}: sell ladder reset (was {:?})",
                rsi,
                self.config.resell_reset_threshold,
                self.state.rungs_sold
            );
            self.state.rungs_sold.clear();
        }
    }

    fn evaluate_sells(&mut self, rsi: f64, price: f64, balances: Balances) -> Option<TradeIntent> {
        if balances.base_available <= 0.0 {
            tracing::debug!("    No base balance, sell ladder skipped");
            return None;
        }

        for rung in &self.config.sell_rungs {
            if let Some(skip) = self.sell_skip(rung, rsi) {
                tracing::debug!("    Sell rung {} skipped at RSI {:.2}: {}", rung.threshold, rsi, skip);
                continue;
            }

            let sell_amount = balances.base_available * rung.fraction;
            if sell_amount < self.config.min_base_trade_size {
                tracing::info!(
                    "    → Sell rung {} skipped: {:.8} below minimum {}",
                    rung.threshold,
                    sell_amount,
                    self.config.min_base_trade_size
                );
                continue;
            }

            self.state.rungs_sold.push(rung.threshold);
            self.pending = Some(PendingRung {
                side: TradeSide::Sell,
                threshold: rung.threshold,
                previous_last_buy_rsi: self.state.last_buy_rsi,
            });

            tracing::info!(
                "    📉 SELL: RSI {:.2} >= {} → {:.8} base ({:.0}% of {:.8})",
                rsi,
                rung.threshold,
                sell_amount,
                rung.fraction * 100.0,
                balances.base_available
            );
            return Some(TradeIntent::sell(sell_amount, rung.threshold, price));
        }

        None
    }

    fn evaluate_buys(&mut self, rsi: f64, price: f64, balances: Balances) -> Option<TradeIntent> {
        if balances.quote_available <= self.config.min_quote_trade_size {
            tracing::debug!(
                "    Quote balance {:.2} not above minimum {}, buy ladder skipped",
                balances.quote_available,
                self.config.min_quote_trade_size
            );
            return None;
        }

        for rung in &self.config.buy_rungs {
            if let Some(skip) = self.buy_skip(rung, rsi) {
                tracing::debug!(
                    "    Buy rung {} skipped at RSI {:.2}: {} (last buy RSI {:.2})",
                    rung.threshold,
                    rsi,
                    skip,
                    self.state.last_buy_rsi
                );
                continue;
            }

            let buy_quote_amount = balances.quote_available * rung.fraction;
            if buy_quote_amount < self.config.min_quote_trade_size {
                tracing::info!(
                    "    → Buy rung {} skipped: {:.2} below minimum {}",
                    rung.threshold,
                    buy_quote_amount,
                    self.config.min_quote_trade_size
                );
                continue;
            }

            self.pending = Some(PendingRung {
                side: TradeSide::Buy,
                threshold: rung.threshold,
                previous_last_buy_rsi: self.state.last_buy_rsi,
            });
            self.state.rungs_bought.push(rung.threshold);
            self.state.last_buy_rsi = rsi;

            tracing::info!(
                "    📈 BUY: RSI {:.2} <= {} → {:.2} quote ({:.0}% of {:.2})",
                rsi,
                rung.threshold,
                buy_quote_amount,
                rung.fraction * 100.0,
                balances.quote_available
            );
            return Some(TradeIntent::buy(buy_quote_amount, rung.threshold, price));
        }

        None
    }
}

fn thresholds(rungs: &[Rung]) -> Vec<f64> {
    rungs.iter().map(|r| r.threshold).collect()
}
