use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Stop distance never exceeds this, however volatile the market
const MAX_STOP_PCT: f64 = 0.95;

/// Quantity the bot itself bought, with its total quote cost
///
/// Holdings that were already in the account are not tracked, so a stop
/// never liquidates them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub quantity: f64,
    pub cost_basis: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn average_entry(&self) -> Option<f64> {
        if self.is_open() {
            Some(self.cost_basis / self.quantity)
        } else {
            None
        }
    }

    pub fn record_buy(&mut self, quantity: f64, price: f64) {
        if quantity <= 0.0 || !price.is_finite() {
            return;
        }
        self.quantity += quantity;
        self.cost_basis += quantity * price;
    }

    /// Reduce the position, keeping the average entry unchanged
    pub fn record_sell(&mut self, quantity: f64) {
        if !self.is_open() || quantity <= 0.0 {
            return;
        }
        if quantity >= self.quantity {
            *self = Position::default();
            return;
        }
        let remaining = self.quantity - quantity;
        self.cost_basis *= remaining / self.quantity;
        self.quantity = remaining;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTrigger {
    pub average_entry: f64,
    pub stop_price: f64,
    pub stop_pct: f64,
    pub quantity: f64,
}

/// Volatility-scaled stop-loss on the bot's own position
///
/// The stop distance widens with ATR: `base_pct * (1 + atr_multiplier * atr / price)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StopLoss {
    base_pct: f64,
    atr_multiplier: f64,
    position: Position,
}

impl StopLoss {
    pub fn new(base_pct: f64, atr_multiplier: f64) -> Result<Self, ConfigError> {
        if !(base_pct > 0.0 && base_pct < 1.0) {
            return Err(ConfigError::Invalid {
                name: "stop_loss_pct",
                reason: format!("must be within (0, 1), got {}", base_pct),
            });
        }
        if !(atr_multiplier >= 0.0 && atr_multiplier.is_finite()) {
            return Err(ConfigError::Invalid {
                name: "stop_loss_atr_multiplier",
                reason: format!("must be a non-negative number, got {}", atr_multiplier),
            });
        }
        Ok(Self {
            base_pct,
            atr_multiplier,
            position: Position::default(),
        })
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn record_buy(&mut self, quantity: f64, price: f64) {
        self.position.record_buy(quantity, price);
    }

    /// Record a sale of `sold` out of `held` base units
    ///
    /// The account may hold more than the bot bought, so the tracked lot
    /// shrinks by the sale's share of the holdings, not by `sold` itself.
    pub fn record_sell_from(&mut self, sold: f64, held: f64) {
        if held <= 0.0 {
            self.position.record_sell(sold);
            return;
        }
        let share = (sold / held).clamp(0.0, 1.0);
        self.position.record_sell(self.position.quantity * share);
    }

    pub fn clear(&mut self) {
        self.position = Position::default();
    }

    /// Stop distance as a fraction of the average entry
    pub fn stop_pct(&self, price: f64, atr: Option<f64>) -> f64 {
        let volatility = match atr {
            Some(atr) if atr.is_finite() && atr > 0.0 && price > 0.0 => atr / price,
            _ => 0.0,
        };
        (self.base_pct * (1.0 + self.atr_multiplier * volatility)).min(MAX_STOP_PCT)
    }

    /// Returns a trigger when price has fallen to or through the stop
    pub fn check(&self, price: f64, atr: Option<f64>) -> Option<StopTrigger> {
        let average_entry = self.position.average_entry()?;
        let stop_pct = self.stop_pct(price, atr);
        let stop_price = average_entry * (1.0 - stop_pct);

        if price <= stop_price {
            Some(StopTrigger {
                average_entry,
                stop_price,
                stop_pct,
                quantity: self.position.quantity,
            })
        } else {
            None
        }
    }
}
