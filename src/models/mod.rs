use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick data, ascending by timestamp when in a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An exchange pair plus the balance codes of its two assets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TradingPair {
    /// Exchange symbol (e.g. "XBTUSD")
    pub symbol: String,
    /// Balance code of the traded asset (e.g. "XXBT")
    pub base_asset: String,
    /// Balance code of the pricing currency (e.g. "ZUSD")
    pub quote_asset: String,
}

impl TradingPair {
    pub fn new(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// Available funds for one pair, fetched fresh every cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Balances {
    /// Fiat / quote currency (e.g. USD)
    pub quote_available: f64,
    /// Traded asset (e.g. BTC)
    pub base_available: f64,
}

impl Balances {
    pub fn new(quote_available: f64, base_available: f64) -> Self {
        Self {
            quote_available,
            base_available,
        }
    }
}

/// Output of one ladder evaluation
///
/// Buys are sized in quote currency, sells in base currency; exactly one of
/// `quote_amount` / `base_amount` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeIntent {
    pub side: TradeSide,
    pub quote_amount: Option<f64>,
    pub base_amount: Option<f64>,
    pub trigger_reason: String,
    /// Rung threshold that fired (NaN-free, taken from config)
    pub threshold: f64,
    /// Price observed when the intent was produced
    pub price: f64,
}

impl TradeIntent {
    pub fn buy(quote_amount: f64, threshold: f64, price: f64) -> Self {
        Self {
            side: TradeSide::Buy,
            quote_amount: Some(quote_amount),
            base_amount: None,
            trigger_reason: format!("rsi <= {}", threshold),
            threshold,
            price,
        }
    }

    pub fn sell(base_amount: f64, threshold: f64, price: f64) -> Self {
        Self {
            side: TradeSide::Sell,
            quote_amount: None,
            base_amount: Some(base_amount),
            trigger_reason: format!("rsi >= {}", threshold),
            threshold,
            price,
        }
    }

    /// Order size as submitted to an exchange
    pub fn size(&self) -> OrderSize {
        match (self.side, self.quote_amount, self.base_amount) {
            (TradeSide::Buy, Some(quote), _) => OrderSize::Quote(quote),
            (_, _, Some(base)) => OrderSize::Base(base),
            (_, Some(quote), None) => OrderSize::Quote(quote),
            (_, None, None) => OrderSize::Base(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSize {
    Quote(f64),
    Base(f64),
}

impl OrderSize {
    /// Base-asset volume at the given price
    pub fn base_volume(&self, price: f64) -> f64 {
        match *self {
            OrderSize::Base(amount) => amount,
            OrderSize::Quote(amount) => amount / price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: TradeSide,
    pub size: OrderSize,
    /// Last observed price, used by adapters that size in base units
    pub reference_price: f64,
    /// Fixed for the life of one intent, so every resubmission carries the same id
    pub client_order_id: uuid::Uuid,
}

impl OrderRequest {
    pub fn new(pair: impl Into<String>, side: TradeSide, size: OrderSize, reference_price: f64) -> Self {
        Self {
            pair: pair.into(),
            side,
            size,
            reference_price,
            client_order_id: uuid::Uuid::new_v4(),
        }
    }

    pub fn from_intent(pair: &str, intent: &TradeIntent) -> Self {
        Self::new(pair, intent.side, intent.size(), intent.price)
    }
}

/// A confirmed fill
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderResult {
    pub accepted: bool,
    /// Average execution price, when the exchange reports one
    pub filled_price: Option<f64>,
    /// Executed base volume, when the exchange reports one
    pub filled_quantity: Option<f64>,
    pub order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_reasons() {
        let buy = TradeIntent::buy(100.0, 47.0, 60000.0);
        assert_eq!(buy.trigger_reason, "rsi <= 47");
        assert_eq!(buy.size(), OrderSize::Quote(100.0));

        let sell = TradeIntent::sell(0.4, 73.5, 60000.0);
        assert_eq!(sell.trigger_reason, "rsi >= 73.5");
        assert_eq!(sell.size(), OrderSize::Base(0.4));
    }

    #[test]
    fn test_base_volume_from_quote() {
        let size = OrderSize::Quote(500.0);
        assert_eq!(size.base_volume(100.0), 5.0);
        assert_eq!(OrderSize::Base(0.25).base_volume(100.0), 0.25);
    }

    #[test]
    fn test_order_request_from_intent() {
        let intent = TradeIntent::sell(0.5, 77.0, 101.0);
        let request = OrderRequest::from_intent("XBTUSD", &intent);

        assert_eq!(request.pair, "XBTUSD");
        assert_eq!(request.side, TradeSide::Sell);
        assert_eq!(request.reference_price, 101.0);
    }

    #[test]
    fn test_each_request_gets_its_own_client_id() {
        let intent = TradeIntent::buy(100.0, 47.0, 60000.0);
        let a = OrderRequest::from_intent("XBTUSD", &intent);
        let b = OrderRequest::from_intent("XBTUSD", &intent);
        assert_ne!(a.client_order_id, b.client_order_id);
    }
}
