pub mod kraken;

pub use kraken::{Credentials, KrakenClient};

use crate::error::{DataUnavailableError, ExecutionError};
use crate::models::{Balances, Candle, OrderRequest, OrderResult, TradingPair};
use async_trait::async_trait;

/// Source of OHLC candles, oldest first
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, DataUnavailableError>;
}

/// Source of fresh per-cycle balances
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn fetch_balances(&self, pair: &TradingPair) -> Result<Balances, DataUnavailableError>;
}

/// Places orders on an exchange (or a simulation of one)
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecutionError>;
}
