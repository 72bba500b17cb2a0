// Order execution: per-pair trading loop, paper exchange, retries
pub mod driver;
pub mod paper;
pub mod retry;

pub use driver::{CycleOutcome, PairTrader, TraderSettings};
pub use paper::PaperExchange;
pub use retry::{retry_with_backoff, RetryPolicy};
