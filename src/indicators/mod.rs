// Technical indicators module
// Implements RSI, EMA, ATR, MACD for the ladder and its log output

pub mod atr;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;
pub mod validation;

pub use atr::calculate_atr;
pub use macd::{calculate_macd, Macd};
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
pub use snapshot::{IndicatorSettings, IndicatorSnapshot};
pub use validation::{validate_candles, validate_prices};
