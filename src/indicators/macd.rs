use super::moving_average::ema_series;
use super::validation::{check_period, validate_prices};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Moving Average Convergence/Divergence
///
/// MACD line = EMA(fast) - EMA(slow), signal = EMA(signal) of the MACD line.
/// Needs `slow + signal - 1` prices; `fast` must be shorter than `slow`.
pub fn calculate_macd(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<Option<Macd>, ValidationError> {
    check_period(fast)?;
    check_period(slow)?;
    check_period(signal)?;
    if fast >= slow {
        return Err(ValidationError::InvalidPeriod);
    }
    validate_prices("close", prices)?;

    if prices.len() < slow.saturating_add(signal) - 1 {
        return Ok(None);
    }

    let fast_ema = ema_series(prices, fast);
    let slow_ema = ema_series(prices, slow);

    // Align both series on the same candle: the fast series starts earlier
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_ema[i + offset] - slow_value)
        .collect();

    let signal_line = ema_series(&macd_line, signal);

    match (macd_line.last(), signal_line.last()) {
        (Some(&macd), Some(&signal)) => Ok(Some(Macd {
            macd,
            signal,
            histogram: macd - signal,
        })),
        _ => Ok(None),
    }
}
