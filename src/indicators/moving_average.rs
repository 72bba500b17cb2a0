use super::validation::{check_period, validate_prices};
use crate::error::ValidationError;

/// Calculate Simple Moving Average (SMA) over the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Result<Option<f64>, ValidationError> {
    check_period(period)?;
    validate_prices("close", prices)?;

    if prices.len() < period {
        return Ok(None);
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Ok(Some(sum / period as f64))
}

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the
/// first `period` prices
pub fn calculate_ema(prices: &[f64], period: usize) -> Result<Option<f64>, ValidationError> {
    check_period(period)?;
    validate_prices("close", prices)?;

    Ok(ema_series(prices, period).last().copied())
}

/// Full EMA series without input validation
///
/// Element `i` corresponds to input index `i + period - 1`. Empty when there
/// are fewer than `period` values. Used for derived series such as the MACD
/// line, which can legitimately be zero or negative.
pub(crate) fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Start with SMA
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(ema);

    for value in &values[period..] {
        ema = (value - ema) * multiplier + ema;
        series.push(ema);
    }

    series
}
