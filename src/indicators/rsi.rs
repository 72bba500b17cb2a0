use super::validation::{check_period, validate_prices};
use crate::error::ValidationError;

/// Calculate Relative Strength Index (RSI) with Wilder's smoothing
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Returns `Ok(None)` when fewer than `period + 1` prices are available.
/// A window with no losses is defined as RSI 100.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Result<Option<f64>, ValidationError> {
    check_period(period)?;
    validate_prices("close", prices)?;

    if prices.len() <= period {
        return Ok(None);
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    // Seed with simple averages over the first `period` changes
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    let smoothing = period as f64 - 1.0;
    for change in &changes[period..] {
        avg_gain = (avg_gain * smoothing + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * smoothing + (-change).max(0.0)) / period as f64;
    }

    if avg_loss == 0.0 {
        return Ok(Some(100.0));
    }

    let rs = avg_gain / avg_loss;
    Ok(Some(100.0 - (100.0 / (1.0 + rs))))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wilder's worked example as published by StockCharts
    const REFERENCE: [f64; 16] = [
        44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
        45.61, 46.28, 46.28, 46.00,
    ];

    #[test]
    fn test_rsi_reference_values() {
        let first = calculate_rsi(&REFERENCE[..15], 14).unwrap().unwrap();
        assert!((first - 70.464).abs() < 0.01, "got {}", first);

        let smoothed = calculate_rsi(&REFERENCE, 14).unwrap().unwrap();
        assert!((smoothed - 66.250).abs() < 0.01, "got {}", smoothed);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert_eq!(calculate_rsi(&prices, 14).unwrap(), None);
        assert_eq!(calculate_rsi(&prices, 3).unwrap(), None);
        assert!(calculate_rsi(&prices, 2).unwrap().is_some());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert_eq!(calculate_rsi(&prices, 5).unwrap(), Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses() {
        let prices = vec![105.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        assert_eq!(calculate_rsi(&prices, 5).unwrap(), Some(0.0));
    }

    #[test]
    fn test_rsi_flat_market_is_100() {
        let prices = vec![100.0; 20];
        assert_eq!(calculate_rsi(&prices, 14).unwrap(), Some(100.0));
    }

    #[test]
    fn test_rsi_rejects_bad_data() {
        let mut prices = vec![100.0; 20];
        prices[7] = f64::NAN;
        assert!(calculate_rsi(&prices, 14).is_err());

        prices[7] = -1.0;
        assert!(calculate_rsi(&prices, 14).is_err());

        // Bad data is reported even when the series is too short
        assert!(calculate_rsi(&[0.0], 14).is_err());
    }

    #[test]
    fn test_rsi_zero_period() {
        assert_eq!(
            calculate_rsi(&[1.0, 2.0], 0),
            Err(ValidationError::InvalidPeriod)
        );
    }

    #[test]
    fn test_rsi_deterministic() {
        let a = calculate_rsi(&REFERENCE, 14).unwrap().unwrap();
        let b = calculate_rsi(&REFERENCE, 14).unwrap().unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }
}
