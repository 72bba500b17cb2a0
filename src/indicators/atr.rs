/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing (same as RSI) for the moving average.
use super::validation::{check_period, validate_candles};
use crate::error::ValidationError;
use crate::models::Candle;

/// Calculate ATR for the given candles
///
/// Returns the current ATR value, or None if fewer than `period + 1` candles
pub fn calculate_atr(candles: &[Candle], period: usize) -> Result<Option<f64>, ValidationError> {
    check_period(period)?;
    validate_candles(candles)?;

    if candles.len() <= period {
        return Ok(None);
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev_close, high, low) = (w[0].close, w[1].high, w[1].low);
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();

    // First ATR is simple average of first 'period' true ranges
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;

    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    Ok(Some(atr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_calculate_atr() {
        // Low volatility market
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr(&candles, 14).unwrap();

        // Every true range is exactly the 2.0 high-low span
        assert_eq!(atr, Some(2.0));
    }

    #[test]
    fn test_calculate_atr_gap_uses_previous_close() {
        let candles = create_test_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            (110.0, 112.0, 109.0, 111.0),
        ]);
        // |112 - 100| beats the 3.0 intrabar range
        assert_eq!(calculate_atr(&candles, 1).unwrap(), Some(12.0));
    }

    #[test]
    fn test_calculate_atr_high_volatility() {
        // High volatility market with gaps
        let high_vol_prices = vec![
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 110.0, 98.0, 105.0),
            (105.0, 108.0, 92.0, 95.0),
            (95.0, 103.0, 88.0, 100.0),
            (100.0, 115.0, 97.0, 110.0),
            (110.0, 112.0, 95.0, 98.0),
            (98.0, 108.0, 90.0, 105.0),
            (105.0, 120.0, 100.0, 115.0),
            (115.0, 118.0, 105.0, 110.0),
            (110.0, 125.0, 108.0, 120.0),
            (120.0, 130.0, 115.0, 125.0),
            (125.0, 128.0, 110.0, 115.0),
            (115.0, 122.0, 105.0, 118.0),
            (118.0, 130.0, 115.0, 125.0),
            (125.0, 135.0, 120.0, 130.0),
        ];

        let candles = create_test_candles(&high_vol_prices);
        let atr = calculate_atr(&candles, 14).unwrap();

        assert!(atr.unwrap() > 10.0);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 2]);
        assert_eq!(calculate_atr(&candles, 14).unwrap(), None);
    }

    #[test]
    fn test_rejects_nan_high() {
        let mut candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 15]);
        candles[4].high = f64::NAN;
        assert!(calculate_atr(&candles, 14).is_err());
    }
}
