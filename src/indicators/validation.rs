use crate::error::ValidationError;
use crate::models::Candle;

pub(crate) fn check_period(period: usize) -> Result<(), ValidationError> {
    if period == 0 {
        return Err(ValidationError::InvalidPeriod);
    }
    Ok(())
}

/// Reject NaN, infinite, zero or negative prices
///
/// Such values only come from a broken data fetch and must never reach a
/// trading decision.
pub fn validate_prices(field: &'static str, values: &[f64]) -> Result<(), ValidationError> {
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite {
                field,
                index,
                value,
            });
        }
        if value <= 0.0 {
            return Err(ValidationError::NonPositive {
                field,
                index,
                value,
            });
        }
    }
    Ok(())
}

/// Validate close, high and low of every candle
pub fn validate_candles(candles: &[Candle]) -> Result<(), ValidationError> {
    for (index, candle) in candles.iter().enumerate() {
        for (field, value) in [
            ("close", candle.close),
            ("high", candle.high),
            ("low", candle.low),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite {
                    field,
                    index,
                    value,
                });
            }
            if value <= 0.0 {
                return Err(ValidationError::NonPositive {
                    field,
                    index,
                    value,
                });
            }
        }
    }
    Ok(())
}
