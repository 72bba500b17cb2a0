use super::{calculate_atr, calculate_ema, calculate_macd, calculate_rsi, validate_candles, Macd};
use crate::error::ValidationError;
use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Indicator periods used to build a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub ema_period: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_period: 15,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorSettings {
    /// Candles needed for every indicator to be defined
    pub fn min_candles(&self) -> usize {
        [
            self.rsi_period.saturating_add(1),
            self.ema_period,
            self.atr_period.saturating_add(1),
            self.macd_slow
                .saturating_add(self.macd_signal)
                .saturating_sub(1),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Indicator values for the latest candle; `None` means not enough history
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    pub atr: Option<f64>,
    pub macd: Option<Macd>,
}

impl IndicatorSnapshot {
    pub fn from_candles(
        candles: &[Candle],
        settings: &IndicatorSettings,
    ) -> Result<Self, ValidationError> {
        validate_candles(candles)?;

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        Ok(Self {
            rsi: calculate_rsi(&closes, settings.rsi_period)?,
            ema: calculate_ema(&closes, settings.ema_period)?,
            atr: calculate_atr(candles, settings.atr_period)?,
            macd: calculate_macd(
                &closes,
                settings.macd_fast,
                settings.macd_slow,
                settings.macd_signal,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: Utc::now() + chrono::Duration::minutes(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_min_candles_default() {
        assert_eq!(IndicatorSettings::default().min_candles(), 34);
    }

    #[test]
    fn test_min_candles_saturates_on_huge_periods() {
        let settings = IndicatorSettings {
            rsi_period: usize::MAX,
            atr_period: usize::MAX,
            macd_slow: usize::MAX,
            macd_signal: usize::MAX,
            ..IndicatorSettings::default()
        };
        assert_eq!(settings.min_candles(), usize::MAX);

        let closes = vec![100.0; 40];
        assert_eq!(calculate_rsi(&closes, usize::MAX).unwrap(), None);
        assert_eq!(calculate_macd(&closes, 12, usize::MAX, usize::MAX).unwrap(), None);
    }

    #[test]
    fn test_snapshot_full_history() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + (i % 5) as f64).collect();
        let snapshot =
            IndicatorSnapshot::from_candles(&candles_from_closes(&closes), &Default::default())
                .unwrap();

        assert!(snapshot.rsi.is_some());
        assert!(snapshot.ema.is_some());
        assert!(snapshot.atr.is_some());
        assert!(snapshot.macd.is_some());
    }

    #[test]
    fn test_snapshot_partial_history() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let snapshot =
            IndicatorSnapshot::from_candles(&candles_from_closes(&closes), &Default::default())
                .unwrap();

        assert_eq!(snapshot.rsi, Some(100.0));
        assert!(snapshot.macd.is_none());
    }

    #[test]
    fn test_snapshot_rejects_bad_candle() {
        let mut candles = candles_from_closes(&[100.0; 30]);
        candles[10].close = 0.0;
        assert!(IndicatorSnapshot::from_candles(&candles, &Default::default()).is_err());
    }
}
