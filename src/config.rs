use crate::api::kraken::{Credentials, KRAKEN_API_BASE};
use crate::error::ConfigError;
use crate::execution::{RetryPolicy, TraderSettings};
use crate::indicators::IndicatorSettings;
use crate::models::{Balances, TradingPair};
use crate::risk::StopLoss;
use crate::strategy::{parse_rungs, LadderConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "LADDERBOT";

/// Runtime configuration
///
/// Sources, lowest priority first: built-in defaults, an optional config
/// file, then `LADDERBOT_*` environment variables (a `.env` file is loaded
/// into the environment beforehand).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub exchange_url: String,

    pub pair: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Second pair traded with its own ladder, sharing the quote asset
    pub hedge_pair: Option<String>,
    pub hedge_base_asset: Option<String>,

    pub poll_interval_seconds: u64,
    pub timeframe: String,
    pub candle_count: usize,

    pub buy_rungs: String,
    pub sell_rungs: String,
    pub rebuy_reset_threshold: f64,
    /// Defaults to `rebuy_reset_threshold`
    pub resell_reset_threshold: Option<f64>,
    pub min_quote_trade_size: f64,
    pub min_base_trade_size: f64,
    pub rollback_on_failure: bool,

    /// Trend filters, off unless enabled
    pub require_price_above_ema: bool,
    pub require_macd_above_signal: bool,
    /// Share of the portfolio held in base above which buys pause
    pub max_exposure_pct: Option<f64>,

    pub rsi_period: usize,
    pub ema_period: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    /// Disabled unless set
    pub stop_loss_pct: Option<f64>,
    pub stop_loss_atr_multiplier: f64,

    pub max_retries: u32,
    pub retry_base_delay_seconds: u64,
    pub retry_max_delay_seconds: u64,
    /// `QueryOrders` checks before an unfilled order is cancelled
    pub order_confirm_attempts: u32,
    pub order_confirm_delay_seconds: u64,

    pub health_port: u16,
    pub state_dir: PathBuf,

    pub dry_run: bool,
    pub paper_quote_balance: f64,
    pub paper_base_balance: f64,
    pub paper_fee_pct: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            exchange_url: KRAKEN_API_BASE.to_string(),
            pair: "XBTUSD".to_string(),
            base_asset: "XXBT".to_string(),
            quote_asset: "ZUSD".to_string(),
            hedge_pair: None,
            hedge_base_asset: None,
            poll_interval_seconds: 600,
            timeframe: "60".to_string(),
            candle_count: 100,
            buy_rungs: "47:0.10,42:0.20,37:0.30,32:0.40".to_string(),
            sell_rungs: "73:0.40,77:0.30,81:0.20,85:0.10".to_string(),
            rebuy_reset_threshold: 47.0,
            resell_reset_threshold: None,
            min_quote_trade_size: 5.0,
            min_base_trade_size: 0.0001,
            rollback_on_failure: true,
            require_price_above_ema: false,
            require_macd_above_signal: false,
            max_exposure_pct: None,
            rsi_period: 14,
            ema_period: 15,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            stop_loss_pct: None,
            stop_loss_atr_multiplier: 1.0,
            max_retries: 3,
            retry_base_delay_seconds: 5,
            retry_max_delay_seconds: 60,
            order_confirm_attempts: 5,
            order_confirm_delay_seconds: 2,
            health_port: 8080,
            state_dir: PathBuf::from("."),
            dry_run: false,
            paper_quote_balance: 1000.0,
            paper_base_balance: 0.0,
            paper_fee_pct: 0.0026,
        }
    }
}

impl BotConfig {
    /// Load `.env`, then defaults, optional file, and environment
    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_sources(file, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Like [`BotConfig::load`] but forces paper trading, so no credentials are needed
    pub fn load_paper(file: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::build(file, config::Environment::with_prefix(ENV_PREFIX), true)
    }

    /// Same as [`BotConfig::load`] with an explicit environment source
    pub fn from_sources(
        file: Option<&str>,
        environment: config::Environment,
    ) -> Result<Self, ConfigError> {
        Self::build(file, environment, false)
    }

    fn build(
        file: Option<&str>,
        environment: config::Environment,
        force_dry_run: bool,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(environment);
        if force_dry_run {
            builder = builder.set_override("dry_run", true)?;
        }

        let settings: BotConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ladder_config()?;
        self.stop_loss()?;

        if self.poll_interval_seconds == 0 {
            return Err(invalid("poll_interval_seconds", "must be at least 1"));
        }
        if self.candle_count < self.indicator_settings().min_candles() {
            return Err(invalid(
                "candle_count",
                format!(
                    "must be at least {} for the configured indicator periods",
                    self.indicator_settings().min_candles()
                ),
            ));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(invalid("macd_fast", "must be below macd_slow"));
        }
        if self.hedge_pair.is_some() && self.hedge_base_asset.is_none() {
            return Err(invalid("hedge_base_asset", "required when hedge_pair is set"));
        }
        if !self.dry_run && self.credentials().is_none() {
            return Err(invalid(
                "api_key",
                "api_key and api_secret are required unless dry_run is enabled",
            ));
        }
        if let Some(cap) = self.max_exposure_pct {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(invalid("max_exposure_pct", "must be within (0, 1]"));
            }
        }
        if self.order_confirm_attempts == 0 {
            return Err(invalid("order_confirm_attempts", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.paper_fee_pct) {
            return Err(invalid("paper_fee_pct", "must be within [0, 1)"));
        }

        Ok(())
    }

    pub fn ladder_config(&self) -> Result<LadderConfig, ConfigError> {
        let config = LadderConfig {
            buy_rungs: parse_rungs(&self.buy_rungs)?,
            sell_rungs: parse_rungs(&self.sell_rungs)?,
            rebuy_reset_threshold: self.rebuy_reset_threshold,
            resell_reset_threshold: self
                .resell_reset_threshold
                .unwrap_or(self.rebuy_reset_threshold),
            min_quote_trade_size: self.min_quote_trade_size,
            min_base_trade_size: self.min_base_trade_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Credentials::new(key.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    /// Primary pair first, then the hedge pair if configured
    pub fn pairs(&self) -> Vec<TradingPair> {
        let mut pairs = vec![TradingPair::new(&self.pair, &self.base_asset, &self.quote_asset)];
        if let (Some(pair), Some(base)) = (&self.hedge_pair, &self.hedge_base_asset) {
            pairs.push(TradingPair::new(pair, base, &self.quote_asset));
        }
        pairs
    }

    pub fn indicator_settings(&self) -> IndicatorSettings {
        IndicatorSettings {
            rsi_period: self.rsi_period,
            ema_period: self.ema_period,
            atr_period: self.atr_period,
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_secs(self.retry_base_delay_seconds),
            max_delay: Duration::from_secs(self.retry_max_delay_seconds),
        }
    }

    pub fn trader_settings(&self) -> TraderSettings {
        TraderSettings {
            timeframe: self.timeframe.clone(),
            candle_count: self.candle_count,
            indicators: self.indicator_settings(),
            retry: self.retry_policy(),
            rollback_on_failure: self.rollback_on_failure,
            require_price_above_ema: self.require_price_above_ema,
            require_macd_above_signal: self.require_macd_above_signal,
            max_exposure_pct: self.max_exposure_pct,
            dry_run: self.dry_run,
        }
    }

    pub fn order_confirm_delay(&self) -> Duration {
        Duration::from_secs(self.order_confirm_delay_seconds)
    }

    pub fn stop_loss(&self) -> Result<Option<StopLoss>, ConfigError> {
        self.stop_loss_pct
            .map(|pct| StopLoss::new(pct, self.stop_loss_atr_multiplier))
            .transpose()
    }

    pub fn paper_balances(&self) -> Balances {
        Balances::new(self.paper_quote_balance, self.paper_base_balance)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join("trades.jsonl")
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_defaults_match_ladder_defaults() {
        let config = BotConfig::from_sources(None, env(&[("LADDERBOT_DRY_RUN", "true")])).unwrap();

        assert!(config.dry_run);
        assert_eq!(config.ladder_config().unwrap(), LadderConfig::default());
        assert_eq!(config.indicator_settings(), IndicatorSettings::default());
        assert_eq!(config.pairs().len(), 1);
        assert!(config.stop_loss().unwrap().is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = BotConfig::from_sources(
            None,
            env(&[
                ("LADDERBOT_API_KEY", "key"),
                ("LADDERBOT_API_SECRET", "c2VjcmV0"),
                ("LADDERBOT_BUY_RUNGS", "45:0.2,38:0.3,30:0.5"),
                ("LADDERBOT_SELL_RUNGS", "65:0.2,72:0.3,80:0.5"),
                ("LADDERBOT_REBUY_RESET_THRESHOLD", "45"),
                ("LADDERBOT_POLL_INTERVAL_SECONDS", "60"),
                ("LADDERBOT_HEDGE_PAIR", "ETHUSD"),
                ("LADDERBOT_HEDGE_BASE_ASSET", "XETH"),
                ("LADDERBOT_STOP_LOSS_PCT", "0.03"),
            ]),
        )
        .unwrap();

        let ladder = config.ladder_config().unwrap();
        assert_eq!(ladder.buy_rungs.len(), 3);
        assert_eq!(ladder.sell_rungs[0].threshold, 65.0);
        assert_eq!(ladder.resell_reset_threshold, 45.0);
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert!(config.credentials().is_some());
        assert!(config.stop_loss().unwrap().is_some());

        let pairs = config.pairs();
        assert_eq!(pairs[1], TradingPair::new("ETHUSD", "XETH", "ZUSD"));
    }

    #[test]
    fn test_forced_paper_mode_skips_credentials() {
        let config = BotConfig::build(None, env(&[]), true).unwrap();
        assert!(config.dry_run);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let err = BotConfig::from_sources(None, env(&[])).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_buy_rung_above_rebuy_threshold_is_rejected() {
        let err = BotConfig::from_sources(
            None,
            env(&[
                ("LADDERBOT_DRY_RUN", "true"),
                ("LADDERBOT_BUY_RUNGS", "50:0.1"),
                ("LADDERBOT_REBUY_RESET_THRESHOLD", "47"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "buy_rungs", .. }));
    }

    #[test]
    fn test_trend_filters_are_opt_in() {
        let config = BotConfig::from_sources(None, env(&[("LADDERBOT_DRY_RUN", "true")])).unwrap();
        let settings = config.trader_settings();
        assert!(!settings.require_price_above_ema);
        assert!(!settings.require_macd_above_signal);
        assert_eq!(settings.max_exposure_pct, None);

        let config = BotConfig::from_sources(
            None,
            env(&[
                ("LADDERBOT_DRY_RUN", "true"),
                ("LADDERBOT_REQUIRE_PRICE_ABOVE_EMA", "true"),
                ("LADDERBOT_MAX_EXPOSURE_PCT", "0.85"),
            ]),
        )
        .unwrap();
        let settings = config.trader_settings();
        assert!(settings.require_price_above_ema);
        assert_eq!(settings.max_exposure_pct, Some(0.85));
    }

    #[test]
    fn test_exposure_cap_out_of_range_is_rejected() {
        let err = BotConfig::from_sources(
            None,
            env(&[("LADDERBOT_DRY_RUN", "true"), ("LADDERBOT_MAX_EXPOSURE_PCT", "1.5")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "max_exposure_pct", .. }));
    }

    #[test]
    fn test_malformed_rung_is_rejected() {
        let err = BotConfig::from_sources(
            None,
            env(&[("LADDERBOT_DRY_RUN", "true"), ("LADDERBOT_SELL_RUNGS", "73-0.4")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRung { .. }));
    }
}
