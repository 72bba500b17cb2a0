use thiserror::Error;

/// Malformed market data handed to the indicator calculator.
///
/// Fatal to the current cycle only. Never replaced by a default indicator
/// value, since that would turn a data defect into a trade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("indicator period must be at least 1")]
    InvalidPeriod,
    #[error("{field} at index {index} is not a finite number ({value})")]
    NonFinite {
        field: &'static str,
        index: usize,
        value: f64,
    },
    #[error("{field} at index {index} must be positive, got {value}")]
    NonPositive {
        field: &'static str,
        index: usize,
        value: f64,
    },
}

/// Market data or balances could not be fetched.
#[derive(Error, Debug)]
pub enum DataUnavailableError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange returned error: {0}")]
    Exchange(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("credentials error: {0}")]
    Credentials(String),
}

/// An order could not be submitted or was rejected.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("order {order_id} not filled: {reason}")]
    Unfilled { order_id: String, reason: String },
}

impl ExecutionError {
    /// Safe to resubmit: the request never reached the exchange.
    ///
    /// Timeouts and 5xx replies are ambiguous for an order (it may already
    /// be on the book), so only connection failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Network(e) if e.is_connect())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid rung '{rung}': {reason}")]
    InvalidRung { rung: String, reason: String },
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_not_transient() {
        let err = ExecutionError::Rejected("EOrder:Insufficient funds".to_string());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Insufficient funds"));
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = ValidationError::NonPositive {
            field: "close",
            index: 3,
            value: 0.0,
        };
        assert_eq!(err.to_string(), "close at index 3 must be positive, got 0");
    }
}
