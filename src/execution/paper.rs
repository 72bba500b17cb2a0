use crate::api::{BalanceProvider, ExecutionAdapter};
use crate::error::{DataUnavailableError, ExecutionError};
use crate::models::{Balances, OrderRequest, OrderResult, OrderSize, TradeSide, TradingPair};
use async_trait::async_trait;
use std::sync::Mutex;

/// Simulated exchange for dry runs
///
/// Fills every order in full at its reference price, charging `fee_pct` of
/// the quote value. Balances live in memory only.
pub struct PaperExchange {
    balances: Mutex<Balances>,
    fee_pct: f64,
}

impl PaperExchange {
    pub fn new(starting: Balances, fee_pct: f64) -> Self {
        Self {
            balances: Mutex::new(starting),
            fee_pct: fee_pct.max(0.0),
        }
    }

    pub fn balances(&self) -> Balances {
        match self.balances.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn fill(&self, request: &OrderRequest) -> Result<(f64, f64), ExecutionError> {
        let price = request.reference_price;
        if !(price.is_finite() && price > 0.0) {
            return Err(ExecutionError::Rejected(format!("invalid reference price {}", price)));
        }

        let mut balances = self
            .balances
            .lock()
            .map_err(|_| ExecutionError::Rejected("paper balances unavailable".to_string()))?;

        let (base, quote) = match request.size {
            OrderSize::Quote(quote) => (quote / price, quote),
            OrderSize::Base(base) => (base, base * price),
        };
        if !(base > 0.0 && base.is_finite()) {
            return Err(ExecutionError::Rejected(format!("invalid order size {:?}", request.size)));
        }
        let fee = quote * self.fee_pct;

        match request.side {
            TradeSide::Buy => {
                if quote + fee > balances.quote_available + 1e-9 {
                    return Err(ExecutionError::Rejected(format!(
                        "insufficient quote balance: need {:.2}, have {:.2}",
                        quote + fee,
                        balances.quote_available
                    )));
                }
                balances.quote_available = (balances.quote_available - quote - fee).max(0.0);
                balances.base_available += base;
            }
            TradeSide::Sell => {
                if base > balances.base_available + 1e-12 {
                    return Err(ExecutionError::Rejected(format!(
                        "insufficient base balance: need {:.8}, have {:.8}",
                        base, balances.base_available
                    )));
                }
                balances.base_available = (balances.base_available - base).max(0.0);
                balances.quote_available += quote - fee;
            }
        }

        Ok((base, fee))
    }
}

#[async_trait]
impl BalanceProvider for PaperExchange {
    async fn fetch_balances(&self, _pair: &TradingPair) -> Result<Balances, DataUnavailableError> {
        Ok(self.balances())
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let (base, fee) = self.fill(request)?;
        let order_id = format!("paper-{}", uuid::Uuid::new_v4());

        tracing::info!(
            "  📝 [PAPER] {} {:.8} {} @ ${:.2} (fee ${:.4}) → {}",
            request.side.to_string().to_uppercase(),
            base,
            request.pair,
            request.reference_price,
            fee,
            order_id
        );

        Ok(OrderResult {
            accepted: true,
            filled_price: Some(request.reference_price),
            filled_quantity: Some(base),
            order_id: Some(order_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: TradeSide, size: OrderSize) -> OrderRequest {
        OrderRequest::new("XBTUSD", side, size, 100.0)
    }

    #[tokio::test]
    async fn test_buy_moves_quote_into_base() {
        let exchange = PaperExchange::new(Balances::new(1000.0, 0.0), 0.0);

        let result = exchange
            .submit_order(&request(TradeSide::Buy, OrderSize::Quote(100.0)))
            .await
            .unwrap();

        assert!(result.accepted);
        assert_eq!(result.filled_price, Some(100.0));
        assert!(result.order_id.unwrap().starts_with("paper-"));
        assert_eq!(exchange.balances(), Balances::new(900.0, 1.0));
    }

    #[tokio::test]
    async fn test_sell_charges_fee() {
        let exchange = PaperExchange::new(Balances::new(0.0, 2.0), 0.01);

        tokio_test::assert_ok!(
            exchange
                .submit_order(&request(TradeSide::Sell, OrderSize::Base(1.0)))
                .await
        );

        let balances = exchange.balances();
        assert_eq!(balances.base_available, 1.0);
        assert!((balances.quote_available - 99.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_rejected() {
        let exchange = PaperExchange::new(Balances::new(50.0, 0.0), 0.0);

        let err = tokio_test::assert_err!(
            exchange
                .submit_order(&request(TradeSide::Buy, OrderSize::Quote(100.0)))
                .await
        );

        assert!(matches!(err, ExecutionError::Rejected(_)));
        assert_eq!(exchange.balances(), Balances::new(50.0, 0.0));
    }
}
