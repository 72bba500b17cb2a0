use super::{BalanceProvider, ExecutionAdapter, MarketDataProvider};
use crate::error::{DataUnavailableError, ExecutionError};
use crate::models::{Balances, Candle, OrderRequest, OrderResult, TradingPair};
use anyhow::Context;
use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Kraken Spot REST API
// Docs: https://docs.kraken.com/api/docs/rest-api/get-ohlc-data
pub const KRAKEN_API_BASE: &str = "https://api.kraken.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const VOLUME_DECIMALS: i32 = 8;
const DEFAULT_CONFIRM_ATTEMPTS: u32 = 5;
const DEFAULT_CONFIRM_DELAY_SECS: u64 = 2;

type HmacSha512 = Hmac<Sha512>;

// Type alias for the rate limiter to simplify signatures
type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key and base64-encoded private key for Kraken's private endpoints
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Compute Kraken's `API-Sign` header
///
/// HMAC-SHA512 of (URI path + SHA256(nonce + POST data)), keyed with the
/// base64-decoded secret, then base64-encoded.
pub fn sign_request(
    path: &str,
    nonce: u64,
    post_data: &str,
    api_secret: &str,
) -> Result<String, String> {
    let secret = BASE64_STANDARD
        .decode(api_secret)
        .map_err(|e| format!("API secret is not valid base64: {}", e))?;

    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(post_data.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(&secret).map_err(|e| e.to_string())?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Values here are exchange symbols and decimal numbers, which need no escaping
fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Round a volume down so we never ask for more than the balance allows
fn floor_volume(volume: f64) -> f64 {
    let scale = 10f64.powi(VOLUME_DECIMALS);
    (volume * scale).floor() / scale
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ServerTime {
    unixtime: i64,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    descr: Option<OrderDescription>,
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDescription {
    order: String,
}

/// One entry of a `QueryOrders` result; numbers arrive as strings
#[derive(Debug, Deserialize)]
struct OrderInfo {
    status: String,
    #[serde(default)]
    vol_exec: Option<String>,
    #[serde(default)]
    cost: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl OrderInfo {
    fn fill(&self, order_id: &str) -> OrderResult {
        let number = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v > 0.0)
        };
        let quantity = number(&self.vol_exec);
        let price = number(&self.price).or_else(|| match (number(&self.cost), quantity) {
            (Some(cost), Some(qty)) => Some(cost / qty),
            _ => None,
        });

        OrderResult {
            accepted: true,
            filled_price: price,
            filled_quantity: quantity,
            order_id: Some(order_id.to_string()),
        }
    }
}

/// Client for the Kraken REST API
///
/// Public endpoints work without credentials; the private order and
/// balance endpoints require them. Cloning shares the rate limiter and nonce counter.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<KrakenRateLimiter>,
    last_nonce: Arc<AtomicU64>,
    confirm_attempts: u32,
    confirm_delay: Duration,
}

impl KrakenClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        // Kraken's public limit is roughly one call per second
        let quota = Quota::per_second(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            last_nonce: Arc::new(AtomicU64::new(0)),
            confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
            confirm_delay: Duration::from_secs(DEFAULT_CONFIRM_DELAY_SECS),
        })
    }

    /// How often, and how far apart, to poll `QueryOrders` after `AddOrder`
    pub fn with_order_confirmation(mut self, attempts: u32, delay: Duration) -> Self {
        self.confirm_attempts = attempts.max(1);
        self.confirm_delay = delay;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Exchange clock, used as a connectivity check at startup
    pub async fn server_time(&self) -> Result<DateTime<Utc>, DataUnavailableError> {
        let time: ServerTime = self.public_get("/0/public/Time", &[]).await?;
        DateTime::from_timestamp(time.unixtime, 0)
            .ok_or_else(|| DataUnavailableError::Malformed(format!("bad unixtime {}", time.unixtime)))
    }

    /// Strictly increasing millisecond nonce, safe across clones
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DataUnavailableError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {} {:?}", url, query);

        let response: KrakenResponse<T> = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.error.is_empty() {
            return Err(DataUnavailableError::Exchange(response.error.join(", ")));
        }

        response
            .result
            .ok_or_else(|| DataUnavailableError::Malformed(format!("{} returned no result", path)))
    }

    /// Signed POST; errors are returned as the raw Kraken error list
    async fn private_post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<PrivateResult<T>, reqwest::Error> {
        self.rate_limiter.until_ready().await;

        let credentials = match &self.credentials {
            Some(c) => c,
            None => return Ok(PrivateResult::Failed("missing API credentials".to_string())),
        };

        let nonce = self.next_nonce();
        let mut form = vec![("nonce", nonce.to_string())];
        form.extend(params.iter().cloned());
        let post_data = encode_form(&form);

        let signature = match sign_request(path, nonce, &post_data, &credentials.api_secret) {
            Ok(signature) => signature,
            Err(e) => return Ok(PrivateResult::Failed(e)),
        };

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response: KrakenResponse<T> = self
            .client
            .post(&url)
            .header("API-Key", &credentials.api_key)
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(post_data)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.error.is_empty() {
            return Ok(PrivateResult::Rejected(response.error.join(", ")));
        }

        Ok(match response.result {
            Some(result) => PrivateResult::Ok(result),
            None => PrivateResult::Rejected(format!("{} returned no result", path)),
        })
    }
}

/// Outcome of a signed request that reached Kraken (or never left)
enum PrivateResult<T> {
    Ok(T),
    /// Kraken answered with an error list
    Rejected(String),
    /// Request could not be built (credentials)
    Failed(String),
}

/// Parse one OHLC row: [time, open, high, low, close, vwap, volume, count]
fn parse_ohlc_row(row: &serde_json::Value) -> Result<Candle, DataUnavailableError> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 7)
        .ok_or_else(|| DataUnavailableError::Malformed(format!("unexpected OHLC row {}", row)))?;

    let number = |index: usize| -> Result<f64, DataUnavailableError> {
        let value = &fields[index];
        value
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| value.as_f64())
            .ok_or_else(|| {
                DataUnavailableError::Malformed(format!("bad OHLC field {} in {}", index, row))
            })
    };

    let seconds = fields[0]
        .as_i64()
        .ok_or_else(|| DataUnavailableError::Malformed(format!("bad OHLC time in {}", row)))?;
    let timestamp = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| DataUnavailableError::Malformed(format!("bad OHLC time {}", seconds)))?;

    Ok(Candle {
        timestamp,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(6)?,
    })
}

#[async_trait]
impl MarketDataProvider for KrakenClient {
    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, DataUnavailableError> {
        let result: HashMap<String, serde_json::Value> = self
            .public_get(
                "/0/public/OHLC",
                &[("pair", pair.to_string()), ("interval", timeframe.to_string())],
            )
            .await?;

        // The result holds one entry keyed by Kraken's pair name, plus "last"
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, value)| value.as_array())
            .ok_or_else(|| DataUnavailableError::Malformed(format!("no OHLC series for {}", pair)))?;

        let mut candles = rows
            .iter()
            .map(parse_ohlc_row)
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.timestamp);

        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }

        tracing::debug!("Fetched {} candles for {}", candles.len(), pair);
        Ok(candles)
    }
}

#[async_trait]
impl BalanceProvider for KrakenClient {
    async fn fetch_balances(&self, pair: &TradingPair) -> Result<Balances, DataUnavailableError> {
        let balances: HashMap<String, String> =
            match self.private_post("/0/private/Balance", &[]).await? {
                PrivateResult::Ok(result) => result,
                PrivateResult::Rejected(e) => return Err(DataUnavailableError::Exchange(e)),
                PrivateResult::Failed(e) => return Err(DataUnavailableError::Credentials(e)),
            };

        // Assets never held are simply absent from the response
        let amount = |code: &str| -> Result<f64, DataUnavailableError> {
            match balances.get(code) {
                Some(raw) => raw.parse::<f64>().map_err(|_| {
                    DataUnavailableError::Malformed(format!("bad balance for {}: {}", code, raw))
                }),
                None => Ok(0.0),
            }
        };

        Ok(Balances {
            quote_available: amount(&pair.quote_asset)?,
            base_available: amount(&pair.base_asset)?,
        })
    }
}

#[async_trait]
impl ExecutionAdapter for KrakenClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        if !(request.reference_price.is_finite() && request.reference_price > 0.0) {
            return Err(ExecutionError::Rejected(format!(
                "invalid reference price {}",
                request.reference_price
            )));
        }

        let volume = floor_volume(request.size.base_volume(request.reference_price));
        if volume <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "order volume rounds to zero ({:?})",
                request.size
            )));
        }

        let params = [
            ("cl_ord_id", request.client_order_id.to_string()),
            ("ordertype", "market".to_string()),
            ("pair", request.pair.clone()),
            ("type", request.side.to_string()),
            ("volume", format!("{:.8}", volume)),
        ];

        let result: AddOrderResult = match self.private_post("/0/private/AddOrder", &params).await? {
            PrivateResult::Ok(result) => result,
            PrivateResult::Rejected(e) => return Err(ExecutionError::Rejected(e)),
            PrivateResult::Failed(e) => return Err(ExecutionError::Credentials(e)),
        };

        if let Some(descr) = &result.descr {
            tracing::info!("  ✓ Kraken accepted: {}", descr.order);
        }

        let txid = result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::Malformed("AddOrder returned no txid".to_string()))?;

        self.confirm_fill(&txid).await
    }
}

impl KrakenClient {
    /// Wait for a market order to close
    ///
    /// An order still open after the last check is cancelled, so a late fill
    /// cannot land after the caller has given up on it.
    async fn confirm_fill(&self, txid: &str) -> Result<OrderResult, ExecutionError> {
        let mut last_status = String::from("unknown");

        for attempt in 1..=self.confirm_attempts {
            if !self.confirm_delay.is_zero() {
                tokio::time::sleep(self.confirm_delay).await;
            }

            match self.query_order(txid).await {
                Ok(Some(info)) => match info.status.as_str() {
                    "closed" => {
                        let fill = info.fill(txid);
                        tracing::info!(
                            "  ✓ Order {} closed: {:?} @ {:?}",
                            txid,
                            fill.filled_quantity,
                            fill.filled_price
                        );
                        return Ok(fill);
                    }
                    "canceled" | "expired" => {
                        return Err(ExecutionError::Unfilled {
                            order_id: txid.to_string(),
                            reason: match &info.reason {
                                Some(reason) => format!("{} ({})", info.status, reason),
                                None => info.status.clone(),
                            },
                        });
                    }
                    other => last_status = other.to_string(),
                },
                Ok(None) => last_status = "not listed by QueryOrders".to_string(),
                Err(e) => last_status = e,
            }

            tracing::debug!(
                "Order {} not closed yet: {} (check {}/{})",
                txid,
                last_status,
                attempt,
                self.confirm_attempts
            );
        }

        tracing::warn!("  ⚠️  Order {} still {}, cancelling", txid, last_status);
        if let Err(e) = self.cancel_order(txid).await {
            tracing::error!("Failed to cancel order {}: {}", txid, e);
        }

        // It may have filled between the last check and the cancel
        if let Ok(Some(info)) = self.query_order(txid).await {
            if info.status == "closed" {
                return Ok(info.fill(txid));
            }
        }

        Err(ExecutionError::Unfilled {
            order_id: txid.to_string(),
            reason: format!(
                "still {} after {} checks",
                last_status, self.confirm_attempts
            ),
        })
    }

    async fn query_order(&self, txid: &str) -> Result<Option<OrderInfo>, String> {
        let params = [("txid", txid.to_string())];
        match self
            .private_post::<HashMap<String, OrderInfo>>("/0/private/QueryOrders", &params)
            .await
        {
            Ok(PrivateResult::Ok(mut orders)) => Ok(orders.remove(txid)),
            Ok(PrivateResult::Rejected(e)) | Ok(PrivateResult::Failed(e)) => Err(e),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn cancel_order(&self, txid: &str) -> Result<(), String> {
        let params = [("txid", txid.to_string())];
        match self
            .private_post::<serde_json::Value>("/0/private/CancelOrder", &params)
            .await
        {
            Ok(PrivateResult::Ok(_)) => Ok(()),
            Ok(PrivateResult::Rejected(e)) | Ok(PrivateResult::Failed(e)) => Err(e),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_request_matches_kraken_docs() {
        let secret = "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";
        let post_data =
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";

        let signature =
            sign_request("/0/private/AddOrder", 1616492376594, post_data, secret).unwrap();

        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_sign_request_rejects_bad_secret() {
        assert!(sign_request("/0/private/Balance", 1, "nonce=1", "not base64!").is_err());
    }

    #[test]
    fn test_parse_ohlc_row() {
        let row = json!([1688671200, "30306.1", "30306.2", "30305.7", "30305.7", "30306.1", "3.39243896", 23]);
        let candle = parse_ohlc_row(&row).unwrap();

        assert_eq!(candle.timestamp.timestamp(), 1688671200);
        assert_eq!(candle.high, 30306.2);
        assert_eq!(candle.close, 30305.7);
        assert_eq!(candle.volume, 3.39243896);
    }

    #[test]
    fn test_parse_ohlc_row_rejects_short_row() {
        assert!(parse_ohlc_row(&json!([1688671200, "1.0"])).is_err());
    }

    #[test]
    fn test_order_info_fill_falls_back_to_cost() {
        let info: OrderInfo = serde_json::from_value(json!({
            "status": "closed",
            "vol_exec": "0.50000000",
            "cost": "20050.0",
            "price": "0.00000"
        }))
        .unwrap();

        let fill = info.fill("OABC");
        assert_eq!(fill.filled_quantity, Some(0.5));
        assert_eq!(fill.filled_price, Some(40100.0));
        assert_eq!(fill.order_id.as_deref(), Some("OABC"));
    }

    #[test]
    fn test_floor_volume() {
        assert_eq!(floor_volume(0.123456789), 0.12345678);
        assert_eq!(floor_volume(0.000000001), 0.0);
    }

    #[test]
    fn test_nonce_strictly_increases() {
        let client = KrakenClient::new(KRAKEN_API_BASE, None).unwrap();
        let a = client.next_nonce();
        let b = client.clone().next_nonce();
        assert!(b > a);
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("key", "super-secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("key"));
        assert!(!printed.contains("super-secret"));
    }
}
