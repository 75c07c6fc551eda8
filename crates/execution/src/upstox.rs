//! Upstox REST client for LTP quotes and market orders.
//!
//! All calls share one [`Throttle`], so quote polling and order placement
//! never burst past the broker's limit. A 401 surfaces as
//! [`ExecutionError::Authentication`], which callers treat as fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use algo_options_core::error::Result;
use algo_options_core::{
    BrokerConfig, ExecutionError, OrderExecutor, OrderRequest, OrderResponse, QuoteSource, Side,
};

use crate::throttle::{Throttle, ThrottleConfig};

const LTP_PATH: &str = "/v2/market-quote/ltp";
const PLACE_ORDER_PATH: &str = "/v2/order/place";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct LtpResponse {
    status: String,
    #[serde(default)]
    data: HashMap<String, LtpEntry>,
}

#[derive(Debug, Deserialize)]
struct LtpEntry {
    last_price: Decimal,
    #[serde(default)]
    instrument_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    quantity: u32,
    product: &'a str,
    validity: &'a str,
    price: f64,
    tag: &'a str,
    instrument_token: &'a str,
    order_type: &'a str,
    transaction_type: Side,
    disclosed_quantity: u32,
    trigger_price: f64,
    is_amo: bool,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    status: String,
    #[serde(default)]
    data: Option<PlaceOrderData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

// =============================================================================
// Client
// =============================================================================

pub struct UpstoxClient {
    http: Client,
    base_url: String,
    token: String,
    throttle: Throttle,
    product: String,
    validity: String,
    tag: String,
}

impl UpstoxClient {
    /// Builds a client reading the access token from `config.token_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_env(config: &BrokerConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).unwrap_or_else(|_| {
            warn!(var = %config.token_env, "No access token in environment");
            String::new()
        });
        Self::new(config, token, ThrottleConfig::from(config))
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BrokerConfig, token: impl Into<String>, throttle: ThrottleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExecutionError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            throttle: Throttle::new(throttle),
            product: config.order_product.clone(),
            validity: config.order_validity.clone(),
            tag: config.order_tag.clone(),
        })
    }

    async fn fetch_ltp(&self, instrument_ids: &[String]) -> Result<HashMap<String, Decimal>> {
        let url = format!("{}{LTP_PATH}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .query(&[("instrument_key", instrument_ids.join(","))])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let body: LtpResponse = response.json().await.map_err(transport_error)?;
        if body.status != "success" {
            return Err(ExecutionError::api(status.as_u16(), format!("ltp status {}", body.status)));
        }

        let mut quotes = HashMap::with_capacity(body.data.len());
        for (key, entry) in body.data {
            if let Some(token) = &entry.instrument_token {
                quotes.insert(normalize_key(token), entry.last_price);
            }
            quotes.insert(normalize_key(&key), entry.last_price);
        }
        debug!(requested = instrument_ids.len(), received = quotes.len(), "Fetched LTP quotes");
        Ok(quotes)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let url = format!("{}{PLACE_ORDER_PATH}", self.base_url);
        let body = PlaceOrderBody {
            quantity: order.quantity,
            product: &self.product,
            validity: &self.validity,
            price: 0.0,
            tag: &self.tag,
            instrument_token: &order.instrument_id,
            order_type: "MARKET",
            transaction_type: order.side,
            disclosed_quantity: 0,
            trigger_price: 0.0,
            is_amo: false,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &text);
            error!(instrument = %order.instrument_id, tag = %order.tag, error = %err, "Order placement failed");
            return Err(err);
        }

        let parsed: PlaceOrderResponse = response.json().await.map_err(transport_error)?;
        if parsed.status != "success" {
            let message = parsed.message.unwrap_or_else(|| "Unknown API Error".to_string());
            return Ok(OrderResponse::failed(message));
        }

        let mut resp = OrderResponse::filled(None);
        if let Some(data) = parsed.data {
            info!(
                order_id = %data.order_id,
                side = %order.side,
                quantity = order.quantity,
                instrument = %order.instrument_id,
                tag = %order.tag,
                "LIVE order placed"
            );
            resp = resp.with_order_id(data.order_id);
        }
        Ok(resp)
    }
}

#[async_trait]
impl QuoteSource for UpstoxClient {
    async fn ltp(&self, instrument_ids: &[String]) -> Result<HashMap<String, Decimal>> {
        if instrument_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.throttle
            .run("ltp", || self.fetch_ltp(instrument_ids))
            .await
    }
}

#[async_trait]
impl OrderExecutor for UpstoxClient {
    async fn place(&self, order: &OrderRequest) -> Result<OrderResponse> {
        self.throttle
            .run("place_order", || self.submit_order(order))
            .await
    }

    fn name(&self) -> &str {
        "upstox"
    }
}

/// The broker sometimes answers with `EXCHANGE:SYMBOL` where requests used `EXCHANGE|SYMBOL`.
fn normalize_key(key: &str) -> String {
    key.replace(':', "|")
}

fn classify_failure(status: StatusCode, body: &str) -> ExecutionError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.errors.into_iter().next())
        .map(|d| d.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED => ExecutionError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ExecutionError::rate_limited(1),
        _ => ExecutionError::api(status.as_u16(), message),
    }
}

fn transport_error(err: reqwest::Error) -> ExecutionError {
    if err.is_timeout() {
        ExecutionError::Timeout(err.to_string())
    } else if err.is_connect() {
        ExecutionError::Network(format!("connection failed: {err}"))
    } else if err.is_decode() {
        ExecutionError::Serialization(err.to_string())
    } else {
        ExecutionError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_retries: u32) -> UpstoxClient {
        let config = BrokerConfig {
            base_url: server.uri(),
            ..BrokerConfig::default()
        };
        let throttle = ThrottleConfig {
            min_spacing: Duration::from_millis(1),
            max_retries,
            backoff_base: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        };
        UpstoxClient::new(&config, "test-token", throttle).unwrap()
    }

    #[tokio::test]
    async fn ltp_normalizes_colon_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LTP_PATH))
            .and(header("authorization", "Bearer test-token"))
            .and(query_param("instrument_key", "NSE_INDEX|Nifty 50,NSE_FO|43210"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "NSE_INDEX:Nifty 50": { "last_price": 21012.35, "instrument_token": "NSE_INDEX|Nifty 50" },
                    "NSE_FO:NIFTY26JAN21000PE": { "last_price": 118.5, "instrument_token": "NSE_FO|43210" }
                }
            })))
            .mount(&server)
            .await;

        let quotes = client(&server, 0)
            .ltp(&["NSE_INDEX|Nifty 50".to_string(), "NSE_FO|43210".to_string()])
            .await
            .unwrap();

        assert_eq!(quotes.get("NSE_INDEX|Nifty 50"), Some(&dec!(21012.35)));
        assert_eq!(quotes.get("NSE_FO|43210"), Some(&dec!(118.5)));
        assert_eq!(quotes.get("NSE_FO|NIFTY26JAN21000PE"), Some(&dec!(118.5)));
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LTP_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "status": "error",
                "errors": [{ "errorCode": "UDAPI100050", "message": "Invalid token used to access API" }]
            })))
            .mount(&server)
            .await;

        let err = client(&server, 3)
            .ltp(&["NSE_FO|1".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Invalid token"));
    }

    #[tokio::test]
    async fn throttled_quote_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LTP_PATH))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LTP_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": { "NSE_FO:1": { "last_price": 10.5 } }
            })))
            .mount(&server)
            .await;

        let quotes = client(&server, 5).ltp(&["NSE_FO|1".to_string()]).await.unwrap();
        assert_eq!(quotes.get("NSE_FO|1"), Some(&dec!(10.5)));
    }

    #[tokio::test]
    async fn throttled_past_retry_budget_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PLACE_ORDER_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, 2)
            .place(&OrderRequest::new("NSE_FO|1", 75, Side::Buy, "MONTHLY_ENTRY"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::RateLimited { attempts: 3 }));
    }

    #[tokio::test]
    async fn places_market_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PLACE_ORDER_PATH))
            .and(body_partial_json(json!({
                "quantity": 75,
                "instrument_token": "NSE_FO|43210",
                "transaction_type": "SELL",
                "order_type": "MARKET",
                "product": "D",
                "validity": "DAY",
                "tag": "algo"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": { "order_id": "240120000123" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(&server, 0)
            .place(&OrderRequest::new("NSE_FO|43210", 75, Side::Sell, "WEEKLY_ENTRY"))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.fill_price, None);
        assert_eq!(resp.order_id.as_deref(), Some("240120000123"));
    }

    #[tokio::test]
    async fn broker_rejection_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PLACE_ORDER_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "errors": [{ "errorCode": "UDAPI1026", "message": "Insufficient funds" }]
            })))
            .mount(&server)
            .await;

        let err = client(&server, 0)
            .place(&OrderRequest::new("NSE_FO|1", 75, Side::Buy, "MONTHLY_ENTRY"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Api { status_code: 400, .. }));
        assert!(err.to_string().contains("Insufficient funds"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn key_normalization() {
        assert_eq!(normalize_key("NSE_INDEX:Nifty 50"), "NSE_INDEX|Nifty 50");
        assert_eq!(normalize_key("NSE_FO|1"), "NSE_FO|1");
    }
}
