use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{ApiCredentials, ExchangeClient, ExchangeError, OrderAck};
use crate::models::{AccountBalances, AssetBalance, Ticker, TradingPair};

// Coinbase Exchange REST API
// Docs: https://docs.cdp.coinbase.com/exchange/reference
const COINBASE_API_BASE: &str = "https://api.exchange.coinbase.com";
const COINBASE_SANDBOX_API_BASE: &str = "https://api-public.sandbox.exchange.coinbase.com";
const REQUESTS_PER_SECOND: u32 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 15;
const USER_AGENT: &str = concat!("meanrev-trader/", env!("CARGO_PKG_VERSION"));

type HmacSha256 = Hmac<Sha256>;

type CoinbaseRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Coinbase Exchange REST API
///
/// Public endpoints (ticker) work without credentials; balance and order
/// endpoints need them. Cloning shares the rate limiter.
#[derive(Clone)]
pub struct CoinbaseClient {
    client: Client,
    base_url: String,
    credentials: Option<Arc<ApiCredentials>>,
    rate_limiter: Arc<CoinbaseRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    ask: String,
    bid: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    currency: String,
    balance: String,
    available: String,
    hold: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct LimitOrderRequest<'a> {
    #[serde(rename = "type")]
    order_type: &'a str,
    side: &'a str,
    product_id: String,
    price: String,
    size: String,
    client_oid: String,
}

impl CoinbaseClient {
    /// Client against the production API
    pub fn new(credentials: Option<ApiCredentials>) -> Result<Self, ExchangeError> {
        Self::with_base_url(COINBASE_API_BASE, credentials)
    }

    /// Client against the public sandbox
    pub fn sandbox(credentials: Option<ApiCredentials>) -> Result<Self, ExchangeError> {
        Self::with_base_url(COINBASE_SANDBOX_API_BASE, credentials)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: Option<ApiCredentials>,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExchangeError::Unknown(format!("failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: credentials.map(Arc::new),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, signed: bool) -> Result<T, ExchangeError> {
        self.send(Method::GET, path, None, signed).await
    }

    /// Send one request; no retries at this layer
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);

        if signed {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                ExchangeError::Unknown(format!("{} {} requires API credentials", method, path))
            })?;
            let timestamp = Utc::now().timestamp().to_string();
            let signature = sign_request(
                credentials.expose_secret(),
                &timestamp,
                method.as_str(),
                path,
                body.as_deref().unwrap_or(""),
            )?;

            request = request
                .header("CB-ACCESS-KEY", credentials.api_key())
                .header("CB-ACCESS-SIGN", signature)
                .header("CB-ACCESS-TIMESTAMP", timestamp)
                .header("CB-ACCESS-PASSPHRASE", credentials.expose_passphrase());
        }

        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            ExchangeError::Unknown(format!("failed to decode response from {}: {}", path, e))
        })
    }

    async fn place_limit_order(
        &self,
        side: &str,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        let order = LimitOrderRequest {
            order_type: "limit",
            side,
            product_id: pair.product_id(),
            price: price.to_string(),
            size: format!("{:.8}", quantity),
            client_oid: uuid::Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_string(&order)
            .map_err(|e| ExchangeError::Unknown(format!("failed to encode order: {}", e)))?;

        let response: OrderResponse = self.send(Method::POST, "/orders", Some(body), true).await?;

        tracing::debug!(
            order_id = %response.id,
            client_oid = %order.client_oid,
            "Coinbase accepted {} order",
            side
        );

        Ok(OrderAck { id: response.id })
    }
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
    async fn fetch_ticker(&self, pair: &TradingPair) -> Result<Ticker, ExchangeError> {
        let path = format!("/products/{}/ticker", pair.product_id());
        let response: TickerResponse = self.get(&path, false).await?;

        Ok(Ticker {
            ask: parse_amount("ask", &response.ask)?,
            bid: parse_amount("bid", &response.bid)?,
        })
    }

    async fn fetch_balance(&self) -> Result<AccountBalances, ExchangeError> {
        let accounts: Vec<AccountResponse> = self.get("/accounts", true).await?;

        let mut balances = AccountBalances::new();
        for account in accounts {
            balances.insert(
                &account.currency,
                AssetBalance {
                    free: parse_amount("available", &account.available)?,
                    used: parse_amount("hold", &account.hold)?,
                    total: parse_amount("balance", &account.balance)?,
                },
            );
        }

        Ok(balances)
    }

    async fn create_limit_buy_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_limit_order("buy", pair, quantity, price).await
    }

    async fn create_limit_sell_order(
        &self,
        pair: &TradingPair,
        quantity: f64,
        price: f64,
    ) -> Result<OrderAck, ExchangeError> {
        self.place_limit_order("sell", pair, quantity, price).await
    }

    async fn cancel_order(&self, order_id: &str, pair: &TradingPair) -> Result<(), ExchangeError> {
        let path = format!("/orders/{}?product_id={}", order_id, pair.product_id());
        let _: serde_json::Value = self.send(Method::DELETE, &path, None, true).await?;
        Ok(())
    }
}

/// Compute `CB-ACCESS-SIGN`: base64(HMAC-SHA256(decoded secret, prehash))
///
/// The prehash is `timestamp + METHOD + request_path + body`, where the
/// request path includes any query string.
pub fn sign_request(
    secret_b64: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let key = BASE64
        .decode(secret_b64)
        .map_err(|_| ExchangeError::Unknown("API secret is not valid base64".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExchangeError::Unknown(format!("invalid HMAC key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn parse_amount(field: &str, raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::Unknown(format!("invalid {} value {:?}", field, raw)))
}

fn classify_transport_error(err: reqwest::Error) -> ExchangeError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ExchangeError::Network(err.to_string())
    } else {
        ExchangeError::Unknown(err.to_string())
    }
}

/// 429 and 5xx mean the venue is unavailable; other 4xx are rejections
fn classify_status(status: StatusCode, body: &str) -> ExchangeError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ExchangeError::Network(format!("HTTP {}: {}", status.as_u16(), message))
    } else if status.is_client_error() {
        ExchangeError::Exchange(message)
    } else {
        ExchangeError::Unknown(format!("HTTP {}: {}", status.as_u16(), message))
    }
}
