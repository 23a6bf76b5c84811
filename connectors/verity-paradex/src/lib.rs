//! Paradex REST connector.
//!
//! Implements the venue gateway over the v1 REST API: bearer tokens from
//! `POST /v1/auth`, signed with the account key, and typed wrappers over the
//! order, fill and position endpoints. Listings are parsed leniently; a
//! malformed item is logged and skipped rather than failing the whole query.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;
use verity_broker::{OrderAck, VenueError, VenueGateway, VenueInfo, VenueResult};
use verity_config::{ExecutionConfig, VenueEnvironment};
use verity_core::{
    Fill, Liquidity, Order, OrderRequest, OrderStatus, OrderType, Position, PositionSide, Side,
};

mod signer;

pub use signer::{Credentials, SignedHeaders, Signer, TokenCache};

/// Configuration for the Paradex REST gateway.
pub struct ParadexConfig {
    pub base_url: String,
    pub chain_id: String,
    pub environment: String,
    pub http_timeout: Duration,
    pub max_concurrent_requests: usize,
}

impl ParadexConfig {
    /// Derive a gateway config from the selected environment and the loaded
    /// execution tunables.
    #[must_use]
    pub fn for_environment(environment: VenueEnvironment, execution: &ExecutionConfig) -> Self {
        Self {
            base_url: environment.http_url().into(),
            chain_id: environment.chain_id().into(),
            environment: environment.as_str().into(),
            http_timeout: Duration::from_secs(execution.http_timeout_secs),
            max_concurrent_requests: execution.max_concurrent_requests,
        }
    }
}

impl Default for ParadexConfig {
    fn default() -> Self {
        Self::for_environment(VenueEnvironment::Testnet, &ExecutionConfig::default())
    }
}

/// A thin wrapper over the Paradex v1 REST API.
pub struct ParadexGateway {
    http: Client,
    config: ParadexConfig,
    signer: Signer,
    tokens: TokenCache,
    limiter: Arc<Semaphore>,
    info: VenueInfo,
}

impl ParadexGateway {
    pub fn new(config: ParadexConfig, credentials: Credentials) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.http_timeout)
            .build()
            .expect("failed to create reqwest client");
        Self {
            info: VenueInfo {
                name: "paradex".into(),
                environment: config.environment.clone(),
            },
            signer: Signer::new(credentials, config.chain_id.clone()),
            tokens: TokenCache::default(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            http,
            config,
        }
    }

    /// Convenience helper for the Paradex testnet.
    pub fn testnet(credentials: Credentials) -> Self {
        Self::new(ParadexConfig::default(), credentials)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    /// Exchange a signed request for a short-lived bearer token.
    async fn fetch_token(&self) -> VenueResult<String> {
        let headers = self.signer.sign("POST", "/v1/auth", "")?;
        let response = self
            .http
            .post(self.url("/v1/auth"))
            .header("PARADEX-ACCOUNT", &headers.account)
            .header("PARADEX-TIMESTAMP", headers.timestamp.to_string())
            .header("PARADEX-NONCE", headers.nonce.to_string())
            .header("PARADEX-SIGNATURE", &headers.signature)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(VenueError::Auth(format!(
                "token request failed with {status}: {}",
                error_message(&body)
            )));
        }
        let token: AuthResponse = serde_json::from_str(&body)
            .map_err(|err| VenueError::Parse(format!("malformed auth response: {err}")))?;
        Ok(token.jwt_token)
    }

    async fn bearer(&self) -> VenueResult<String> {
        self.tokens.token(|| self.fetch_token()).await
    }

    /// Issue one authenticated request and return the raw body on success.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(String, String)]>,
        body: Option<&Value>,
    ) -> VenueResult<String> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|err| VenueError::Other(format!("request limiter closed: {err}")))?;
        let token = self.bearer().await?;
        let url = match query {
            Some(pairs) if !pairs.is_empty() => {
                let encoded = serde_urlencoded::to_string(pairs)
                    .map_err(|err| VenueError::Other(format!("bad query string: {err}")))?;
                format!("{}?{encoded}", self.url(path))
            }
            _ => self.url(path),
        };
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;
        if status.is_success() {
            return Ok(text);
        }
        let message = error_message(&text);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.tokens.invalidate().await;
                Err(VenueError::Auth(format!("{status}: {message}")))
            }
            status if status.is_client_error() => {
                Err(VenueError::Rejected(format!("{status}: {message}")))
            }
            status => Err(VenueError::Transport(format!("{status}: {message}"))),
        }
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(String, String)]>,
        body: Option<&Value>,
    ) -> VenueResult<T>
    where
        T: DeserializeOwned,
    {
        let text = self.send(method, path, query, body).await?;
        serde_json::from_str(&text)
            .map_err(|err| VenueError::Parse(format!("malformed response from {path}: {err}")))
    }

    /// Parse every well-formed item in a listing, logging and skipping the
    /// rest so one bad row cannot hide the others.
    fn collect_items<T, U>(path: &str, envelope: ResultsEnvelope) -> Vec<U>
    where
        T: DeserializeOwned + TryInto<U, Error = String>,
    {
        let mut parsed = Vec::with_capacity(envelope.results.len());
        for item in envelope.results {
            let raw = item.to_string();
            let converted = serde_json::from_value::<T>(item)
                .map_err(|err| err.to_string())
                .and_then(TryInto::try_into);
            match converted {
                Ok(value) => parsed.push(value),
                Err(reason) => {
                    warn!(endpoint = path, %reason, payload = %raw, "skipping malformed item");
                }
            }
        }
        parsed
    }

    fn map_side(side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    fn map_order_type(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

#[async_trait]
impl VenueGateway for ParadexGateway {
    fn info(&self) -> VenueInfo {
        self.info.clone()
    }

    async fn submit_order(&self, request: &OrderRequest) -> VenueResult<OrderAck> {
        let mut payload = serde_json::json!({
            "market": request.instrument,
            "side": Self::map_side(request.side),
            "type": Self::map_order_type(request.order_type),
            "size": request.quantity.to_string(),
            "client_id": request.client_order_id,
        });
        if let Some(price) = request.limit_price {
            payload["price"] = Value::String(price.to_string());
        }
        let item: OrderItem = self
            .request(Method::POST, "/v1/orders", None, Some(&payload))
            .await?;
        let status = item.mapped_status();
        Ok(OrderAck {
            venue_order_id: item.id,
            status,
        })
    }

    async fn cancel_order(&self, venue_order_id: &str) -> VenueResult<()> {
        self.send(
            Method::DELETE,
            &format!("/v1/orders/{venue_order_id}"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> VenueResult<u32> {
        let text = self.send(Method::DELETE, "/v1/orders", None, None).await?;
        if text.trim().is_empty() {
            return Ok(0);
        }
        let envelope: ResultsEnvelope = serde_json::from_str(&text)
            .map_err(|err| VenueError::Parse(format!("malformed cancel-all response: {err}")))?;
        Ok(envelope.results.len() as u32)
    }

    async fn open_orders(&self) -> VenueResult<Vec<Order>> {
        let envelope = self
            .request::<ResultsEnvelope>(Method::GET, "/v1/orders", None, None)
            .await?;
        Ok(Self::collect_items::<OrderItem, Order>("/v1/orders", envelope))
    }

    async fn fills_since(&self, start: Option<DateTime<Utc>>) -> VenueResult<Vec<Fill>> {
        let query: Vec<(String, String)> = start
            .map(|at| vec![("start_at".to_string(), at.timestamp_millis().to_string())])
            .unwrap_or_default();
        let envelope = self
            .request::<ResultsEnvelope>(Method::GET, "/v1/fills", Some(&query), None)
            .await?;
        Ok(Self::collect_items::<FillItem, Fill>("/v1/fills", envelope))
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        let envelope = self
            .request::<ResultsEnvelope>(Method::GET, "/v1/positions", None, None)
            .await?;
        Ok(Self::collect_items::<PositionItem, Position>(
            "/v1/positions",
            envelope,
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> VenueError {
    VenueError::Transport(err.to_string())
}

/// Best-effort extraction of the venue's error message from a failed body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message.or(parsed.error))
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value).map_err(|err| format!("bad {field} {value:?}: {err}"))
}

fn millis_to_datetime(value: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(value).unwrap_or_else(Utc::now)
}

#[derive(Deserialize)]
struct AuthResponse {
    jwt_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ResultsEnvelope {
    results: Vec<Value>,
}

#[derive(Deserialize)]
struct OrderItem {
    id: String,
    #[serde(default)]
    client_id: String,
    market: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    size: String,
    remaining_size: String,
    #[serde(default)]
    price: Option<String>,
    status: String,
    #[serde(default)]
    cancel_reason: Option<String>,
    created_at: i64,
    last_updated_at: i64,
}

impl OrderItem {
    /// Map the venue's coarse states onto the local lifecycle using the
    /// remaining size to tell fills and cancels apart.
    fn mapped_status(&self) -> OrderStatus {
        let size = Decimal::from_str(&self.size).unwrap_or_default();
        let remaining = Decimal::from_str(&self.remaining_size).unwrap_or(size);
        match self.status.as_str() {
            "NEW" | "UNTRIGGERED" => OrderStatus::Accepted,
            "OPEN" => {
                if remaining < size {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Accepted
                }
            }
            "CLOSED" => {
                if self.cancel_reason.is_some() || !remaining.is_zero() {
                    OrderStatus::Canceled
                } else {
                    OrderStatus::Filled
                }
            }
            other => {
                warn!(status = other, "unhandled Paradex order status");
                OrderStatus::Accepted
            }
        }
    }
}

impl TryInto<Order> for OrderItem {
    type Error = String;

    fn try_into(self) -> Result<Order, String> {
        let status = self.mapped_status();
        let quantity = parse_decimal("size", &self.size)?;
        let remaining = parse_decimal("remaining_size", &self.remaining_size)?;
        let client_order_id = if self.client_id.is_empty() {
            // Order placed outside this client; track it by venue id.
            self.id.clone()
        } else {
            self.client_id
        };
        Ok(Order {
            client_order_id,
            venue_order_id: Some(self.id),
            instrument: self.market,
            side: parse_side(&self.side)?,
            order_type: parse_order_type(&self.order_type),
            quantity,
            limit_price: self
                .price
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| parse_decimal("price", value))
                .transpose()?,
            status,
            filled_quantity: (quantity - remaining).max(Decimal::ZERO),
            created_at: millis_to_datetime(self.created_at),
            updated_at: millis_to_datetime(self.last_updated_at),
        })
    }
}

#[derive(Deserialize)]
struct FillItem {
    id: String,
    order_id: String,
    market: String,
    side: String,
    size: String,
    price: String,
    #[serde(default)]
    fee: String,
    #[serde(default)]
    fee_currency: String,
    #[serde(default)]
    liquidity: String,
    created_at: i64,
}

impl TryInto<Fill> for FillItem {
    type Error = String;

    fn try_into(self) -> Result<Fill, String> {
        Ok(Fill {
            trade_id: self.id,
            venue_order_id: self.order_id,
            instrument: self.market,
            side: parse_side(&self.side)?,
            quantity: parse_decimal("size", &self.size)?,
            price: parse_decimal("price", &self.price)?,
            fee: if self.fee.is_empty() {
                Decimal::ZERO
            } else {
                parse_decimal("fee", &self.fee)?
            },
            fee_currency: self.fee_currency,
            liquidity: match self.liquidity.as_str() {
                "MAKER" => Liquidity::Maker,
                _ => Liquidity::Taker,
            },
            occurred_at: millis_to_datetime(self.created_at),
        })
    }
}

#[derive(Deserialize)]
struct PositionItem {
    market: String,
    side: String,
    size: String,
    #[serde(default)]
    average_entry_price: Option<String>,
    last_updated_at: i64,
}

impl TryInto<Position> for PositionItem {
    type Error = String;

    fn try_into(self) -> Result<Position, String> {
        let quantity = parse_decimal("size", &self.size)?;
        let side = if quantity.is_zero() {
            PositionSide::Flat
        } else {
            match self.side.as_str() {
                "LONG" => PositionSide::Long,
                "SHORT" => PositionSide::Short,
                other => return Err(format!("unknown position side {other:?}")),
            }
        };
        Ok(Position {
            instrument: self.market,
            side,
            quantity: quantity.abs(),
            average_entry_price: self
                .average_entry_price
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| parse_decimal("average_entry_price", value))
                .transpose()?,
            updated_at: millis_to_datetime(self.last_updated_at),
        })
    }
}

fn parse_side(value: &str) -> Result<Side, String> {
    match value {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(format!("unknown side {other:?}")),
    }
}

fn parse_order_type(value: &str) -> OrderType {
    match value {
        "MARKET" => OrderType::Market,
        "STOP_MARKET" => OrderType::StopMarket,
        _ => OrderType::Limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_item(status: &str, size: &str, remaining: &str) -> OrderItem {
        OrderItem {
            id: "V1".into(),
            client_id: "C1".into(),
            market: "BTC-USD-PERP".into(),
            side: "BUY".into(),
            order_type: "LIMIT".into(),
            size: size.into(),
            remaining_size: remaining.into(),
            price: Some("40000".into()),
            status: status.into(),
            cancel_reason: None,
            created_at: 1_758_000_000_000,
            last_updated_at: 1_758_000_000_000,
        }
    }

    #[test]
    fn open_order_with_remaining_below_size_is_partially_filled() {
        assert_eq!(
            order_item("OPEN", "2", "1").mapped_status(),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(
            order_item("OPEN", "2", "2").mapped_status(),
            OrderStatus::Accepted
        );
    }

    #[test]
    fn closed_order_splits_on_remaining_size() {
        assert_eq!(
            order_item("CLOSED", "2", "0").mapped_status(),
            OrderStatus::Filled
        );
        assert_eq!(
            order_item("CLOSED", "2", "1").mapped_status(),
            OrderStatus::Canceled
        );
    }

    #[test]
    fn order_item_converts_with_filled_quantity() {
        let order: Order = order_item("OPEN", "2", "0.5").try_into().unwrap();
        assert_eq!(order.filled_quantity, Decimal::from_str("1.5").unwrap());
        assert_eq!(order.venue_order_id.as_deref(), Some("V1"));
        assert_eq!(order.client_order_id, "C1");
    }

    #[test]
    fn malformed_size_is_a_conversion_error() {
        let result: Result<Order, String> = order_item("OPEN", "nope", "0").try_into();
        assert!(result.unwrap_err().contains("size"));
    }

    #[test]
    fn error_message_prefers_structured_body() {
        assert_eq!(
            error_message(r#"{"error":"VALIDATION","message":"size too small"}"#),
            "size too small"
        );
        assert_eq!(error_message("plain failure"), "plain failure");
    }
}
