use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hyper::body::{to_bytes, Bytes};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use verity_core::{Fill, Liquidity, Order, OrderStatus, OrderType, Position, PositionSide, Side};

use crate::scenario::{ScenarioAction, ScenarioTrigger};
use crate::state::MockVenueState;

/// Mock Paradex-shaped REST API bound to an ephemeral local port.
pub struct MockRestApi {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockRestApi {
    pub async fn spawn(state: MockVenueState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_svc = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                }))
            }
        });
        let server = Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock REST server exited with error");
            }
        });
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockRestApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, state: MockVenueState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let body_bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
        }
    };

    match (method, path.as_str()) {
        (Method::POST, "/v1/auth") => handle_auth(parts, state).await,
        (Method::POST, "/v1/orders") => handle_order_create(parts, body_bytes, state).await,
        (Method::DELETE, "/v1/orders") => handle_cancel_all(parts, state).await,
        (Method::GET, "/v1/orders") => handle_open_orders(parts, state).await,
        (Method::GET, "/v1/fills") => handle_fills(parts, state).await,
        (Method::GET, "/v1/positions") => handle_positions(parts, state).await,
        (Method::DELETE, path) if path.starts_with("/v1/orders/") => {
            let venue_order_id = path.trim_start_matches("/v1/orders/").to_string();
            handle_order_cancel(parts, venue_order_id, state).await
        }
        _ => error_response(StatusCode::NOT_FOUND, "endpoint not found"),
    }
}

async fn handle_auth(parts: http::request::Parts, state: MockVenueState) -> Response<Body> {
    for header in [
        "PARADEX-ACCOUNT",
        "PARADEX-TIMESTAMP",
        "PARADEX-NONCE",
        "PARADEX-SIGNATURE",
    ] {
        if parts.headers.get(header).is_none() {
            return error_response(
                StatusCode::UNAUTHORIZED,
                format!("missing {header} header"),
            );
        }
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::Auth).await {
        return resp;
    }
    let token = state.issue_token().await;
    json_response(StatusCode::OK, json!({ "jwt_token": token }))
}

async fn handle_order_create(
    parts: http::request::Parts,
    body: Bytes,
    state: MockVenueState,
) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::OrderCreate).await {
        return resp;
    }
    let payload: CreateOrderPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid payload: {err}"))
        }
    };
    let quantity = match Decimal::from_str(&payload.size) {
        Ok(quantity) if quantity > Decimal::ZERO => quantity,
        _ => return error_response(StatusCode::BAD_REQUEST, "size must be positive"),
    };
    let side = match payload.side.as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => {
            return error_response(StatusCode::BAD_REQUEST, format!("unsupported side {other}"))
        }
    };
    let order_type = match payload.order_type.as_str() {
        "MARKET" => OrderType::Market,
        "LIMIT" => OrderType::Limit,
        "STOP_MARKET" => OrderType::StopMarket,
        other => {
            return error_response(StatusCode::BAD_REQUEST, format!("unsupported type {other}"))
        }
    };
    let now = Utc::now();
    let order = Order {
        client_order_id: payload.client_id.unwrap_or_default(),
        venue_order_id: Some(state.next_order_id().await),
        instrument: payload.market,
        side,
        order_type,
        quantity,
        limit_price: payload
            .price
            .as_deref()
            .and_then(|value| Decimal::from_str(value).ok()),
        status: OrderStatus::Accepted,
        filled_quantity: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    };
    state.register_order(order.clone()).await;
    json_response(StatusCode::OK, order_json(&order))
}

async fn handle_order_cancel(
    parts: http::request::Parts,
    venue_order_id: String,
    state: MockVenueState,
) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::OrderCancel).await {
        return resp;
    }
    match state.cancel_order(&venue_order_id).await {
        Ok(_) => json_response(StatusCode::OK, json!({})),
        Err(err) => error_response(StatusCode::NOT_FOUND, err.to_string()),
    }
}

async fn handle_cancel_all(parts: http::request::Parts, state: MockVenueState) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::OrderCancel).await {
        return resp;
    }
    let canceled = state.cancel_all().await;
    json_response(StatusCode::OK, json!({ "results": canceled }))
}

async fn handle_open_orders(parts: http::request::Parts, state: MockVenueState) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::OrderList).await {
        return resp;
    }
    let results: Vec<Value> = state.open_orders().await.iter().map(order_json).collect();
    json_response(StatusCode::OK, json!({ "results": results }))
}

async fn handle_fills(parts: http::request::Parts, state: MockVenueState) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::FillList).await {
        return resp;
    }
    let params = parse_query(parts.uri.query());
    let start = params
        .get("start_at")
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    let results: Vec<Value> = state.fills_since(start).await.iter().map(fill_json).collect();
    json_response(StatusCode::OK, json!({ "results": results }))
}

async fn handle_positions(parts: http::request::Parts, state: MockVenueState) -> Response<Body> {
    if let Err(resp) = authenticate(&parts) {
        return resp;
    }
    if let Some(resp) = run_scenario(&state, ScenarioTrigger::PositionList).await {
        return resp;
    }
    let results: Vec<Value> = state.positions().await.iter().map(position_json).collect();
    json_response(StatusCode::OK, json!({ "results": results }))
}

async fn run_scenario(state: &MockVenueState, trigger: ScenarioTrigger) -> Option<Response<Body>> {
    match state.scenarios().take_for(trigger).await? {
        ScenarioAction::Delay(duration) => {
            sleep(duration).await;
            None
        }
        ScenarioAction::Fail { status, reason } => Some(error_response(status, reason)),
    }
}

fn authenticate(parts: &http::request::Parts) -> Result<(), Response<Body>> {
    let bearer = parts
        .headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match bearer {
        Some(token) if token.starts_with("mock-token-") => Ok(()),
        Some(_) => Err(error_response(StatusCode::UNAUTHORIZED, "unknown token")),
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing bearer token",
        )),
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .and_then(|raw| serde_urlencoded::from_str(raw).ok())
        .unwrap_or_default()
}

fn order_json(order: &Order) -> Value {
    let (status, cancel_reason) = match order.status {
        OrderStatus::Initiated | OrderStatus::Submitted => ("NEW", None),
        OrderStatus::Accepted | OrderStatus::PartiallyFilled => ("OPEN", None),
        OrderStatus::Filled => ("CLOSED", None),
        OrderStatus::Canceled => ("CLOSED", Some("USER_CANCELED")),
        OrderStatus::Rejected => ("CLOSED", Some("REJECTED")),
    };
    json!({
        "id": order.venue_order_id.clone().unwrap_or_default(),
        "client_id": order.client_order_id,
        "market": order.instrument,
        "side": side_label(order.side),
        "type": match order.order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
        },
        "size": order.quantity.normalize().to_string(),
        "remaining_size": order.remaining_quantity().normalize().to_string(),
        "price": order.limit_price.map(|price| price.normalize().to_string()),
        "status": status,
        "cancel_reason": cancel_reason,
        "created_at": order.created_at.timestamp_millis(),
        "last_updated_at": order.updated_at.timestamp_millis(),
    })
}

fn fill_json(fill: &Fill) -> Value {
    json!({
        "id": fill.trade_id,
        "order_id": fill.venue_order_id,
        "market": fill.instrument,
        "side": side_label(fill.side),
        "size": fill.quantity.normalize().to_string(),
        "price": fill.price.normalize().to_string(),
        "fee": fill.fee.normalize().to_string(),
        "fee_currency": fill.fee_currency,
        "liquidity": match fill.liquidity {
            Liquidity::Maker => "MAKER",
            Liquidity::Taker => "TAKER",
        },
        "created_at": fill.occurred_at.timestamp_millis(),
    })
}

fn position_json(position: &Position) -> Value {
    json!({
        "market": position.instrument,
        "side": match position.side {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
            PositionSide::Flat => "LONG",
        },
        "size": position.quantity.normalize().to_string(),
        "average_entry_price": position
            .average_entry_price
            .map(|price| price.normalize().to_string()),
        "last_updated_at": position.updated_at.timestamp_millis(),
    })
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let message = message.into();
    json_response(
        status,
        json!({ "error": status.to_string(), "message": message }),
    )
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[derive(Deserialize)]
struct CreateOrderPayload {
    market: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    size: String,
    price: Option<String>,
    client_id: Option<String>,
}
