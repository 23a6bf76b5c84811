//! Fundamental data types shared across the entire workspace.
//!
//! Everything the venue reports about our account flows through the types in
//! this crate: locally tracked orders, immutable fills, venue-authoritative
//! positions, and the normalized reports handed to downstream consumers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Human-readable market identifier (e.g., `BTC-USD-PERP`).
pub type Instrument = String;

/// Client-generated order identifier, unique and immutable for the order's lifetime.
pub type ClientOrderId = String;
/// Venue-assigned order identifier, absent until the venue acknowledges the order.
pub type VenueOrderId = String;
/// Venue-assigned trade identifier, globally unique per account.
pub type TradeId = String;

/// Generate a fresh client order id.
#[must_use]
pub fn new_client_order_id() -> ClientOrderId {
    Uuid::new_v4().simple().to_string()
}

/// The side of an order or fill.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order execution style.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderType {
    /// Execute immediately at best available price.
    Market,
    /// Execute at the provided limit price.
    Limit,
    /// A conditional market order triggered by a price movement.
    StopMarket,
}

/// Which side of the book provided liquidity for a fill.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

/// Direction of net exposure for a position.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

/// Order lifecycle states.
///
/// `Filled`, `Canceled` and `Rejected` are terminal; once reached the order
/// is retired from active tracking.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderStatus {
    /// Created locally, nothing sent to the venue yet.
    Initiated,
    /// Submit call issued; venue has not acknowledged receipt.
    Submitted,
    /// Venue acknowledged the order.
    Accepted,
    /// Some quantity executed, some remains working.
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Whether the order has reached a state it can never leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-entering `PartiallyFilled` is allowed so successive partial fills
    /// can each refresh the tracked quantities.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Initiated, Submitted) => true,
            (Submitted, Accepted | Rejected | Canceled) => true,
            (Accepted, PartiallyFilled | Filled | Canceled) => true,
            (PartiallyFilled, PartiallyFilled | Filled | Canceled) => true,
            _ => false,
        }
    }
}

/// Desired order placement parameters, as supplied by the caller.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub limit_price: Option<Price>,
    /// Caller-supplied id; a fresh one is generated when absent.
    pub client_order_id: Option<ClientOrderId>,
}

/// Locally tracked order aggregating venue state.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Order {
    pub client_order_id: ClientOrderId,
    pub venue_order_id: Option<VenueOrderId>,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub limit_price: Option<Price>,
    pub status: OrderStatus,
    pub filled_quantity: Quantity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a freshly initiated order from a request, generating a client
    /// order id when the caller did not provide one.
    #[must_use]
    pub fn from_request(request: OrderRequest, now: DateTime<Utc>) -> Self {
        Self {
            client_order_id: request.client_order_id.unwrap_or_else(new_client_order_id),
            venue_order_id: None,
            instrument: request.instrument,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            status: OrderStatus::Initiated,
            filled_quantity: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quantity still working at the venue.
    #[must_use]
    pub fn remaining_quantity(&self) -> Quantity {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }
}

/// A trade execution against a submitted order. Immutable once observed.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Fill {
    pub trade_id: TradeId,
    pub venue_order_id: VenueOrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub fee: Price,
    pub fee_currency: String,
    pub liquidity: Liquidity,
    pub occurred_at: DateTime<Utc>,
}

/// Venue-authoritative net exposure for one instrument.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Position {
    pub instrument: Instrument,
    pub side: PositionSide,
    pub quantity: Quantity,
    pub average_entry_price: Option<Price>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of an order's state as the venue reports it.
///
/// Status reports are overwriting by nature: downstream consumers treat each
/// one as the latest snapshot, so re-emitting an unchanged report is safe.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderStatusReport {
    pub client_order_id: Option<ClientOrderId>,
    pub venue_order_id: Option<VenueOrderId>,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub limit_price: Option<Price>,
    pub status: OrderStatus,
    pub ts_event: DateTime<Utc>,
}

impl From<&Order> for OrderStatusReport {
    fn from(order: &Order) -> Self {
        Self {
            client_order_id: Some(order.client_order_id.clone()),
            venue_order_id: order.venue_order_id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity,
            limit_price: order.limit_price,
            status: order.status,
            ts_event: order.updated_at,
        }
    }
}

/// Normalized fill surfaced to downstream consumers at most once.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FillReport {
    pub trade_id: TradeId,
    pub venue_order_id: VenueOrderId,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub fee: Price,
    pub fee_currency: String,
    pub liquidity: Liquidity,
    pub occurred_at: DateTime<Utc>,
}

impl From<Fill> for FillReport {
    fn from(fill: Fill) -> Self {
        Self {
            trade_id: fill.trade_id,
            venue_order_id: fill.venue_order_id,
            instrument: fill.instrument,
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            fee: fill.fee,
            fee_currency: fill.fee_currency,
            liquidity: fill.liquidity,
            occurred_at: fill.occurred_at,
        }
    }
}

/// Snapshot of net exposure, re-emitted unconditionally on every pass.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PositionStatusReport {
    pub instrument: Instrument,
    pub side: PositionSide,
    pub quantity: Quantity,
    pub average_entry_price: Option<Price>,
    pub updated_at: DateTime<Utc>,
}

impl From<Position> for PositionStatusReport {
    fn from(position: Position) -> Self {
        Self {
            instrument: position.instrument,
            side: position.side,
            quantity: position.quantity,
            average_entry_price: position.average_entry_price,
            updated_at: position.updated_at,
        }
    }
}

/// The closed set of report kinds produced by reconciliation and command
/// handling, dispatched by exhaustive match rather than by topic string.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionReport {
    Order(OrderStatusReport),
    Fill(FillReport),
    Position(PositionStatusReport),
}

impl ExecutionReport {
    /// Topic this report is published under for the given client id.
    #[must_use]
    pub fn topic(&self, client_id: &str) -> String {
        match self {
            Self::Order(_) => format!("events.order.{client_id}"),
            Self::Fill(_) => format!("events.fill.{client_id}"),
            Self::Position(_) => format!("events.position.{client_id}"),
        }
    }
}
