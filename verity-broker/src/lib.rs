//! Venue-agnostic traits used by the rest of the framework.
//!
//! The venue gateway is the transport seam: implementations own HTTP
//! mechanics and request signing, while the execution layer above only sees
//! typed queries and commands. The event publisher is the seam toward
//! downstream consumers of normalized reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use verity_core::{ExecutionReport, Fill, Order, OrderRequest, OrderStatus, Position, VenueOrderId};

mod channel;

pub use channel::{ChannelPublisher, PublishedReport};

/// Convenience alias for gateway results.
pub type VenueResult<T> = Result<T, VenueError>;

/// Common error type returned by venue gateways and the execution layer.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Signing or token acquisition failed. Fatal for the current operation;
    /// never retried silently.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Network-level failure, timeout or 5xx. Retryable for read-only
    /// queries, never retried automatically for mutating calls.
    #[error("transport error: {0}")]
    Transport(String),
    /// The venue rejected the request on business grounds (4xx).
    #[error("venue rejected request: {0}")]
    Rejected(String),
    /// The venue does not support the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Malformed venue response.
    #[error("parse error: {0}")]
    Parse(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl VenueError {
    /// Whether a read-only query hitting this error may be retried with
    /// backoff. Mutating calls are never retried regardless.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Metadata describing a connected venue.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VenueInfo {
    pub name: String,
    pub environment: String,
}

/// Venue acknowledgement of a submitted order.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderAck {
    pub venue_order_id: VenueOrderId,
    pub status: OrderStatus,
}

/// Transport seam toward the venue's REST API.
///
/// Query operations are idempotent; mutating operations are signed by the
/// implementation before they leave the process.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Return metadata about the venue for telemetry.
    fn info(&self) -> VenueInfo;

    /// Submit a new order. The implementation signs the request.
    async fn submit_order(&self, request: &OrderRequest) -> VenueResult<OrderAck>;

    /// Cancel a single order by venue id.
    async fn cancel_order(&self, venue_order_id: &str) -> VenueResult<()>;

    /// Ask the venue to cancel every open order in one call, returning the
    /// number of orders the venue reports as cancelled.
    async fn cancel_all_orders(&self) -> VenueResult<u32>;

    /// Fetch all currently open orders for the account.
    async fn open_orders(&self) -> VenueResult<Vec<Order>>;

    /// Fetch fills that occurred at or after `start`, or the venue's full
    /// retained history when `start` is `None`.
    async fn fills_since(&self, start: Option<DateTime<Utc>>) -> VenueResult<Vec<Fill>>;

    /// Fetch current net positions.
    async fn positions(&self) -> VenueResult<Vec<Position>>;
}

/// Seam toward downstream consumers of normalized reports.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a report under the given topic.
    async fn publish(&self, topic: &str, report: &ExecutionReport) -> VenueResult<()>;
}
