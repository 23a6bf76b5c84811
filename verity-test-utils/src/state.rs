use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use verity_core::{Fill, Order, OrderStatus, Position};

use crate::scenario::ScenarioManager;

/// Shared in-memory venue state behind the mock REST API.
#[derive(Clone, Default)]
pub struct MockVenueState {
    inner: Arc<Mutex<Inner>>,
    scenarios: ScenarioManager,
}

#[derive(Default)]
struct Inner {
    orders: Vec<Order>,
    fills: Vec<Fill>,
    positions: Vec<Position>,
    canceled: Vec<String>,
    tokens_issued: u64,
    next_order_seq: u64,
}

impl MockVenueState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scenarios(&self) -> &ScenarioManager {
        &self.scenarios
    }

    /// Mint a fresh bearer token, counting issuances so tests can assert on
    /// cache behavior.
    pub async fn issue_token(&self) -> String {
        let mut inner = self.inner.lock().await;
        inner.tokens_issued += 1;
        format!("mock-token-{}", inner.tokens_issued)
    }

    pub async fn tokens_issued(&self) -> u64 {
        self.inner.lock().await.tokens_issued
    }

    pub async fn next_order_id(&self) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_order_seq += 1;
        format!("PDX-{}", inner.next_order_seq)
    }

    pub async fn register_order(&self, order: Order) {
        self.inner.lock().await.orders.push(order);
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.inner
            .lock()
            .await
            .orders
            .iter()
            .filter(|order| !order.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Cancel one order by venue id, erroring when it is unknown or already
    /// terminal.
    pub async fn cancel_order(&self, venue_order_id: &str) -> Result<Order> {
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .iter_mut()
            .find(|order| order.venue_order_id.as_deref() == Some(venue_order_id))
            .ok_or_else(|| anyhow!("unknown order {venue_order_id}"))?;
        if order.status.is_terminal() {
            return Err(anyhow!("order {venue_order_id} already closed"));
        }
        order.status = OrderStatus::Canceled;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        inner.canceled.push(venue_order_id.to_string());
        Ok(snapshot)
    }

    /// Cancel every open order, returning the canceled venue ids.
    pub async fn cancel_all(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let mut canceled = Vec::new();
        for order in &mut inner.orders {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Canceled;
                order.updated_at = Utc::now();
                if let Some(id) = &order.venue_order_id {
                    canceled.push(id.clone());
                }
            }
        }
        inner.canceled.extend(canceled.iter().cloned());
        canceled
    }

    pub async fn canceled_ids(&self) -> Vec<String> {
        self.inner.lock().await.canceled.clone()
    }

    pub async fn seed_fill(&self, fill: Fill) {
        self.inner.lock().await.fills.push(fill);
    }

    pub async fn fills_since(&self, start: Option<DateTime<Utc>>) -> Vec<Fill> {
        self.inner
            .lock()
            .await
            .fills
            .iter()
            .filter(|fill| start.map_or(true, |at| fill.occurred_at >= at))
            .cloned()
            .collect()
    }

    pub async fn seed_position(&self, position: Position) {
        self.inner.lock().await.positions.push(position);
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.inner.lock().await.positions.clone()
    }
}
