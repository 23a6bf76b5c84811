//! Periodic venue-state reconciliation.
//!
//! The venue's REST endpoints are the source of truth; push channels only
//! hint that a pass is worth running early. Each pass queries open orders,
//! fills and positions, emits normalized reports, and advances the cursor as
//! its single commit point. Any failure aborts the pass before the cursor
//! moves, so the next pass re-covers the same window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use verity_broker::{EventPublisher, VenueError, VenueGateway, VenueResult};
use verity_core::{
    ExecutionReport, FillReport, OrderStatusReport, PositionStatusReport, VenueOrderId,
};

use crate::state::ExecutionState;

/// Counters describing what one reconciliation pass did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconciliationOutcome {
    pub orders_reported: usize,
    pub fills_emitted: usize,
    pub fills_skipped: usize,
    pub positions_reported: usize,
}

/// Runs reconciliation passes against a gateway, one at a time.
pub struct ReconciliationEngine {
    gateway: Arc<dyn VenueGateway>,
    publisher: Arc<dyn EventPublisher>,
    state: Arc<Mutex<ExecutionState>>,
    client_id: String,
    overlap: Duration,
    // Serializes passes; held for the whole pass.
    pass_lock: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        gateway: Arc<dyn VenueGateway>,
        publisher: Arc<dyn EventPublisher>,
        state: Arc<Mutex<ExecutionState>>,
        client_id: String,
        overlap: Duration,
    ) -> Self {
        Self {
            gateway,
            publisher,
            state,
            client_id,
            overlap,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run a pass, waiting for any in-flight pass to finish first.
    pub async fn reconcile(&self) -> VenueResult<ReconciliationOutcome> {
        let _guard = self.pass_lock.lock().await;
        self.run_pass().await
    }

    /// Run a pass unless one is already in flight, in which case return
    /// `Ok(None)` immediately. Used by the periodic loop and push hints so
    /// they never queue up behind each other.
    pub async fn try_reconcile(&self) -> VenueResult<Option<ReconciliationOutcome>> {
        let guard = match self.pass_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("reconciliation pass already in flight, skipping");
                return Ok(None);
            }
        };
        let outcome = self.run_pass().await;
        drop(guard);
        outcome.map(Some)
    }

    async fn run_pass(&self) -> VenueResult<ReconciliationOutcome> {
        // Captured before any query so the next window re-covers anything
        // that trades while this pass is running.
        let started_at = Utc::now();
        let mut outcome = ReconciliationOutcome::default();

        let window_start = self.state.lock().await.cursor.window_start(self.overlap);

        let open_orders = self.gateway.open_orders().await?;
        let listed: HashSet<VenueOrderId> = open_orders
            .iter()
            .filter_map(|order| order.venue_order_id.clone())
            .collect();
        for order in &open_orders {
            let report = OrderStatusReport::from(order);
            self.state.lock().await.apply_status_report(&report);
            self.publish(ExecutionReport::Order(report)).await?;
            outcome.orders_reported += 1;
        }

        let fills = self.gateway.fills_since(window_start).await?;
        for fill in fills {
            // Emission and recording happen under one lock acquisition so a
            // concurrent reader never observes a half-applied fill. Publish
            // failures abort before the trade id is recorded, leaving the
            // fill eligible for the next pass.
            let mut state = self.state.lock().await;
            if state.emitted_fills.contains(&fill.trade_id) {
                outcome.fills_skipped += 1;
                continue;
            }
            let report = ExecutionReport::Fill(FillReport::from(fill.clone()));
            let topic = report.topic(&self.client_id);
            self.publisher.publish(&topic, &report).await?;
            state.emitted_fills.record(fill.trade_id.clone());
            state.apply_fill(&fill);
            outcome.fills_emitted += 1;
        }

        // Tracked orders the venue no longer lists were closed out-of-band.
        // Resolved after the fill step so an order filled this pass retires
        // through its fill rather than as a cancellation.
        let vanished = self
            .state
            .lock()
            .await
            .resolve_missing_orders(&listed, started_at);
        for order in &vanished {
            self.publish(ExecutionReport::Order(OrderStatusReport::from(order)))
                .await?;
            outcome.orders_reported += 1;
        }

        let positions = self.gateway.positions().await?;
        for position in positions {
            self.publish(ExecutionReport::Position(PositionStatusReport::from(
                position,
            )))
            .await?;
            outcome.positions_reported += 1;
        }

        // Sole commit point. Reached only when every query and publish above
        // succeeded, so a failed pass leaves the window untouched.
        self.state.lock().await.cursor.advance(started_at);
        debug!(
            orders = outcome.orders_reported,
            fills = outcome.fills_emitted,
            skipped = outcome.fills_skipped,
            positions = outcome.positions_reported,
            "reconciliation pass complete",
        );
        Ok(outcome)
    }

    async fn publish(&self, report: ExecutionReport) -> VenueResult<()> {
        let topic = report.topic(&self.client_id);
        self.publisher.publish(&topic, &report).await.map_err(|err| {
            warn!(%topic, %err, "failed to publish report");
            VenueError::Other(format!("publish failed on {topic}: {err}"))
        })
    }
}
