//! Order command handling and lifecycle of the reconciliation loop.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use verity_broker::{EventPublisher, VenueError, VenueGateway, VenueResult};
use verity_config::ExecutionConfig;
use verity_core::{
    ClientOrderId, ExecutionReport, Order, OrderRequest, OrderStatus, OrderStatusReport, TradeId,
    VenueOrderId,
};

use crate::reconcile::{ReconciliationEngine, ReconciliationOutcome};
use crate::state::ExecutionState;

/// Client identity and reconciliation cadence.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Identifier embedded in every published topic.
    pub client_id: String,
    pub reconcile_interval: StdDuration,
    pub reconcile_overlap: Duration,
}

impl ClientConfig {
    /// Derive a client config from the loaded execution tunables.
    #[must_use]
    pub fn from_execution(client_id: impl Into<String>, execution: &ExecutionConfig) -> Self {
        Self {
            client_id: client_id.into(),
            reconcile_interval: StdDuration::from_secs(execution.reconcile_interval_secs),
            reconcile_overlap: Duration::seconds(execution.reconcile_overlap_secs as i64),
        }
    }
}

/// Result of a bulk cancel. Individual failures never abort the batch.
#[derive(Debug, Default)]
pub struct CancelSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<(VenueOrderId, VenueError)>,
}

impl CancelSummary {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Result of a bulk submit, with the same partial-failure semantics.
#[derive(Debug, Default)]
pub struct SubmitSummary {
    pub attempted: usize,
    pub succeeded: Vec<ClientOrderId>,
    pub failures: Vec<(ClientOrderId, VenueError)>,
}

impl SubmitSummary {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Events arriving over the venue's push channel. They carry no authoritative
/// state; each one only suggests running a reconciliation pass early.
#[derive(Clone, Debug)]
pub enum PushEvent {
    OrderUpdate { venue_order_id: VenueOrderId },
    Execution { trade_id: TradeId },
    Heartbeat,
}

/// The user-facing execution surface: order commands in, reports out.
pub struct ExecutionClient {
    gateway: Arc<dyn VenueGateway>,
    publisher: Arc<dyn EventPublisher>,
    state: Arc<Mutex<ExecutionState>>,
    engine: Arc<ReconciliationEngine>,
    config: ClientConfig,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionClient {
    pub fn new(
        gateway: Arc<dyn VenueGateway>,
        publisher: Arc<dyn EventPublisher>,
        config: ClientConfig,
    ) -> Self {
        let state = Arc::new(Mutex::new(ExecutionState::default()));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&publisher),
            Arc::clone(&state),
            config.client_id.clone(),
            config.reconcile_overlap,
        ));
        Self {
            gateway,
            publisher,
            state,
            engine,
            config,
            reconcile_task: Mutex::new(None),
        }
    }

    /// Shared handle to the reconciliation engine, e.g. for on-demand passes.
    #[must_use]
    pub fn engine(&self) -> Arc<ReconciliationEngine> {
        Arc::clone(&self.engine)
    }

    /// Run a forced reconciliation pass, then start the periodic loop.
    ///
    /// The forced pass establishes local state from the venue before any
    /// command is accepted; its failure fails the connect.
    pub async fn connect(&self) -> VenueResult<ReconciliationOutcome> {
        let info = self.gateway.info();
        info!(venue = %info.name, environment = %info.environment, "connecting execution client");
        let outcome = self.engine.reconcile().await?;

        let engine = Arc::clone(&self.engine);
        let interval = self.config.reconcile_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately and would double the connect pass.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.try_reconcile().await {
                    Ok(Some(_)) | Ok(None) => {}
                    Err(VenueError::Auth(reason)) => {
                        error!(%reason, "authentication failed, halting reconciliation loop");
                        break;
                    }
                    Err(err) => {
                        warn!(%err, "reconciliation pass failed, will retry next interval");
                    }
                }
            }
        });
        *self.reconcile_task.lock().await = Some(handle);
        Ok(outcome)
    }

    /// Stop the periodic reconciliation loop. Local state is kept so a later
    /// reconnect resumes with the same dedup set and cursor.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.reconcile_task.lock().await.take() {
            handle.abort();
            info!("execution client disconnected");
        }
    }

    /// Submit an order to the venue.
    ///
    /// The order is published as `Submitted` before the network call so
    /// downstream consumers see the attempt even if the process dies mid
    /// flight; reconciliation resolves the true outcome either way. The
    /// submit call is issued exactly once, never retried.
    pub async fn submit_order(&self, request: OrderRequest) -> VenueResult<ClientOrderId> {
        let mut order = Order::from_request(request, Utc::now());
        let client_order_id = order.client_order_id.clone();

        {
            let mut state = self.state.lock().await;
            if state.order(&client_order_id).is_some() {
                return Err(VenueError::Rejected(format!(
                    "duplicate client order id {client_order_id}"
                )));
            }
            order.status = OrderStatus::Submitted;
            state.insert_order(order.clone());
        }
        self.publish_order_report(&order).await?;

        let wire_request = OrderRequest {
            instrument: order.instrument.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            limit_price: order.limit_price,
            client_order_id: Some(client_order_id.clone()),
        };
        match self.gateway.submit_order(&wire_request).await {
            Ok(ack) => {
                let updated = self.state.lock().await.acknowledge(&client_order_id, &ack);
                if let Some(updated) = updated {
                    self.publish_order_report(&updated).await?;
                }
                Ok(client_order_id)
            }
            Err(err @ VenueError::Rejected(_)) => {
                let mut rejected = order.clone();
                rejected.status = OrderStatus::Rejected;
                rejected.updated_at = Utc::now();
                self.state
                    .lock()
                    .await
                    .apply_status_report(&OrderStatusReport::from(&rejected));
                self.publish_order_report(&rejected).await?;
                Err(err)
            }
            Err(err) => {
                // Outcome unknown. The order stays Submitted and the next
                // reconciliation pass resolves it from venue state.
                warn!(
                    client_order_id = %client_order_id,
                    %err,
                    "submit outcome unknown, leaving order submitted",
                );
                Err(err)
            }
        }
    }

    /// Submit a list of orders one at a time with per-item error isolation.
    /// A rejected or failed order never blocks the orders after it.
    pub async fn submit_order_list(&self, requests: Vec<OrderRequest>) -> SubmitSummary {
        let mut summary = SubmitSummary::default();
        for mut request in requests {
            summary.attempted += 1;
            let client_order_id = request
                .client_order_id
                .take()
                .unwrap_or_else(verity_core::new_client_order_id);
            request.client_order_id = Some(client_order_id.clone());
            match self.submit_order(request).await {
                Ok(client_order_id) => summary.succeeded.push(client_order_id),
                Err(err) => {
                    warn!(%client_order_id, %err, "submit failed, continuing batch");
                    summary.failures.push((client_order_id, err));
                }
            }
        }
        summary
    }

    /// Cancel a single order by venue id.
    pub async fn cancel_order(&self, venue_order_id: &str) -> VenueResult<()> {
        self.gateway.cancel_order(venue_order_id).await?;
        let canceled = self.state.lock().await.cancel_by_venue_id(venue_order_id);
        if let Some(order) = canceled {
            self.publish_order_report(&order).await?;
        }
        Ok(())
    }

    /// Cancel every locally tracked open order, one request per order so a
    /// single failure cannot abort the rest.
    pub async fn cancel_all_orders(&self) -> CancelSummary {
        let venue_ids: Vec<VenueOrderId> = self
            .state
            .lock()
            .await
            .open_orders()
            .into_iter()
            .filter_map(|order| order.venue_order_id)
            .collect();
        self.batch_cancel_orders(&venue_ids).await
    }

    /// Cancel the given orders with per-item error isolation.
    pub async fn batch_cancel_orders(&self, venue_order_ids: &[VenueOrderId]) -> CancelSummary {
        let mut summary = CancelSummary::default();
        for venue_order_id in venue_order_ids {
            summary.attempted += 1;
            match self.cancel_order(venue_order_id).await {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    warn!(%venue_order_id, %err, "cancel failed, continuing batch");
                    summary.failures.push((venue_order_id.clone(), err));
                }
            }
        }
        summary
    }

    /// The venue offers no in-place modification; callers cancel and resubmit.
    pub async fn modify_order(
        &self,
        venue_order_id: &str,
        _new_quantity: Option<verity_core::Quantity>,
        _new_price: Option<verity_core::Price>,
    ) -> VenueResult<()> {
        let _ = venue_order_id;
        Err(VenueError::Unsupported(
            "order modification is not supported, cancel and resubmit instead".into(),
        ))
    }

    /// React to a push event. Order and execution hints trigger an early
    /// pass; a pass already in flight covers the hint, so contention is a
    /// no-op rather than a queue.
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::OrderUpdate { venue_order_id } => {
                debug!(%venue_order_id, "push order update, hinting reconciliation");
            }
            PushEvent::Execution { trade_id } => {
                debug!(%trade_id, "push execution, hinting reconciliation");
            }
            PushEvent::Heartbeat => return,
        }
        if let Err(err) = self.engine.try_reconcile().await {
            warn!(%err, "hinted reconciliation pass failed");
        }
    }

    /// Drain a push-event channel until the sender side closes.
    pub async fn run_push_listener(&self, mut events: mpsc::UnboundedReceiver<PushEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_push(event).await;
        }
        debug!("push channel closed");
    }

    async fn publish_order_report(&self, order: &Order) -> VenueResult<()> {
        let report = ExecutionReport::Order(OrderStatusReport::from(order));
        let topic = report.topic(&self.config.client_id);
        self.publisher.publish(&topic, &report).await
    }
}
