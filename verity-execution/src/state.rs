//! The mutable shared state: order table, emitted-fill set and cursor.
//!
//! Both the command path and the reconciliation path read and write this
//! state, so it lives behind a single `tokio::sync::Mutex` owned by the
//! execution client; nothing in this module is reachable without holding it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use verity_broker::OrderAck;
use verity_core::{
    ClientOrderId, Fill, Order, OrderStatus, OrderStatusReport, TradeId, VenueOrderId,
};

/// Grow-only record of trade ids already surfaced to the event sink.
///
/// Never shrinks for the lifetime of the process; this is what turns the
/// venue's at-least-once fill listing into at-most-once emission.
#[derive(Debug, Default)]
pub struct EmittedFillSet {
    seen: HashSet<TradeId>,
}

impl EmittedFillSet {
    #[must_use]
    pub fn contains(&self, trade_id: &str) -> bool {
        self.seen.contains(trade_id)
    }

    /// Record a trade id, returning `true` when it was not seen before.
    pub fn record(&mut self, trade_id: TradeId) -> bool {
        self.seen.insert(trade_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Owned copy of the set, for callers that persist dedup state.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TradeId> {
        self.seen.iter().cloned().collect()
    }

    /// Seed the set from persisted state, e.g. after a restart.
    pub fn restore<I>(&mut self, trade_ids: I)
    where
        I: IntoIterator<Item = TradeId>,
    {
        self.seen.extend(trade_ids);
    }
}

/// Watermark bounding the fill-fetch window of each reconciliation pass.
///
/// Advanced only after a fully successful pass, and only forward.
#[derive(Debug, Default)]
pub struct ReconciliationCursor {
    last_reconciled_at: Option<DateTime<Utc>>,
}

impl ReconciliationCursor {
    #[must_use]
    pub fn last_reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.last_reconciled_at
    }

    /// Move the watermark forward. Regressions are ignored so the cursor is
    /// monotonically non-decreasing regardless of caller timing.
    pub fn advance(&mut self, to: DateTime<Utc>) {
        if self.last_reconciled_at.map_or(true, |current| to > current) {
            self.last_reconciled_at = Some(to);
        }
    }

    /// Start of the next fill-fetch window: the watermark pulled back by the
    /// overlap margin. `None` means the venue's full retained history.
    #[must_use]
    pub fn window_start(&self, overlap: Duration) -> Option<DateTime<Utc>> {
        self.last_reconciled_at.map(|at| at - overlap)
    }
}

/// Order table plus dedup set and cursor.
#[derive(Debug, Default)]
pub struct ExecutionState {
    orders: HashMap<ClientOrderId, Order>,
    venue_index: HashMap<VenueOrderId, ClientOrderId>,
    pub emitted_fills: EmittedFillSet,
    pub cursor: ReconciliationCursor,
}

impl ExecutionState {
    pub fn insert_order(&mut self, order: Order) {
        if let Some(venue_id) = &order.venue_order_id {
            self.venue_index
                .insert(venue_id.clone(), order.client_order_id.clone());
        }
        self.orders.insert(order.client_order_id.clone(), order);
    }

    #[must_use]
    pub fn order(&self, client_order_id: &str) -> Option<&Order> {
        self.orders.get(client_order_id)
    }

    #[must_use]
    pub fn order_by_venue_id(&self, venue_order_id: &str) -> Option<&Order> {
        self.venue_index
            .get(venue_order_id)
            .and_then(|client_id| self.orders.get(client_id))
    }

    /// Clones of all actively tracked (non-terminal) orders.
    #[must_use]
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    /// Apply the venue's submit acknowledgement: attach the venue order id
    /// and take the acknowledged status. Returns the updated order, which is
    /// retired when the venue rejected it.
    pub fn acknowledge(&mut self, client_order_id: &str, ack: &OrderAck) -> Option<Order> {
        let order = self.orders.get_mut(client_order_id)?;
        order.venue_order_id = Some(ack.venue_order_id.clone());
        order.updated_at = Utc::now();
        self.venue_index
            .insert(ack.venue_order_id.clone(), client_order_id.to_string());
        if order.status != ack.status && order.status.can_transition_to(ack.status) {
            order.status = ack.status;
        }
        let snapshot = order.clone();
        if snapshot.status.is_terminal() {
            self.retire(client_order_id);
        }
        Some(snapshot)
    }

    /// Mark the order behind a venue id as canceled and retire it.
    pub fn cancel_by_venue_id(&mut self, venue_order_id: &str) -> Option<Order> {
        let client_id = self.venue_index.get(venue_order_id)?.clone();
        let order = self.orders.get_mut(&client_id)?;
        if !order.status.can_transition_to(OrderStatus::Canceled) {
            warn!(
                venue_order_id,
                status = ?order.status,
                "cancel acknowledged for order not in a cancellable state",
            );
            return None;
        }
        order.status = OrderStatus::Canceled;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        self.retire(&client_id);
        Some(snapshot)
    }

    /// Sync the local table with a reconciliation finding. Orders the venue
    /// knows but we never tracked are left alone: the report itself is still
    /// emitted, only local bookkeeping is skipped.
    pub fn apply_status_report(&mut self, report: &OrderStatusReport) {
        let client_id = match self.resolve_client_id(report) {
            Some(id) => id,
            None => return,
        };
        let order = match self.orders.get_mut(&client_id) {
            Some(order) => order,
            None => return,
        };
        if order.venue_order_id.is_none() {
            order.venue_order_id = report.venue_order_id.clone();
        }
        order.filled_quantity = report.filled_quantity;
        order.updated_at = report.ts_event;
        if order.status != report.status {
            if order.status.can_transition_to(report.status) {
                order.status = report.status;
            } else {
                warn!(
                    client_order_id = %client_id,
                    local = ?order.status,
                    venue = ?report.status,
                    "ignoring out-of-order status finding",
                );
            }
        }
        let retired = order.status.is_terminal();
        if let Some(venue_id) = &report.venue_order_id {
            self.venue_index
                .entry(venue_id.clone())
                .or_insert_with(|| client_id.clone());
        }
        if retired {
            self.retire(&client_id);
        }
    }

    /// Fold a deduplicated fill into the owning order's quantities.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let client_id = match self.venue_index.get(&fill.venue_order_id) {
            Some(id) => id.clone(),
            None => return,
        };
        let order = match self.orders.get_mut(&client_id) {
            Some(order) => order,
            None => return,
        };
        order.filled_quantity = (order.filled_quantity + fill.quantity).min(order.quantity);
        order.updated_at = fill.occurred_at.max(order.updated_at);
        let next = if order.remaining_quantity().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if order.status != next && order.status.can_transition_to(next) {
            order.status = next;
        }
        if order.status.is_terminal() {
            self.retire(&client_id);
        }
    }

    /// Resolve venue-acknowledged orders missing from the venue's open-order
    /// snapshot: closed out-of-band by expiry, liquidation or another
    /// session. Fully filled orders become `Filled`, the rest `Canceled`;
    /// all are retired and returned for reporting. Orders touched at or
    /// after `as_of` are left alone, they may postdate the snapshot.
    pub fn resolve_missing_orders(
        &mut self,
        listed: &HashSet<VenueOrderId>,
        as_of: DateTime<Utc>,
    ) -> Vec<Order> {
        let missing: Vec<ClientOrderId> = self
            .orders
            .values()
            .filter(|order| order.updated_at < as_of)
            .filter(|order| {
                order
                    .venue_order_id
                    .as_ref()
                    .is_some_and(|venue_id| !listed.contains(venue_id))
            })
            .map(|order| order.client_order_id.clone())
            .collect();
        let mut resolved = Vec::with_capacity(missing.len());
        for client_id in missing {
            let order = match self.orders.get_mut(&client_id) {
                Some(order) => order,
                None => continue,
            };
            let next = if order.remaining_quantity().is_zero() {
                OrderStatus::Filled
            } else {
                OrderStatus::Canceled
            };
            if !order.status.can_transition_to(next) {
                warn!(
                    client_order_id = %client_id,
                    status = ?order.status,
                    "order vanished from venue in an unresolvable state",
                );
                continue;
            }
            order.status = next;
            order.updated_at = as_of;
            resolved.push(order.clone());
            self.retire(&client_id);
        }
        resolved
    }

    fn resolve_client_id(&self, report: &OrderStatusReport) -> Option<ClientOrderId> {
        if let Some(client_id) = &report.client_order_id {
            if self.orders.contains_key(client_id) {
                return Some(client_id.clone());
            }
        }
        report
            .venue_order_id
            .as_ref()
            .and_then(|venue_id| self.venue_index.get(venue_id))
            .cloned()
    }

    fn retire(&mut self, client_order_id: &str) {
        if let Some(order) = self.orders.remove(client_order_id) {
            if let Some(venue_id) = order.venue_order_id {
                self.venue_index.remove(&venue_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use verity_core::{Liquidity, OrderRequest, OrderType, Side};

    fn sample_order(client_id: &str) -> Order {
        Order::from_request(
            OrderRequest {
                instrument: "BTC-USD-PERP".into(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                quantity: Decimal::from(2),
                limit_price: Some(Decimal::from(40_000)),
                client_order_id: Some(client_id.into()),
            },
            Utc::now(),
        )
    }

    #[test]
    fn emitted_fill_set_records_each_trade_once() {
        let mut set = EmittedFillSet::default();
        assert!(set.record("T1".into()));
        assert!(!set.record("T1".into()));
        assert!(set.contains("T1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn emitted_fill_set_restore_seeds_dedup() {
        let mut set = EmittedFillSet::default();
        set.restore(vec!["T1".to_string(), "T2".to_string()]);
        assert!(!set.record("T2".into()));
        assert!(set.record("T3".into()));
    }

    #[test]
    fn cursor_never_regresses() {
        let mut cursor = ReconciliationCursor::default();
        let earlier = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap();
        cursor.advance(later);
        cursor.advance(earlier);
        assert_eq!(cursor.last_reconciled_at(), Some(later));
        assert_eq!(
            cursor.window_start(Duration::seconds(5)),
            Some(later - Duration::seconds(5)),
        );
    }

    #[test]
    fn acknowledge_attaches_venue_id_and_transitions() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::Submitted;
        state.insert_order(order);
        let updated = state
            .acknowledge(
                "C1",
                &OrderAck {
                    venue_order_id: "V1".into(),
                    status: OrderStatus::Accepted,
                },
            )
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Accepted);
        assert_eq!(state.order_by_venue_id("V1").unwrap().client_order_id, "C1");
    }

    #[test]
    fn rejected_ack_retires_the_order() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::Submitted;
        state.insert_order(order);
        let updated = state
            .acknowledge(
                "C1",
                &OrderAck {
                    venue_order_id: "V1".into(),
                    status: OrderStatus::Rejected,
                },
            )
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Rejected);
        assert!(state.order("C1").is_none());
        assert!(state.order_by_venue_id("V1").is_none());
    }

    #[test]
    fn fills_walk_the_order_to_filled_and_retire_it() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::Accepted;
        order.venue_order_id = Some("V1".into());
        state.insert_order(order);

        let fill = |trade_id: &str, qty: i64| Fill {
            trade_id: trade_id.into(),
            venue_order_id: "V1".into(),
            instrument: "BTC-USD-PERP".into(),
            side: Side::Buy,
            quantity: Decimal::from(qty),
            price: Decimal::from(40_000),
            fee: Decimal::ZERO,
            fee_currency: "USDC".into(),
            liquidity: Liquidity::Taker,
            occurred_at: Utc::now(),
        };

        state.apply_fill(&fill("T1", 1));
        assert_eq!(
            state.order("C1").unwrap().status,
            OrderStatus::PartiallyFilled
        );
        state.apply_fill(&fill("T2", 1));
        assert!(state.order("C1").is_none(), "filled orders are retired");
    }

    #[test]
    fn vanished_open_order_resolves_to_canceled() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::Accepted;
        order.venue_order_id = Some("V1".into());
        state.insert_order(order);

        let resolved =
            state.resolve_missing_orders(&HashSet::new(), Utc::now() + Duration::seconds(1));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].status, OrderStatus::Canceled);
        assert!(state.order("C1").is_none());
        assert!(state.order_by_venue_id("V1").is_none());
    }

    #[test]
    fn vanished_fully_filled_order_resolves_to_filled() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::PartiallyFilled;
        order.venue_order_id = Some("V1".into());
        order.filled_quantity = order.quantity;
        state.insert_order(order);

        let resolved =
            state.resolve_missing_orders(&HashSet::new(), Utc::now() + Duration::seconds(1));
        assert_eq!(resolved[0].status, OrderStatus::Filled);
        assert!(state.order("C1").is_none());
    }

    #[test]
    fn listed_and_unacknowledged_orders_are_not_resolved() {
        let mut state = ExecutionState::default();
        let mut listed_order = sample_order("C1");
        listed_order.status = OrderStatus::Accepted;
        listed_order.venue_order_id = Some("V1".into());
        state.insert_order(listed_order);
        // Submitted but never acknowledged: the venue may not know it yet.
        let mut pending = sample_order("C2");
        pending.status = OrderStatus::Submitted;
        state.insert_order(pending);

        let listed: HashSet<VenueOrderId> = ["V1".to_string()].into_iter().collect();
        let resolved = state.resolve_missing_orders(&listed, Utc::now() + Duration::seconds(1));
        assert!(resolved.is_empty());
        assert!(state.order("C1").is_some());
        assert!(state.order("C2").is_some());
    }

    #[test]
    fn orders_touched_after_the_snapshot_are_left_alone() {
        let mut state = ExecutionState::default();
        let mut order = sample_order("C1");
        order.status = OrderStatus::Accepted;
        order.venue_order_id = Some("V1".into());
        state.insert_order(order);

        // Snapshot taken before the order existed locally.
        let resolved =
            state.resolve_missing_orders(&HashSet::new(), Utc::now() - Duration::seconds(60));
        assert!(resolved.is_empty());
        assert!(state.order("C1").is_some());
    }

    #[test]
    fn status_report_for_unknown_order_is_ignored_locally() {
        let mut state = ExecutionState::default();
        state.apply_status_report(&OrderStatusReport {
            client_order_id: None,
            venue_order_id: Some("V9".into()),
            instrument: "BTC-USD-PERP".into(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            quantity: Decimal::ONE,
            filled_quantity: Decimal::ZERO,
            limit_price: None,
            status: OrderStatus::Accepted,
            ts_event: Utc::now(),
        });
        assert!(state.open_orders().is_empty());
    }
}
