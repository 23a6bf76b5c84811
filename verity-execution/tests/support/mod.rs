#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Notify;
use verity_broker::{
    EventPublisher, OrderAck, VenueError, VenueGateway, VenueInfo, VenueResult,
};
use verity_core::{
    ExecutionReport, Fill, Liquidity, Order, OrderRequest, OrderStatus, OrderType, Position,
    PositionSide, Side, VenueOrderId,
};

/// Gateway fake driven by per-call scripts. Each query pops the next scripted
/// result; an empty script answers with an empty listing.
#[derive(Default)]
pub struct FakeGateway {
    pub submit_script: Mutex<VecDeque<VenueResult<OrderAck>>>,
    pub open_orders_script: Mutex<VecDeque<VenueResult<Vec<Order>>>>,
    pub fills_script: Mutex<VecDeque<VenueResult<Vec<Fill>>>>,
    pub positions_script: Mutex<VecDeque<VenueResult<Vec<Position>>>>,
    pub failing_cancels: Mutex<HashSet<VenueOrderId>>,
    pub fill_windows: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub submit_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    /// When set, `open_orders` parks until notified, keeping a pass in flight.
    pub open_orders_gate: Mutex<Option<std::sync::Arc<Notify>>>,
}

impl FakeGateway {
    pub fn push_fills(&self, fills: Vec<Fill>) {
        self.fills_script.lock().unwrap().push_back(Ok(fills));
    }

    pub fn push_fill_error(&self, err: VenueError) {
        self.fills_script.lock().unwrap().push_back(Err(err));
    }

    pub fn push_submit(&self, result: VenueResult<OrderAck>) {
        self.submit_script.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl VenueGateway for FakeGateway {
    fn info(&self) -> VenueInfo {
        VenueInfo {
            name: "fake".into(),
            environment: "test".into(),
        }
    }

    async fn submit_order(&self, _request: &OrderRequest) -> VenueResult<OrderAck> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match self.submit_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(OrderAck {
                venue_order_id: format!("V{}", self.submit_calls.load(Ordering::SeqCst)),
                status: OrderStatus::Accepted,
            }),
        }
    }

    async fn cancel_order(&self, venue_order_id: &str) -> VenueResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_cancels.lock().unwrap().contains(venue_order_id) {
            Err(VenueError::Transport(format!(
                "cancel {venue_order_id} timed out"
            )))
        } else {
            Ok(())
        }
    }

    async fn cancel_all_orders(&self) -> VenueResult<u32> {
        Ok(0)
    }

    async fn open_orders(&self) -> VenueResult<Vec<Order>> {
        let gate = self.open_orders_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.open_orders_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fills_since(&self, start: Option<DateTime<Utc>>) -> VenueResult<Vec<Fill>> {
        self.fill_windows.lock().unwrap().push(start);
        self.fills_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn positions(&self) -> VenueResult<Vec<Position>> {
        self.positions_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Publisher fake recording every published report in order. Can be told to
/// fail the next N fill publishes to exercise abort paths.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(String, ExecutionReport)>>,
    pub failing_fill_publishes: AtomicUsize,
}

impl RecordingPublisher {
    pub fn fill_trade_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, report)| match report {
                ExecutionReport::Fill(fill) => Some(fill.trade_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn order_statuses(&self) -> Vec<OrderStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, report)| match report {
                ExecutionReport::Order(order) => Some(order.status),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, report: &ExecutionReport) -> VenueResult<()> {
        if matches!(report, ExecutionReport::Fill(_)) {
            let remaining = self.failing_fill_publishes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_fill_publishes
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(VenueError::Transport("event sink unavailable".into()));
            }
        }
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), report.clone()));
        Ok(())
    }
}

pub fn fill(trade_id: &str, venue_order_id: &str, quantity: i64) -> Fill {
    Fill {
        trade_id: trade_id.into(),
        venue_order_id: venue_order_id.into(),
        instrument: "BTC-USD-PERP".into(),
        side: Side::Buy,
        quantity: Decimal::from(quantity),
        price: Decimal::from(40_000),
        fee: Decimal::new(5, 2),
        fee_currency: "USDC".into(),
        liquidity: Liquidity::Taker,
        occurred_at: Utc::now(),
    }
}

pub fn limit_request(quantity: i64) -> OrderRequest {
    OrderRequest {
        instrument: "BTC-USD-PERP".into(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        quantity: Decimal::from(quantity),
        limit_price: Some(Decimal::from(40_000)),
        client_order_id: None,
    }
}

pub fn flat_position(instrument: &str) -> Position {
    Position {
        instrument: instrument.into(),
        side: PositionSide::Flat,
        quantity: Decimal::ZERO,
        average_entry_price: None,
        updated_at: Utc::now(),
    }
}
