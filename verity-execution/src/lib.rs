//! Execution state tracking and venue reconciliation.
//!
//! This crate owns the order table, the at-most-once fill emission machinery
//! and the execution client that ties order commands to the reconciliation
//! loop. It is venue-agnostic; concrete gateways live in `connectors/`.

mod client;
mod reconcile;
mod state;

pub use client::{CancelSummary, ClientConfig, ExecutionClient, PushEvent, SubmitSummary};
pub use reconcile::{ReconciliationEngine, ReconciliationOutcome};
pub use state::{EmittedFillSet, ExecutionState, ReconciliationCursor};
