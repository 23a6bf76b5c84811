//! Utilities for standing up a mock venue that exercises end-to-end flows.

pub mod rest;
pub mod scenario;
pub mod state;

pub use rest::MockRestApi;
pub use scenario::{Scenario, ScenarioAction, ScenarioManager, ScenarioTrigger};
pub use state::MockVenueState;
