//! Order Lifecycle
//!
//! Resting orders move through the FSM in [`state`]. The manager never moves
//! balances itself: the fill that completes an order hands the filled
//! quantity to the settlement engine inside the same unit as the order update.

pub mod manager;
pub mod state;

#[cfg(test)]
mod integration_tests;

pub use manager::{FillOutcome, OrderManager, PlaceOrderRequest};
pub use state::OrderStatus;
