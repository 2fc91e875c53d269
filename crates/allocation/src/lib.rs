//! Allocation engine of the competition platform.
//!
//! Clears sealed-bid auctions over scarce targets (songs or half-finished
//! works), charges the winners and computes balanced, conflict-free
//! reviewer assignments for peer evaluation. Persistence is reached through
//! the repository ports in [`infra`].

pub mod config;
pub mod coordinator;
pub mod domain;
mod error;
pub mod infra;

pub use {
    config::Configuration,
    coordinator::RoundCoordinator,
    error::Error,
};
