//! This crate contains the code that provides observability for the
//! allocation services: initialization logic for logging and the global
//! metrics registry every component records into.
pub mod config;
pub mod metrics;
pub mod tracing;

pub use config::Config;
