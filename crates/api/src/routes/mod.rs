//! HTTP route handlers.

pub mod allocation;
pub mod health;
pub mod metrics;
