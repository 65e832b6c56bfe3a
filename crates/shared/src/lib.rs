// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Karvico shared types and database helpers
//!
//! Common vocabulary used by the billing and API crates: plan tiers,
//! product modules, subscription records, and Postgres pool construction.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{
    Module, Plan, Subscription, SubscriptionStatus, UnknownModule, UnknownPlan, UnknownStatus,
};
