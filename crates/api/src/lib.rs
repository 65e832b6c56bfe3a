// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Karvico API Library
//!
//! The HTTP surface of the Karvico dashboard: session authentication,
//! module-gated resource routes, billing endpoints, and the Stripe
//! webhook.

pub mod ai;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
