//! Common types and utilities for the multisim stack
//!
//! This crate provides the shared data model, configuration structures,
//! error taxonomy and logging bootstrap used by the multisim crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{ApnConfig, StackConfig, SubscriptionConfig, MAX_SUBSCRIPTIONS};
pub use error::{Error, Result};
pub use logging::{init_logging, LogLevel};
pub use types::{
    reason, ApnType, AppFamily, AppIndex, BearerId, RadioFamily, SessionState, SlotId, SubId,
    Subscription, SubscriptionStatus,
};
