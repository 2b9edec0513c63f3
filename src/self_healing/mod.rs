//! Self-Healing
//!
//! Failure classification and category-driven recovery:
//! - `ErrorClassifier`: failure → category via an ordered rule table
//! - `RecoveryStrategyRegistry`: category → recovery callback
//! - `ErrorHandler`: classify, recover with backoff, keep statistics

pub mod classifier;
pub mod handler;
pub mod registry;

pub use classifier::{ErrorCategory, ErrorClassifier, Matcher, Rule};
pub use handler::{ErrorHandler, ErrorRecord, ErrorStatistics, MAX_ERROR_HISTORY};
pub use registry::{RecoveryFn, RecoveryStrategyRegistry};
