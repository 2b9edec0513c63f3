//! Unit tests for sessionguard modules
//!
//! Everything runs against in-process fakes and loopback listeners; no
//! device bridge tool or real automation server is needed.

mod helpers;
mod test_bridge;
mod test_classification;
mod test_cli;
mod test_config;
mod test_diagnostics;
mod test_strategy;
mod test_supervision;
