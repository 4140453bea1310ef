//! Tracing setup shared by the bridge crates and their tests.
//!
//! The library crates only emit `tracing` events; installing a subscriber is
//! left to the process embedding them.

pub mod logging;

pub use logging::{LogFormat, LoggingConfig, init, init_for_tests, init_with};
