//! `busbridge-infra`: the store side and the bridge plugins.
//!
//! - [`event_store`]: store traits, the in-memory store and its hook-emitting
//!   decorators
//! - [`bridge`]: causation enrichment, per-command transactions and event
//!   publication
//! - [`config`]: enricher configuration

pub mod bridge;
pub mod config;
pub mod event_store;


pub use bridge::{
    BusPlugin, CausationEnricher, EventPublisher, MetadataEnricher, StorePlugin, TransactionManager,
};
pub use config::CausationConfig;
