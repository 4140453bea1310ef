//! The bridge between an observable event store and a command/event bus.
//!
//! Three independent plugins, each attached to one or both hosts:
//!
//! - [`CausationEnricher`] (store + bus): stamps events with the command
//!   being dispatched
//! - [`TransactionManager`] (bus): one store transaction per dispatch
//! - [`EventPublisher`] (store): forwards durable events to an event bus,
//!   holding them back until commit inside a transaction
//!
//! Priorities used on each hook, highest first:
//!
//! | host  | hook         | listener                       | priority |
//! |-------|--------------|--------------------------------|----------|
//! | store | create/append| causation enrichment           | 1000     |
//! | store | create/append| store's own write              | 100      |
//! | store | create/append| publication / staging          | 1        |
//! | store | commit       | store commit, then flush       | 100, 1   |
//! | bus   | dispatch     | record command, begin tx       | 1000     |
//! | bus   | dispatch     | handler invocation             | 0        |
//! | bus   | finalize     | clear command, commit/rollback | 1000     |

pub mod causation;
pub mod event_publisher;
pub mod plugin;
pub mod transaction_manager;

pub use causation::CausationEnricher;
pub use event_publisher::EventPublisher;
pub use plugin::{BusPlugin, ListenerRegistry, MetadataEnricher, StorePlugin};
pub use transaction_manager::TransactionManager;
