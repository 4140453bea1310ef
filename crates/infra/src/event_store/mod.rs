//! Event store boundary.
//!
//! The bridge only ever sees a store through its hooks ([`ObservableStore`])
//! and, when available, its transaction boundary ([`TransactionalEventStore`]).
//! The in-memory store and the observable decorators here are reference
//! collaborators for tests and development.

pub mod in_memory;
pub mod observable;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use observable::{
    EVENT_APPEND_TO, EVENT_BEGIN_TRANSACTION, EVENT_COMMIT, EVENT_CREATE, EVENT_ROLLBACK,
    ObservableEventStore, ObservableStore, PARAM_CONCURRENCY_EXCEPTION, PARAM_EXPECTED_VERSION,
    PARAM_RESULT, PARAM_STREAM, PARAM_STREAM_EVENTS, PARAM_STREAM_EXISTS_ALREADY,
    PARAM_STREAM_NAME, PARAM_STREAM_NOT_FOUND, TransactionalObservableEventStore,
};
pub use r#trait::{EventStore, TransactionalEventStore};
