use std::sync::Arc;

use busbridge_core::{BridgeResult, ExpectedVersion, Message, Stream, StreamName};

/// Append-only store of named event streams.
///
/// ## Semantics
///
/// - `create` fails with `StreamExistsAlready` if the name is taken
/// - `append_to` fails with `StreamNotFound` for unknown streams and with
///   `Concurrency` when `expected_version` doesn't match the stream length or
///   an event id is already present in the stream
/// - every write is all-or-nothing: either all events of the call land, or none
pub trait EventStore: Send + Sync {
    fn create(&self, stream: Stream) -> BridgeResult<()>;

    fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
        expected_version: ExpectedVersion,
    ) -> BridgeResult<()>;

    /// Load every event of a stream, in append order.
    fn load(&self, stream_name: &StreamName) -> BridgeResult<Vec<Message>>;

    fn has_stream(&self, stream_name: &StreamName) -> bool;
}

/// Store with an explicit transaction boundary.
///
/// Only one transaction may be open at a time; nesting is an error.
pub trait TransactionalEventStore: EventStore {
    fn begin_transaction(&self) -> BridgeResult<()>;

    fn commit(&self) -> BridgeResult<()>;

    fn rollback(&self) -> BridgeResult<()>;

    fn in_transaction(&self) -> bool;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn create(&self, stream: Stream) -> BridgeResult<()> {
        (**self).create(stream)
    }

    fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
        expected_version: ExpectedVersion,
    ) -> BridgeResult<()> {
        (**self).append_to(stream_name, events, expected_version)
    }

    fn load(&self, stream_name: &StreamName) -> BridgeResult<Vec<Message>> {
        (**self).load(stream_name)
    }

    fn has_stream(&self, stream_name: &StreamName) -> bool {
        (**self).has_stream(stream_name)
    }
}

impl<S> TransactionalEventStore for Arc<S>
where
    S: TransactionalEventStore + ?Sized,
{
    fn begin_transaction(&self) -> BridgeResult<()> {
        (**self).begin_transaction()
    }

    fn commit(&self) -> BridgeResult<()> {
        (**self).commit()
    }

    fn rollback(&self) -> BridgeResult<()> {
        (**self).rollback()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}
