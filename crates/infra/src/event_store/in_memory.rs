use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use busbridge_core::{BridgeError, BridgeResult, ExpectedVersion, Message, Stream, StreamName};

use super::r#trait::{EventStore, TransactionalEventStore};

type Streams = HashMap<StreamName, Stream>;

#[derive(Debug, Default)]
struct State {
    streams: Streams,
    /// Streams as they were when the open transaction began.
    snapshot: Option<Streams>,
}

/// In-memory append-only event store with snapshot transactions.
///
/// Intended for tests/dev. Writes inside a transaction are applied directly;
/// `rollback` restores the snapshot taken at `begin_transaction`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: RwLock<State>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject ids repeated within `incoming` or already present in `existing`.
fn check_unique_ids(existing: &[Message], incoming: &[Message]) -> BridgeResult<()> {
    let mut seen: HashSet<&str> = existing.iter().map(|m| m.id().as_str()).collect();
    for (idx, event) in incoming.iter().enumerate() {
        if !seen.insert(event.id().as_str()) {
            return Err(BridgeError::concurrency(format!(
                "duplicate event id {} (index {idx})",
                event.id()
            )));
        }
    }
    Ok(())
}

impl EventStore for InMemoryEventStore {
    fn create(&self, stream: Stream) -> BridgeResult<()> {
        let mut state = self.write();
        if state.streams.contains_key(stream.name()) {
            return Err(BridgeError::StreamExistsAlready(stream.name().to_string()));
        }
        check_unique_ids(&[], stream.events())?;

        state.streams.insert(stream.name().clone(), stream);
        Ok(())
    }

    fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
        expected_version: ExpectedVersion,
    ) -> BridgeResult<()> {
        let mut state = self.write();
        let stream = state
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| BridgeError::StreamNotFound(stream_name.to_string()))?;

        expected_version.check(stream.events().len() as u64)?;
        check_unique_ids(stream.events(), &events)?;

        stream.extend_events(events);
        Ok(())
    }

    fn load(&self, stream_name: &StreamName) -> BridgeResult<Vec<Message>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .streams
            .get(stream_name)
            .map(|s| s.events().to_vec())
            .ok_or_else(|| BridgeError::StreamNotFound(stream_name.to_string()))
    }

    fn has_stream(&self, stream_name: &StreamName) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.streams.contains_key(stream_name)
    }
}

impl TransactionalEventStore for InMemoryEventStore {
    fn begin_transaction(&self) -> BridgeResult<()> {
        let mut state = self.write();
        if state.snapshot.is_some() {
            return Err(BridgeError::TransactionAlreadyStarted);
        }
        state.snapshot = Some(state.streams.clone());
        Ok(())
    }

    fn commit(&self) -> BridgeResult<()> {
        let mut state = self.write();
        state
            .snapshot
            .take()
            .map(|_| ())
            .ok_or(BridgeError::TransactionNotStarted)
    }

    fn rollback(&self) -> BridgeResult<()> {
        let mut state = self.write();
        let snapshot = state.snapshot.take().ok_or(BridgeError::TransactionNotStarted)?;
        state.streams = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.snapshot.is_some()
    }
}
