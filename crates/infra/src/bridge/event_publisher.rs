//! Publishes persisted events to an [`EventBus`].
//!
//! Outside a transaction, events are published as soon as the store's write
//! hook reports them durable. Inside one they are staged, one collection per
//! write, and flushed in write order once the commit hook has run; a rollback
//! discards them.
//!
//! Writes flagged by the store as failed (`streamExistsAlready`,
//! `streamNotFound`, `concurrencyException`) publish nothing and stage
//! nothing, whether or not a transaction is open.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, trace, warn};

use busbridge_core::{
    BridgeError, BridgeResult, DEFAULT_PRIORITY, Message, ObservableHost, listener,
};
use busbridge_events::EventBus;

use super::plugin::{ListenerRegistry, StorePlugin};
use crate::event_store::{
    EVENT_APPEND_TO, EVENT_COMMIT, EVENT_CREATE, EVENT_ROLLBACK, ObservableStore,
    PARAM_CONCURRENCY_EXCEPTION, PARAM_STREAM, PARAM_STREAM_EVENTS, PARAM_STREAM_EXISTS_ALREADY,
    PARAM_STREAM_NOT_FOUND,
};

/// Store-side priority: below the store's own write, so outcome markers are set.
pub const PUBLISH_PRIORITY: i32 = DEFAULT_PRIORITY;

struct PublisherInner<B> {
    bus: B,
    staged: Mutex<Vec<Vec<Message>>>,
}

impl<B> PublisherInner<B>
where
    B: EventBus<Message>,
    BridgeError: From<B::Error>,
{
    fn publish_all(&self, events: impl IntoIterator<Item = Message>) -> BridgeResult<()> {
        for event in events {
            let event_id = event.id().clone();
            if let Err(err) = self.bus.publish(event) {
                let err = BridgeError::from(err);
                warn!(%event_id, error = %err, "event publication failed");
                return Err(err);
            }
        }
        Ok(())
    }

    fn on_write(&self, events: &[Message], in_transaction: bool) -> BridgeResult<()> {
        if in_transaction {
            trace!(events = events.len(), "staging events until commit");
            self.staged.lock().unwrap_or_else(PoisonError::into_inner).push(events.to_vec());
            return Ok(());
        }
        trace!(events = events.len(), "publishing events");
        self.publish_all(events.iter().cloned())
    }

    fn take_staged(&self) -> Vec<Vec<Message>> {
        std::mem::take(&mut *self.staged.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn pending_count(&self) -> usize {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner).iter().map(Vec::len).sum()
    }
}

/// Forwards events from an observable store to an event bus.
pub struct EventPublisher<B> {
    inner: Arc<PublisherInner<B>>,
    listeners: ListenerRegistry,
}

impl<B> EventPublisher<B>
where
    B: EventBus<Message> + 'static,
    BridgeError: From<B::Error>,
{
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                bus,
                staged: Mutex::new(Vec::new()),
            }),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.inner.bus
    }

    /// Events staged inside the current transaction, not yet published.
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }
}

fn in_transaction<S>(store: &Weak<S>) -> bool
where
    S: ObservableStore + ?Sized,
{
    store
        .upgrade()
        .is_some_and(|store| store.transactions().is_some_and(|tx| tx.in_transaction()))
}

impl<B> StorePlugin for EventPublisher<B>
where
    B: EventBus<Message> + 'static,
    BridgeError: From<B::Error>,
{
    /// Commit and rollback listeners are only attached when the store reports
    /// a transaction capability.
    fn attach_to_store<S>(&self, store: &Arc<S>)
    where
        S: ObservableStore + ?Sized + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let weak = Arc::downgrade(store);
        self.listeners.record(store.attach(
            EVENT_APPEND_TO,
            listener(move |ctx| {
                if ctx.flag(PARAM_STREAM_NOT_FOUND) || ctx.flag(PARAM_CONCURRENCY_EXCEPTION) {
                    return Ok(());
                }
                let events = ctx.messages(PARAM_STREAM_EVENTS).unwrap_or_default();
                inner.on_write(events, in_transaction(&weak))
            }),
            PUBLISH_PRIORITY,
        ));

        let inner = Arc::clone(&self.inner);
        let weak = Arc::downgrade(store);
        self.listeners.record(store.attach(
            EVENT_CREATE,
            listener(move |ctx| {
                if ctx.flag(PARAM_STREAM_EXISTS_ALREADY) {
                    return Ok(());
                }
                let events = ctx.stream(PARAM_STREAM).map(|s| s.events()).unwrap_or_default();
                inner.on_write(events, in_transaction(&weak))
            }),
            PUBLISH_PRIORITY,
        ));

        if store.transactions().is_none() {
            debug!("event publisher attached to non-transactional store");
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.listeners.record(store.attach(
            EVENT_COMMIT,
            listener(move |_| {
                // Taken up front: the buffer is empty afterwards even if a publish fails.
                let staged = inner.take_staged();
                debug!(collections = staged.len(), "flushing staged events after commit");
                inner.publish_all(staged.into_iter().flatten())
            }),
            PUBLISH_PRIORITY,
        ));

        let inner = Arc::clone(&self.inner);
        self.listeners.record(store.attach(
            EVENT_ROLLBACK,
            listener(move |_| {
                let discarded: usize = inner.take_staged().iter().map(Vec::len).sum();
                debug!(discarded, "discarding staged events after rollback");
                Ok(())
            }),
            PUBLISH_PRIORITY,
        ));

        debug!("event publisher attached to transactional store");
    }

    fn detach_from_store<S>(&self, store: &S)
    where
        S: ObservableStore + ?Sized,
    {
        let removed = self.listeners.detach_all(store);
        debug!(removed, "event publisher detached from store");
    }
}

impl<B> core::fmt::Debug for EventPublisher<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let staged = self.inner.staged.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("EventPublisher")
            .field("staged_collections", &staged)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
