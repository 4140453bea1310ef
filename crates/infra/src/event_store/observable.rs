//! Hook-emitting store decorators.
//!
//! Every write is turned into an emission. The wrapped store is called by a
//! built-in listener at [`ACTION_PRIORITY`]: listeners above it may rewrite
//! the input (enrichment), listeners below it observe the outcome
//! (publication). Expected store failures are recorded as markers on the
//! context instead of aborting the emission, so listeners below the action
//! still run and can see that nothing was written:
//!
//! | hook       | marker                          | error returned afterwards |
//! |------------|---------------------------------|---------------------------|
//! | `create`   | `streamExistsAlready`           | `StreamExistsAlready`     |
//! | `appendTo` | `streamNotFound`                | `StreamNotFound`          |
//! | `appendTo` | `concurrencyException`          | `Concurrency`             |
//!
//! A listener error above the action aborts the operation. Once the action
//! has run, a failing listener no longer stops the ones after it: the write
//! (or commit) already happened, so every observer below still sees it. The
//! first such error is returned from the call.

use std::sync::Arc;

use busbridge_core::{
    ACTION_PRIORITY, BridgeError, BridgeResult, ExpectedVersion, HookContext, HookEmitter,
    Listener, ListenerHandle, Message, ObservableHost, Stream, StreamName, listener,
};

use super::r#trait::{EventStore, TransactionalEventStore};

pub const EVENT_CREATE: &str = "create";
pub const EVENT_APPEND_TO: &str = "appendTo";
pub const EVENT_BEGIN_TRANSACTION: &str = "beginTransaction";
pub const EVENT_COMMIT: &str = "commit";
pub const EVENT_ROLLBACK: &str = "rollback";

pub const PARAM_STREAM: &str = "stream";
pub const PARAM_STREAM_NAME: &str = "streamName";
pub const PARAM_STREAM_EVENTS: &str = "streamEvents";
pub const PARAM_EXPECTED_VERSION: &str = "expectedVersion";
pub const PARAM_RESULT: &str = "result";
pub const PARAM_STREAM_EXISTS_ALREADY: &str = "streamExistsAlready";
pub const PARAM_STREAM_NOT_FOUND: &str = "streamNotFound";
pub const PARAM_CONCURRENCY_EXCEPTION: &str = "concurrencyException";

/// A store plugins can attach to.
pub trait ObservableStore: ObservableHost {
    /// Transaction capability; `None` for stores without transactions.
    fn transactions(&self) -> Option<&dyn TransactionalEventStore> {
        None
    }
}

/// Hook-emitting decorator around any [`EventStore`].
pub struct ObservableEventStore<S> {
    inner: Arc<S>,
    emitter: HookEmitter,
}

impl<S> ObservableEventStore<S>
where
    S: EventStore + 'static,
{
    pub fn new(inner: S) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<S>) -> Self {
        let emitter = HookEmitter::new();
        emitter.attach(EVENT_CREATE, create_action(Arc::clone(&inner)), ACTION_PRIORITY);
        emitter.attach(EVENT_APPEND_TO, append_action(Arc::clone(&inner)), ACTION_PRIORITY);
        Self { inner, emitter }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        self.emitter.listener_count(hook)
    }

    /// Once the built-in action succeeded, every listener below it runs.
    fn emit(&self, ctx: &mut HookContext) -> BridgeResult<()> {
        self.emitter.emit_settled(ctx, ACTION_PRIORITY)
    }
}

impl<S> EventStore for ObservableEventStore<S>
where
    S: EventStore + 'static,
{
    fn create(&self, stream: Stream) -> BridgeResult<()> {
        let stream_name = stream.name().clone();
        let mut ctx = HookContext::new(EVENT_CREATE).with_param(PARAM_STREAM, stream);
        self.emit(&mut ctx)?;

        if ctx.flag(PARAM_STREAM_EXISTS_ALREADY) {
            return Err(BridgeError::StreamExistsAlready(stream_name.to_string()));
        }
        Ok(())
    }

    fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
        expected_version: ExpectedVersion,
    ) -> BridgeResult<()> {
        let mut ctx = HookContext::new(EVENT_APPEND_TO)
            .with_param(PARAM_STREAM_NAME, stream_name.clone())
            .with_param(PARAM_STREAM_EVENTS, events)
            .with_param(PARAM_EXPECTED_VERSION, expected_version);
        self.emit(&mut ctx)?;

        if ctx.flag(PARAM_STREAM_NOT_FOUND) {
            return Err(BridgeError::StreamNotFound(stream_name.to_string()));
        }
        if ctx.flag(PARAM_CONCURRENCY_EXCEPTION) {
            let reason = ctx.text(PARAM_RESULT).unwrap_or("append rejected").to_string();
            return Err(BridgeError::Concurrency(reason));
        }
        Ok(())
    }

    fn load(&self, stream_name: &StreamName) -> BridgeResult<Vec<Message>> {
        self.inner.load(stream_name)
    }

    fn has_stream(&self, stream_name: &StreamName) -> bool {
        self.inner.has_stream(stream_name)
    }
}

impl<S> ObservableHost for ObservableEventStore<S>
where
    S: Send + Sync,
{
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle {
        self.emitter.attach(hook, listener, priority)
    }

    fn detach(&self, handle: &ListenerHandle) -> bool {
        self.emitter.detach(handle)
    }
}

impl<S> ObservableStore for ObservableEventStore<S> where S: Send + Sync {}

impl<S> core::fmt::Debug for ObservableEventStore<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObservableEventStore")
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}

/// [`ObservableEventStore`] over a transactional store.
///
/// `begin_transaction`, `commit` and `rollback` are emitted as hooks too, with
/// the wrapped store's operation as the built-in action.
pub struct TransactionalObservableEventStore<S> {
    base: ObservableEventStore<S>,
}

impl<S> TransactionalObservableEventStore<S>
where
    S: TransactionalEventStore + 'static,
{
    pub fn new(inner: S) -> Self {
        let base = ObservableEventStore::new(inner);
        let inner = Arc::clone(base.inner());

        let begin = Arc::clone(&inner);
        base.emitter.attach(
            EVENT_BEGIN_TRANSACTION,
            listener(move |_| begin.begin_transaction()),
            ACTION_PRIORITY,
        );
        let commit = Arc::clone(&inner);
        base.emitter
            .attach(EVENT_COMMIT, listener(move |_| commit.commit()), ACTION_PRIORITY);
        base.emitter
            .attach(EVENT_ROLLBACK, listener(move |_| inner.rollback()), ACTION_PRIORITY);

        Self { base }
    }

    pub fn inner(&self) -> &Arc<S> {
        self.base.inner()
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        self.base.listener_count(hook)
    }
}

impl<S> EventStore for TransactionalObservableEventStore<S>
where
    S: TransactionalEventStore + 'static,
{
    fn create(&self, stream: Stream) -> BridgeResult<()> {
        self.base.create(stream)
    }

    fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
        expected_version: ExpectedVersion,
    ) -> BridgeResult<()> {
        self.base.append_to(stream_name, events, expected_version)
    }

    fn load(&self, stream_name: &StreamName) -> BridgeResult<Vec<Message>> {
        self.base.load(stream_name)
    }

    fn has_stream(&self, stream_name: &StreamName) -> bool {
        self.base.has_stream(stream_name)
    }
}

impl<S> TransactionalEventStore for TransactionalObservableEventStore<S>
where
    S: TransactionalEventStore + 'static,
{
    fn begin_transaction(&self) -> BridgeResult<()> {
        self.base.emit(&mut HookContext::new(EVENT_BEGIN_TRANSACTION))
    }

    fn commit(&self) -> BridgeResult<()> {
        self.base.emit(&mut HookContext::new(EVENT_COMMIT))
    }

    fn rollback(&self) -> BridgeResult<()> {
        self.base.emit(&mut HookContext::new(EVENT_ROLLBACK))
    }

    fn in_transaction(&self) -> bool {
        self.base.inner().in_transaction()
    }
}

impl<S> ObservableHost for TransactionalObservableEventStore<S>
where
    S: Send + Sync,
{
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle {
        self.base.attach(hook, listener, priority)
    }

    fn detach(&self, handle: &ListenerHandle) -> bool {
        self.base.detach(handle)
    }
}

impl<S> ObservableStore for TransactionalObservableEventStore<S>
where
    S: TransactionalEventStore + 'static,
{
    fn transactions(&self) -> Option<&dyn TransactionalEventStore> {
        Some(self)
    }
}

impl<S> core::fmt::Debug for TransactionalObservableEventStore<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionalObservableEventStore")
            .field("emitter", &self.base.emitter)
            .finish_non_exhaustive()
    }
}

fn create_action<S: EventStore + 'static>(store: Arc<S>) -> Listener {
    listener(move |ctx| {
        let stream = ctx
            .stream(PARAM_STREAM)
            .cloned()
            .ok_or_else(|| BridgeError::hook("create context carries no stream"))?;

        match store.create(stream) {
            Ok(()) => ctx.set_param(PARAM_RESULT, true),
            Err(BridgeError::StreamExistsAlready(_)) => {
                ctx.set_param(PARAM_STREAM_EXISTS_ALREADY, true);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    })
}

fn append_action<S: EventStore + 'static>(store: Arc<S>) -> Listener {
    listener(move |ctx| {
        let stream_name = ctx
            .stream_name(PARAM_STREAM_NAME)
            .cloned()
            .ok_or_else(|| BridgeError::hook("appendTo context carries no stream name"))?;
        let events = ctx.messages(PARAM_STREAM_EVENTS).map(<[Message]>::to_vec).unwrap_or_default();
        let expected_version = ctx.version(PARAM_EXPECTED_VERSION).unwrap_or(ExpectedVersion::Any);

        match store.append_to(&stream_name, events, expected_version) {
            Ok(()) => ctx.set_param(PARAM_RESULT, true),
            Err(BridgeError::StreamNotFound(_)) => ctx.set_param(PARAM_STREAM_NOT_FOUND, true),
            Err(BridgeError::Concurrency(reason)) => {
                ctx.set_param(PARAM_CONCURRENCY_EXCEPTION, true);
                ctx.set_param(PARAM_RESULT, reason);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use busbridge_core::ParamValue;
    use serde_json::json;
    use std::sync::Mutex;

    fn name(s: &str) -> StreamName {
        StreamName::new(s).unwrap()
    }

    fn event(n: &str) -> Message {
        Message::event(n, json!({}))
    }

    fn capture(
        store: &impl ObservableHost,
        hook: &str,
        priority: i32,
    ) -> Arc<Mutex<Vec<HookContext>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        store.attach(
            hook,
            listener(move |ctx| {
                seen_clone.lock().unwrap().push(ctx.clone());
                Ok(())
            }),
            priority,
        );
        seen
    }

    #[test]
    fn rewrite_above_the_action_is_persisted() {
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        let replacement = event("Replaced");
        let replacement_clone = replacement.clone();
        store.attach(
            EVENT_APPEND_TO,
            listener(move |ctx| {
                ctx.set_param(PARAM_STREAM_EVENTS, vec![replacement_clone.clone()]);
                Ok(())
            }),
            ACTION_PRIORITY + 1,
        );

        store.create(Stream::new(name("orders"), vec![])).unwrap();
        store.append_to(&name("orders"), vec![event("Original")], ExpectedVersion::Any).unwrap();

        assert_eq!(store.load(&name("orders")).unwrap(), vec![replacement]);
    }

    #[test]
    fn create_on_existing_stream_sets_marker_then_errors() {
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        let seen = capture(&store, EVENT_CREATE, -1000);

        store.create(Stream::new(name("orders"), vec![])).unwrap();
        let err = store.create(Stream::new(name("orders"), vec![event("A")])).unwrap_err();

        assert_eq!(err, BridgeError::StreamExistsAlready("orders".to_string()));
        let seen = seen.lock().unwrap();
        assert!(seen[0].flag(PARAM_RESULT));
        assert!(seen[1].flag(PARAM_STREAM_EXISTS_ALREADY));
    }

    #[test]
    fn append_failures_set_markers() {
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        let seen = capture(&store, EVENT_APPEND_TO, -1000);

        let missing = store.append_to(&name("missing"), vec![event("A")], ExpectedVersion::Any);
        assert_eq!(missing, Err(BridgeError::StreamNotFound("missing".to_string())));

        store.create(Stream::new(name("orders"), vec![])).unwrap();
        let stale = store.append_to(&name("orders"), vec![event("A")], ExpectedVersion::Exact(3));
        assert!(matches!(stale, Err(BridgeError::Concurrency(_))));

        let seen = seen.lock().unwrap();
        assert!(seen[0].flag(PARAM_STREAM_NOT_FOUND));
        assert!(seen[1].flag(PARAM_CONCURRENCY_EXCEPTION));
        assert!(!seen[1].flag(PARAM_STREAM_NOT_FOUND));
    }

    #[test]
    fn only_the_transactional_store_advertises_transactions() {
        let plain = ObservableEventStore::new(InMemoryEventStore::new());
        let transactional = TransactionalObservableEventStore::new(InMemoryEventStore::new());

        assert!(plain.transactions().is_none());
        assert!(transactional.transactions().is_some());
    }

    #[test]
    fn transaction_hooks_wrap_the_inner_store() {
        let store = TransactionalObservableEventStore::new(InMemoryEventStore::new());
        let commits = capture(&store, EVENT_COMMIT, -1);
        let rollbacks = capture(&store, EVENT_ROLLBACK, -1);

        store.begin_transaction().unwrap();
        assert!(store.in_transaction());
        store.create(Stream::new(name("orders"), vec![event("A")])).unwrap();
        store.rollback().unwrap();
        assert!(!store.has_stream(&name("orders")));

        store.begin_transaction().unwrap();
        store.create(Stream::new(name("orders"), vec![event("A")])).unwrap();
        store.commit().unwrap();
        assert!(store.has_stream(&name("orders")));

        assert_eq!(commits.lock().unwrap().len(), 1);
        assert_eq!(rollbacks.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_commit_action_stops_the_emission() {
        let store = TransactionalObservableEventStore::new(InMemoryEventStore::new());
        let commits = capture(&store, EVENT_COMMIT, -1);

        assert_eq!(store.commit(), Err(BridgeError::TransactionNotStarted));
        assert!(commits.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_observer_does_not_hide_a_commit_from_later_listeners() {
        let store = TransactionalObservableEventStore::new(InMemoryEventStore::new());
        store.attach(
            EVENT_COMMIT,
            listener(|_| Err(BridgeError::hook("audit down"))),
            50,
        );
        let commits = capture(&store, EVENT_COMMIT, -1);

        store.begin_transaction().unwrap();
        store
            .create(Stream::new(name("orders"), vec![event("A")]))
            .unwrap();

        assert_eq!(store.commit(), Err(BridgeError::Hook("audit down".to_string())));
        assert!(!store.in_transaction());
        assert_eq!(commits.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejection_above_the_action_prevents_the_write() {
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        store.attach(
            EVENT_CREATE,
            listener(|_| Err(BridgeError::hook("rejected"))),
            ACTION_PRIORITY + 1,
        );

        assert!(store.create(Stream::new(name("orders"), vec![])).is_err());
        assert!(!store.has_stream(&name("orders")));
    }

    #[test]
    fn missing_stream_param_is_a_hook_error() {
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        store.attach(
            EVENT_CREATE,
            listener(|ctx| {
                ctx.set_param(PARAM_STREAM, ParamValue::Null);
                Ok(())
            }),
            ACTION_PRIORITY + 1,
        );

        let err = store.create(Stream::new(name("orders"), vec![])).unwrap_err();
        assert!(matches!(err, BridgeError::Hook(_)));
    }
}
