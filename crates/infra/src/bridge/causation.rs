//! Causation metadata: which command caused an event.
//!
//! The enricher remembers the message the bus is currently dispatching and,
//! while one is recorded, stamps every event written to the store with that
//! command's id and name before the store persists them.
//!
//! ## Single in-flight command
//!
//! The current command is a single slot, not a stack. A handler that
//! dispatches another command before returning overwrites it:
//!
//! ```text
//! dispatch(Outer)          slot = Outer   events → Outer
//!   dispatch(Inner)        slot = Inner   events → Inner
//!   finalize(Inner)        slot = None    events → (no causation)
//! finalize(Outer)          slot = None
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use busbridge_core::{BridgeResult, Message, ObservableHost, listener};
use busbridge_events::{EVENT_DISPATCH, EVENT_FINALIZE, PARAM_MESSAGE, PRIORITY_INVOKE_HANDLER};

use super::plugin::{BusPlugin, ListenerRegistry, MetadataEnricher, StorePlugin};
use crate::config::CausationConfig;
use crate::event_store::{
    EVENT_APPEND_TO, EVENT_CREATE, ObservableStore, PARAM_STREAM, PARAM_STREAM_EVENTS,
};

/// Store-side priority: above the store's own write and above publication.
pub const ENRICH_PRIORITY: i32 = 1000;
/// Bus-side priority for recording the command: before handler invocation.
pub const RECORD_COMMAND_PRIORITY: i32 = PRIORITY_INVOKE_HANDLER + 1000;
/// Bus-side priority for forgetting the command at finalize. The bus runs
/// every finalize listener, so a failing commit beside it can't skip the clear.
pub const CLEAR_COMMAND_PRIORITY: i32 = 1000;

#[derive(Debug)]
struct EnricherState {
    causation_id_key: String,
    causation_name_key: String,
    current_command: Mutex<Option<Message>>,
}

impl EnricherState {
    fn current(&self) -> Option<Message> {
        self.current_command.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_current(&self, command: Option<Message>) {
        *self.current_command.lock().unwrap_or_else(PoisonError::into_inner) = command;
    }

    fn stamp(&self, command: Option<&Message>, event: Message) -> Message {
        let id = command.map_or(JsonValue::Null, |c| JsonValue::String(c.id().to_string()));
        let name = command.map_or(JsonValue::Null, |c| JsonValue::String(c.name().to_string()));
        event
            .with_added_metadata(self.causation_id_key.as_str(), id)
            .with_added_metadata(self.causation_name_key.as_str(), name)
    }
}

/// Stamps persisted events with the command being dispatched.
#[derive(Debug)]
pub struct CausationEnricher {
    state: Arc<EnricherState>,
    store_listeners: ListenerRegistry,
    bus_listeners: ListenerRegistry,
}

impl CausationEnricher {
    /// Fails with `InvalidConfiguration` if either key is empty.
    pub fn new(
        causation_id_key: impl Into<String>,
        causation_name_key: impl Into<String>,
    ) -> BridgeResult<Self> {
        let config = CausationConfig {
            causation_id_key: causation_id_key.into(),
            causation_name_key: causation_name_key.into(),
        };
        Self::from_config(&config)
    }

    pub fn from_config(config: &CausationConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self::with_keys(
            config.causation_id_key.clone(),
            config.causation_name_key.clone(),
        ))
    }

    fn with_keys(causation_id_key: String, causation_name_key: String) -> Self {
        Self {
            state: Arc::new(EnricherState {
                causation_id_key,
                causation_name_key,
                current_command: Mutex::new(None),
            }),
            store_listeners: ListenerRegistry::new(),
            bus_listeners: ListenerRegistry::new(),
        }
    }

    /// The command currently being dispatched, if any.
    pub fn current_command(&self) -> Option<Message> {
        self.state.current()
    }

    pub fn causation_id_key(&self) -> &str {
        &self.state.causation_id_key
    }

    pub fn causation_name_key(&self) -> &str {
        &self.state.causation_name_key
    }
}

impl Default for CausationEnricher {
    fn default() -> Self {
        let config = CausationConfig::default();
        Self::with_keys(config.causation_id_key, config.causation_name_key)
    }
}

impl MetadataEnricher for CausationEnricher {
    /// Stamp `message` with the current command.
    ///
    /// With no command recorded both keys are set to `null`; the store hooks
    /// never get here in that case, they leave events untouched instead.
    fn enrich(&self, message: Message) -> Message {
        let command = self.state.current();
        self.state.stamp(command.as_ref(), message)
    }
}

impl StorePlugin for CausationEnricher {
    fn attach_to_store<S>(&self, store: &Arc<S>)
    where
        S: ObservableStore + ?Sized + 'static,
    {
        let state = Arc::clone(&self.state);
        self.store_listeners.record(store.attach(
            EVENT_APPEND_TO,
            listener(move |ctx| {
                let Some(command) = state.current() else {
                    return Ok(());
                };
                let Some(events) = ctx.messages(PARAM_STREAM_EVENTS) else {
                    return Ok(());
                };
                let enriched: Vec<Message> = events
                    .iter()
                    .map(|e| state.stamp(Some(&command), e.clone()))
                    .collect();
                trace!(
                    command_id = %command.id(),
                    events = enriched.len(),
                    "enriched appended events"
                );
                ctx.set_param(PARAM_STREAM_EVENTS, enriched);
                Ok(())
            }),
            ENRICH_PRIORITY,
        ));

        let state = Arc::clone(&self.state);
        self.store_listeners.record(store.attach(
            EVENT_CREATE,
            listener(move |ctx| {
                let Some(command) = state.current() else {
                    return Ok(());
                };
                let Some(stream) = ctx.stream(PARAM_STREAM).cloned() else {
                    return Ok(());
                };
                let enriched: Vec<Message> = stream
                    .events()
                    .iter()
                    .map(|e| state.stamp(Some(&command), e.clone()))
                    .collect();
                trace!(
                    command_id = %command.id(),
                    stream = %stream.name(),
                    events = enriched.len(),
                    "enriched created stream"
                );
                ctx.set_param(PARAM_STREAM, stream.with_events(enriched));
                Ok(())
            }),
            ENRICH_PRIORITY,
        ));

        debug!(listeners = self.store_listeners.len(), "causation enricher attached to store");
    }

    fn detach_from_store<S>(&self, store: &S)
    where
        S: ObservableStore + ?Sized,
    {
        let removed = self.store_listeners.detach_all(store);
        debug!(removed, "causation enricher detached from store");
    }
}

impl BusPlugin for CausationEnricher {
    fn attach_to_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized,
    {
        let state = Arc::clone(&self.state);
        self.bus_listeners.record(bus.attach(
            EVENT_DISPATCH,
            listener(move |ctx| {
                let command = ctx.message(PARAM_MESSAGE).cloned();
                match &command {
                    Some(c) => debug!(
                        command_id = %c.id(),
                        command_name = c.name(),
                        "recording current command"
                    ),
                    None => debug!("dispatch carries no message; current command cleared"),
                }
                state.set_current(command);
                Ok(())
            }),
            RECORD_COMMAND_PRIORITY,
        ));

        let state = Arc::clone(&self.state);
        self.bus_listeners.record(bus.attach(
            EVENT_FINALIZE,
            listener(move |_| {
                state.set_current(None);
                Ok(())
            }),
            CLEAR_COMMAND_PRIORITY,
        ));
    }

    fn detach_from_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized,
    {
        let removed = self.bus_listeners.detach_all(bus);
        debug!(removed, "causation enricher detached from bus");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busbridge_core::{BridgeError, ExpectedVersion, HookContext, ParamValue, Stream, StreamName};
    use busbridge_events::CommandBus;
    use serde_json::json;

    use crate::event_store::{EventStore, InMemoryEventStore, ObservableEventStore};

    type Store = ObservableEventStore<InMemoryEventStore>;

    fn orders() -> StreamName {
        StreamName::new("something").unwrap()
    }

    fn setup(enricher: &CausationEnricher) -> (Arc<Store>, Arc<CommandBus>) {
        let store = Arc::new(ObservableEventStore::new(InMemoryEventStore::new()));
        let bus = Arc::new(CommandBus::new());
        enricher.attach_to_store(&store);
        enricher.attach_to_bus(bus.as_ref());
        (store, bus)
    }

    fn route_create(bus: &CommandBus, store: &Arc<Store>) {
        let store = Arc::clone(store);
        bus.route("DoSomething", move |cmd| {
            let event = Message::event("SomethingDone", json!({"name": cmd.payload()["name"]}));
            store.create(Stream::new(orders(), vec![event]))
        });
    }

    fn route_append(bus: &CommandBus, store: &Arc<Store>) {
        let store = Arc::clone(store);
        bus.route("DoSomething", move |cmd| {
            let event = Message::event("SomethingDone", json!({"name": cmd.payload()["name"]}));
            store.append_to(&orders(), vec![event], ExpectedVersion::Any)
        });
    }

    fn first_event(store: &Store) -> Message {
        store.load(&orders()).unwrap().remove(0)
    }

    /// Null the message above the enricher, restore it below, so only the
    /// enricher sees an empty dispatch.
    fn hide_message_from_enricher(bus: &CommandBus, command: &Message) {
        bus.attach(
            EVENT_DISPATCH,
            listener(|ctx| {
                ctx.set_param(PARAM_MESSAGE, ParamValue::Null);
                Ok(())
            }),
            PRIORITY_INVOKE_HANDLER + 2000,
        );
        let command = command.clone();
        bus.attach(
            EVENT_DISPATCH,
            listener(move |ctx| {
                ctx.set_param(PARAM_MESSAGE, command.clone());
                Ok(())
            }),
            PRIORITY_INVOKE_HANDLER + 500,
        );
    }

    #[test]
    fn enriches_events_on_create_stream() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        let command = Message::command("DoSomething", json!({"name": "Alex"}));
        bus.dispatch(command.clone()).unwrap();

        let event = first_event(&store);
        assert_eq!(event.metadata_value("_causation_id"), Some(&json!(command.id().to_string())));
        assert_eq!(event.metadata_value("_causation_name"), Some(&json!("DoSomething")));
        assert_eq!(event.payload(), &json!({"name": "Alex"}));
    }

    #[test]
    fn enriches_events_on_append_to_stream() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        store.create(Stream::new(orders(), vec![])).unwrap();
        route_append(&bus, &store);

        let command = Message::command("DoSomething", json!({"name": "John"}));
        bus.dispatch(command.clone()).unwrap();

        let event = first_event(&store);
        assert_eq!(event.metadata_value("_causation_id"), Some(&json!(command.id().to_string())));
        assert_eq!(event.metadata_value("_causation_name"), Some(&json!("DoSomething")));
    }

    #[test]
    fn lower_priority_listeners_observe_enriched_events() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        store.attach(
            EVENT_CREATE,
            listener(move |ctx: &mut HookContext| {
                *seen_clone.lock().unwrap() =
                    ctx.stream(PARAM_STREAM).map(|s| s.events()[0].clone());
                Ok(())
            }),
            -1000,
        );

        bus.dispatch(Message::command("DoSomething", json!({"name": "Alex"}))).unwrap();

        let observed = seen.lock().unwrap().clone().unwrap();
        assert!(observed.metadata_value("_causation_id").is_some());
    }

    #[test]
    fn skips_create_when_dispatch_carries_no_command() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        let command = Message::command("DoSomething", json!({"name": "Alex"}));
        hide_message_from_enricher(&bus, &command);
        bus.dispatch(command).unwrap();

        let event = first_event(&store);
        assert!(event.metadata_value("_causation_id").is_none());
        assert!(event.metadata_value("_causation_name").is_none());
    }

    #[test]
    fn skips_append_when_dispatch_carries_no_command() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        store.create(Stream::new(orders(), vec![])).unwrap();
        route_append(&bus, &store);

        let command = Message::command("DoSomething", json!({"name": "John"}));
        hide_message_from_enricher(&bus, &command);
        bus.dispatch(command).unwrap();

        let event = first_event(&store);
        assert!(event.metadata_value("_causation_id").is_none());
        assert!(event.metadata_value("_causation_name").is_none());
    }

    #[test]
    fn detaches_from_bus_and_store() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        enricher.detach_from_store(store.as_ref());
        enricher.detach_from_bus(bus.as_ref());
        assert_eq!(store.listener_count(EVENT_CREATE), 1);
        assert_eq!(bus.listener_count(EVENT_DISPATCH), 1);

        bus.dispatch(Message::command("DoSomething", json!({"name": "John"}))).unwrap();

        let event = first_event(&store);
        assert!(event.metadata_value("_causation_id").is_none());
        assert!(event.metadata_value("_causation_name").is_none());
    }

    #[test]
    fn detach_without_attach_is_a_noop() {
        let enricher = CausationEnricher::default();
        let store = ObservableEventStore::new(InMemoryEventStore::new());
        let bus = CommandBus::new();

        enricher.detach_from_store(&store);
        enricher.detach_from_bus(&bus);
        enricher.detach_from_bus(&bus);

        assert_eq!(store.listener_count(EVENT_CREATE), 1);
        assert_eq!(bus.listener_count(EVENT_DISPATCH), 1);
    }

    #[test]
    fn metadata_keys_are_configurable() {
        let enricher = CausationEnricher::new("$causationId", "$causationName").unwrap();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        let command = Message::command("DoSomething", json!({"name": "John"}));
        bus.dispatch(command.clone()).unwrap();

        let event = first_event(&store);
        assert_eq!(event.metadata_value("$causationId"), Some(&json!(command.id().to_string())));
        assert_eq!(event.metadata_value("$causationName"), Some(&json!("DoSomething")));
        assert!(event.metadata_value("_causation_id").is_none());
    }

    #[test]
    fn default_matches_the_default_config() {
        let from_default = CausationEnricher::default();
        let from_config = CausationEnricher::from_config(&CausationConfig::default()).unwrap();

        assert_eq!(from_default.causation_id_key(), from_config.causation_id_key());
        assert_eq!(from_default.causation_name_key(), from_config.causation_name_key());
        assert_eq!(from_default.causation_id_key(), "_causation_id");
        assert!(from_default.current_command().is_none());
    }

    #[test]
    fn causation_id_key_cannot_be_empty() {
        let err = CausationEnricher::new("", "_causation_name").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn causation_name_key_cannot_be_empty() {
        let err = CausationEnricher::new("$causationId", "").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn command_is_forgotten_after_finalize() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        route_create(&bus, &store);

        bus.dispatch(Message::command("DoSomething", json!({"name": "Alex"}))).unwrap();
        assert!(enricher.current_command().is_none());

        store
            .append_to(&orders(), vec![Message::event("Outside", json!({}))], ExpectedVersion::Any)
            .unwrap();
        let outside = store.load(&orders()).unwrap().pop().unwrap();
        assert!(outside.metadata_value("_causation_id").is_none());
        assert!(outside.metadata_value("_causation_name").is_none());
    }

    #[test]
    fn command_is_forgotten_even_when_the_handler_fails() {
        let enricher = CausationEnricher::default();
        let (_store, bus) = setup(&enricher);
        bus.route("DoSomething", |_| Err(BridgeError::handler("nope")));

        assert!(bus.dispatch(Message::command("DoSomething", json!({}))).is_err());
        assert!(enricher.current_command().is_none());
    }

    #[test]
    fn enrich_without_command_writes_null_markers() {
        let enricher = CausationEnricher::default();
        let event = enricher.enrich(Message::event("SomethingDone", json!({})));

        assert_eq!(event.metadata_value("_causation_id"), Some(&JsonValue::Null));
        assert_eq!(event.metadata_value("_causation_name"), Some(&JsonValue::Null));
    }

    #[test]
    fn nested_dispatch_overwrites_then_clears_the_current_command() {
        let enricher = CausationEnricher::default();
        let (store, bus) = setup(&enricher);
        store.create(Stream::new(orders(), vec![])).unwrap();

        let inner_store = Arc::clone(&store);
        bus.route("Inner", move |_| {
            let events = vec![Message::event("InInner", json!({}))];
            inner_store.append_to(&orders(), events, ExpectedVersion::Any)
        });

        let outer_store = Arc::clone(&store);
        let weak_bus = Arc::downgrade(&bus);
        let inner = Message::command("Inner", json!({}));
        let inner_clone = inner.clone();
        bus.route("Outer", move |_| {
            let append = |name: &str| {
                let events = vec![Message::event(name, json!({}))];
                outer_store.append_to(&orders(), events, ExpectedVersion::Any)
            };
            append("BeforeInner")?;
            let bus = weak_bus.upgrade().ok_or_else(|| BridgeError::handler("bus dropped"))?;
            bus.dispatch(inner_clone.clone())?;
            append("AfterInner")
        });

        let outer = Message::command("Outer", json!({}));
        bus.dispatch(outer.clone()).unwrap();

        let events = store.load(&orders()).unwrap();
        let names: Vec<&str> = events.iter().map(Message::name).collect();
        assert_eq!(names, vec!["BeforeInner", "InInner", "AfterInner"]);

        assert_eq!(events[0].metadata_value("_causation_id"), Some(&json!(outer.id().to_string())));
        assert_eq!(events[1].metadata_value("_causation_id"), Some(&json!(inner.id().to_string())));
        assert_eq!(events[1].metadata_value("_causation_name"), Some(&json!("Inner")));
        // The inner finalize cleared the slot; the outer command is not restored.
        assert!(events[2].metadata_value("_causation_id").is_none());
    }
}
