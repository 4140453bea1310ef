//! Hook emission: named extension points with prioritized listeners.
//!
//! A host (event store, message bus) owns a [`HookEmitter`] and emits a
//! [`HookContext`] for every operation it performs. Listeners attached to the
//! hook run synchronously, in descending priority order, and may read and
//! overwrite the context's named parameters. Whatever the context holds once
//! the last listener returns is what the host acts on.
//!
//! ## Reentrancy
//!
//! Emission snapshots the listener list and releases the lock before calling
//! any listener. A listener may therefore attach, detach, or start a new
//! emission on the same (or another) host without deadlocking.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{BridgeError, BridgeResult};
use crate::message::Message;
use crate::stream::{Stream, StreamName};
use crate::version::ExpectedVersion;

/// Priority for listeners that don't ask for one.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Priority at which a host performs its own work for a hook.
///
/// Listeners above it see (and may rewrite) the input; listeners below it see
/// the outcome (result parameters, failure markers).
pub const ACTION_PRIORITY: i32 = 100;

/// Value of a named hook parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Text(String),
    Message(Message),
    Messages(Vec<Message>),
    Stream(Stream),
    StreamName(StreamName),
    Version(ExpectedVersion),
    Error(BridgeError),
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<Message> for ParamValue {
    fn from(value: Message) -> Self {
        ParamValue::Message(value)
    }
}

impl From<Option<Message>> for ParamValue {
    fn from(value: Option<Message>) -> Self {
        value.map(ParamValue::Message).unwrap_or(ParamValue::Null)
    }
}

impl From<Vec<Message>> for ParamValue {
    fn from(value: Vec<Message>) -> Self {
        ParamValue::Messages(value)
    }
}

impl From<Stream> for ParamValue {
    fn from(value: Stream) -> Self {
        ParamValue::Stream(value)
    }
}

impl From<StreamName> for ParamValue {
    fn from(value: StreamName) -> Self {
        ParamValue::StreamName(value)
    }
}

impl From<ExpectedVersion> for ParamValue {
    fn from(value: ExpectedVersion) -> Self {
        ParamValue::Version(value)
    }
}

impl From<BridgeError> for ParamValue {
    fn from(value: BridgeError) -> Self {
        ParamValue::Error(value)
    }
}

/// Mutable, per-emission bag of named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    name: String,
    params: BTreeMap<String, ParamValue>,
}

impl HookContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set_param(key, value);
        self
    }

    /// Reuse the parameters of this context for a follow-up hook.
    pub fn into_hook(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: self.params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn remove_param(&mut self, key: &str) -> Option<ParamValue> {
        self.params.remove(key)
    }

    /// `true` only if the parameter is present and holds `Bool(true)`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.params.get(key), Some(ParamValue::Bool(true)))
    }

    pub fn message(&self, key: &str) -> Option<&Message> {
        match self.params.get(key) {
            Some(ParamValue::Message(m)) => Some(m),
            _ => None,
        }
    }

    pub fn messages(&self, key: &str) -> Option<&[Message]> {
        match self.params.get(key) {
            Some(ParamValue::Messages(m)) => Some(m),
            _ => None,
        }
    }

    pub fn stream(&self, key: &str) -> Option<&Stream> {
        match self.params.get(key) {
            Some(ParamValue::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn stream_name(&self, key: &str) -> Option<&StreamName> {
        match self.params.get(key) {
            Some(ParamValue::StreamName(s)) => Some(s),
            _ => None,
        }
    }

    pub fn version(&self, key: &str) -> Option<ExpectedVersion> {
        match self.params.get(key) {
            Some(ParamValue::Version(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(ParamValue::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn error(&self, key: &str) -> Option<&BridgeError> {
        match self.params.get(key) {
            Some(ParamValue::Error(e)) => Some(e),
            _ => None,
        }
    }
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&mut HookContext) -> BridgeResult<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&mut HookContext) -> BridgeResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying one attached listener.
///
/// Ids are process-unique, so a handle issued by one host never matches a
/// listener of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    hook: String,
    id: u64,
}

impl ListenerHandle {
    pub fn hook(&self) -> &str {
        &self.hook
    }
}

/// Anything listeners can be attached to.
pub trait ObservableHost: Send + Sync {
    /// Register `listener` for emissions of `hook`; higher `priority` runs first.
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle;

    /// Unregister a listener. Returns `false` if it was not (or no longer) attached.
    fn detach(&self, handle: &ListenerHandle) -> bool;
}

impl<H> ObservableHost for Arc<H>
where
    H: ObservableHost + ?Sized,
{
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle {
        (**self).attach(hook, listener, priority)
    }

    fn detach(&self, handle: &ListenerHandle) -> bool {
        (**self).detach(handle)
    }
}

struct Registered {
    id: u64,
    priority: i32,
    listener: Listener,
}

/// Ordered listener registry plus synchronous emission.
#[derive(Default)]
pub struct HookEmitter {
    hooks: RwLock<HashMap<String, Vec<Registered>>>,
}

impl HookEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every listener of `ctx.name()` in priority order.
    ///
    /// The first listener error stops the emission and is returned as is.
    pub fn emit(&self, ctx: &mut HookContext) -> BridgeResult<()> {
        self.emit_settled(ctx, i32::MIN)
    }

    /// Like [`emit`](Self::emit), but listeners below `settle_priority` always
    /// run once everything at or above it has succeeded.
    ///
    /// An error at or above `settle_priority` stops the emission. Below it,
    /// the remaining listeners still run and the first error is returned
    /// afterwards.
    pub fn emit_settled(&self, ctx: &mut HookContext, settle_priority: i32) -> BridgeResult<()> {
        let snapshot: Vec<(i32, Listener)> = {
            let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
            hooks
                .get(ctx.name())
                .map(|list| {
                    list.iter()
                        .map(|r| (r.priority, Arc::clone(&r.listener)))
                        .collect()
                })
                .unwrap_or_default()
        };

        tracing::trace!(hook = ctx.name(), listeners = snapshot.len(), "emitting hook");

        let mut first_error = None;
        for (priority, listener) in snapshot {
            let Err(err) = listener(ctx) else {
                continue;
            };
            if priority >= settle_priority {
                return Err(err);
            }
            if first_error.is_some() {
                tracing::warn!(
                    hook = ctx.name(),
                    priority,
                    error = %err,
                    "additional listener failure"
                );
            } else {
                first_error = Some(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.get(hook).map(Vec::len).unwrap_or(0)
    }
}

impl ObservableHost for HookEmitter {
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let list = hooks.entry(hook.to_string()).or_default();
        list.push(Registered {
            id,
            priority,
            listener,
        });
        // Stable: equal priorities keep attach order.
        list.sort_by_key(|r| core::cmp::Reverse(r.priority));

        ListenerHandle {
            hook: hook.to_string(),
            id,
        }
    }

    fn detach(&self, handle: &ListenerHandle) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = hooks.get_mut(&handle.hook) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != handle.id);
        before != list.len()
    }
}

impl core::fmt::Debug for HookEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let counts: BTreeMap<&str, usize> =
            hooks.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("HookEmitter").field("listeners", &counts).finish()
    }
}
