//! Hook-emitting command bus.
//!
//! Every `dispatch` runs two emissions on the same context:
//!
//! ```text
//! dispatch  ──► listeners (priority desc) ──► handler invocation @ PRIORITY_INVOKE_HANDLER
//!    │ error? recorded as `exception`
//!    ▼
//! finalize  ──► listeners (priority desc)      (always runs, all of them)
//! ```
//!
//! Plugins hook in before handler invocation (open a transaction, remember the
//! command) and at finalize (commit/rollback, forget the command). Routing is
//! a plain name → handler map.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use busbridge_core::{
    BridgeError, BridgeResult, HookContext, HookEmitter, Listener, ListenerHandle, Message,
    ObservableHost, listener,
};

/// Emitted before the handler runs.
pub const EVENT_DISPATCH: &str = "dispatch";
/// Emitted after the handler ran (or failed), always.
pub const EVENT_FINALIZE: &str = "finalize";

/// The message being dispatched. Listeners may replace it, or null it out.
pub const PARAM_MESSAGE: &str = "message";
pub const PARAM_MESSAGE_NAME: &str = "message-name";
/// Set to `true` once the routed handler returned successfully.
pub const PARAM_MESSAGE_HANDLED: &str = "message-handled";
/// The error raised during the dispatch emission, present on finalize.
pub const PARAM_EXCEPTION: &str = "exception";

/// Priority of the built-in handler invocation.
pub const PRIORITY_INVOKE_HANDLER: i32 = 0;

/// Application code handling one command.
pub type CommandHandler = Arc<dyn Fn(&Message) -> BridgeResult<()> + Send + Sync>;

type Routes = Arc<RwLock<HashMap<String, CommandHandler>>>;

/// Synchronous command bus with dispatch/finalize hooks.
pub struct CommandBus {
    emitter: HookEmitter,
    routes: Routes,
}

impl CommandBus {
    pub fn new() -> Self {
        let routes: Routes = Arc::default();
        let emitter = HookEmitter::new();
        emitter.attach(
            EVENT_DISPATCH,
            invoke_handler(Arc::clone(&routes)),
            PRIORITY_INVOKE_HANDLER,
        );
        Self { emitter, routes }
    }

    /// Route messages named `name` to `handler`, replacing any previous route.
    pub fn route<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Message) -> BridgeResult<()> + Send + Sync + 'static,
    {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.insert(name.into(), Arc::new(handler));
    }

    /// Dispatch `message` through the dispatch and finalize hooks.
    ///
    /// A failing finalize listener (e.g. a commit) does not stop the other
    /// finalize listeners, and its error wins over the dispatch error; the
    /// superseded dispatch error is logged.
    pub fn dispatch(&self, message: Message) -> BridgeResult<()> {
        debug!(message_id = %message.id(), message_name = message.name(), "dispatching message");

        let mut ctx = HookContext::new(EVENT_DISPATCH)
            .with_param(PARAM_MESSAGE_NAME, message.name())
            .with_param(PARAM_MESSAGE_HANDLED, false)
            .with_param(PARAM_MESSAGE, message);

        let outcome = self.emitter.emit(&mut ctx);
        if let Err(err) = &outcome {
            ctx.set_param(PARAM_EXCEPTION, err.clone());
        }

        let mut finalize = ctx.into_hook(EVENT_FINALIZE);
        // Finalize listeners all run even if one of them fails.
        if let Err(finalize_err) = self.emitter.emit_settled(&mut finalize, i32::MAX) {
            if let Err(err) = &outcome {
                warn!(
                    error = %err,
                    finalize_error = %finalize_err,
                    "dispatch error superseded by finalize failure"
                );
            }
            return Err(finalize_err);
        }

        outcome
    }

    pub fn listener_count(&self, hook: &str) -> usize {
        self.emitter.listener_count(hook)
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableHost for CommandBus {
    fn attach(&self, hook: &str, listener: Listener, priority: i32) -> ListenerHandle {
        self.emitter.attach(hook, listener, priority)
    }

    fn detach(&self, handle: &ListenerHandle) -> bool {
        self.emitter.detach(handle)
    }
}

impl core::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&str> = routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CommandBus")
            .field("emitter", &self.emitter)
            .field("routes", &names)
            .finish()
    }
}

fn invoke_handler(routes: Routes) -> Listener {
    listener(move |ctx| {
        let message = ctx
            .message(PARAM_MESSAGE)
            .cloned()
            .ok_or_else(|| BridgeError::hook("dispatch context carries no message"))?;

        let handler = {
            let routes = routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .get(message.name())
                .cloned()
                .ok_or_else(|| BridgeError::NoHandler(message.name().to_string()))?
        };

        // The route lock is released: the handler may dispatch again.
        handler(&message)?;
        ctx.set_param(PARAM_MESSAGE_HANDLED, true);
        Ok(())
    })
}
