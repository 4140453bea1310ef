//! `busbridge-events`: the bus side of the bridge.
//!
//! - [`EventBus`]: where persisted events are published to
//! - [`CommandBus`]: hook-emitting dispatcher whose dispatch/finalize cycle
//!   delimits "handling one command"

pub mod bus;
pub mod command_bus;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command_bus::{
    CommandBus, CommandHandler, EVENT_DISPATCH, EVENT_FINALIZE, PARAM_EXCEPTION, PARAM_MESSAGE,
    PARAM_MESSAGE_HANDLED, PARAM_MESSAGE_NAME, PRIORITY_INVOKE_HANDLER,
};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
