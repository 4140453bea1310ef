//! `busbridge-core`: shared building blocks for the store/bus bridge.
//!
//! This crate contains the message model and the hook machinery both hosts
//! are built on (no storage or routing concerns).

pub mod error;
pub mod hooks;
pub mod id;
pub mod message;
pub mod stream;
pub mod version;

pub use error::{BridgeError, BridgeResult};
pub use hooks::{
    ACTION_PRIORITY, DEFAULT_PRIORITY, HookContext, HookEmitter, Listener, ListenerHandle,
    ObservableHost, ParamValue, listener,
};
pub use id::MessageId;
pub use message::{Message, MessageKind, Metadata};
pub use stream::{Stream, StreamName};
pub use version::ExpectedVersion;
