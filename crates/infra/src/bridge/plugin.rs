//! Plugin seams and listener bookkeeping shared by the bridge components.

use std::sync::{Arc, Mutex, PoisonError};

use busbridge_core::{ListenerHandle, Message, ObservableHost};

use crate::event_store::ObservableStore;

/// Component that hooks into an event store.
pub trait StorePlugin {
    fn attach_to_store<S>(&self, store: &Arc<S>)
    where
        S: ObservableStore + ?Sized + 'static;

    /// Release every store listener this instance attached. No-op if none.
    fn detach_from_store<S>(&self, store: &S)
    where
        S: ObservableStore + ?Sized;
}

/// Component that hooks into a message bus.
pub trait BusPlugin {
    fn attach_to_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized;

    /// Release every bus listener this instance attached. No-op if none.
    fn detach_from_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized;
}

/// Rewrites message metadata before it is persisted.
pub trait MetadataEnricher {
    fn enrich(&self, message: Message) -> Message;
}

/// Listener handles a component obtained from a host, released together.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    handles: Mutex<Vec<ListenerHandle>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, handle: ListenerHandle) {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }

    /// Detach recorded handles from `host` and forget the ones it removed.
    ///
    /// Handles `host` doesn't know about stay recorded, so a component
    /// attached to several hosts can still be detached from the others.
    /// Returns how many listeners were removed.
    pub fn detach_all<H>(&self, host: &H) -> usize
    where
        H: ObservableHost + ?Sized,
    {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handles.len();
        handles.retain(|h| !host.detach(h));
        before - handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
