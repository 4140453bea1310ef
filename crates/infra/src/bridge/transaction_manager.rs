//! One store transaction per dispatched command.

use std::sync::Arc;

use tracing::{debug, warn};

use busbridge_core::{ObservableHost, listener};
use busbridge_events::{EVENT_DISPATCH, EVENT_FINALIZE, PARAM_EXCEPTION, PRIORITY_INVOKE_HANDLER};

use super::plugin::{BusPlugin, ListenerRegistry};
use crate::event_store::TransactionalEventStore;

/// Bus-side priority for opening the transaction: before handler invocation.
pub const BEGIN_PRIORITY: i32 = PRIORITY_INVOKE_HANDLER + 1000;
/// Bus-side priority for closing it at finalize.
pub const CLOSE_PRIORITY: i32 = 1000;

/// Wraps every dispatch in a store transaction.
///
/// The transaction is opened when dispatch starts and, at finalize, committed
/// when no failure was recorded or rolled back otherwise. If the store is no
/// longer in a transaction at finalize, nothing happens.
///
/// Begin failures (a transaction already open) propagate out of the dispatch
/// hook; the handler then never runs and finalize sees the error.
pub struct TransactionManager<S: ?Sized> {
    store: Arc<S>,
    listeners: ListenerRegistry,
}

impl<S> TransactionManager<S>
where
    S: TransactionalEventStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S> BusPlugin for TransactionManager<S>
where
    S: TransactionalEventStore + ?Sized + 'static,
{
    fn attach_to_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized,
    {
        let store = Arc::clone(&self.store);
        self.listeners.record(bus.attach(
            EVENT_DISPATCH,
            listener(move |_| {
                store.begin_transaction()?;
                debug!("transaction started for dispatch");
                Ok(())
            }),
            BEGIN_PRIORITY,
        ));

        let store = Arc::clone(&self.store);
        self.listeners.record(bus.attach(
            EVENT_FINALIZE,
            listener(move |ctx| {
                if !store.in_transaction() {
                    return Ok(());
                }
                match ctx.error(PARAM_EXCEPTION) {
                    Some(err) => {
                        warn!(error = %err, "dispatch failed, rolling back transaction");
                        store.rollback()
                    }
                    None => {
                        store.commit()?;
                        debug!("transaction committed");
                        Ok(())
                    }
                }
            }),
            CLOSE_PRIORITY,
        ));
    }

    fn detach_from_bus<B>(&self, bus: &B)
    where
        B: ObservableHost + ?Sized,
    {
        let removed = self.listeners.detach_all(bus);
        debug!(removed, "transaction manager detached from bus");
    }
}

impl<S: ?Sized> core::fmt::Debug for TransactionManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
