//! Scoped units of work handed to handlers.

use std::sync::{Arc, Mutex};

use domain::Event;
use store::{ProductRepository, StoreError, UnitOfWork};

/// Collects events drained from unit of work scopes during one bus run.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends events, keeping their order.
    pub fn extend(&self, events: impl IntoIterator<Item = Event>) {
        self.lock().extend(events);
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lifecycle of a [`UnitOfWorkScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    Committed,
    RolledBack,
    Drained,
}

/// A unit of work that hands its products' events to the bus when dropped.
///
/// Events are drained exactly once, on drop, whether or not the scope was
/// committed. A scope dropped while still active is rolled back by its
/// backend.
pub struct UnitOfWorkScope {
    uow: Box<dyn UnitOfWork>,
    sink: EventSink,
    state: ScopeState,
}

impl UnitOfWorkScope {
    pub fn new(uow: Box<dyn UnitOfWork>, sink: EventSink) -> Self {
        Self {
            uow,
            sink,
            state: ScopeState::Active,
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Repository for this scope.
    pub fn products(&mut self) -> &mut dyn ProductRepository {
        self.uow.products()
    }

    /// Commits the scope. A failed commit leaves it rolled back.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let result = self.uow.commit().await;
        self.state = match result {
            Ok(()) => ScopeState::Committed,
            Err(_) => ScopeState::RolledBack,
        };
        tracing::debug!(state = ?self.state, "unit of work scope committed");
        result
    }

    /// Discards the scope's changes.
    pub async fn rollback(&mut self) -> Result<(), StoreError> {
        self.state = ScopeState::RolledBack;
        self.uow.rollback().await
    }

    fn drain(&mut self) {
        if self.state == ScopeState::Drained {
            return;
        }
        let events = self.uow.collect_new_events();
        tracing::debug!(
            from = ?self.state,
            events = events.len(),
            "draining unit of work scope"
        );
        self.sink.extend(events);
        self.state = ScopeState::Drained;
    }
}

impl Drop for UnitOfWorkScope {
    fn drop(&mut self) {
        self.drain();
    }
}
