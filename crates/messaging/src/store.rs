//! Transaction scope shared by commands and inbox-guarded consumers.
//!
//! A service's local store holds its aggregate state, its outbox, and its
//! inbox in one ACID scope. Every mutation goes through a
//! [`TransactionScope`]: the business code edits a working copy of the
//! state and stages outbox appends, and the store commits or discards the
//! whole unit. There is no API that persists a state change without also
//! committing the events it staged, and vice versa.

use crate::envelope::EventEnvelope;

/// The result of running a message through the inbox guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler ran and its effects were committed, together with the
    /// inbox record for this message.
    Applied,

    /// The message had already been applied by this consumer; nothing
    /// happened.
    Skipped,
}

impl ProcessOutcome {
    /// Returns true if the handler's effects were committed.
    pub fn was_applied(&self) -> bool {
        matches!(self, ProcessOutcome::Applied)
    }
}

/// A unit of work against one service's local store.
///
/// Holds a working copy of the service state plus the events staged for the
/// outbox. Dropped without effect unless the owning store commits it.
#[derive(Debug)]
pub struct TransactionScope<S> {
    state: S,
    staged: Vec<EventEnvelope>,
}

impl<S> TransactionScope<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state,
            staged: Vec::new(),
        }
    }

    /// Returns the service state under this transaction.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns the mutable service state under this transaction.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Stages an event for the outbox.
    ///
    /// The event is appended durably only if the whole transaction commits;
    /// it is sent over the network only later, by the relay.
    pub fn enqueue(&mut self, envelope: EventEnvelope) {
        self.staged.push(envelope);
    }

    /// Returns the events staged so far.
    pub fn staged(&self) -> &[EventEnvelope] {
        &self.staged
    }

    pub(crate) fn into_parts(self) -> (S, Vec<EventEnvelope>) {
        (self.state, self.staged)
    }
}
