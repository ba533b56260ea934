//! # Outbound operation queue
//!
//! Holds telemetry and reported-state submissions from the moment the
//! application hands them over until their final outcome has been delivered
//! back through the submission's own callback.
//!
//! ```text
//!            enqueue                drain_due              complete
//!   app ───────────────▶ Waiting ───────────────▶ InFlight ─────────▶ Acked / Failed / TimedOut
//!                          ▲                         │                       │
//!                          └──────── reschedule ─────┘                       ▼
//!                                                                    pop_completed → callback
//! ```
//!
//! Ordering is strict FIFO per [`OperationKind`]: a `Waiting` entry whose retry
//! time has not come yet blocks every later entry of the same kind, so the
//! queue never fills gaps by reordering.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::time::Instant;


/// Identifier assigned to every submission. Unique per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OperationId(pub u64);

/// What an operation carries to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationKind {
    /// Device-to-cloud application message.
    Telemetry,
    /// Device twin reported-properties update.
    ReportedState,
}

impl OperationKind {
    pub(crate) fn index(self) -> usize {
        match self {
            OperationKind::Telemetry => 0,
            OperationKind::ReportedState => 1,
        }
    }
}

/// Lifecycle of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationStatus {
    /// Queued, to be sent once `next_retry_at` has passed.
    Waiting,
    /// Handed to the transport, acknowledgement outstanding.
    InFlight,
    /// Acknowledged by the service.
    Acked,
    /// Refused, or the retry policy gave up.
    Failed,
    /// Outlived the retry horizon or the message timeout.
    TimedOut,
}

impl OperationStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Acked | OperationStatus::Failed | OperationStatus::TimedOut
        )
    }
}

/// Final result handed to a submission's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// The service acknowledged the operation with this status code.
    Acked {
        /// Service status code.
        status: u16,
    },
    /// The operation failed permanently.
    Failed {
        /// Service status code, when the service refused it.
        status: Option<u16>,
    },
    /// The operation exceeded its retry horizon or message timeout.
    TimedOut,
}

impl Outcome {
    fn status(self) -> OperationStatus {
        match self {
            Outcome::Acked { .. } => OperationStatus::Acked,
            Outcome::Failed { .. } => OperationStatus::Failed,
            Outcome::TimedOut => OperationStatus::TimedOut,
        }
    }
}

/// Callback invoked exactly once with the operation's outcome.
pub type CompletionCallback = Box<dyn FnOnce(Outcome)>;

/// A submission owned by the queue.
pub struct PendingOperation {
    id: OperationId,
    kind: OperationKind,
    message: Message,
    enqueued_at: Instant,
    attempt_count: u32,
    next_retry_at: Instant,
    status: OperationStatus,
    // Rescheduled during the current pump; not resent before the next one.
    held: bool,
    outcome: Option<Outcome>,
    callback: Option<CompletionCallback>,
}

impl PendingOperation {
    /// The operation's identifier.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Telemetry or reported state.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The message to send. For reported state only the payload is used.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// When the application submitted the operation.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Number of times the operation has been handed to the transport.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Earliest instant of the next send.
    pub fn next_retry_at(&self) -> Instant {
        self.next_retry_at
    }

    /// Current status.
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Consumes a completed operation and runs its callback.
    pub fn deliver(mut self) {
        if let (Some(callback), Some(outcome)) = (self.callback.take(), self.outcome) {
            callback(outcome);
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enqueued_at", &self.enqueued_at)
            .field("attempt_count", &self.attempt_count)
            .field("next_retry_at", &self.next_retry_at)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// FIFO holding area for outbound operations.
#[derive(Debug, Default)]
pub struct MessageQueue {
    pending: VecDeque<PendingOperation>,
    completed: VecDeque<PendingOperation>,
    next_id: u64,
    closed: bool,
}

impl MessageQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation, eligible for sending immediately.
    ///
    /// Fails with [`Error::InvalidArgument`] for an empty payload or a closed
    /// queue.
    pub fn enqueue(
        &mut self,
        kind: OperationKind,
        message: Message,
        callback: CompletionCallback,
        now: Instant,
    ) -> Result<OperationId> {
        if self.closed || message.payload().is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.next_id += 1;
        let id = OperationId(self.next_id);
        self.pending.push_back(PendingOperation {
            id,
            kind,
            message,
            enqueued_at: now,
            attempt_count: 0,
            next_retry_at: now,
            status: OperationStatus::Waiting,
            held: false,
            outcome: None,
            callback: Some(callback),
        });
        trace!("queued operation {}", id);
        Ok(id)
    }

    /// Moves every due `Waiting` operation to `InFlight` and returns their ids
    /// in submission order.
    pub fn drain_due(&mut self, now: Instant) -> Vec<OperationId> {
        let mut blocked = [false; 2];
        let mut due = Vec::new();
        for op in self.pending.iter_mut() {
            if op.status != OperationStatus::Waiting {
                continue;
            }
            let lane = op.kind.index();
            if blocked[lane] {
                continue;
            }
            if op.held || op.next_retry_at > now {
                blocked[lane] = true;
                continue;
            }
            op.status = OperationStatus::InFlight;
            op.attempt_count = op.attempt_count.saturating_add(1);
            due.push(op.id);
        }
        due
    }

    /// Looks up a non-terminal operation.
    pub fn get(&self, id: OperationId) -> Option<&PendingOperation> {
        self.pending.iter().find(|op| op.id == id)
    }

    /// Ids of every operation currently handed to the transport, in
    /// submission order.
    pub fn in_flight(&self) -> Vec<OperationId> {
        self.pending
            .iter()
            .filter(|op| op.status == OperationStatus::InFlight)
            .map(|op| op.id)
            .collect()
    }

    /// Status of an operation that has not been delivered yet.
    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.get(id)
            .or_else(|| self.completed.iter().find(|op| op.id == id))
            .map(|op| op.status)
    }

    /// Finishes an operation. Unknown or already finished ids are ignored and
    /// `false` is returned.
    pub fn complete(&mut self, id: OperationId, outcome: Outcome) -> bool {
        let Some(index) = self.pending.iter().position(|op| op.id == id) else {
            debug!("ignoring completion of unknown operation {}", id);
            return false;
        };
        let Some(mut op) = self.pending.remove(index) else {
            return false;
        };
        op.status = outcome.status();
        op.outcome = Some(outcome);
        self.completed.push_back(op);
        true
    }

    /// Returns an `InFlight` operation drained but never handed to the
    /// transport to `Waiting`, keeping its place and its attempt count.
    pub fn requeue(&mut self, id: OperationId) -> bool {
        match self
            .pending
            .iter_mut()
            .find(|op| op.id == id && op.status == OperationStatus::InFlight)
        {
            Some(op) => {
                op.status = OperationStatus::Waiting;
                op.attempt_count = op.attempt_count.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    /// Returns an `InFlight` operation to `Waiting`, due at `at` but no
    /// earlier than the next pump (see [`MessageQueue::release_held`]).
    pub fn reschedule(&mut self, id: OperationId, at: Instant) -> bool {
        match self
            .pending
            .iter_mut()
            .find(|op| op.id == id && op.status == OperationStatus::InFlight)
        {
            Some(op) => {
                op.status = OperationStatus::Waiting;
                op.next_retry_at = at;
                op.held = true;
                true
            }
            None => {
                debug!("cannot reschedule operation {}", id);
                false
            }
        }
    }

    /// Starts a new pump: operations rescheduled during the previous one
    /// become eligible again.
    pub fn release_held(&mut self) {
        for op in self.pending.iter_mut() {
            op.held = false;
        }
    }

    /// Times out every pending operation for which `is_expired` holds and
    /// returns how many were expired.
    pub fn expire<F>(&mut self, mut is_expired: F) -> usize
    where
        F: FnMut(&PendingOperation) -> bool,
    {
        let expired: Vec<OperationId> = self
            .pending
            .iter()
            .filter(|op| is_expired(*op))
            .map(|op| op.id)
            .collect();
        for id in &expired {
            self.complete(*id, Outcome::TimedOut);
        }
        expired.len()
    }

    /// Takes the next finished operation awaiting callback delivery.
    pub fn pop_completed(&mut self) -> Option<PendingOperation> {
        self.completed.pop_front()
    }

    /// Number of operations not yet delivered.
    pub fn len(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    /// Whether nothing is waiting for delivery.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every operation without invoking callbacks and refuses further
    /// submissions.
    pub fn close(&mut self) {
        let dropped = self.len();
        self.pending.clear();
        self.completed.clear();
        self.closed = true;
        if dropped > 0 {
            info!("abandoned {} pending operations", dropped);
        }
    }
}
