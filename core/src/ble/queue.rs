//! Candidate queue between the scan callback and the connection workers
//!
//! Pushing never blocks: the scan driver invokes the discovery callback
//! synchronously for every advertisement, so a full queue sheds its oldest
//! candidate instead of stalling discovery of other devices.

use super::observation::DeviceObservation;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Default number of candidates held before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// A filter-qualified, deduplicated observation awaiting connection handling
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    /// Monotonic sequence number assigned at enqueue time
    pub sequence: u64,
    /// The observation that qualified
    pub observation: DeviceObservation,
}

impl CandidateEvent {
    pub fn address(&self) -> &str {
        &self.observation.address
    }
}

/// Result of pushing onto the queue
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Enqueued without displacing anything
    Queued,
    /// Enqueued; the returned oldest candidate was dropped to make room
    DroppedOldest(CandidateEvent),
    /// The queue has been closed; the candidate was discarded
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<CandidateEvent>,
    last_sequence: u64,
    closed: bool,
}

/// Bounded FIFO with drop-oldest overflow and async receive
#[derive(Debug)]
pub struct CandidateQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueue an observation without blocking.
    ///
    /// The sequence number is taken under the queue lock, so sequence order
    /// always matches FIFO order.
    pub fn push(&self, observation: DeviceObservation) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            state.last_sequence += 1;
            let candidate = CandidateEvent {
                sequence: state.last_sequence,
                observation,
            };
            let dropped = if state.items.len() >= self.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(candidate);
            match dropped {
                Some(oldest) => PushOutcome::DroppedOldest(oldest),
                None => PushOutcome::Queued,
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Dequeue the oldest candidate without waiting
    pub fn try_pop(&self) -> Option<CandidateEvent> {
        self.state.lock().items.pop_front()
    }

    /// Wait for the next candidate.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<CandidateEvent> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(candidate) = state.items.pop_front() {
                    return Some(candidate);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting candidates and wake every waiting consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
