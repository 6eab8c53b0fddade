use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::operation::{Operation, OperationId};
use crate::execution::priority::Priority;

/// Queued operation with its ordering key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedEntry {
    pub operation: Operation,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub sequence: u64,
}

impl PrioritizedEntry {
    fn key(&self) -> (Priority, DateTime<Utc>, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }
}

impl Eq for PrioritizedEntry {}

impl PartialOrd for PrioritizedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest entry, so the smallest key compares greatest.
impl Ord for PrioritizedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub by_priority: BTreeMap<u8, usize>,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_removed: u64,
    pub oldest_pending_age_seconds: Option<f64>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<PrioritizedEntry>,
    pending: HashSet<OperationId>,
    delivered: HashSet<OperationId>,
    next_sequence: u64,
    total_enqueued: u64,
    total_dequeued: u64,
    total_removed: u64,
}

/// Shared queue of operations awaiting execution. Never blocks callers
/// beyond the short critical section.
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns false when the operation is already pending or was delivered.
    pub fn enqueue(&self, operation: Operation, priority: Priority) -> bool {
        let mut state = self.state();
        let id = operation.operation_id.clone();

        if state.pending.contains(&id) || state.delivered.contains(&id) {
            warn!(
                event_name = "engine.queue.duplicate_ignored",
                operation_id = %id,
                "operation already queued or delivered, ignoring enqueue"
            );
            return false;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.total_enqueued += 1;
        state.pending.insert(id.clone());
        state.heap.push(PrioritizedEntry { operation, priority, enqueued_at: Utc::now(), sequence });

        debug!(
            event_name = "engine.queue.enqueued",
            operation_id = %id,
            priority = priority.value(),
            depth = state.heap.len(),
            "operation enqueued"
        );
        true
    }

    pub fn dequeue(&self) -> Option<PrioritizedEntry> {
        self.dequeue_first_matching(|_| true)
    }

    /// Pops the highest-ranked entry that `accept` takes. Entries it declines
    /// stay queued with their ordering key. `accept` runs under the queue lock.
    pub fn dequeue_first_matching(
        &self,
        mut accept: impl FnMut(&PrioritizedEntry) -> bool,
    ) -> Option<PrioritizedEntry> {
        let mut state = self.state();
        let mut declined = Vec::new();
        let mut claimed = None;
        while let Some(entry) = state.heap.pop() {
            if accept(&entry) {
                claimed = Some(entry);
                break;
            }
            declined.push(entry);
        }
        state.heap.extend(declined);

        let entry = claimed?;
        let id = entry.operation.operation_id.clone();
        state.pending.remove(&id);
        state.delivered.insert(id);
        state.total_dequeued += 1;
        Some(entry)
    }

    pub fn peek(&self) -> Option<PrioritizedEntry> {
        self.state().heap.peek().cloned()
    }

    /// Cancels a pending entry. Returns false when it was not pending.
    pub fn remove(&self, operation_id: &OperationId) -> bool {
        let mut state = self.state();
        if !state.pending.remove(operation_id) {
            return false;
        }
        state.heap.retain(|entry| &entry.operation.operation_id != operation_id);
        state.total_removed += 1;
        debug!(
            event_name = "engine.queue.removed",
            operation_id = %operation_id,
            "pending operation removed"
        );
        true
    }

    /// Puts a dequeued entry back with its original ordering key.
    pub(crate) fn restore(&self, entry: PrioritizedEntry) {
        let mut state = self.state();
        let id = entry.operation.operation_id.clone();
        if !state.delivered.remove(&id) {
            return;
        }
        state.total_dequeued = state.total_dequeued.saturating_sub(1);
        state.pending.insert(id);
        state.heap.push(entry);
    }

    /// True for pending and delivered ids. Removing a pending entry forgets it.
    pub fn has_seen(&self, operation_id: &OperationId) -> bool {
        let state = self.state();
        state.pending.contains(operation_id) || state.delivered.contains(operation_id)
    }

    pub fn is_pending(&self, operation_id: &OperationId) -> bool {
        self.state().pending.contains(operation_id)
    }

    pub fn len(&self) -> usize {
        self.state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        let mut by_priority = BTreeMap::new();
        let mut oldest: Option<DateTime<Utc>> = None;

        for entry in state.heap.iter() {
            *by_priority.entry(entry.priority.value()).or_insert(0) += 1;
            oldest = Some(match oldest {
                Some(current) if current <= entry.enqueued_at => current,
                _ => entry.enqueued_at,
            });
        }

        let oldest_pending_age_seconds = oldest.map(|enqueued_at| {
            (Utc::now() - enqueued_at).num_milliseconds().max(0) as f64 / 1000.0
        });

        QueueStats {
            pending: state.heap.len(),
            by_priority,
            total_enqueued: state.total_enqueued,
            total_dequeued: state.total_dequeued,
            total_removed: state.total_removed,
            oldest_pending_age_seconds,
        }
    }
}
