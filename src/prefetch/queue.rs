//! Bounded priority queue of pending prefetch tasks.
//!
//! Entries are ordered by priority (high first), then by admission sequence, so
//! iteration order is exactly the dispatch order. When the queue is full the
//! last entry (the newest task of the lowest tier) makes room for the incoming
//! one, unless the incoming task ranks strictly below it.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::task::{Priority, PrefetchStrategy, PrefetchTask, TaskId, Trigger};

type Slot = (Reverse<Priority>, u64);

pub(crate) struct QueuedTask<V> {
    pub(crate) id: TaskId,
    pub(crate) task: PrefetchTask<V>,
    armed: bool,
    arming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted { evicted: Option<TaskId> },
    Rejected,
}

/// A task that a trigger matched, handed out so its condition can be checked
/// without holding the scheduler lock.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) id: TaskId,
    pub(crate) strategy: PrefetchStrategy,
}

pub(crate) struct PrefetchQueue<V> {
    entries: BTreeMap<Slot, QueuedTask<V>>,
    slots: HashMap<TaskId, Slot>,
    next_seq: u64,
    capacity: usize,
}

impl<V> PrefetchQueue<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            slots: HashMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, id: TaskId, task: PrefetchTask<V>) -> Admission {
        let priority = task.strategy.priority;
        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            let Some((&(Reverse(lowest), _), _)) = self.entries.last_key_value() else {
                return Admission::Rejected;
            };
            if priority < lowest {
                return Admission::Rejected;
            }
            if let Some((_, victim)) = self.entries.pop_last() {
                self.slots.remove(&victim.id);
                evicted = Some(victim.id);
            }
        }

        let slot = (Reverse(priority), self.next_seq);
        self.next_seq += 1;
        self.slots.insert(id, slot);
        self.entries.insert(
            slot,
            QueuedTask {
                id,
                task,
                armed: false,
                arming: false,
            },
        );
        Admission::Admitted { evicted }
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<QueuedTask<V>> {
        let slot = self.slots.remove(&id)?;
        self.entries.remove(&slot)
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn find_by_key(&self, cache_key: &str) -> Option<TaskId> {
        self.entries
            .values()
            .find(|entry| entry.task.cache_key == cache_key)
            .map(|entry| entry.id)
    }

    /// Tasks waiting for `trigger`, in dispatch order. Hover only ever yields
    /// the single highest-ranked match.
    pub(crate) fn candidates(&self, trigger: Trigger) -> Vec<Candidate> {
        let matches = self
            .entries
            .values()
            .filter(|entry| !entry.armed && !entry.arming)
            .filter(|entry| entry.task.strategy.trigger == trigger)
            .map(|entry| Candidate {
                id: entry.id,
                strategy: entry.task.strategy.clone(),
            });
        if trigger == Trigger::Hover {
            matches.take(1).collect()
        } else {
            matches.collect()
        }
    }

    /// Marks a task as waiting out its delay. Returns the delay to wait, or
    /// `None` when the task should be armed right away.
    pub(crate) fn begin_arming(
        &mut self,
        id: TaskId,
        default_delay: Option<Duration>,
    ) -> Option<Duration> {
        let entry = self.entry_mut(id)?;
        let delay = entry.task.strategy.delay.or(default_delay)?;
        if delay.is_zero() {
            return None;
        }
        entry.arming = true;
        Some(delay)
    }

    pub(crate) fn arm(&mut self, id: TaskId) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.arming = false;
                entry.armed = true;
                true
            }
            None => false,
        }
    }

    /// Removes and returns the first armed task in dispatch order.
    pub(crate) fn pop_armed(&mut self) -> Option<QueuedTask<V>> {
        let slot = self
            .entries
            .iter()
            .find(|(_, entry)| entry.armed)
            .map(|(slot, _)| *slot)?;
        let entry = self.entries.remove(&slot)?;
        self.slots.remove(&entry.id);
        Some(entry)
    }

    pub(crate) fn drain(&mut self) -> Vec<TaskId> {
        self.slots.clear();
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|entry| entry.id)
            .collect()
    }

    fn entry_mut(&mut self, id: TaskId) -> Option<&mut QueuedTask<V>> {
        let slot = self.slots.get(&id)?;
        self.entries.get_mut(slot)
    }
}
