use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::debug;
use serde::Serialize;
use thiserror::Error;

/// Upper bound (exclusive) for the queue capacity.
pub const MAX_CAPACITY: usize = 3000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity {0} outside 1..{MAX_CAPACITY}")]
    InvalidCapacity(usize),
}

/// One queued item with its insertion time in ms since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry<T> {
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
    #[serde(rename = "values")]
    pub data: T,
}

/// Thread-safe FIFO of time-stamped items that drops its oldest item when full.
#[derive(Debug)]
pub struct TransmitQueue<T> {
    capacity: usize,
    entries: Mutex<VecDeque<Entry<T>>>,
}

impl<T: Clone> TransmitQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if !(1..MAX_CAPACITY).contains(&capacity) {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `data`, evicting the oldest entry first when the queue is full.
    pub fn add(&self, data: T) {
        let entry = Entry {
            timestamp_ms: Utc::now().timestamp_millis(),
            data,
        };
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            debug!("transmit queue full, dropping oldest entry");
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn num_entries(&self) -> usize {
        self.lock().len()
    }

    pub fn all_entries(&self) -> Vec<Entry<T>> {
        self.lock().iter().cloned().collect()
    }

    /// Up to `n` of the oldest entries, oldest first.
    pub fn first_entries(&self, n: usize) -> Vec<Entry<T>> {
        self.lock().iter().take(n).cloned().collect()
    }

    /// Drop up to `n` of the oldest entries.
    pub fn remove_first(&self, n: usize) {
        let mut entries = self.lock();
        let n = n.min(entries.len());
        entries.drain(..n);
    }
}
