//! Bounded ring buffer for confirmed candles

use std::collections::VecDeque;
use std::sync::RwLock;

/// Bounded ring holding the last `capacity` items written.
///
/// Single-writer, many-reader: the confirm writer task appends, strategies
/// read snapshots. Critical sections only cover the copy in/out, so readers
/// never hold up the writer for long.
#[derive(Debug)]
pub struct SyncBuffer<T> {
    inner: RwLock<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T: Clone> SyncBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
        }
    }

    /// Append items in order, overwriting the oldest on overflow.
    /// No-op after `close`.
    pub fn write(&self, items: &[T]) {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return;
        }
        for item in items {
            if inner.items.len() == inner.capacity {
                inner.items.pop_front();
            }
            inner.items.push_back(item.clone());
        }
    }

    pub fn push(&self, item: T) {
        self.write(std::slice::from_ref(&item));
    }

    /// Up to `limit` most-recent items, oldest first.
    pub fn read(&self, limit: usize) -> Vec<T> {
        let inner = self.inner.read().unwrap();
        let skip = inner.items.len().saturating_sub(limit);
        inner.items.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idempotent; subsequent writes are dropped.
    pub fn close(&self) {
        self.inner.write().unwrap().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().unwrap().closed
    }
}
