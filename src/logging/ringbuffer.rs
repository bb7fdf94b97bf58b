// SPDX-License-Identifier: Apache-2.0 OR MIT
// Bounded in-memory log ring
//
// Packet paths log through this without blocking: writers never wait on a
// lock or on I/O. When the ring is full the oldest entry is dropped and
// counted, the same policy as the kernel printk buffer.

use super::entry::LogEntry;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default capacity used by the daemon's registry
pub const DEFAULT_CAPACITY: usize = 4096;

/// Multi-producer, multi-consumer bounded log ring with overwrite-oldest semantics
pub struct MemoryLog {
    queue: ArrayQueue<LogEntry>,
    overwritten: AtomicU64,
    written: AtomicU64,
}

impl MemoryLog {
    /// Create a ring holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overwritten: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    /// Append an entry, evicting the oldest if the ring is full
    pub fn write(&self, entry: LogEntry) {
        self.written.fetch_add(1, Ordering::Relaxed);
        if self.queue.force_push(entry).is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop the oldest entry
    pub fn read(&self) -> Option<LogEntry> {
        self.queue.pop()
    }

    /// Pop everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(self.queue.len());
        while let Some(entry) = self.queue.pop() {
            entries.push(entry);
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Entries lost to overwrite since creation
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Entries written since creation
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Facility, Severity};
    use std::sync::Arc;
    use std::thread;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(Severity::Info, Facility::Test, message)
    }

    #[test]
    fn test_fifo_order() {
        let log = MemoryLog::new(8);
        log.write(entry("a"));
        log.write(entry("b"));
        assert_eq!(log.read().unwrap().message, "a");
        assert_eq!(log.read().unwrap().message, "b");
        assert!(log.read().is_none());
    }

    #[test]
    fn test_overwrite_oldest_when_full() {
        let log = MemoryLog::new(2);
        log.write(entry("1"));
        log.write(entry("2"));
        log.write(entry("3"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.overwritten(), 1);
        assert_eq!(log.written(), 3);
        let messages: Vec<String> = log.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["2", "3"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = MemoryLog::new(0);
        assert_eq!(log.capacity(), 1);
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_count() {
        let log = Arc::new(MemoryLog::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..100 {
                        log.write(entry(&format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.written(), 400);
        assert_eq!(log.len() as u64 + log.overwritten(), 400);
    }
}
