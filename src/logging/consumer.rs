// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log consumer task - drains the in-memory ring and outputs log entries

use super::entry::LogEntry;
use super::ringbuffer::MemoryLog;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Output sink for log entries
pub trait LogSink: Send {
    /// Write a log entry to the sink
    fn write_entry(&mut self, entry: &LogEntry);

    /// Flush any buffered output
    fn flush(&mut self);
}

/// Standard error sink, one human-readable line per entry
pub struct StderrSink {
    stderr: std::io::Stderr,
    json: bool,
}

impl StderrSink {
    pub fn new() -> Self {
        Self {
            stderr: std::io::stderr(),
            json: false,
        }
    }

    /// Emit JSON lines instead of the bracketed text format
    pub fn json() -> Self {
        Self {
            stderr: std::io::stderr(),
            json: true,
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for StderrSink {
    fn write_entry(&mut self, entry: &LogEntry) {
        let line = if self.json {
            entry.to_json()
        } else {
            format!(
                "{} {}",
                entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                entry.format_line()
            )
        };
        let _ = writeln!(self.stderr, "{}", line);
    }

    fn flush(&mut self) {
        let _ = self.stderr.flush();
    }
}

/// Tokio task draining a `MemoryLog` into a sink
pub struct AsyncConsumer {
    memory: Arc<MemoryLog>,
    sink: Box<dyn LogSink>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl AsyncConsumer {
    pub fn new(memory: Arc<MemoryLog>, sink: Box<dyn LogSink>) -> Self {
        Self {
            memory,
            sink,
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: Duration::from_millis(1),
        }
    }

    /// Create a consumer that writes to stderr
    pub fn stderr(memory: Arc<MemoryLog>, json: bool) -> Self {
        let sink: Box<dyn LogSink> = if json {
            Box::new(StderrSink::json())
        } else {
            Box::new(StderrSink::new())
        };
        Self::new(memory, sink)
    }

    /// Get a handle to stop the consumer
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until the stop handle is cleared, then drain what is left
    pub async fn run(mut self) {
        while self.running.load(Ordering::Relaxed) {
            if self.drain_once() == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        self.drain_once();
        let lost = self.memory.overwritten();
        if lost > 0 {
            let _ = writeln!(std::io::stderr(), "log ring overwrote {} entries", lost);
        }
        self.sink.flush();
    }

    fn drain_once(&mut self) -> usize {
        let mut count = 0;
        while let Some(entry) = self.memory.read() {
            self.sink.write_entry(&entry);
            count += 1;
        }
        if count > 0 {
            self.sink.flush();
        }
        count
    }
}
