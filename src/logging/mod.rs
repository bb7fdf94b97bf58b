// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured logging for the bridge
//
// Packet handlers write into a bounded in-memory ring without blocking; a
// tokio consumer task drains it to stderr. One-shot CLI commands log JSON
// straight to stderr instead.

mod consumer;
mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod ringbuffer;
mod severity;

pub use consumer::{AsyncConsumer, LogSink, StderrSink};
pub use entry::{KeyValue, LogEntry};
pub use facility::Facility;
pub use logger::{LogRegistry, LogWriter, Logger};
pub use ringbuffer::MemoryLog;
pub use severity::Severity;
