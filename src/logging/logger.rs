// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handles and the registry that owns shared filtering state

use super::entry::LogEntry;
use super::ringbuffer::MemoryLog;
use super::{Facility, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

type FacilityLevels = Arc<RwLock<HashMap<Facility, Severity>>>;

/// Destination for entries that pass level filtering
pub trait LogWriter: Send + Sync {
    fn write(&self, entry: LogEntry);
}

impl LogWriter for MemoryLog {
    fn write(&self, entry: LogEntry) {
        MemoryLog::write(self, entry);
    }
}

/// Simple stderr JSON logger (no ring, direct output)
pub struct StderrJsonLogger;

impl LogWriter for StderrJsonLogger {
    fn write(&self, entry: LogEntry) {
        eprintln!("{}", entry.to_json());
    }
}

/// Logger handle for writing log entries
///
/// Cheap to clone; every clone shares the writer and the level settings of
/// the registry it came from.
#[derive(Clone)]
pub struct Logger {
    writer: Arc<dyn LogWriter>,
    global_min_level: Arc<AtomicU8>,
    facility_min_levels: FacilityLevels,
}

impl Logger {
    fn with_writer(
        writer: Arc<dyn LogWriter>,
        global_min_level: Arc<AtomicU8>,
        facility_min_levels: FacilityLevels,
    ) -> Self {
        Self {
            writer,
            global_min_level,
            facility_min_levels,
        }
    }

    /// Create a logger that writes JSON directly to stderr
    ///
    /// Used by one-shot CLI commands that exit before a consumer task could
    /// drain a ring.
    pub fn stderr_json() -> Self {
        Self::with_writer(
            Arc::new(StderrJsonLogger),
            Arc::new(AtomicU8::new(Severity::Info as u8)),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    /// Check if a log message should be written based on severity filtering
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        {
            let levels = self
                .facility_min_levels
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(&min_level) = levels.get(&facility) {
                return severity <= min_level;
            }
        }

        let global_min = self.global_min_level.load(Ordering::Relaxed);
        (severity as u8) <= global_min
    }

    /// Whether a message at `severity` for `facility` would be written.
    ///
    /// Lets hot paths skip formatting work for filtered-out messages.
    #[inline]
    pub fn enabled(&self, severity: Severity, facility: Facility) -> bool {
        self.should_log(severity, facility)
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.writer.write(LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value pairs
    #[inline]
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }

        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            if !entry.add_kv(key, value) {
                break;
            }
        }
        self.writer.write(entry);
    }

    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    /// Set the global minimum log level
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(facility, level);
    }
}

/// Registry owning the in-memory ring and the level settings shared by
/// every logger handed out.
pub struct LogRegistry {
    memory: Arc<MemoryLog>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels (overrides global)
    facility_min_levels: FacilityLevels,
}

impl LogRegistry {
    /// Create a registry backed by a ring of `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: Arc::new(MemoryLog::new(capacity)),
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a logger writing into this registry's ring
    pub fn logger(&self) -> Logger {
        Logger::with_writer(
            Arc::clone(&self.memory) as Arc<dyn LogWriter>,
            Arc::clone(&self.global_min_level),
            Arc::clone(&self.facility_min_levels),
        )
    }

    /// The ring, for a consumer task or for inspection in tests
    pub fn memory(&self) -> Arc<MemoryLog> {
        Arc::clone(&self.memory)
    }

    /// Set the global minimum log level
    ///
    /// This affects all facilities unless overridden by facility-specific levels.
    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> Severity {
        let level = self.global_min_level.load(Ordering::Relaxed);
        Severity::from_u8(level).unwrap_or(Severity::Info)
    }

    /// Set the minimum log level for a specific facility
    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(facility, level);
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        self.facility_min_levels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&facility);
    }

    /// Effective level for a facility: its override if set, else the global level
    pub fn get_facility_level(&self, facility: Facility) -> Severity {
        let levels = self
            .facility_min_levels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        levels
            .get(&facility)
            .copied()
            .unwrap_or_else(|| self.get_global_level())
    }
}

impl Default for LogRegistry {
    fn default() -> Self {
        Self::new(super::ringbuffer::DEFAULT_CAPACITY)
    }
}
