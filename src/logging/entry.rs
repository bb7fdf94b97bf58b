// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use super::{Facility, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Most entries carry at most a group and an interface; keep a small cap so
/// a runaway caller cannot grow entries without bound.
pub const MAX_KVS: usize = 4;

/// Key-value pair for structured logging
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A single log record as it sits in the in-memory ring.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kvs: Vec<KeyValue>,
}

impl LogEntry {
    /// Create a new log entry stamped with the current wall-clock time
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    /// Attach a key-value pair. Returns false once `MAX_KVS` is reached.
    pub fn add_kv(&mut self, key: &str, value: &str) -> bool {
        if self.kvs.len() >= MAX_KVS {
            return false;
        }
        self.kvs.push(KeyValue::new(key, value));
        true
    }

    /// Look up a key-value pair by key
    pub fn kv(&self, key: &str) -> Option<&str> {
        self.kvs
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    /// Render as `[SEVERITY] [Facility] message key=value ...`
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {}",
            self.severity,
            self.facility.as_str(),
            self.message
        );
        for kv in &self.kvs {
            line.push(' ');
            line.push_str(&format!("{:?}", kv));
        }
        line
    }

    /// Render as a single-line JSON object
    pub fn to_json(&self) -> String {
        let mut object = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.severity.as_str(),
            "facility": self.facility.as_str(),
            "message": self.message,
        });
        if !self.kvs.is_empty() {
            let fields: serde_json::Map<String, serde_json::Value> = self
                .kvs
                .iter()
                .map(|kv| (kv.key.clone(), serde_json::Value::String(kv.value.clone())))
                .collect();
            object["fields"] = serde_json::Value::Object(fields);
        }
        object.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_limit() {
        let mut entry = LogEntry::new(Severity::Info, Facility::Test, "msg");
        for i in 0..MAX_KVS {
            assert!(entry.add_kv("k", &i.to_string()));
        }
        assert!(!entry.add_kv("overflow", "x"));
        assert_eq!(entry.kvs.len(), MAX_KVS);
    }

    #[test]
    fn test_format_line() {
        let mut entry = LogEntry::new(Severity::Info, Facility::RouteTable, "Route inserted");
        entry.add_kv("group", "239.1.1.1");
        assert_eq!(
            entry.format_line(),
            "[INFO] [RouteTable] Route inserted group=239.1.1.1"
        );
        assert_eq!(entry.kv("group"), Some("239.1.1.1"));
        assert_eq!(entry.kv("missing"), None);
    }

    #[test]
    fn test_to_json_fields() {
        let mut entry = LogEntry::new(Severity::Warning, Facility::Network, "Leave rejected");
        entry.add_kv("group", "239.9.9.9");
        let value: serde_json::Value = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(value["level"], "WARNING");
        assert_eq!(value["facility"], "Network");
        assert_eq!(value["fields"]["group"], "239.9.9.9");
    }
}
