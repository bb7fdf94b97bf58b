// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging
//
// Each level macro takes either a plain message expression or a format
// string with arguments. The formatted form checks the level first so
// filtered-out messages cost no allocation.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($logger:expr, $severity:expr, $facility:expr, $fmt:literal, $($arg:expr),+ $(,)?) => {{
        let logger = &$logger;
        if logger.enabled($severity, $facility) {
            logger.log($severity, $facility, &format!($fmt, $($arg),+));
        }
    }};
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr) => {
        $logger.log($severity, $facility, $msg)
    };
}

/// Log a message with emergency severity
///
/// # Examples
/// ```ignore
/// log_emergency!(logger, Facility::Bridge, "Upstream and downstream both gone");
/// ```
#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Emergency, $facility, $($rest)+)
    };
}

/// Log a message with alert severity
///
/// # Examples
/// ```ignore
/// log_alert!(logger, Facility::Network, "Capture socket on {} closed", iface);
/// ```
#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Alert, $facility, $($rest)+)
    };
}

/// Log a message with critical severity
///
/// # Examples
/// ```ignore
/// log_critical!(logger, Facility::Timers, "Timer manager stopped");
/// ```
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Critical, $facility, $($rest)+)
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, Facility::Proxy, "Failed to send group query: {}", err);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Error, $facility, $($rest)+)
    };
}

/// Log a message with warning severity
///
/// # Examples
/// ```ignore
/// log_warning!(logger, Facility::Network, "Leave of {} rejected: {}", group, err);
/// ```
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Warning, $facility, $($rest)+)
    };
}

/// Log a message with notice severity
///
/// # Examples
/// ```ignore
/// log_notice!(logger, Facility::RouteTable, "Route {} expired", group);
/// ```
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Notice, $facility, $($rest)+)
    };
}

/// Log a message with info severity
///
/// # Examples
/// ```ignore
/// log_info!(logger, Facility::RouteTable, "Route inserted");
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Info, $facility, $($rest)+)
    };
}

/// Log a message with debug severity
///
/// # Examples
/// ```ignore
/// log_debug!(logger, Facility::Codec, "Ignoring IGMP type {:#04x}", kind);
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $($rest:tt)+) => {
        $crate::__log_at!($logger, $crate::logging::Severity::Debug, $facility, $($rest)+)
    };
}

/// Log a message with key-value pairs
///
/// # Examples
/// ```ignore
/// log_kv!(logger, Severity::Info, Facility::Proxy, "Membership report",
///         "group" => "239.1.1.1", "reporter" => "10.0.0.5");
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let kvs: &[(&str, &str)] = &[$(($key, $value)),+];
        $logger.log_kv($severity, $facility, $msg, kvs)
    }};
}

#[cfg(test)]
mod tests {
    use crate::logging::{Facility, LogRegistry, Severity};

    #[test]
    fn test_log_macros() {
        let registry = LogRegistry::new(16);
        registry.set_global_level(Severity::Debug);
        let logger = registry.logger();

        log_emergency!(logger, Facility::Test, "Emergency message");
        log_alert!(logger, Facility::Test, "Alert message");
        log_critical!(logger, Facility::Test, "Critical message");
        log_error!(logger, Facility::Test, "Error message");
        log_warning!(logger, Facility::Test, "Warning message");
        log_notice!(logger, Facility::Test, "Notice message");
        log_info!(logger, Facility::Test, "Info message");
        log_debug!(logger, Facility::Test, "Debug message {}", 8);

        let severities: Vec<Severity> = registry
            .memory()
            .drain()
            .into_iter()
            .map(|entry| entry.severity)
            .collect();
        assert_eq!(severities.len(), 8);
        assert_eq!(severities[0], Severity::Emergency);
        assert_eq!(severities[7], Severity::Debug);
    }

    #[test]
    fn test_formatted_message() {
        let registry = LogRegistry::new(16);
        let logger = registry.logger();
        let group = std::net::Ipv4Addr::new(239, 1, 1, 1);

        log_info!(logger, Facility::Test, "Route {} inserted", group);
        log_debug!(logger, Facility::Test, "filtered {}", group);

        let entries = registry.memory().drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Route 239.1.1.1 inserted");
    }

    #[test]
    fn test_log_kv_macro() {
        let registry = LogRegistry::new(16);
        let logger = registry.logger();

        log_kv!(
            logger,
            Severity::Info,
            Facility::Test,
            "Test with context",
            "group" => "239.1.1.1",
            "iface" => "eth1"
        );

        let entry = registry.memory().read().unwrap();
        assert_eq!(entry.kv("group"), Some("239.1.1.1"));
        assert_eq!(entry.kv("iface"), Some("eth1"));
    }
}
