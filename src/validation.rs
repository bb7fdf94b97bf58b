// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Validation helpers shared by configuration loading and the CLI.

use std::time::Duration;

/// Maximum interface name length (Linux IFNAMSIZ - 1)
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Result type for validation functions
pub type ValidationResult = Result<(), String>;

/// Validate an interface name according to Linux kernel rules.
///
/// # Rules
/// - Must not be empty
/// - Must not exceed 15 characters (IFNAMSIZ - 1)
/// - Must contain only alphanumeric characters, dash, underscore, or dot
/// - Must not start with a digit, dash, or dot
pub fn validate_interface_name(name: &str) -> ValidationResult {
    if name.is_empty() {
        return Err("interface name cannot be empty".to_string());
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(format!(
            "interface name '{}' exceeds maximum length of {} characters",
            name, MAX_INTERFACE_NAME_LEN
        ));
    }

    if let Some((i, c)) = name
        .chars()
        .enumerate()
        .find(|&(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!(
            "interface name '{}' contains invalid character '{}' at position {}",
            name, c, i
        ));
    }

    match name.chars().next() {
        Some(first) if first.is_ascii_digit() => Err(format!(
            "interface name '{}' cannot start with a digit",
            name
        )),
        Some(first @ ('-' | '.')) => Err(format!(
            "interface name '{}' cannot start with '{}'",
            name, first
        )),
        _ => Ok(()),
    }
}

/// The bridge needs two distinct links.
pub fn validate_distinct_interfaces(upstream: &str, downstream: &str) -> ValidationResult {
    if upstream == downstream {
        return Err(format!(
            "upstream and downstream must be different interfaces, both are '{}'",
            upstream
        ));
    }
    Ok(())
}

/// Reject zero for counts and intervals where zero would stall the protocol.
pub fn validate_nonzero(value: u64, context: &str) -> ValidationResult {
    if value == 0 {
        return Err(format!("{} must be greater than 0", context));
    }
    Ok(())
}

/// Reject values above `max`.
pub fn validate_at_most(value: u64, max: u64, context: &str) -> ValidationResult {
    if value > max {
        return Err(format!("{} must be at most {}, got {}", context, max, value));
    }
    Ok(())
}

/// RFC 2236 §8.3: the query response interval must be shorter than the
/// query interval.
pub fn validate_query_timing(query_interval: Duration, response_interval: Duration) -> ValidationResult {
    if response_interval >= query_interval {
        return Err(format!(
            "query response interval ({}s) must be less than the query interval ({}s)",
            response_interval.as_secs_f64(),
            query_interval.as_secs_f64()
        ));
    }
    Ok(())
}
