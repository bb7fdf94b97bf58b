// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for igmp-bridged.
//!
//! JSON5 format, so comments and trailing commas are allowed:
//!
//! ```json5
//! {
//!   upstream: "eth0",
//!   downstream: "eth1",
//!   igmp: { query_interval_secs: 125, last_member_query_count: 2 },
//!   logging: { level: "info", facilities: { Codec: "debug" } },
//! }
//! ```
//!
//! Every field is optional in the file; interface names given on the
//! command line override the file, and `validate` insists both are set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::logging::{Facility, LogRegistry, Severity};
use crate::protocols::igmp::{
    IgmpConfig, DEFAULT_LAST_MEMBER_QUERY_COUNT, DEFAULT_LAST_MEMBER_QUERY_INTERVAL,
    DEFAULT_QUERY_INTERVAL, DEFAULT_QUERY_RESPONSE_INTERVAL, DEFAULT_ROBUSTNESS_VARIABLE,
};
use crate::validation::{
    validate_at_most, validate_distinct_interfaces, validate_interface_name, validate_nonzero,
    validate_query_timing,
};

/// Largest query interval an IGMPv3 QQIC can express (RFC 3376 §4.1.7)
pub const MAX_QUERY_INTERVAL_SECS: u64 = 31744;

/// Largest last-member query interval a Max Resp Code can advertise (255 tenths)
pub const MAX_LAST_MEMBER_QUERY_INTERVAL_MS: u64 = 25_500;

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Interface toward the multicast source
    #[serde(default)]
    pub upstream: String,

    /// Interface toward the receivers
    #[serde(default)]
    pub downstream: String,

    #[serde(default)]
    pub igmp: IgmpSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// IGMP timer settings as written in the file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IgmpSettings {
    pub query_interval_secs: u64,
    pub query_response_interval_secs: u64,
    pub robustness: u8,
    pub last_member_query_interval_ms: u64,
    pub last_member_query_count: u8,
}

impl Default for IgmpSettings {
    fn default() -> Self {
        Self {
            query_interval_secs: DEFAULT_QUERY_INTERVAL.as_secs(),
            query_response_interval_secs: DEFAULT_QUERY_RESPONSE_INTERVAL.as_secs(),
            robustness: DEFAULT_ROBUSTNESS_VARIABLE,
            last_member_query_interval_ms: DEFAULT_LAST_MEMBER_QUERY_INTERVAL.as_millis() as u64,
            last_member_query_count: DEFAULT_LAST_MEMBER_QUERY_COUNT,
        }
    }
}

impl IgmpSettings {
    /// Timer set for the proxy engine
    pub fn to_engine_config(&self) -> IgmpConfig {
        IgmpConfig {
            query_interval: Duration::from_secs(self.query_interval_secs),
            query_response_interval: Duration::from_secs(self.query_response_interval_secs),
            robustness_variable: self.robustness,
            last_member_query_interval: Duration::from_millis(self.last_member_query_interval_ms),
            last_member_query_count: self.last_member_query_count,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.query_interval_secs, "igmp.query_interval_secs"),
            (self.query_response_interval_secs, "igmp.query_response_interval_secs"),
            (u64::from(self.robustness), "igmp.robustness"),
            (self.last_member_query_interval_ms, "igmp.last_member_query_interval_ms"),
            (u64::from(self.last_member_query_count), "igmp.last_member_query_count"),
        ];
        for (value, context) in checks {
            validate_nonzero(value, context).map_err(ConfigError::InvalidTimer)?;
        }

        let limits = [
            (self.query_interval_secs, MAX_QUERY_INTERVAL_SECS, "igmp.query_interval_secs"),
            (
                self.last_member_query_interval_ms,
                MAX_LAST_MEMBER_QUERY_INTERVAL_MS,
                "igmp.last_member_query_interval_ms",
            ),
        ];
        for (value, max, context) in limits {
            validate_at_most(value, max, context).map_err(ConfigError::InvalidTimer)?;
        }

        let engine = self.to_engine_config();
        validate_query_timing(engine.query_interval, engine.query_response_interval)
            .map_err(ConfigError::InvalidTimer)
    }
}

/// Log levels: a global minimum plus per-facility overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Global minimum severity, e.g. "info" or "Debug"
    pub level: String,

    /// Facility name → minimum severity
    pub facilities: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            facilities: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn global_level(&self) -> Result<Severity, ConfigError> {
        self.level.parse().map_err(|_| ConfigError::InvalidLogLevel {
            value: self.level.clone(),
            context: "logging.level".to_string(),
        })
    }

    /// Resolved per-facility overrides, in facility-name order
    pub fn facility_levels(&self) -> Result<Vec<(Facility, Severity)>, ConfigError> {
        self.facilities
            .iter()
            .map(|(name, level)| {
                let facility = Facility::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownFacility(name.clone()))?;
                let severity = level.parse().map_err(|_| ConfigError::InvalidLogLevel {
                    value: level.clone(),
                    context: format!("logging.facilities.{}", name),
                })?;
                Ok((facility, severity))
            })
            .collect()
    }

    /// Install these levels into a registry
    pub fn apply(&self, registry: &LogRegistry) -> Result<(), ConfigError> {
        registry.set_global_level(self.global_level()?);
        for (facility, severity) in self.facility_levels()? {
            registry.set_facility_level(facility, severity);
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize as pretty JSON, which every JSON5 reader accepts
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Replace interface names with command-line values where given
    pub fn with_interfaces(mut self, upstream: Option<String>, downstream: Option<String>) -> Self {
        if let Some(upstream) = upstream {
            self.upstream = upstream;
        }
        if let Some(downstream) = downstream {
            self.downstream = downstream;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, role) in [(&self.upstream, "upstream"), (&self.downstream, "downstream")] {
            validate_interface_name(name).map_err(|reason| ConfigError::InvalidInterfaceName {
                role,
                reason,
            })?;
        }
        validate_distinct_interfaces(&self.upstream, &self.downstream)
            .map_err(ConfigError::SameInterface)?;

        self.igmp.validate()?;
        self.logging.global_level()?;
        self.logging.facility_levels()?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid {role} interface: {reason}")]
    InvalidInterfaceName { role: &'static str, reason: String },

    #[error("{0}")]
    SameInterface(String),

    #[error("invalid IGMP timer: {0}")]
    InvalidTimer(String),

    #[error("invalid log level '{value}' in {context}")]
    InvalidLogLevel { value: String, context: String },

    #[error("unknown logging facility '{0}'")]
    UnknownFacility(String),
}
