//! Event data model

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Type key used for error and message events in discard accounting.
pub const EVENT_TYPE: &str = "event";

pub const SDK_NAME: &str = "temps-reporter";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            other => Err(ConfigError::invalid_value(
                "level",
                format!("unknown level '{}'", other),
            )),
        }
    }
}

/// A single backtrace frame
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
}

/// One error of a cause chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Type name, e.g. `ParseIntError`
    #[serde(rename = "type")]
    pub ty: String,
    /// The error message
    pub value: String,
    /// Frames in backtrace order, innermost call first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<Frame>,
    /// Index of the record this one was caused by, within the same event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<usize>,
}

impl ExceptionRecord {
    pub fn new(ty: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            value: value.into(),
            frames: Vec::new(),
            caused_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
}

impl Default for SdkInfo {
    fn default() -> Self {
        Self {
            name: SDK_NAME.to_string(),
            version: SDK_VERSION.to_string(),
        }
    }
}

/// A captured error or message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Most recent error first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<ExceptionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkInfo>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: Level::Error,
            logger: None,
            transaction: None,
            tags: HashMap::new(),
            message: None,
            exceptions: Vec::new(),
            environment: None,
            release: None,
            server_name: None,
            platform: "rust".to_string(),
            sdk: None,
        }
    }
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type key used for discard accounting
    pub fn ty(&self) -> &'static str {
        EVENT_TYPE
    }

    /// Messages of the exception chain, most recent first.
    pub fn exception_messages(&self) -> Vec<&str> {
        self.exceptions.iter().map(|e| e.value.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_str() {
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("fatal".parse::<Level>().unwrap(), Level::Fatal);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_new_events_have_unique_ids() {
        let a = Event::new();
        let b = Event::new();
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.platform, "rust");
        assert_eq!(a.ty(), EVENT_TYPE);
    }

    #[test]
    fn test_exception_record_serializes_type_field() {
        let record = ExceptionRecord::new("ParseIntError", "invalid digit found in string");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "ParseIntError");
        assert_eq!(json["value"], "invalid digit found in string");
        assert!(json.get("frames").is_none());
        assert!(json.get("caused_by").is_none());
    }
}
