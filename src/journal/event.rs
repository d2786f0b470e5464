//! Audit records and their newline-delimited JSON encoding.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ratelimit::Decision;

/// Admission outcome as written to the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Allowed,
    Blocked,
}

impl From<Decision> for AuditStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed => AuditStatus::Allowed,
            Decision::Blocked => AuditStatus::Blocked,
        }
    }
}

/// One admission decision.
///
/// On disk this is a single JSON object per line:
/// `{"ip":..,"endpoint":..,"timestamp":..,"status":"allowed"|"blocked"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Client identifier the decision was made for
    pub ip: String,
    /// Requested endpoint (path and query)
    pub endpoint: String,
    /// Wall-clock time the record was created
    #[serde(with = "iso8601_millis")]
    pub timestamp: DateTime<Utc>,
    /// Admission outcome
    pub status: AuditStatus,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    ///
    /// The timestamp is truncated to the millisecond precision the journal
    /// stores, so the event equals what is later read back.
    pub fn new(ip: impl Into<String>, endpoint: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            ip: ip.into(),
            endpoint: endpoint.into(),
            timestamp: Utc::now().trunc_subsecs(3),
            status,
        }
    }

    /// Encode as one journal line, trailing newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode a single journal line (without its newline).
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
mod iso8601_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
