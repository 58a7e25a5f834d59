//! The immutable alert event (C1).
//!
//! An `Event` is built once from an ingress payload and never mutated except
//! for `output_fields` growth during context enrichment (C5). Accessors
//! return empty values rather than `Option` where the spec calls for "empty
//! string when absent" so call sites read naturally.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Alert severity, ordered least to most severe so that `rank() >= floor`
/// reads the same direction as spec.md's "priority floor" predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Debug,
    Informational,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Priority {
    /// Numeric severity rank, ascending. Used by the rule matcher's
    /// priority-floor predicate.
    pub fn rank(self) -> u8 {
        self as u8
    }

    fn from_str_lossy(s: &str) -> Priority {
        match s.to_ascii_lowercase().as_str() {
            "emergency" => Priority::Emergency,
            "alert" => Priority::Alert,
            "critical" => Priority::Critical,
            "error" => Priority::Error,
            "warning" => Priority::Warning,
            "notice" => Priority::Notice,
            "informational" | "info" => Priority::Informational,
            _ => Priority::Debug,
        }
    }
}

/// Deserializes a priority, falling back to `Debug` for any value the
/// upstream detector sends that we don't recognize, per spec.md §6: "Events
/// lacking a recognized priority are accepted with priority debug."
fn deserialize_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(Priority::from_str_lossy(&raw))
}

fn default_priority() -> Priority {
    Priority::Debug
}

/// A dynamically-typed output field value: string, number, or bool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl FieldValue {
    /// Lossy string projection, used for equality matching and accessors
    /// that return `String` per the spec's "empty string when absent"
    /// invariant.
    pub fn as_str_lossy(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            FieldValue::String(s) => s.clone(),
        }
    }
}

fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One alert record passed from the upstream detector.
///
/// Immutable after construction except for `output_fields`, which context
/// enrichment (C5) grows in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "new_trace_id")]
    pub trace_id: String,

    /// Name of the rule that matched, filled in by the dispatcher once a
    /// match is found. Empty on the raw ingress event.
    #[serde(default)]
    pub rule: String,

    #[serde(default = "default_priority", deserialize_with = "deserialize_priority")]
    pub priority: Priority,

    pub source: String,

    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub output_fields: BTreeMap<String, FieldValue>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub time: DateTime<Utc>,
}

impl Event {
    fn field_str(&self, key: &str) -> Option<String> {
        self.output_fields.get(key).map(FieldValue::as_str_lossy)
    }

    fn first_field_str(&self, keys: &[&str]) -> String {
        for key in keys {
            if let Some(v) = self.field_str(key) {
                if !v.is_empty() {
                    return v;
                }
            }
        }
        String::new()
    }

    pub fn get_pod_name(&self) -> String {
        self.first_field_str(&["k8s.pod.name", "ka.pod.name"])
    }

    pub fn get_namespace_name(&self) -> String {
        self.first_field_str(&["k8s.ns.name", "ka.target.namespace"])
    }

    /// The remote IP of an outbound connection, preferring the source IP
    /// field (`fd.sip`) falling back to the remote IP field (`fd.rip`).
    /// Returns `None` if absent or not a valid IPv4 address.
    pub fn get_remote_ip(&self) -> Option<Ipv4Addr> {
        self.field_str("fd.sip")
            .or_else(|| self.field_str("fd.rip"))
            .and_then(|s| s.parse().ok())
    }

}
