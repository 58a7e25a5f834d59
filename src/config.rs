//! Parameter extraction (C12) and the top-level process configuration
//! (A2).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::ConfigError;
use crate::registry::Parameters;

/// Typed, defaulting access over a rule action's raw JSON parameters.
///
/// Every accessor returns the plugin's chosen default rather than an error
/// when the key is absent or the wrong JSON type — structural validation
/// already ran at rule-load time via `check_parameters`; by the time an
/// actionner reaches for a parameter it has already been accepted, so a
/// missing optional key is normal, not exceptional.
pub struct ParamExtractor<'a> {
    parameters: &'a Parameters,
}

impl<'a> ParamExtractor<'a> {
    pub fn new(parameters: &'a Parameters) -> ParamExtractor<'a> {
        ParamExtractor { parameters }
    }

    pub fn str(&self, key: &str, default: &str) -> String {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn i64(&self, key: &str, default: i64) -> i64 {
        self.parameters.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn u64(&self, key: &str, default: u64) -> u64 {
        self.parameters.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn f64(&self, key: &str, default: f64) -> f64 {
        self.parameters.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        self.parameters.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn string_vec(&self, key: &str) -> Vec<String> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn string_map(&self, key: &str) -> HashMap<String, String> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Custom validation for parameters that accept either a bare integer
/// count or a `"NN%"` percentage string (drain's `min_healthy_replicas`,
/// for instance).
pub fn is_absolute_or_percent(value: &str) -> Result<(), ValidationError> {
    if value.parse::<u64>().is_ok() {
        return Ok(());
    }
    if let Some(digits) = value.strip_suffix('%') {
        if digits.parse::<u64>().is_ok() {
            return Ok(());
        }
    }
    Err(ValidationError::new("not_absolute_or_percent"))
}

/// Parses a `"NN%"` or bare integer string into an absolute count given the
/// total it's relative to. Used by the drain actionner to resolve
/// `min_healthy_replicas` against the set of pods behind a workload.
pub fn resolve_absolute_or_percent(value: &str, total: usize) -> u64 {
    if let Some(digits) = value.strip_suffix('%') {
        let percent: f64 = digits.parse().unwrap_or(0.0);
        ((percent / 100.0) * total as f64).floor() as u64
    } else {
        value.parse().unwrap_or(0)
    }
}

/// Top-level process configuration (A2), loaded from a YAML file and
/// overridable by environment variables the way the teacher's own config
/// loader layers them.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_rules_path")]
    pub rules_path: String,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default = "default_notifiers")]
    pub notifiers: Vec<String>,

    #[serde(default)]
    pub aws_context_enabled: bool,

    /// Default deadline applied to an action's precondition-check-plus-run
    /// when it doesn't set its own `timeout_seconds` parameter (spec.md §5).
    /// `0` means no default timeout.
    #[serde(default)]
    pub action_timeout_seconds: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_rules_path() -> String {
    "rules.yaml".to_string()
}

fn default_notifiers() -> Vec<String> {
    vec!["stdout".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            listen_address: default_listen_address(),
            rules_path: default_rules_path(),
            json_logs: false,
            notifiers: default_notifiers(),
            aws_context_enabled: false,
            action_timeout_seconds: 0,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
