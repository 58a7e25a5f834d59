//! Rule file loading (A3). The core's `RuleSet` doesn't parse YAML itself
//! per spec.md §6 ("rules are provided to the core as already-parsed
//! records"); this module is the loader that sits in front of it.

use std::path::Path;

use crate::error::RuleError;
use crate::registry::{ActionnerRegistry, NotifierRegistry, OutputRegistry};
use crate::rule::{RuleSet, RuleSpec};

pub fn load_rules_from_yaml(
    raw: &str,
    actionners: &ActionnerRegistry,
    outputs: &OutputRegistry,
    notifiers: &NotifierRegistry,
) -> Result<RuleSet, RuleError> {
    let specs: Vec<RuleSpec> = serde_yaml::from_str(raw)?;
    RuleSet::try_build(specs, actionners, outputs, notifiers)
}

pub fn load_rules_from_file(
    path: &Path,
    actionners: &ActionnerRegistry,
    outputs: &OutputRegistry,
    notifiers: &NotifierRegistry,
) -> Result<RuleSet, anyhow::Error> {
    let raw = std::fs::read_to_string(path)?;
    load_rules_from_yaml(&raw, actionners, outputs, notifiers).map_err(anyhow::Error::from)
}
