//! Rule set model (C2/C3): the name-indexed catalog of rules loaded at
//! startup, each binding a match predicate to an ordered list of actions.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::error::RuleError;
use crate::event::{FieldValue, Priority};
use crate::matcher::MatchPredicate;
use crate::registry::{ActionnerRegistry, NotifierRegistry, OutputRegistry, Parameters};

/// One output binding attached to an action: which output plugin runs and
/// with what parameters, once the action produces an outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputBinding {
    pub output: String,
    #[serde(default)]
    pub parameters: Parameters,
}

/// One step in a rule's action chain.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    /// Name used only in logs and notifications; does not have to be
    /// unique across rules.
    pub name: String,
    pub actionner: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub outputs: Vec<OutputBinding>,
    /// Notifiers to fan the resulting log lines out to, by name. Empty
    /// means "every registered notifier", matching spec.md §7's default.
    #[serde(default)]
    pub notifiers: Vec<String>,
    /// Per-action override of the rule's continue-on-error flag (spec.md
    /// §3, Action's "continue flag override"). `None` defers to the
    /// owning rule's [`RuleSpec::continue_on_error`].
    #[serde(default, rename = "continue")]
    pub continue_on_error: Option<bool>,
}

/// A named rule: a predicate over events (priority floor, source set, tag
/// subset, output-field equality map, and an optional expression — spec.md
/// §3/§4.2) plus the actions to run when it matches.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,

    /// If non-empty, the event's source must be one of these (spec.md
    /// §4.2's "source set"). Empty means any source matches.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Tags the event must carry; spec.md §4.2's "rule's required tags
    /// must be a subset of the event's". Empty means no tag requirement.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Output-field equality map: every (key, value) here must be present
    /// and equal in the event's `output_fields` (spec.md §4.2).
    #[serde(default)]
    pub match_fields: BTreeMap<String, FieldValue>,

    /// The optional fifth predicate part (spec.md §4.2): a sandboxed
    /// boolean expression evaluated against the event. `None` means this
    /// part of the predicate is vacuously true — the other four parts
    /// (priority floor, sources, tags, match_fields) carry the whole rule.
    #[serde(default, rename = "match")]
    pub match_expr: Option<String>,

    #[serde(default)]
    pub priority_floor: Option<Priority>,

    /// Default continue/halt policy for this rule's action chain (spec.md
    /// §3, Rule's "continue-on-error flag"): whether a `failure` status
    /// lets the remaining actions in this rule still run. An individual
    /// action may override this via [`Action::continue_on_error`].
    #[serde(default, rename = "continue")]
    pub continue_on_error: bool,
    pub actions: Vec<Action>,
}

/// A [`RuleSpec`] with its match expression pre-compiled.
pub struct Rule {
    pub spec: RuleSpec,
    pub predicate: MatchPredicate,
}

impl Rule {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// The full, validated rule catalog. Built once at startup (or on a
/// config-reload trigger) via [`RuleSet::try_build`] and never mutated
/// afterwards; the dispatcher only ever reads from it.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validates and compiles `specs` against the plugin registries,
    /// rejecting the whole set on the first problem so a typo'd actionner
    /// name fails at load time rather than silently no-opping at runtime.
    pub fn try_build(
        specs: Vec<RuleSpec>,
        actionners: &ActionnerRegistry,
        outputs: &OutputRegistry,
        notifiers: &NotifierRegistry,
    ) -> Result<RuleSet, RuleError> {
        let mut seen = HashMap::new();
        let mut rules = Vec::with_capacity(specs.len());

        for spec in specs {
            if seen.insert(spec.name.clone(), ()).is_some() {
                return Err(RuleError::DuplicateName { name: spec.name });
            }

            if matches!(&spec.match_expr, Some(expr) if expr.trim().is_empty()) {
                return Err(RuleError::EmptyMatch { rule: spec.name });
            }

            for action in &spec.actions {
                let actionner = actionners.get(&action.actionner).map_err(|_| RuleError::UnknownActionner {
                    rule: spec.name.clone(),
                    actionner: action.actionner.clone(),
                })?;
                actionner.check_parameters(&action.parameters).map_err(|source| {
                    RuleError::InvalidParameters {
                        rule: spec.name.clone(),
                        actionner: action.actionner.clone(),
                        source,
                    }
                })?;
                for binding in &action.outputs {
                    let output = outputs.get(&binding.output).map_err(|_| RuleError::UnknownOutput {
                        rule: spec.name.clone(),
                        output: binding.output.clone(),
                    })?;
                    output.check_parameters(&binding.parameters).map_err(|source| {
                        RuleError::InvalidParameters {
                            rule: spec.name.clone(),
                            actionner: binding.output.clone(),
                            source,
                        }
                    })?;
                }
                for notifier in &action.notifiers {
                    if !notifiers.contains(notifier) {
                        // Unknown notifier names are a load-time mistake too;
                        // reuse UnknownOutput's shape since the failure mode
                        // is identical (dangling plugin reference).
                        return Err(RuleError::UnknownOutput {
                            rule: spec.name.clone(),
                            output: notifier.clone(),
                        });
                    }
                }
            }

            let predicate = MatchPredicate::compile(&spec).map_err(|err| {
                RuleError::EmptyMatch {
                    rule: format!("{}: {}", spec.name, err),
                }
            })?;

            rules.push(Rule { spec, predicate });
        }

        Ok(RuleSet { rules })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
