//! Error taxonomy shared by actionners, outputs, and notifiers.
//!
//! The dispatcher is the only place that interprets a [`StageError`]'s
//! variant to decide whether a rule's remaining actions still run and what
//! [`crate::logline::Status`] to record. Leaf implementations only need to
//! pick the variant that matches what went wrong.

use thiserror::Error;

/// Outcome of a single actionner/output/notifier invocation, from the
/// perspective of the code that called it.
#[derive(Debug, Error)]
pub enum StageError {
    /// Parameters failed structural validation before the stage ran.
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// A precondition checked against the event or cluster state did not
    /// hold (e.g. target pod does not exist). Distinct from `Validation`
    /// because the parameters themselves were fine.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// A remote call failed in a way that a retry might fix. The
    /// dispatcher records this as a failure but does not treat it
    /// differently from a permanent failure today; the variant exists so
    /// that future retry logic has somewhere to hang.
    #[error("transient remote failure: {0}")]
    TransientRemote(#[source] anyhow::Error),

    /// The remote state had already moved (e.g. a network policy was
    /// updated concurrently) and the stage gave up rather than overwrite.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The stage was cancelled before completion, typically by a timeout
    /// or a shutdown signal.
    #[error("cancelled")]
    Cancelled,

    /// Anything else, including a caught panic.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl StageError {
    /// A precondition failure downgrades a stage's status to *ignored*
    /// rather than *failure* (spec.md §4.1, §7): the action was never
    /// applicable, not broken.
    pub fn is_precondition(&self) -> bool {
        matches!(self, StageError::Precondition(_))
    }

    /// Whether the rule's remaining actions should stop running after this
    /// one fails, given the effective continue flag for this action
    /// (spec.md §7's error taxonomy table):
    /// - `internal` (a recovered panic) never halts.
    /// - `cancelled` always halts, regardless of the continue flag.
    /// - `transient-remote`/`conflict` halt unless the action's (or its
    ///   rule's) continue flag says otherwise.
    /// - `validation`/`precondition` are handled before this is consulted
    ///   (they never reach here as a *failure*), but are treated as
    ///   non-halting for safety if they do.
    pub fn halts_chain(&self, continue_on_error: bool) -> bool {
        match self {
            StageError::Validation(_) | StageError::Precondition(_) => false,
            StageError::Internal(_) => false,
            StageError::Cancelled => true,
            StageError::TransientRemote(_) | StageError::Conflict(_) => !continue_on_error,
        }
    }
}

/// Errors raised while loading or validating a rule file (A3).
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {name:?} duplicates an earlier rule of the same name")]
    DuplicateName { name: String },

    #[error("rule {rule:?} references unknown actionner {actionner:?}")]
    UnknownActionner { rule: String, actionner: String },

    #[error("rule {rule:?} references unknown output {output:?}")]
    UnknownOutput { rule: String, output: String },

    #[error("rule {rule:?} action {actionner:?} has invalid parameters: {source}")]
    InvalidParameters {
        rule: String,
        actionner: String,
        #[source]
        source: StageError,
    },

    #[error("rule {rule:?} has an empty match expression")]
    EmptyMatch { rule: String },

    #[error("failed to parse rule file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors raised while evaluating a rule's match expression (C4).
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("failed to compile expression {expr:?}: {source}")]
    Compile {
        expr: String,
        #[source]
        source: evalexpr::EvalexprError,
    },

    #[error("failed to evaluate expression {expr:?}: {source}")]
    Eval {
        expr: String,
        #[source]
        source: evalexpr::EvalexprError,
    },
}

/// Errors raised by the plugin registries (C3) at registration time.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} {name:?} is already registered")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} {name:?} is not registered")]
    NotFound { kind: &'static str, name: String },
}

/// Errors surfaced by the ingress and config loading layers.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
