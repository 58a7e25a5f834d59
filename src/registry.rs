//! Name-indexed, two-phase plugin catalogs (C3).
//!
//! Each plugin kind (actionner, output, notifier, context provider) is a
//! trait object behind an `Arc`, registered into a builder at startup and
//! then frozen into an immutable map. Freezing before the dispatcher starts
//! means every lookup afterwards is a lock-free `HashMap` read, not a
//! `RwLock` acquisition on the event hot path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RegistryError, StageError};
use crate::event::Event;

/// Parameters bound to one action invocation, as a raw JSON object. Typed
/// access goes through [`crate::config::ParamExtractor`]; plugins never see
/// `serde_json::Value` directly past that layer.
pub type Parameters = Map<String, Value>;

/// What an actionner is allowed to do, declared once at registration and
/// consulted by the dispatcher before it runs. Mirrors the "category"
/// concept of the original action catalog: a `kubernetes` actionner cannot
/// satisfy a rule asking for an `aws` actionner even if named the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    /// Produces no output of its own; downstream outputs are optional.
    ActionOnly,
    /// Always produces a default output that a rule may bind further
    /// outputs onto (e.g. drain always emits an eviction summary).
    ActionWithOutput,
}

/// Outcome of a successful actionner invocation, carried forward into any
/// bound outputs and into the notification payload.
#[derive(Debug, Clone, Default)]
pub struct ActionnerOutcome {
    pub objects: std::collections::BTreeMap<String, String>,
    pub output: Option<String>,
    pub result: Option<String>,
}

/// A pluggable response to a matched rule (C4).
///
/// Implementations live under [`crate::actionners`]. The four-method shape
/// mirrors the original catalog's contract: validate parameters once at
/// rule-load time, check runtime preconditions, then act.
#[async_trait]
pub trait Actionner: Send + Sync {
    /// Stable name rules reference, e.g. `"kubernetes:drain"`.
    fn name(&self) -> &str;

    fn category(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Structural validation of `parameters`, run once when the rule set is
    /// loaded so malformed rules fail before any event arrives.
    fn check_parameters(&self, parameters: &Parameters) -> Result<(), StageError>;

    /// Runtime preconditions against the triggering event (pod exists,
    /// remote IP present, ...). Run immediately before `action`.
    async fn check_precondition(&self, event: &Event, parameters: &Parameters) -> Result<(), StageError>;

    async fn action(&self, event: &Event, parameters: &Parameters) -> Result<ActionnerOutcome, StageError>;
}

/// A pluggable sink that forwards an actionner's outcome somewhere (C4
/// output stage), e.g. posting the drain summary to a ticketing system.
#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    fn check_parameters(&self, parameters: &Parameters) -> Result<(), StageError>;

    async fn publish(&self, outcome: &ActionnerOutcome, parameters: &Parameters) -> Result<(), StageError>;
}

/// A pluggable notification sink (C7), receiving one [`crate::logline::LogLine`]
/// per completed stage.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, line: &crate::logline::LogLine) -> Result<(), StageError>;
}

/// A pluggable source of contextual enrichment (C5), merged into an event's
/// `output_fields` before rule matching.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(&self) -> Result<std::collections::BTreeMap<String, crate::event::FieldValue>, StageError>;
}

/// Generates a builder/frozen-registry pair for a plugin trait.
///
/// `$builder` accumulates `Arc<dyn $trait>` entries under a unique name and
/// rejects duplicates immediately (rule files are expected to fail fast on
/// a typo'd actionner name, not silently shadow one plugin with another).
/// `.freeze()` consumes the builder into `$registry`, whose only operation
/// is a read-only `get`.
macro_rules! plugin_registry {
    ($builder:ident, $registry:ident, $trait:ident, $kind:literal) => {
        #[derive(Default)]
        pub struct $builder {
            entries: HashMap<String, Arc<dyn $trait>>,
        }

        impl $builder {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn register(&mut self, plugin: Arc<dyn $trait>) -> Result<(), RegistryError> {
                let name = plugin.name().to_string();
                if self.entries.contains_key(&name) {
                    return Err(RegistryError::Duplicate { kind: $kind, name });
                }
                self.entries.insert(name, plugin);
                Ok(())
            }

            pub fn freeze(self) -> $registry {
                $registry {
                    entries: self.entries,
                }
            }
        }

        #[derive(Clone, Default)]
        pub struct $registry {
            entries: HashMap<String, Arc<dyn $trait>>,
        }

        impl $registry {
            pub fn get(&self, name: &str) -> Result<Arc<dyn $trait>, RegistryError> {
                self.entries
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RegistryError::NotFound {
                        kind: $kind,
                        name: name.to_string(),
                    })
            }

            pub fn contains(&self, name: &str) -> bool {
                self.entries.contains_key(name)
            }

            pub fn names(&self) -> impl Iterator<Item = &str> {
                self.entries.keys().map(String::as_str)
            }
        }
    };
}

plugin_registry!(ActionnerRegistryBuilder, ActionnerRegistry, Actionner, "actionner");
plugin_registry!(OutputRegistryBuilder, OutputRegistry, Output, "output");
plugin_registry!(NotifierRegistryBuilder, NotifierRegistry, Notifier, "notifier");
plugin_registry!(
    ContextProviderRegistryBuilder,
    ContextProviderRegistry,
    ContextProvider,
    "context provider"
);

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Actionner for Noop {
        fn name(&self) -> &str {
            self.0
        }

        fn category(&self) -> &str {
            "test"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::ActionOnly
        }

        fn check_parameters(&self, _parameters: &Parameters) -> Result<(), StageError> {
            Ok(())
        }

        async fn check_precondition(&self, _event: &Event, _parameters: &Parameters) -> Result<(), StageError> {
            Ok(())
        }

        async fn action(&self, _event: &Event, _parameters: &Parameters) -> Result<ActionnerOutcome, StageError> {
            Ok(ActionnerOutcome::default())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = ActionnerRegistryBuilder::new();
        builder.register(Arc::new(Noop("kubernetes:drain"))).unwrap();
        let err = builder
            .register(Arc::new(Noop("kubernetes:drain")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    fn frozen_registry_resolves_by_name() {
        let mut builder = ActionnerRegistryBuilder::new();
        builder.register(Arc::new(Noop("kubernetes:drain"))).unwrap();
        let registry = builder.freeze();
        assert!(registry.get("kubernetes:drain").is_ok());
        assert!(matches!(
            registry.get("missing").unwrap_err(),
            RegistryError::NotFound { .. }
        ));
    }
}
