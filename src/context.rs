//! Contextual enrichment (C5): merging context provider output into an
//! event's fields before rule matching runs.

use std::collections::BTreeMap;

use tracing::warn;

use crate::event::{Event, FieldValue};
use crate::registry::ContextProviderRegistry;

/// Runs every registered context provider and merges their fields into
/// `event.output_fields`, last-write-wins on key collision in provider
/// registration order. A provider that errors is logged and skipped; one
/// provider's failure never blocks the others or the event itself (spec.md
/// §5: enrichment is best-effort).
pub async fn enrich(event: &mut Event, providers: &ContextProviderRegistry) {
    let mut merged: BTreeMap<String, FieldValue> = BTreeMap::new();

    for name in providers.names().map(str::to_string).collect::<Vec<_>>() {
        let provider = match providers.get(&name) {
            Ok(p) => p,
            Err(_) => continue,
        };
        match provider.enrich().await {
            Ok(fields) => merged.extend(fields),
            Err(err) => warn!(provider = %name, error = %err, "context provider failed, skipping"),
        }
    }

    for (key, value) in merged {
        event.output_fields.insert(key, value);
    }
}
