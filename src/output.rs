//! Concrete output stage implementations (C7): sinks that consume an
//! actionner's [`crate::registry::ActionnerOutcome`] and forward it
//! somewhere outside the cluster.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::ParamExtractor;
use crate::error::StageError;
use crate::registry::{ActionnerOutcome, Output, Parameters};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    objects: &'a std::collections::BTreeMap<String, String>,
    output: Option<&'a str>,
    result: Option<&'a str>,
}

/// Posts an actionner's outcome as JSON to a URL given in its own
/// parameters (`url`), the generic collaborator a rule reaches for when
/// it just needs the outcome to land in some other system.
pub struct WebhookOutput {
    client: Client,
}

impl WebhookOutput {
    pub fn new() -> WebhookOutput {
        WebhookOutput {
            client: Client::new(),
        }
    }
}

impl Default for WebhookOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Output for WebhookOutput {
    fn name(&self) -> &str {
        "webhook"
    }

    fn check_parameters(&self, parameters: &Parameters) -> Result<(), StageError> {
        let extractor = ParamExtractor::new(parameters);
        if extractor.str("url", "").is_empty() {
            return Err(StageError::Validation("url is required".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, outcome: &ActionnerOutcome, parameters: &Parameters) -> Result<(), StageError> {
        let extractor = ParamExtractor::new(parameters);
        let url = extractor.str("url", "");

        let payload = WebhookPayload {
            objects: &outcome.objects,
            output: outcome.output.as_deref(),
            result: outcome.result.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?;

        if !response.status().is_success() {
            return Err(StageError::TransientRemote(anyhow::anyhow!(
                "webhook output returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
