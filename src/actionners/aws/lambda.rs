//! The `aws:lambda` actionner (C4.9): invokes a configured Lambda function
//! with the triggering event as its JSON payload, the one event-driven
//! (rather than Kubernetes-native) response available.

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType as SdkInvocationType;
use aws_sdk_lambda::Client as LambdaClient;
use tracing::info;

use crate::config::ParamExtractor;
use crate::error::StageError;
use crate::event::Event;
use crate::registry::{Actionner, ActionnerOutcome, Capabilities, Parameters};

pub struct LambdaActionner {
    client: LambdaClient,
}

impl LambdaActionner {
    pub fn new(client: LambdaClient) -> LambdaActionner {
        LambdaActionner { client }
    }

    pub async fn from_env() -> LambdaActionner {
        let config = aws_config::load_from_env().await;
        LambdaActionner::new(LambdaClient::new(&config))
    }
}

fn invocation_type(value: &str) -> SdkInvocationType {
    match value {
        "DryRun" => SdkInvocationType::DryRun,
        "Event" => SdkInvocationType::Event,
        _ => SdkInvocationType::RequestResponse,
    }
}

#[async_trait]
impl Actionner for LambdaActionner {
    fn name(&self) -> &str {
        "aws:lambda"
    }

    fn category(&self) -> &str {
        "aws"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ActionWithOutput
    }

    fn check_parameters(&self, parameters: &Parameters) -> Result<(), StageError> {
        let extractor = ParamExtractor::new(parameters);
        if extractor.str("aws_lambda_name", "").is_empty() {
            return Err(StageError::Validation(
                "aws_lambda_name is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn check_precondition(&self, _event: &Event, _parameters: &Parameters) -> Result<(), StageError> {
        Ok(())
    }

    async fn action(&self, event: &Event, parameters: &Parameters) -> Result<ActionnerOutcome, StageError> {
        let extractor = ParamExtractor::new(parameters);
        let function_name = extractor.str("aws_lambda_name", "");
        // Falls back to $LATEST the same way an unqualified invoke does,
        // rather than requiring every rule to pin a version.
        let qualifier = extractor.str("aws_lambda_alias_or_version", "$LATEST");
        let invocation_type =
            invocation_type(&extractor.str("aws_lambda_invocation_type", "RequestResponse"));

        let payload = serde_json::to_vec(event)
            .map_err(|err| StageError::Internal(anyhow::anyhow!(err)))?;

        let response = self
            .client
            .invoke()
            .function_name(&function_name)
            .qualifier(&qualifier)
            .invocation_type(invocation_type)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(anyhow::anyhow!(err)))?;

        if let Some(error_type) = response.function_error() {
            return Err(StageError::TransientRemote(anyhow::anyhow!(
                "lambda {function_name} returned an error: {error_type}"
            )));
        }

        let result = response
            .payload()
            .map(|blob| String::from_utf8_lossy(blob.as_ref()).to_string());

        info!(function = %function_name, "invoked lambda");

        let mut objects = std::collections::BTreeMap::new();
        objects.insert("function_name".to_string(), function_name.clone());
        objects.insert("qualifier".to_string(), qualifier);

        Ok(ActionnerOutcome {
            objects,
            output: Some(format!("invoked {function_name}")),
            result,
        })
    }
}
