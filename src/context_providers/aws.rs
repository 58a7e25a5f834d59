//! AWS instance metadata context provider (C5), enriching events with the
//! instance profile and region of the node `wardend` is running on.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::StageError;
use crate::event::FieldValue;
use crate::registry::ContextProvider;

const TOKEN_URL: &str = "http://169.254.169.254/latest/api/token";
const IDENTITY_URL: &str = "http://169.254.169.254/latest/dynamic/instance-identity/document";
const IAM_INFO_URL: &str = "http://169.254.169.254/latest/meta-data/iam/info";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

#[derive(serde::Deserialize)]
struct IdentityDocument {
    region: String,
}

#[derive(serde::Deserialize)]
struct IamInfo {
    #[serde(rename = "InstanceProfileArn")]
    instance_profile_arn: String,
    #[serde(rename = "InstanceProfileId")]
    instance_profile_id: String,
}

/// Reads the running EC2 instance's identity document and IAM profile via
/// IMDSv2 (session-token based, no plain-IMDSv1 fallback).
pub struct InstanceMetadataProvider {
    client: Client,
}

impl InstanceMetadataProvider {
    pub fn new() -> InstanceMetadataProvider {
        InstanceMetadataProvider {
            client: Client::builder()
                .timeout(Duration::from_millis(500))
                .build()
                .expect("reqwest client builds with no custom TLS config"),
        }
    }

    async fn fetch_token(&self) -> Result<String, StageError> {
        self.client
            .put(TOKEN_URL)
            .header(TOKEN_TTL_HEADER, "60")
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?
            .text()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))
    }
}

impl Default for InstanceMetadataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextProvider for InstanceMetadataProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn enrich(&self) -> Result<BTreeMap<String, FieldValue>, StageError> {
        let token = self.fetch_token().await?;

        let identity: IdentityDocument = self
            .client
            .get(IDENTITY_URL)
            .header(TOKEN_HEADER, &token)
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?
            .json()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?;

        let iam: IamInfo = self
            .client
            .get(IAM_INFO_URL)
            .header(TOKEN_HEADER, &token)
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?
            .json()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?;

        let mut fields = BTreeMap::new();
        fields.insert(
            "aws.region".to_string(),
            FieldValue::String(identity.region),
        );
        fields.insert(
            "aws.instance_profile_arn".to_string(),
            FieldValue::String(iam.instance_profile_arn),
        );
        fields.insert(
            "aws.instance_profile_id".to_string(),
            FieldValue::String(iam.instance_profile_id),
        );
        Ok(fields)
    }
}
