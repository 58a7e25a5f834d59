//! Pushes log lines to a Loki endpoint as a single stream per notifier
//! instance, labeled by rule and actionner so they're filterable in Grafana
//! without parsing the JSON body.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::StageError;
use crate::logline::LogLine;
use crate::registry::Notifier;

#[derive(Debug, Clone)]
pub struct LokiSettings {
    pub url: String,
    pub tenant_id: Option<String>,
}

#[derive(Serialize)]
struct Payload {
    streams: Vec<Stream>,
}

#[derive(Serialize)]
struct Stream {
    stream: BTreeMap<String, String>,
    values: Vec<[String; 2]>,
}

pub struct LokiNotifier {
    client: Client,
    settings: LokiSettings,
}

impl LokiNotifier {
    pub fn new(settings: LokiSettings) -> LokiNotifier {
        LokiNotifier {
            client: Client::new(),
            settings,
        }
    }

    fn payload(&self, line: &LogLine) -> Result<Payload, StageError> {
        let mut labels = BTreeMap::new();
        labels.insert("job".to_string(), "warden".to_string());
        if let Some(rule) = &line.rule {
            labels.insert("rule".to_string(), rule.clone());
        }
        if let Some(actionner) = &line.actionner {
            labels.insert("actionner".to_string(), actionner.clone());
        }

        let body = serde_json::to_string(line).map_err(|err| StageError::Internal(anyhow::anyhow!(err)))?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| StageError::Internal(anyhow::anyhow!(err)))?
            .as_nanos();

        Ok(Payload {
            streams: vec![Stream {
                stream: labels,
                values: vec![[nanos.to_string(), body]],
            }],
        })
    }
}

#[async_trait]
impl Notifier for LokiNotifier {
    fn name(&self) -> &str {
        "loki"
    }

    async fn notify(&self, line: &LogLine) -> Result<(), StageError> {
        let payload = self.payload(line)?;
        let mut request = self
            .client
            .post(format!("{}/loki/api/v1/push", self.settings.url))
            .json(&payload);
        if let Some(tenant) = &self.settings.tenant_id {
            request = request.header("X-Scope-OrgID", tenant);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StageError::TransientRemote(err.into()))?;

        if !response.status().is_success() {
            return Err(StageError::TransientRemote(anyhow::anyhow!(
                "loki push returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
