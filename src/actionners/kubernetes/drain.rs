//! The `kubernetes:drain` actionner (C9): resolves the triggering event's
//! pod to its node, then evicts every pod scheduled there subject to
//! per-owner-kind skip rules, optionally waiting for the node to empty.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tracing::{info, warn};

use super::checks;
use super::client::{evict_pod, get_pod, get_replicaset, is_ready, list_owned_pods, list_pods_on_node};
use crate::config::{resolve_absolute_or_percent, ParamExtractor};
use crate::error::StageError;
use crate::event::Event;
use crate::registry::{Actionner, ActionnerOutcome, Capabilities, Parameters};

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PodOutcome {
    Ignored,
    Evicted,
    EvictionError,
    OtherError,
}

struct DrainConfig {
    min_healthy_replicas: Option<String>,
    ignore_errors: bool,
    ignore_daemonsets: bool,
    ignore_statefulsets: bool,
    wait_period_seconds: u64,
    wait_time_excluded_namespaces: Vec<String>,
}

impl DrainConfig {
    fn from_parameters(parameters: &Parameters) -> DrainConfig {
        let extractor = ParamExtractor::new(parameters);
        DrainConfig {
            min_healthy_replicas: extractor.opt_str("min_healthy_replicas"),
            ignore_errors: extractor.bool("ignore_errors", false),
            ignore_daemonsets: extractor.bool("ignore_daemonsets", true),
            ignore_statefulsets: extractor.bool("ignore_statefulsets", false),
            wait_period_seconds: extractor.u64("wait_period", 0),
            wait_time_excluded_namespaces: extractor.string_vec("wait_time_excluded_namespaces"),
        }
    }
}

pub struct DrainActionner {
    client: Client,
}

impl DrainActionner {
    pub fn new(client: Client) -> DrainActionner {
        DrainActionner { client }
    }

    /// Classifies one pod and, unless it's skipped, evicts it. Returns the
    /// outcome this pod contributes to the drain's counters. Several pods
    /// run this concurrently; nothing here touches shared mutable state.
    async fn drain_one(&self, pod: Pod, config: &DrainConfig) -> (String, PodOutcome) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        match owner_kind(&pod) {
            Some(OwnerKind::DaemonSet) if config.ignore_daemonsets => {
                return (name, PodOutcome::Ignored);
            }
            Some(OwnerKind::StatefulSet) if config.ignore_statefulsets => {
                return (name, PodOutcome::Ignored);
            }
            Some(OwnerKind::ReplicaSet(owner_name)) => {
                if let Some(min_healthy) = &config.min_healthy_replicas {
                    match self.replica_set_quorum_met(&namespace, &owner_name, min_healthy).await {
                        Ok(true) => {}
                        Ok(false) => return (name, PodOutcome::Ignored),
                        Err(err) => {
                            warn!(pod = %name, error = %err, "failed to evaluate replica set quorum");
                            return (name, PodOutcome::OtherError);
                        }
                    }
                }
            }
            _ => {}
        }

        match evict_pod(&self.client, &namespace, &name).await {
            Ok(()) => (name, PodOutcome::Evicted),
            Err(err) => {
                warn!(pod = %name, error = %err, "eviction failed");
                (name, PodOutcome::EvictionError)
            }
        }
    }

    /// Resolves `min_healthy_replicas` (absolute count or `N%` of the
    /// replica set's declared replica count) and reports whether the
    /// replica set still clears that bar, i.e. whether eviction may
    /// proceed. "Healthy" is counted by actually listing the replica set's
    /// owned pods and checking each one's Ready condition, rather than
    /// trusting `status.readyReplicas`, which can lag behind the pods an
    /// eviction decision is about to act on.
    async fn replica_set_quorum_met(
        &self,
        namespace: &str,
        owner_name: &str,
        min_healthy: &str,
    ) -> Result<bool, StageError> {
        let replica_set = get_replicaset(&self.client, namespace, owner_name)
            .await?
            .ok_or_else(|| StageError::Precondition(format!("replica set {owner_name} not found")))?;

        let owned_pods = list_owned_pods(&self.client, namespace, owner_name).await?;
        let healthy = owned_pods.iter().filter(|pod| is_ready(pod)).count() as u64;

        let threshold = if min_healthy.ends_with('%') {
            let declared = replica_set
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(0) as usize;
            resolve_absolute_or_percent(min_healthy, declared)
        } else {
            min_healthy.parse().unwrap_or(0)
        };

        Ok(healthy >= threshold)
    }
}

#[derive(Debug)]
enum OwnerKind {
    DaemonSet,
    StatefulSet,
    ReplicaSet(String),
}

fn owner_kind(pod: &Pod) -> Option<OwnerKind> {
    let owner = pod.metadata.owner_references.as_ref()?.first()?;
    match owner.kind.as_str() {
        "DaemonSet" => Some(OwnerKind::DaemonSet),
        "StatefulSet" => Some(OwnerKind::StatefulSet),
        "ReplicaSet" => Some(OwnerKind::ReplicaSet(owner.name.clone())),
        _ => None,
    }
}

#[async_trait]
impl Actionner for DrainActionner {
    fn name(&self) -> &str {
        "kubernetes:drain"
    }

    fn category(&self) -> &str {
        "kubernetes"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ActionWithOutput
    }

    fn check_parameters(&self, parameters: &Parameters) -> Result<(), StageError> {
        let extractor = ParamExtractor::new(parameters);
        if let Some(value) = extractor.opt_str("min_healthy_replicas") {
            crate::config::is_absolute_or_percent(&value)
                .map_err(|_| StageError::Validation("min_healthy_replicas must be an integer or a percentage".to_string()))?;
        }
        Ok(())
    }

    async fn check_precondition(&self, event: &Event, _parameters: &Parameters) -> Result<(), StageError> {
        let namespace = checks::check_namespace(event)?;
        let pod_name = checks::check_pod_name(event)?;
        checks::check_pod_exists(&self.client, &namespace, &pod_name).await
    }

    async fn action(&self, event: &Event, parameters: &Parameters) -> Result<ActionnerOutcome, StageError> {
        let config = DrainConfig::from_parameters(parameters);
        let namespace = event.get_namespace_name();
        let pod_name = event.get_pod_name();

        let target_pod = get_pod(&self.client, &namespace, &pod_name)
            .await?
            .ok_or_else(|| StageError::Precondition(format!("pod {namespace}/{pod_name} disappeared")))?;

        let node_name = target_pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .ok_or_else(|| StageError::Precondition(format!("pod {namespace}/{pod_name} is not scheduled")))?;

        let node_pods = list_pods_on_node(&self.client, &node_name).await?;

        // Evictions for one node run concurrently; outcomes are reduced
        // after every task has joined, never through a counter mutated
        // from inside each task.
        let results = join_all(node_pods.into_iter().map(|pod| self.drain_one(pod, &config))).await;

        let mut ignored = 0u32;
        let mut eviction_errors = 0u32;
        let mut other_errors = 0u32;
        let mut evicted_names = Vec::new();

        for (name, outcome) in &results {
            match outcome {
                PodOutcome::Ignored => ignored += 1,
                PodOutcome::Evicted => evicted_names.push(name.clone()),
                PodOutcome::EvictionError => eviction_errors += 1,
                PodOutcome::OtherError => other_errors += 1,
            }
        }

        if config.wait_period_seconds > 0 {
            wait_for_node_drained(
                &self.client,
                &node_name,
                &config.wait_time_excluded_namespaces,
                Duration::from_secs(config.wait_period_seconds),
            )
            .await?;
        }

        let mut objects = BTreeMap::new();
        objects.insert("node".to_string(), node_name);
        objects.insert("ignored".to_string(), ignored.to_string());
        objects.insert("eviction_errors".to_string(), eviction_errors.to_string());
        objects.insert("other_errors".to_string(), other_errors.to_string());
        objects.insert("evicted".to_string(), evicted_names.join(","));

        let message = format!(
            "drain: ignored={ignored} eviction_errors={eviction_errors} other_errors={other_errors} evicted={}",
            evicted_names.len()
        );
        info!("{message}");

        if config.ignore_errors || (eviction_errors == 0 && other_errors == 0) {
            Ok(ActionnerOutcome {
                objects,
                output: Some(message),
                result: Some("drained".to_string()),
            })
        } else {
            Err(StageError::TransientRemote(anyhow::anyhow!(message)))
        }
    }
}

/// Polls every five seconds until a full pass finds zero qualifying pods
/// still on the node. A pass that happens to see a pod gone is not
/// sufficient on its own: success requires an entire pass with nothing
/// left, so a pod lingering behind a slow finalizer can't be missed by an
/// early return partway through a scan.
async fn wait_for_node_drained(
    client: &Client,
    node_name: &str,
    excluded_namespaces: &[String],
    max_wait: Duration,
) -> Result<(), StageError> {
    let deadline = tokio::time::Instant::now() + max_wait;

    loop {
        let pods = list_pods_on_node(client, node_name).await?;
        let remaining = pods
            .iter()
            .filter(|pod| !matches!(owner_kind(pod), Some(OwnerKind::DaemonSet)))
            .filter(|pod| {
                let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
                !excluded_namespaces.iter().any(|ns| ns == namespace)
            })
            .count();

        if remaining == 0 {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(StageError::TransientRemote(anyhow::anyhow!(
                "{remaining} pod(s) still on node {node_name} after {:?}",
                max_wait
            )));
        }

        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_owned_by(kind: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("pod-1".to_string()),
                namespace: Some("web".to_string()),
                owner_references: Some(vec![OwnerReference {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    api_version: "apps/v1".to_string(),
                    uid: "u1".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// S2: a DaemonSet-owned pod is classified distinctly from ReplicaSet
    /// and StatefulSet owners, so `ignore_daemonsets` can single it out.
    #[test]
    fn owner_kind_classifies_daemonset_pods() {
        let pod = pod_owned_by("DaemonSet", "ds1");
        assert!(matches!(owner_kind(&pod), Some(OwnerKind::DaemonSet)));
    }

    #[test]
    fn owner_kind_classifies_replicaset_pods_with_name() {
        let pod = pod_owned_by("ReplicaSet", "rs1");
        match owner_kind(&pod) {
            Some(OwnerKind::ReplicaSet(name)) => assert_eq!(name, "rs1"),
            other => panic!("expected ReplicaSet owner, got {other:?}"),
        }
    }

    #[test]
    fn owner_kind_is_none_for_bare_pods() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(owner_kind(&pod).is_none());
    }
}
