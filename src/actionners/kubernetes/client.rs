//! Thin helpers over `kube::Client` shared by every Kubernetes actionner.

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::api::{Api, EvictParams, ListParams};
use kube::Client;

use crate::error::StageError;

/// Fetches a pod by name, returning `Ok(None)` rather than an error when it
/// does not exist — callers decide whether a missing pod is a precondition
/// failure or simply nothing left to do.
pub async fn get_pod(client: &Client, namespace: &str, name: &str) -> Result<Option<Pod>, StageError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match api.get_opt(name).await {
        Ok(pod) => Ok(pod),
        Err(err) => Err(StageError::TransientRemote(err.into())),
    }
}

/// Lists every pod in `namespace` owned by an object named `owner_name`,
/// matching on `ownerReferences` rather than trusting label selectors the
/// workload may not have set consistently.
pub async fn list_owned_pods(
    client: &Client,
    namespace: &str,
    owner_name: &str,
) -> Result<Vec<Pod>, StageError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api
        .list(&ListParams::default())
        .await
        .map_err(|err| StageError::TransientRemote(err.into()))?;

    Ok(pods
        .items
        .into_iter()
        .filter(|pod| {
            pod.metadata
                .owner_references
                .as_ref()
                .map(|owners| owners.iter().any(|o| o.name == owner_name))
                .unwrap_or(false)
        })
        .collect())
}

/// Lists every pod scheduled on `node_name`, across all namespaces.
pub async fn list_pods_on_node(client: &Client, node_name: &str) -> Result<Vec<Pod>, StageError> {
    let api: Api<Pod> = Api::all(client.clone());
    let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
    let pods = api
        .list(&params)
        .await
        .map_err(|err| StageError::TransientRemote(err.into()))?;
    Ok(pods.items)
}

pub async fn get_replicaset(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<ReplicaSet>, StageError> {
    let api: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
    api.get_opt(name)
        .await
        .map_err(|err| StageError::TransientRemote(err.into()))
}

/// Evicts a single pod via the eviction subresource, which respects any
/// PodDisruptionBudget bound to it (falling straight to `delete` would
/// bypass that protection).
///
/// Eviction requests are idempotent from the engine's view (spec.md §4.7):
/// a 404 means the pod is already gone and a 409 whose reason is
/// `AlreadyEvicted` means another drain (or a previous retry of this one)
/// already requested its removal — both are treated as success rather than
/// counted among `eviction_errors`. Any other 409 (blocked by a disruption
/// budget) is a real, countable error.
pub async fn evict_pod(client: &Client, namespace: &str, name: &str) -> Result<(), StageError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    match api.evict(name, &EvictParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyEvicted" => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 429 || resp.code == 409 => {
            Err(StageError::Conflict(format!(
                "eviction of {name} blocked by disruption budget"
            )))
        }
        Err(err) => Err(StageError::TransientRemote(err.into())),
    }
}

pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(PodStatus::to_owned_ready_condition)
        .unwrap_or(false)
}

trait ReadyCondition {
    fn to_owned_ready_condition(&self) -> Option<bool>;
}

impl ReadyCondition for PodStatus {
    fn to_owned_ready_condition(&self) -> Option<bool> {
        self.conditions.as_ref().and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Ready")
                .map(|c| c.status == "True")
        })
    }
}
