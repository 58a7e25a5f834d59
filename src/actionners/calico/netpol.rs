//! The `calico:networkpolicy` actionner (C10): given an event whose remote
//! IP indicates an outbound connection from a pod, ensures a policy owned
//! by the pod's controller denies egress to that IP while preserving
//! previously accumulated denies and an allow rule for operator-configured
//! CIDRs.
//!
//! Calico's `NetworkPolicy` is a CRD with no published Rust client, so it
//! is modeled here the same way the rest of this crate models Kubernetes
//! custom resources: a `kube::CustomResource` derive naming Calico's own
//! group/version/kind.

use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::super::kubernetes::{checks, client::get_pod};
use crate::config::ParamExtractor;
use crate::error::StageError;
use crate::event::Event;
use crate::registry::{Actionner, ActionnerOutcome, Capabilities, Parameters};

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "warden";
const SYNTHESIZED_LABELS: &[&str] = &[
    "pod-template-hash",
    "pod-template-generation",
    "controller-revision-hash",
];

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "crd.projectcalico.org",
    version = "v1",
    kind = "NetworkPolicy",
    plural = "networkpolicies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CalicoNetworkPolicySpec {
    pub order: f64,
    pub selector: String,
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress: Option<Vec<EgressRule>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<EntityRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nets: Option<Vec<String>>,
}

pub struct NetworkPolicyActionner {
    client: Client,
}

impl NetworkPolicyActionner {
    pub fn new(client: Client) -> NetworkPolicyActionner {
        NetworkPolicyActionner { client }
    }

    async fn reconcile(
        &self,
        api: &Api<NetworkPolicy>,
        owner_name: &str,
        namespace: &str,
        selector: &str,
        remote_cidr: &str,
        allow_cidrs: &[String],
        order: f64,
    ) -> Result<(), StageError> {
        match api.get_opt(owner_name).await.map_err(|err| StageError::TransientRemote(err.into()))? {
            None => {
                let spec = build_spec(selector, order, [remote_cidr.to_string()].into(), allow_cidrs);
                let mut resource = NetworkPolicy::new(owner_name, spec);
                label_as_managed(&mut resource);
                match api.create(&PostParams::default(), &resource).await {
                    Ok(_) => {
                        info!(policy = %owner_name, "created network policy");
                        Ok(())
                    }
                    Err(kube::Error::Api(resp)) if resp.code == 409 => {
                        // Lost a creation race: someone else created it first.
                        // Re-read and fall through to the update path.
                        let existing = api
                            .get(owner_name)
                            .await
                            .map_err(|err| StageError::TransientRemote(err.into()))?;
                        self.update_existing(api, existing, selector, remote_cidr, allow_cidrs, order)
                            .await
                    }
                    Err(err) => Err(StageError::TransientRemote(err.into())),
                }
            }
            Some(existing) => {
                self.update_existing(api, existing, selector, remote_cidr, allow_cidrs, order)
                    .await
            }
        }
    }

    async fn update_existing(
        &self,
        api: &Api<NetworkPolicy>,
        existing: NetworkPolicy,
        selector: &str,
        remote_cidr: &str,
        allow_cidrs: &[String],
        order: f64,
    ) -> Result<(), StageError> {
        let mut denies: BTreeSet<String> = existing
            .spec
            .egress
            .iter()
            .flatten()
            .filter(|rule| rule.action == "Deny")
            .filter_map(|rule| rule.destination.as_ref())
            .filter_map(|dest| dest.nets.clone())
            .flatten()
            .collect();
        denies.insert(remote_cidr.to_string());

        let spec = build_spec(selector, order, denies, allow_cidrs);
        let resource_version = existing
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| StageError::Internal(anyhow::anyhow!("existing policy has no resourceVersion")))?;

        let mut patch = NetworkPolicy::new(
            existing.metadata.name.as_deref().unwrap_or_default(),
            spec,
        );
        patch.metadata.resource_version = Some(resource_version);
        label_as_managed(&mut patch);

        api.patch(
            existing.metadata.name.as_deref().unwrap_or_default(),
            &PatchParams::apply("warden").force(),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(|err| match err {
            kube::Error::Api(resp) if resp.code == 409 => {
                StageError::Conflict("network policy updated concurrently".to_string())
            }
            other => StageError::TransientRemote(other.into()),
        })?;

        info!(policy = existing.metadata.name.as_deref().unwrap_or_default(), "updated network policy");
        Ok(())
    }
}

/// Marks a reconciled policy as owned by this engine, the Rust analog of
/// the original's synthesized `app.kubernetes.io/managed-by` label — kept
/// on the policy's own metadata, not folded into its pod selector.
fn label_as_managed(resource: &mut NetworkPolicy) {
    resource
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
}

fn build_spec(
    selector: &str,
    order: f64,
    denies: BTreeSet<String>,
    allow_cidrs: &[String],
) -> CalicoNetworkPolicySpec {
    let allow_nets = if allow_cidrs.is_empty() {
        vec!["0.0.0.0/0".to_string()]
    } else {
        allow_cidrs.to_vec()
    };

    CalicoNetworkPolicySpec {
        order,
        selector: selector.to_string(),
        types: vec!["Egress".to_string()],
        egress: Some(vec![
            EgressRule {
                action: "Deny".to_string(),
                destination: Some(EntityRule {
                    nets: Some(denies.into_iter().collect()),
                }),
            },
            EgressRule {
                action: "Allow".to_string(),
                destination: Some(EntityRule {
                    nets: Some(allow_nets),
                }),
            },
        ]),
    }
}

/// Resolves the owning controller's name and a selector string built from
/// its labels with synthesized keys stripped, joined with ` && `. Falls
/// back to the pod itself when it has no owner.
fn resolve_owner(pod: &k8s_openapi::api::core::v1::Pod) -> (String, String) {
    let owner_name = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|owners| owners.first())
        .map(|o| o.name.clone())
        .unwrap_or_else(|| pod.metadata.name.clone().unwrap_or_default());

    let labels = pod.metadata.labels.clone().unwrap_or_default();
    let selector = labels
        .iter()
        .filter(|(k, _)| !SYNTHESIZED_LABELS.contains(&k.as_str()))
        .map(|(k, v)| format!("{k} == '{v}'"))
        .collect::<Vec<_>>()
        .join(" && ");

    (owner_name, selector)
}

#[async_trait]
impl Actionner for NetworkPolicyActionner {
    fn name(&self) -> &str {
        "calico:networkpolicy"
    }

    fn category(&self) -> &str {
        "calico"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ActionOnly
    }

    fn check_parameters(&self, _parameters: &Parameters) -> Result<(), StageError> {
        Ok(())
    }

    async fn check_precondition(&self, event: &Event, _parameters: &Parameters) -> Result<(), StageError> {
        checks::check_namespace(event)?;
        checks::check_pod_name(event)?;
        checks::check_remote_ip(event)?;
        Ok(())
    }

    async fn action(&self, event: &Event, parameters: &Parameters) -> Result<ActionnerOutcome, StageError> {
        let extractor = ParamExtractor::new(parameters);
        let namespace = event.get_namespace_name();
        let pod_name = event.get_pod_name();
        let remote_ip = checks::check_remote_ip(event)?;
        let remote_cidr = format!("{remote_ip}/32");
        let allow_cidrs = extractor.string_vec("allowed_cidrs");
        let order = extractor.f64("order", 100.0);

        let pod = get_pod(&self.client, &namespace, &pod_name)
            .await?
            .ok_or_else(|| StageError::Precondition(format!("pod {namespace}/{pod_name} disappeared")))?;

        let (owner_name, mut selector) = resolve_owner(&pod);
        if selector.is_empty() {
            selector = format!(
                "projectcalico.org/pod-name == '{}'",
                pod.metadata.name.clone().unwrap_or_default()
            );
        }

        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), &namespace);
        self.reconcile(&api, &owner_name, &namespace, &selector, &remote_cidr, &allow_cidrs, order)
            .await?;

        let mut objects = std::collections::BTreeMap::new();
        objects.insert("namespace".to_string(), namespace);
        objects.insert("policy".to_string(), owner_name.clone());
        objects.insert("denied_cidr".to_string(), remote_cidr);

        Ok(ActionnerOutcome {
            objects,
            output: Some(format!("reconciled egress policy {owner_name}")),
            result: Some("reconciled".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn pod_with(
        owner: Option<(&str, &str)>,
        labels: &[(&str, &str)],
    ) -> k8s_openapi::api::core::v1::Pod {
        let owner_references = owner.map(|(kind, name)| {
            vec![OwnerReference {
                kind: kind.to_string(),
                name: name.to_string(),
                api_version: "apps/v1".to_string(),
                uid: "u1".to_string(),
                ..Default::default()
            }]
        });
        let mut label_map = BTreeMap::new();
        for (k, v) in labels {
            label_map.insert(k.to_string(), v.to_string());
        }
        k8s_openapi::api::core::v1::Pod {
            metadata: ObjectMeta {
                name: Some("pod-1".to_string()),
                namespace: Some("web".to_string()),
                owner_references,
                labels: Some(label_map),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// S4: selector is built from the owning ReplicaSet's labels with
    /// synthesized keys stripped.
    #[test]
    fn resolve_owner_strips_synthesized_labels() {
        let pod = pod_with(
            Some(("ReplicaSet", "rs1")),
            &[("app", "web"), ("pod-template-hash", "abc123")],
        );
        let (owner_name, selector) = resolve_owner(&pod);
        assert_eq!(owner_name, "rs1");
        assert_eq!(selector, "app == 'web'");
    }

    /// S4: a pod with no owner reference falls back to selecting itself by
    /// name.
    #[test]
    fn resolve_owner_falls_back_to_pod_name_without_owner() {
        let pod = pod_with(None, &[]);
        let (owner_name, _) = resolve_owner(&pod);
        assert_eq!(owner_name, "pod-1");
    }

    /// S4: a first occurrence builds a policy with exactly one deny entry
    /// plus the default allow-all.
    #[test]
    fn build_spec_first_occurrence_has_single_deny() {
        let spec = build_spec("app == 'web'", 100.0, ["10.1.2.3/32".to_string()].into(), &[]);
        let egress = spec.egress.unwrap();
        assert_eq!(egress[0].action, "Deny");
        assert_eq!(
            egress[0].destination.as_ref().unwrap().nets.as_ref().unwrap(),
            &vec!["10.1.2.3/32".to_string()]
        );
        assert_eq!(egress[1].action, "Allow");
        assert_eq!(
            egress[1].destination.as_ref().unwrap().nets.as_ref().unwrap(),
            &vec!["0.0.0.0/0".to_string()]
        );
    }

    /// S5 / Invariant 3: accumulating a second remote IP keeps the first
    /// deny entry and adds the second, with no duplicates even if the same
    /// IP is seen twice.
    #[test]
    fn build_spec_accumulates_denies_without_duplicates() {
        let mut denies: BTreeSet<String> = BTreeSet::new();
        denies.insert("10.1.2.3/32".to_string());
        denies.insert("10.1.2.4/32".to_string());
        denies.insert("10.1.2.3/32".to_string());

        let spec = build_spec("app == 'web'", 100.0, denies, &[]);
        let nets = spec.egress.unwrap()[0].destination.clone().unwrap().nets.unwrap();
        assert_eq!(nets, vec!["10.1.2.3/32".to_string(), "10.1.2.4/32".to_string()]);
    }
}
