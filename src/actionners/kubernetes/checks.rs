//! Precondition checks shared across Kubernetes actionners, one function
//! per check performed against the triggering event and cluster state.

use kube::Client;

use super::client::get_pod;
use crate::error::StageError;
use crate::event::Event;

pub fn check_pod_name(event: &Event) -> Result<String, StageError> {
    let name = event.get_pod_name();
    if name.is_empty() {
        return Err(StageError::Precondition(
            "event carries no pod name".to_string(),
        ));
    }
    Ok(name)
}

pub fn check_namespace(event: &Event) -> Result<String, StageError> {
    let namespace = event.get_namespace_name();
    if namespace.is_empty() {
        return Err(StageError::Precondition(
            "event carries no namespace".to_string(),
        ));
    }
    Ok(namespace)
}

pub async fn check_pod_exists(client: &Client, namespace: &str, name: &str) -> Result<(), StageError> {
    match get_pod(client, namespace, name).await? {
        Some(_) => Ok(()),
        None => Err(StageError::Precondition(format!(
            "pod {namespace}/{name} does not exist"
        ))),
    }
}

pub fn check_remote_ip(event: &Event) -> Result<std::net::Ipv4Addr, StageError> {
    event
        .get_remote_ip()
        .ok_or_else(|| StageError::Precondition("event carries no valid remote IP".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FieldValue, Priority};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event_with(fields: &[(&str, FieldValue)]) -> Event {
        Event {
            trace_id: "t".to_string(),
            rule: String::new(),
            priority: Priority::Warning,
            source: "syscall".to_string(),
            output: String::new(),
            output_fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<BTreeMap<_, _>>(),
            tags: vec![],
            time: Utc::now(),
        }
    }

    #[test]
    fn missing_pod_name_is_a_precondition_failure() {
        let err = check_pod_name(&event_with(&[])).unwrap_err();
        assert!(matches!(err, StageError::Precondition(_)));
    }

    #[test]
    fn present_pod_name_passes() {
        let event = event_with(&[("k8s.pod.name", FieldValue::String("nginx-1".to_string()))]);
        assert_eq!(check_pod_name(&event).unwrap(), "nginx-1");
    }

    #[test]
    fn missing_remote_ip_is_a_precondition_failure() {
        let err = check_remote_ip(&event_with(&[])).unwrap_err();
        assert!(matches!(err, StageError::Precondition(_)));
    }
}
