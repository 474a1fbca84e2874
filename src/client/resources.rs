// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resource builders.
//!
//! Pure functions that build the objects dnschain writes into a cluster: namespaces,
//! replicated secrets, the probe target workload, the DNS load balancer and one-shot
//! probe pods. Keeping them free of API calls lets them be tested without a cluster.

use crate::client::{ProbeSpec, ProbeTargetSpec, SecretPayload};
use crate::constants::{
    DNS_APP_LABEL_KEY, DNS_APP_LABEL_VALUE, DNS_LB_SERVICE, DNS_NAMESPACE, DNS_PORT,
};
use crate::labels::{
    build_labels, COMPONENT_DNS_ENDPOINT, COMPONENT_PROBE_CLIENT, COMPONENT_PROBE_TARGET,
    COMPONENT_SECRET, DNSCHAIN_PROBE_MODE_LABEL, DNSCHAIN_SOURCE_CLUSTER_LABEL,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, Pod, PodSpec, PodTemplateSpec, Probe, Secret, Service,
    ServicePort, ServiceSpec, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

/// Maximum length of a Kubernetes object name that is also used as a DNS label
const MAX_NAME_LEN: usize = 63;

/// Annotations that make the DNS load balancer an internal NLB.
const DNS_LB_ANNOTATIONS: [(&str, &str); 3] = [
    ("service.beta.kubernetes.io/aws-load-balancer-type", "nlb"),
    ("service.beta.kubernetes.io/aws-load-balancer-internal", "true"),
    (
        "service.beta.kubernetes.io/aws-load-balancer-cross-zone-load-balancing-enabled",
        "true",
    ),
];

#[must_use]
pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build the replicated search/index access secret.
#[must_use]
pub fn build_secret(namespace: &str, payload: &SecretPayload) -> Secret {
    let data = payload
        .data
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
        .collect::<BTreeMap<_, _>>();

    Secret {
        metadata: ObjectMeta {
            name: Some(payload.name.clone()),
            namespace: Some(namespace.into()),
            labels: Some(build_labels(&payload.name, COMPONENT_SECRET)),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".into()),
        ..Default::default()
    }
}

/// Decode a secret read from the API back into a payload.
///
/// Values that are not valid UTF-8 are decoded lossily; only emptiness matters to callers.
#[must_use]
pub fn secret_payload(secret: &Secret) -> SecretPayload {
    let mut data: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();

    if let Some(string_data) = &secret.string_data {
        for (k, v) in string_data {
            data.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    SecretPayload {
        name: secret.metadata.name.clone().unwrap_or_default(),
        data,
    }
}

/// Deployment backing the probe target Service.
#[must_use]
pub fn build_probe_target_deployment(namespace: &str, target: &ProbeTargetSpec) -> Deployment {
    let labels = build_labels(&target.service, COMPONENT_PROBE_TARGET);
    let port = i32::from(target.port);

    Deployment {
        metadata: ObjectMeta {
            name: Some(target.service.clone()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "web".into(),
                        image: Some(target.image.clone()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".into()),
                            container_port: port,
                            protocol: Some("TCP".into()),
                            ..Default::default()
                        }]),
                        readiness_probe: Some(Probe {
                            tcp_socket: Some(TCPSocketAction {
                                port: IntOrString::Int(port),
                                ..Default::default()
                            }),
                            period_seconds: Some(5),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP Service in front of the probe target Deployment.
#[must_use]
pub fn build_probe_target_service(namespace: &str, target: &ProbeTargetSpec) -> Service {
    let labels = build_labels(&target.service, COMPONENT_PROBE_TARGET);

    Service {
        metadata: ObjectMeta {
            name: Some(target.service.clone()),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: i32::from(target.port),
                target_port: Some(IntOrString::String("http".into())),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Internal `LoadBalancer` Service exposing the cluster DNS pods to the peer cluster.
///
/// Only TCP is exposed: forward blocks use `force_tcp`.
#[must_use]
pub fn build_dns_load_balancer() -> Service {
    let mut selector = BTreeMap::new();
    selector.insert(DNS_APP_LABEL_KEY.to_string(), DNS_APP_LABEL_VALUE.to_string());

    let annotations = DNS_LB_ANNOTATIONS
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect::<BTreeMap<_, _>>();

    Service {
        metadata: ObjectMeta {
            name: Some(DNS_LB_SERVICE.into()),
            namespace: Some(DNS_NAMESPACE.into()),
            labels: Some(build_labels(DNS_LB_SERVICE, COMPONENT_DNS_ENDPOINT)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".into()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("dns-tcp".into()),
                port: i32::from(DNS_PORT),
                target_port: Some(IntOrString::Int(i32::from(DNS_PORT))),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of a probe pod: `probe-<mode>-<attempt>-<suffix>`, truncated to a valid DNS label.
#[must_use]
pub fn probe_pod_name(probe: &ProbeSpec, suffix: &str) -> String {
    let mut name = format!("probe-{}-{}-{}", probe.mode, probe.attempt, suffix.to_lowercase());
    name.truncate(MAX_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

/// Command run by the probe container.
///
/// curl exits 0 once any HTTP response has been received and prints only the status
/// code, which is how a completed round trip is recognised.
#[must_use]
pub fn probe_command(probe: &ProbeSpec) -> Vec<String> {
    vec![
        "curl".into(),
        "--silent".into(),
        "--show-error".into(),
        "--output".into(),
        "/dev/null".into(),
        "--write-out".into(),
        "%{http_code}".into(),
        "--max-time".into(),
        probe.request_timeout.as_secs().max(1).to_string(),
        probe.url(),
    ]
}

/// One-shot probe client pod.
#[must_use]
pub fn build_probe_pod(name: &str, source_cluster: &str, probe: &ProbeSpec, image: &str) -> Pod {
    let mut labels = build_labels(name, COMPONENT_PROBE_CLIENT);
    labels.insert(
        DNSCHAIN_SOURCE_CLUSTER_LABEL.into(),
        sanitize_label_value(source_cluster),
    );
    labels.insert(DNSCHAIN_PROBE_MODE_LABEL.into(), probe.mode.to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(probe.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".into()),
            containers: vec![Container {
                name: "probe".into(),
                image: Some(image.into()),
                command: Some(probe_command(probe)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether probe output is an HTTP status code, i.e. a full round trip completed.
#[must_use]
pub fn is_http_response(output: &str) -> bool {
    let code = output.trim();
    code.len() == 3
        && code.chars().all(|c| c.is_ascii_digit())
        && matches!(code.as_bytes()[0], b'1'..=b'5')
}

/// Label values allow at most 63 alphanumerics, `-`, `_` and `.`, starting and ending
/// alphanumeric. Cluster names in mediated mode are context names and may contain `/` or `:`.
#[must_use]
pub fn sanitize_label_value(value: &str) -> String {
    let mut sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized.truncate(MAX_NAME_LEN);
    sanitized
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
