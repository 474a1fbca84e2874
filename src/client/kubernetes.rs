// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ClusterClient`] implementation backed by the Kubernetes API.
//!
//! Every call is made with a client built for exactly one cluster descriptor: the
//! descriptor's kubeconfig file with its context selected explicitly, so nothing depends
//! on the process environment or the kubeconfig's current context.
//!
//! Writes use server-side apply with the `dnschain` field manager, except the CoreDNS
//! `ConfigMap`, which is merge-patched with its `resourceVersion` so a concurrent edit is
//! rejected instead of overwritten.

use crate::client::resources::{
    build_dns_load_balancer, build_namespace, build_probe_pod, build_probe_target_deployment,
    build_probe_target_service, build_secret, is_http_response, probe_pod_name, secret_payload,
};
use crate::client::{
    ClientFactory, ClusterClient, HealthCheck, ProbeOutcome, ProbeSpec, ProbeTargetSpec,
    ReadinessReport, ReloadStatus, ResolverUpdate, SecretPayload, ServiceEndpoint,
};
use crate::cluster::ClusterDescriptor;
use crate::constants::{
    COREDNS_CONFIGMAP, COREDNS_DEPLOYMENT, COREDNS_RELOAD_MARKER, COREFILE_CHECKSUM_ANNOTATION,
    COREFILE_KEY, DNS_LB_SERVICE, DNS_NAMESPACE, DNS_POD_SELECTOR, DNS_PORT, FIELD_MANAGER,
    KUBE_CONNECT_TIMEOUT_SECS, KUBE_READ_TIMEOUT_SECS, PROBE_POD_POLL_MILLIS,
    PROBE_POD_TIMEOUT_SECS,
};
use crate::context::AccessContext;
use crate::corefile::{checksum, merge_forward_zones, ForwardZone};
use crate::errors::ChainError;
use crate::retry::{poll_until, retry_api_call, Check, PollPolicy, PollResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label Kubernetes puts on `EndpointSlice`s to name their Service
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Length of the random suffix of probe pod names
const PROBE_POD_SUFFIX_LEN: usize = 5;

/// Builds [`KubeClusterClient`]s from kubeconfig files.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    /// Image of the one-shot probe client pods
    pub probe_image: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl KubeClientFactory {
    #[must_use]
    pub fn new(probe_image: impl Into<String>) -> Self {
        Self {
            probe_image: probe_image.into(),
            connect_timeout: Duration::from_secs(KUBE_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(KUBE_READ_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(
        &self,
        access: &AccessContext,
        cluster: &ClusterDescriptor,
    ) -> Result<Arc<dyn ClusterClient>, ChainError> {
        let path = cluster.kubeconfig.display().to_string();
        let kubeconfig_error = |reason: String| ChainError::Kubeconfig {
            path: path.clone(),
            reason,
        };

        let kubeconfig = Kubeconfig::read_from(&cluster.kubeconfig)
            .map_err(|e| kubeconfig_error(format!("failed to read kubeconfig: {e}")))?;

        let options = KubeConfigOptions {
            context: cluster.context.clone(),
            ..Default::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| {
                kubeconfig_error(format!(
                    "failed to load context {:?}: {e}",
                    cluster.context.as_deref().unwrap_or_default()
                ))
            })?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let client = Client::try_from(config)
            .map_err(|e| kubeconfig_error(format!("failed to create client: {e}")))?;

        debug!(
            cluster = %cluster.name,
            role = %cluster.role,
            mode = %access.mode,
            kubeconfig = %path,
            "Connected Kubernetes client"
        );

        Ok(Arc::new(KubeClusterClient {
            descriptor: cluster.clone(),
            client,
            probe_image: self.probe_image.clone(),
        }))
    }
}

/// [`ClusterClient`] talking to one cluster's API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    descriptor: ClusterDescriptor,
    client: Client,
    probe_image: String,
}

impl KubeClusterClient {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(
        descriptor: ClusterDescriptor,
        client: Client,
        probe_image: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            client,
            probe_image: probe_image.into(),
        }
    }

    fn err(&self, operation: impl Into<String>) -> impl FnOnce(kube::Error) -> ChainError {
        ChainError::kube(self.descriptor.name.clone(), operation)
    }

    /// Server-side apply of a namespaced or cluster-scoped object.
    async fn apply<K>(&self, api: &Api<K>, name: &str, object: &K) -> Result<(), ChainError>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
    {
        let operation = format!("apply {} {name}", K::kind(&()));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let patch = Patch::Apply(object);
        retry_api_call(|| api.patch(name, &params, &patch), &operation)
            .await
            .map_err(self.err(operation.clone()))?;
        debug!(cluster = %self.name(), kind = %K::kind(&()), name, "Applied resource");
        Ok(())
    }

    async fn check_api_server(&self) -> HealthCheck {
        match self.client.apiserver_version().await {
            Ok(info) => HealthCheck::new("api-server", true, info.git_version),
            Err(e) => HealthCheck::new("api-server", false, e.to_string()),
        }
    }

    async fn check_nodes(&self) -> HealthCheck {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(nodes) => {
                let total = nodes.items.len();
                let ready = nodes.items.iter().filter(|n| node_is_ready(n)).count();
                HealthCheck::new(
                    "nodes-ready",
                    total > 0 && ready == total,
                    format!("{ready}/{total} nodes ready"),
                )
            }
            Err(e) => HealthCheck::new("nodes-ready", false, e.to_string()),
        }
    }

    async fn check_dns_service(&self) -> HealthCheck {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        match api.get_opt(COREDNS_DEPLOYMENT).await {
            Ok(Some(deployment)) => {
                let desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|s| s.replicas)
                    .unwrap_or(1)
                    .max(1);
                let available = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                HealthCheck::new(
                    "dns-service",
                    available >= desired,
                    format!("{available}/{desired} replicas available"),
                )
            }
            Ok(None) => HealthCheck::new(
                "dns-service",
                false,
                format!("deployment {DNS_NAMESPACE}/{COREDNS_DEPLOYMENT} not found"),
            ),
            Err(e) => HealthCheck::new("dns-service", false, e.to_string()),
        }
    }

    async fn check_system_pods(&self) -> HealthCheck {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        match api.list(&ListParams::default()).await {
            Ok(pods) => {
                let unhealthy: Vec<String> = pods
                    .items
                    .iter()
                    .filter(|p| !matches!(pod_phase(p).as_str(), "Running" | "Succeeded"))
                    .map(|p| {
                        format!(
                            "{}={}",
                            p.metadata.name.as_deref().unwrap_or("?"),
                            pod_phase(p)
                        )
                    })
                    .collect();
                if unhealthy.is_empty() {
                    HealthCheck::new(
                        "system-pods",
                        true,
                        format!("{} system pods running", pods.items.len()),
                    )
                } else {
                    HealthCheck::new("system-pods", false, unhealthy.join(" "))
                }
            }
            Err(e) => HealthCheck::new("system-pods", false, e.to_string()),
        }
    }

    async fn wait_for_pod(&self, api: &Api<Pod>, name: &str) -> Result<Option<String>, ChainError> {
        let policy = PollPolicy::within(
            Duration::from_secs(PROBE_POD_TIMEOUT_SECS),
            Duration::from_millis(PROBE_POD_POLL_MILLIS),
        );
        let result = poll_until(policy, "probe pod completion", |_| async move {
            let pod = retry_api_call(|| api.get(name), "get probe pod")
                .await
                .map_err(self.err(format!("get pod {name}")))?;
            let phase = pod_phase(&pod);
            Ok(match phase.as_str() {
                "Succeeded" | "Failed" => Check::Ready(phase),
                _ => Check::Pending(phase),
            })
        })
        .await?;

        Ok(match result {
            PollResult::Ready { value, .. } => Some(value),
            PollResult::Exhausted { .. } => None,
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    async fn get_readiness(&self) -> Result<ReadinessReport, ChainError> {
        let (api_server, nodes, dns, pods) = futures::join!(
            self.check_api_server(),
            self.check_nodes(),
            self.check_dns_service(),
            self.check_system_pods()
        );
        Ok(ReadinessReport {
            checks: vec![api_server, nodes, dns, pods],
        })
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ChainError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.apply(&api, namespace, &build_namespace(namespace)).await
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        secret: &SecretPayload,
    ) -> Result<(), ChainError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.apply(&api, &secret.name, &build_secret(namespace, secret))
            .await?;
        info!(
            cluster = %self.name(),
            namespace,
            secret = %secret.name,
            keys = secret.data.len(),
            "Upserted secret"
        );
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretPayload>, ChainError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = retry_api_call(|| api.get_opt(name), "get secret")
            .await
            .map_err(self.err(format!("get secret {namespace}/{name}")))?;
        Ok(secret.as_ref().map(secret_payload))
    }

    async fn ensure_probe_target(
        &self,
        namespace: &str,
        target: &ProbeTargetSpec,
    ) -> Result<(), ChainError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.apply(
            &deployments,
            &target.service,
            &build_probe_target_deployment(namespace, target),
        )
        .await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.apply(
            &services,
            &target.service,
            &build_probe_target_service(namespace, target),
        )
        .await
    }

    async fn get_service_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<ServiceEndpoint>, ChainError> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={service}"));
        let slices = retry_api_call(|| api.list(&params), "list endpointslices")
            .await
            .map_err(self.err(format!("list endpointslices for {namespace}/{service}")))?;

        Ok(slices.items.iter().find_map(ready_endpoint))
    }

    async fn ensure_dns_load_balancer(&self) -> Result<(), ChainError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        self.apply(&api, DNS_LB_SERVICE, &build_dns_load_balancer())
            .await?;
        info!(cluster = %self.name(), service = DNS_LB_SERVICE, "Ensured DNS load balancer");
        Ok(())
    }

    async fn get_dns_endpoint(&self) -> Result<Vec<IpAddr>, ChainError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        let service = retry_api_call(|| api.get_opt(DNS_LB_SERVICE), "get dns load balancer")
            .await
            .map_err(self.err(format!("get service {DNS_NAMESPACE}/{DNS_LB_SERVICE}")))?;

        let ingress = service
            .and_then(|s| s.status)
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();

        let mut addresses = Vec::new();
        for entry in ingress {
            if let Some(ip) = entry.ip.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok()) {
                addresses.push(ip);
            } else if let Some(hostname) = entry.hostname.as_deref() {
                match tokio::net::lookup_host((hostname, DNS_PORT)).await {
                    Ok(resolved) => addresses.extend(resolved.map(|sa| sa.ip())),
                    Err(e) => {
                        debug!(
                            cluster = %self.name(),
                            hostname,
                            error = %e,
                            "Load balancer hostname does not resolve yet"
                        );
                    }
                }
            }
        }
        addresses.sort();
        addresses.dedup();
        Ok(addresses)
    }

    async fn apply_resolver_config(
        &self,
        zones: &[ForwardZone],
    ) -> Result<ResolverUpdate, ChainError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        let operation = format!("configmap {DNS_NAMESPACE}/{COREDNS_CONFIGMAP}");
        let configmap = retry_api_call(|| api.get(COREDNS_CONFIGMAP), "get coredns configmap")
            .await
            .map_err(self.err(format!("get {operation}")))?;

        let current = configmap
            .data
            .as_ref()
            .and_then(|d| d.get(COREFILE_KEY))
            .ok_or_else(|| {
                ChainError::precondition(format!(
                    "{operation} on cluster '{}' has no {COREFILE_KEY} key",
                    self.name()
                ))
            })?;

        let merged = merge_forward_zones(current, zones)?;
        let sum = checksum(&merged);
        let annotated = configmap
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(COREFILE_CHECKSUM_ANNOTATION))
            .is_some_and(|existing| *existing == sum);

        if merged == *current && annotated {
            debug!(cluster = %self.name(), checksum = %sum, "Corefile already up to date");
            return Ok(ResolverUpdate {
                changed: false,
                checksum: sum,
            });
        }

        let patch = json!({
            "metadata": {
                "resourceVersion": configmap.metadata.resource_version,
                "annotations": { COREFILE_CHECKSUM_ANNOTATION: sum },
            },
            "data": { COREFILE_KEY: merged },
        });
        api.patch(COREDNS_CONFIGMAP, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(self.err(format!("patch {operation}")))?;

        let changed = merged != *current;
        info!(
            cluster = %self.name(),
            zones = zones.len(),
            changed,
            checksum = %sum,
            "Applied forward zones to Corefile"
        );
        Ok(ResolverUpdate {
            changed,
            checksum: sum,
        })
    }

    async fn get_reload_status(&self, within: Duration) -> Result<ReloadStatus, ChainError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), DNS_NAMESPACE);
        let params = ListParams::default().labels(DNS_POD_SELECTOR);
        let pods = retry_api_call(|| api.list(&params), "list dns pods")
            .await
            .map_err(self.err(format!("list pods {DNS_NAMESPACE} -l {DNS_POD_SELECTOR}")))?;

        let log_params = LogParams {
            since_seconds: Some(log_window_secs(within)),
            ..Default::default()
        };

        let mut reloaded = 0;
        for pod in &pods.items {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            // a container that is not running yet has no logs to serve
            if pod_phase(pod) != "Running" {
                debug!(cluster = %self.name(), pod = name, "DNS pod not running yet");
                continue;
            }
            let logs = retry_api_call(|| api.logs(name, &log_params), "read dns pod logs")
                .await
                .map_err(self.err(format!("read logs of pod {DNS_NAMESPACE}/{name}")))?;
            if logs.contains(COREDNS_RELOAD_MARKER) {
                reloaded += 1;
            }
        }

        Ok(ReloadStatus {
            reloaded,
            total: pods.items.len(),
        })
    }

    async fn run_probe(&self, probe: &ProbeSpec) -> Result<ProbeOutcome, ChainError> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PROBE_POD_SUFFIX_LEN)
            .map(char::from)
            .collect();
        let name = probe_pod_name(probe, &suffix);
        let pod = build_probe_pod(&name, self.name(), probe, &self.probe_image);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &probe.namespace);

        let post_params = PostParams::default();
        retry_api_call(|| api.create(&post_params, &pod), "create probe pod")
            .await
            .map_err(self.err(format!("create pod {}/{name}", probe.namespace)))?;
        debug!(
            cluster = %self.name(),
            namespace = %probe.namespace,
            pod = %name,
            target = %probe.target(),
            mode = %probe.mode,
            "Started probe pod"
        );

        let phase = self.wait_for_pod(&api, &name).await;
        let logs = match &phase {
            Ok(Some(_)) => api
                .logs(&name, &LogParams::default())
                .await
                .map_err(self.err(format!("read logs of pod {}/{name}", probe.namespace))),
            _ => Ok(String::new()),
        };

        if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
            warn!(
                cluster = %self.name(),
                namespace = %probe.namespace,
                pod = %name,
                error = %e,
                "Failed to delete probe pod"
            );
        }

        let phase = phase?;
        let logs = logs?;
        let output = logs.trim().to_string();

        Ok(match phase {
            Some(phase) => ProbeOutcome {
                succeeded: phase == "Succeeded" && is_http_response(&output),
                output: if output.is_empty() {
                    format!("probe pod {phase} without output")
                } else {
                    output
                },
            },
            None => ProbeOutcome {
                succeeded: false,
                output: format!("probe pod did not complete within {PROBE_POD_TIMEOUT_SECS}s"),
            },
        })
    }
}

/// Whole seconds of logs covering `within`, rounded up and never below one.
fn log_window_secs(within: Duration) -> i64 {
    let secs = within.as_secs() + u64::from(within.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// First ready address of an `EndpointSlice`, paired with the slice's first port.
fn ready_endpoint(slice: &EndpointSlice) -> Option<ServiceEndpoint> {
    let port = slice
        .ports
        .as_ref()?
        .iter()
        .find_map(|p| p.port)
        .and_then(|p| u16::try_from(p).ok())?;

    slice
        .endpoints
        .iter()
        .filter(|e| {
            e.conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true)
        })
        .flat_map(|e| e.addresses.iter())
        .find_map(|a| a.parse::<IpAddr>().ok())
        .map(|address| ServiceEndpoint { address, port })
}

#[cfg(test)]
#[path = "kubernetes_tests.rs"]
mod kubernetes_tests;
