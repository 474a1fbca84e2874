// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Capability interface through which the pipeline touches a cluster.
//!
//! The orchestration logic only ever talks to a [`ClusterClient`]; it does not know
//! whether an operation is a Kubernetes API call or something else. [`KubeClusterClient`]
//! implements the trait on top of `kube`, and [`ClientFactory`] turns a resolved
//! [`AccessContext`] into connected clients at the start of every stage.
//!
//! # Operations
//!
//! - [`ClusterClient::get_readiness`] - control plane, node and DNS health checks
//! - [`ClusterClient::ensure_namespace`] / [`ClusterClient::upsert_secret`] /
//!   [`ClusterClient::get_secret`] - secret replication
//! - [`ClusterClient::ensure_probe_target`] / [`ClusterClient::get_service_endpoint`] /
//!   [`ClusterClient::run_probe`] - cross-cluster reachability
//! - [`ClusterClient::ensure_dns_load_balancer`] / [`ClusterClient::get_dns_endpoint`] /
//!   [`ClusterClient::apply_resolver_config`] / [`ClusterClient::get_reload_status`] -
//!   DNS chaining

pub mod kubernetes;
pub mod resources;

#[cfg(test)]
pub mod fake;

pub use self::kubernetes::{KubeClientFactory, KubeClusterClient};

use crate::cluster::ClusterDescriptor;
use crate::context::AccessContext;
use crate::corefile::ForwardZone;
use crate::errors::ChainError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// One named health check of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub passing: bool,
    pub detail: String,
}

impl HealthCheck {
    pub fn new(name: impl Into<String>, passing: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passing,
            detail: detail.into(),
        }
    }
}

/// Result of one readiness poll.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReadinessReport {
    pub checks: Vec<HealthCheck>,
}

impl ReadinessReport {
    /// Ready when there is at least one check and every check passes.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passing)
    }

    /// Failing checks as `name (detail)`, comma separated.
    #[must_use]
    pub fn failing_summary(&self) -> String {
        if self.checks.is_empty() {
            return "no health checks reported".to_string();
        }
        self.checks
            .iter()
            .filter(|c| !c.passing)
            .map(|c| format!("{} ({})", c.name, c.detail))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Contents of a replicated secret.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretPayload {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl SecretPayload {
    /// A secret counts as present only if it has at least one non-empty value.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.data.values().any(|v| !v.is_empty())
    }
}

/// Workload deployed in every target namespace so probes have something to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargetSpec {
    pub service: String,
    pub port: u16,
    pub image: String,
}

/// A ready address behind a Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub address: IpAddr,
    pub port: u16,
}

/// How a probe addresses its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    /// Literal IP of the peer's backing endpoint
    Direct,
    /// Chained DNS name of the peer's Service
    Dns,
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Dns => write!(f, "dns"),
        }
    }
}

/// One probe execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Namespace the probe pod runs in (source side)
    pub namespace: String,
    /// IP literal or DNS name of the target
    pub host: String,
    pub port: u16,
    pub mode: AddressingMode,
    /// Per-request timeout passed to the probe client
    pub request_timeout: Duration,
    /// 1-based attempt number, used to name the probe pod
    pub attempt: u32,
}

impl ProbeSpec {
    /// URL requested by the probe.
    #[must_use]
    pub fn url(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("http://[{v6}]:{}/", self.port),
            _ => format!("http://{}:{}/", self.host, self.port),
        }
    }

    /// `host:port` as shown in logs and errors.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Result of one probe execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// True only when a full HTTP round trip completed
    pub succeeded: bool,
    /// Probe output (response or error text)
    pub output: String,
}

/// Result of writing forward zones into the resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverUpdate {
    /// Whether the Corefile content changed
    pub changed: bool,
    /// SHA-256 of the resulting Corefile
    pub checksum: String,
}

/// Reload progress of a cluster's DNS pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadStatus {
    /// DNS pods whose logs show a completed reload
    pub reloaded: usize,
    /// DNS pods observed
    pub total: usize,
}

impl ReloadStatus {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.reloaded == self.total
    }
}

/// Operations the pipeline needs from one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// The cluster this client is connected to.
    fn descriptor(&self) -> &ClusterDescriptor;

    /// Cluster name, for logs and errors.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Evaluate the cluster's health checks once.
    async fn get_readiness(&self) -> Result<ReadinessReport, ChainError>;

    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ChainError>;

    /// Create or update a secret (never create-only).
    async fn upsert_secret(&self, namespace: &str, secret: &SecretPayload)
        -> Result<(), ChainError>;

    /// Read a secret back; `None` if absent.
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretPayload>, ChainError>;

    /// Deploy (or update) the probe target workload in a namespace.
    async fn ensure_probe_target(
        &self,
        namespace: &str,
        target: &ProbeTargetSpec,
    ) -> Result<(), ChainError>;

    /// A ready endpoint behind a Service; `None` while nothing is ready.
    async fn get_service_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<ServiceEndpoint>, ChainError>;

    /// Create or update the load balancer fronting the cluster DNS service.
    async fn ensure_dns_load_balancer(&self) -> Result<(), ChainError>;

    /// Addresses the DNS load balancer currently exposes (empty while provisioning).
    async fn get_dns_endpoint(&self) -> Result<Vec<IpAddr>, ChainError>;

    /// Merge forward zones into the resolver configuration.
    async fn apply_resolver_config(
        &self,
        zones: &[ForwardZone],
    ) -> Result<ResolverUpdate, ChainError>;

    /// Reload progress, looking only at evidence newer than `within`.
    async fn get_reload_status(&self, within: Duration) -> Result<ReloadStatus, ChainError>;

    /// Run one probe from inside the cluster.
    async fn run_probe(&self, probe: &ProbeSpec) -> Result<ProbeOutcome, ChainError>;
}

/// Connects [`ClusterClient`]s for a resolved access context.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        access: &AccessContext,
        cluster: &ClusterDescriptor,
    ) -> Result<Arc<dyn ClusterClient>, ChainError>;
}
