// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ClusterClient`] for pipeline tests.
//!
//! A [`FakeCluster`] holds the state of one simulated cluster: namespaces, secrets,
//! probe targets, the DNS load balancer, a real Corefile and CoreDNS reload progress.
//! Probes are answered from that state:
//!
//! - a direct probe succeeds once any injected transient failures are used up;
//! - a DNS probe succeeds only when the Corefile forwards the target's zone, the last
//!   Corefile change has been picked up by a reload, and the resolver cache staleness
//!   window after that reload has passed.

use crate::client::{
    ClientFactory, ClusterClient, HealthCheck, ProbeOutcome, ProbeSpec, ProbeTargetSpec,
    ReadinessReport, ReloadStatus, ResolverUpdate, SecretPayload, ServiceEndpoint,
};
use crate::cluster::{ClusterDescriptor, ClusterRole};
use crate::context::AccessContext;
use crate::corefile::{checksum, merge_forward_zones, Corefile, ForwardZone};
use crate::errors::ChainError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_COREFILE: &str = ".:53 {
    errors
    health
    kubernetes cluster.local in-addr.arpa ip6.arpa {
      pods insecure
      fallthrough in-addr.arpa ip6.arpa
    }
    forward . /etc/resolv.conf
    cache 30
    reload
}
";

#[derive(Debug)]
pub struct FakeState {
    /// Readiness reports returned by successive polls; the last one repeats
    pub readiness: VecDeque<ReadinessReport>,
    pub readiness_polls: u32,
    pub namespaces: BTreeSet<String>,
    pub secrets: BTreeMap<(String, String), SecretPayload>,
    pub secret_writes: u32,
    /// Drop secret writes silently (read-back finds nothing)
    pub lose_secrets: bool,
    pub probe_targets: BTreeSet<String>,
    pub endpoints: BTreeMap<(String, String), ServiceEndpoint>,
    pub lb_ensured: bool,
    pub lb_polls: u32,
    /// Polls of the DNS endpoint before addresses appear
    pub lb_ready_after_polls: u32,
    pub dns_endpoint: Vec<IpAddr>,
    pub corefile: String,
    pub corefile_writes: u32,
    /// Reload polls needed before CoreDNS reports a reload; `None` never reloads
    pub reload_after_polls: Option<u32>,
    pub reload_polls: u32,
    pub pending_reload: bool,
    pub reloaded_at: Option<Instant>,
    /// Reject DNS pod log reads with this API status code
    pub log_read_denied: Option<u16>,
    pub dns_pods: usize,
    /// Time after a reload during which DNS lookups still miss
    pub cache_stale_for: Duration,
    pub direct_failures_remaining: u32,
    pub probes: Vec<ProbeSpec>,
    /// Second octet of the pod IPs handed out by this cluster
    pub subnet: u8,
}

/// Handle to one simulated cluster, shared by every client connected to it.
#[derive(Debug, Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// A healthy cluster whose pod IPs are `10.<subnet>.0.x` and whose DNS load balancer
    /// exposes `10.<subnet>.255.10` and `10.<subnet>.255.11`.
    #[must_use]
    pub fn healthy(subnet: u8) -> Self {
        let state = FakeState {
            readiness: VecDeque::from([ready_report()]),
            readiness_polls: 0,
            namespaces: BTreeSet::new(),
            secrets: BTreeMap::new(),
            secret_writes: 0,
            lose_secrets: false,
            probe_targets: BTreeSet::new(),
            endpoints: BTreeMap::new(),
            lb_ensured: false,
            lb_polls: 0,
            lb_ready_after_polls: 1,
            dns_endpoint: vec![
                IpAddr::V4(Ipv4Addr::new(10, subnet, 255, 10)),
                IpAddr::V4(Ipv4Addr::new(10, subnet, 255, 11)),
            ],
            corefile: DEFAULT_COREFILE.to_string(),
            corefile_writes: 0,
            reload_after_polls: Some(1),
            reload_polls: 0,
            pending_reload: false,
            reloaded_at: None,
            log_read_denied: None,
            dns_pods: 2,
            cache_stale_for: Duration::ZERO,
            direct_failures_remaining: 0,
            probes: Vec::new(),
            subnet,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the state for inspection or adjustment.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn client(&self, descriptor: ClusterDescriptor) -> FakeClient {
        FakeClient {
            descriptor,
            cluster: self.clone(),
        }
    }
}

/// Report with all checks passing.
#[must_use]
pub fn ready_report() -> ReadinessReport {
    ReadinessReport {
        checks: vec![
            HealthCheck::new("api-server", true, "v1.31.0"),
            HealthCheck::new("nodes-ready", true, "3/3 nodes ready"),
            HealthCheck::new("dns-service", true, "2/2 replicas available"),
            HealthCheck::new("system-pods", true, "12 system pods running"),
        ],
    }
}

/// Report with the node check failing.
#[must_use]
pub fn nodes_not_ready_report() -> ReadinessReport {
    let mut report = ready_report();
    report.checks[1] = HealthCheck::new("nodes-ready", false, "1/3 nodes ready");
    report
}

#[derive(Debug, Clone)]
pub struct FakeClient {
    descriptor: ClusterDescriptor,
    cluster: FakeCluster,
}

#[async_trait]
impl ClusterClient for FakeClient {
    fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    async fn get_readiness(&self) -> Result<ReadinessReport, ChainError> {
        let mut state = self.cluster.state();
        state.readiness_polls += 1;
        let report = if state.readiness.len() > 1 {
            state.readiness.pop_front()
        } else {
            state.readiness.front().cloned()
        };
        Ok(report.unwrap_or_default())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ChainError> {
        self.cluster.state().namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        secret: &SecretPayload,
    ) -> Result<(), ChainError> {
        let mut state = self.cluster.state();
        state.secret_writes += 1;
        if !state.lose_secrets {
            state
                .secrets
                .insert((namespace.to_string(), secret.name.clone()), secret.clone());
        }
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretPayload>, ChainError> {
        Ok(self
            .cluster
            .state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn ensure_probe_target(
        &self,
        namespace: &str,
        target: &ProbeTargetSpec,
    ) -> Result<(), ChainError> {
        let mut state = self.cluster.state();
        state.probe_targets.insert(namespace.to_string());
        let next_host = u8::try_from(state.endpoints.len() + 10).unwrap_or(u8::MAX);
        let address = IpAddr::V4(Ipv4Addr::new(10, state.subnet, 0, next_host));
        state
            .endpoints
            .entry((namespace.to_string(), target.service.clone()))
            .or_insert(ServiceEndpoint {
                address,
                port: target.port,
            });
        Ok(())
    }

    async fn get_service_endpoint(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<ServiceEndpoint>, ChainError> {
        Ok(self
            .cluster
            .state()
            .endpoints
            .get(&(namespace.to_string(), service.to_string()))
            .copied())
    }

    async fn ensure_dns_load_balancer(&self) -> Result<(), ChainError> {
        self.cluster.state().lb_ensured = true;
        Ok(())
    }

    async fn get_dns_endpoint(&self) -> Result<Vec<IpAddr>, ChainError> {
        let mut state = self.cluster.state();
        if !state.lb_ensured {
            return Ok(Vec::new());
        }
        state.lb_polls += 1;
        if state.lb_polls < state.lb_ready_after_polls {
            return Ok(Vec::new());
        }
        Ok(state.dns_endpoint.clone())
    }

    async fn apply_resolver_config(
        &self,
        zones: &[ForwardZone],
    ) -> Result<ResolverUpdate, ChainError> {
        let mut state = self.cluster.state();
        let merged = merge_forward_zones(&state.corefile, zones)?;
        let changed = merged != state.corefile;
        if changed {
            state.corefile = merged;
            state.corefile_writes += 1;
            state.pending_reload = true;
            state.reload_polls = 0;
        }
        Ok(ResolverUpdate {
            changed,
            checksum: checksum(&state.corefile),
        })
    }

    async fn get_reload_status(&self, _within: Duration) -> Result<ReloadStatus, ChainError> {
        let mut state = self.cluster.state();
        let total = state.dns_pods;
        if !state.pending_reload {
            return Ok(ReloadStatus {
                reloaded: total,
                total,
            });
        }

        state.reload_polls += 1;
        if let Some(code) = state.log_read_denied {
            let source = kube::Error::Api(Box::new(kube::core::Status {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: "pods/log is forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code,
                metadata: None,
                details: None,
            }));
            let wrap = ChainError::kube(self.name(), "read logs of pod kube-system/coredns-0");
            return Err(wrap(source));
        }
        match state.reload_after_polls {
            Some(needed) if state.reload_polls >= needed => {
                state.pending_reload = false;
                state.reloaded_at = Some(Instant::now());
                Ok(ReloadStatus {
                    reloaded: total,
                    total,
                })
            }
            _ => Ok(ReloadStatus { reloaded: 0, total }),
        }
    }

    async fn run_probe(&self, probe: &ProbeSpec) -> Result<ProbeOutcome, ChainError> {
        let mut state = self.cluster.state();
        state.probes.push(probe.clone());

        if probe.host.parse::<IpAddr>().is_ok() {
            if state.direct_failures_remaining > 0 {
                state.direct_failures_remaining -= 1;
                return Ok(failed("curl: (28) Connection timed out"));
            }
            return Ok(ProbeOutcome {
                succeeded: true,
                output: "200".to_string(),
            });
        }

        let zone = probe
            .host
            .split_once('.')
            .map(|(_, zone)| zone)
            .unwrap_or_default();
        let forwarded = Corefile::parse(&state.corefile)
            .map(|c| c.contains_zone(zone))
            .unwrap_or(false);
        let settled = state
            .reloaded_at
            .is_some_and(|at| at.elapsed() >= state.cache_stale_for);

        if forwarded && !state.pending_reload && settled {
            Ok(ProbeOutcome {
                succeeded: true,
                output: "200".to_string(),
            })
        } else {
            Ok(failed(&format!("curl: (6) Could not resolve host: {}", probe.host)))
        }
    }
}

fn failed(output: &str) -> ProbeOutcome {
    ProbeOutcome {
        succeeded: false,
        output: output.to_string(),
    }
}

/// Factory handing out clients for two fake clusters.
#[derive(Debug, Clone)]
pub struct FakeFactory {
    pub primary: FakeCluster,
    pub secondary: FakeCluster,
    connects: Arc<Mutex<u32>>,
}

impl FakeFactory {
    #[must_use]
    pub fn new(primary: FakeCluster, secondary: FakeCluster) -> Self {
        Self {
            primary,
            secondary,
            connects: Arc::new(Mutex::new(0)),
        }
    }

    /// Two healthy clusters on subnets 1 and 2.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(FakeCluster::healthy(1), FakeCluster::healthy(2))
    }

    /// Number of clients connected so far.
    #[must_use]
    pub fn connects(&self) -> u32 {
        *self.connects.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(
        &self,
        _access: &AccessContext,
        cluster: &ClusterDescriptor,
    ) -> Result<Arc<dyn ClusterClient>, ChainError> {
        *self.connects.lock().unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
        let fake = match cluster.role {
            ClusterRole::Primary => &self.primary,
            ClusterRole::Secondary => &self.secondary,
        };
        Ok(Arc::new(fake.client(cluster.clone())))
    }
}
