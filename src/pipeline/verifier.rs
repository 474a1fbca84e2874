// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cross-cluster communication verification.
//!
//! For every namespace pair, a probe runs in each cluster against the probe target in
//! the peer cluster's paired namespace, in both directions. The addressing mode decides
//! how the target is named:
//!
//! - [`AddressingMode::Direct`] - the IP of a ready endpoint behind the peer's Service,
//!   read from the peer cluster's state.
//! - [`AddressingMode::Dns`] - `<service>.<peer-namespace>.svc.<cluster-domain>`. This
//!   only resolves across clusters once DNS chaining has been applied and reloaded;
//!   running it earlier is expected to fail.
//!
//! A probe only counts as successful when a full HTTP round trip was observed. Failed
//! probes are retried up to [`ProbePolicy::attempts`] times.

use crate::client::{AddressingMode, ClusterClient, ProbeSpec, ProbeTargetSpec, ServiceEndpoint};
use crate::cluster::{ClusterRole, NamespacePair};
use crate::context::StageContext;
use crate::errors::ChainError;
use crate::metrics::record_probe_attempt;
use crate::retry::{poll_until, Check, PollPolicy, PollResult};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retry of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Executions before the probe is reported as failed (at least 1)
    pub attempts: u32,
    /// Delay between executions
    pub interval: Duration,
    /// Timeout of one HTTP request inside the probe
    pub request_timeout: Duration,
}

/// Inputs of the verification stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySettings {
    pub target: ProbeTargetSpec,
    pub probe: ProbePolicy,
    /// Bound on waiting for the peer Service to get a ready endpoint
    pub endpoint_wait: PollPolicy,
    pub cluster_domain: String,
}

/// Outcome of one successful source-to-target probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityResult {
    pub source_cluster: String,
    pub source_namespace: String,
    /// `host:port` that was probed
    pub target: String,
    pub mode: AddressingMode,
    pub succeeded: bool,
    pub attempts: u32,
    /// Output of the last probe execution
    pub output: String,
}

/// Service DNS name of `service` in `namespace`.
#[must_use]
pub fn service_dns_name(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{service}.{namespace}.svc.{}", cluster_domain.trim_matches('.'))
}

/// Verify reachability in both directions for every namespace pair.
///
/// # Errors
///
/// Returns [`ChainError::EndpointUnavailable`] if a probe target never gets a ready
/// endpoint and [`ChainError::Reachability`] for the first probe that exhausts its
/// attempts.
pub async fn verify(
    ctx: &StageContext,
    mode: AddressingMode,
    settings: &VerifySettings,
) -> Result<Vec<ReachabilityResult>, ChainError> {
    let (primary, secondary) = futures::join!(
        deploy_targets(ctx, ClusterRole::Primary, &settings.target),
        deploy_targets(ctx, ClusterRole::Secondary, &settings.target)
    );
    primary?;
    secondary?;

    let mut results = Vec::new();
    for pair in ctx.pairs.iter() {
        for role in [ClusterRole::Primary, ClusterRole::Secondary] {
            results.push(verify_direction(ctx, pair, role, mode, settings).await?);
        }
    }

    info!(
        mode = %mode,
        probes = results.len(),
        "Cross-cluster reachability verified"
    );
    Ok(results)
}

async fn deploy_targets(
    ctx: &StageContext,
    role: ClusterRole,
    target: &ProbeTargetSpec,
) -> Result<(), ChainError> {
    let client = ctx.client(role);
    for namespace in ctx.pairs.namespaces_for(role) {
        debug!(
            cluster = %client.name(),
            namespace = %namespace,
            service = %target.service,
            "Ensuring probe target"
        );
        client.ensure_probe_target(&namespace, target).await?;
    }
    Ok(())
}

/// Probe from `role`'s namespace of `pair` to the peer namespace.
async fn verify_direction(
    ctx: &StageContext,
    pair: &NamespacePair,
    role: ClusterRole,
    mode: AddressingMode,
    settings: &VerifySettings,
) -> Result<ReachabilityResult, ChainError> {
    let source = ctx.client(role);
    let peer = ctx.client(role.peer());
    let source_namespace = pair.namespace_for(role);
    let peer_namespace = pair.namespace_for(role.peer());

    let endpoint = wait_for_endpoint(
        peer.as_ref(),
        peer_namespace,
        &settings.target.service,
        settings.endpoint_wait,
    )
    .await?;

    let (host, port) = match mode {
        AddressingMode::Direct => (endpoint.address.to_string(), endpoint.port),
        AddressingMode::Dns => (
            service_dns_name(
                &settings.target.service,
                peer_namespace,
                &settings.cluster_domain,
            ),
            settings.target.port,
        ),
    };

    probe_with_retry(
        source.as_ref(),
        source_namespace,
        host,
        port,
        mode,
        settings.probe,
    )
    .await
}

async fn wait_for_endpoint(
    client: &dyn ClusterClient,
    namespace: &str,
    service: &str,
    policy: PollPolicy,
) -> Result<ServiceEndpoint, ChainError> {
    let result = poll_until(policy, "service endpoint", |_| async move {
        Ok(match client.get_service_endpoint(namespace, service).await? {
            Some(endpoint) => Check::Ready(endpoint),
            None => Check::Pending(()),
        })
    })
    .await?;

    match result {
        PollResult::Ready { value, .. } => Ok(value),
        PollResult::Exhausted { attempts, .. } => Err(ChainError::EndpointUnavailable {
            cluster: client.name().to_string(),
            what: format!("service {namespace}/{service}"),
            reason: format!("no ready endpoint after {attempts} checks"),
        }),
    }
}

/// Run one probe from `namespace` on `client`, retrying failed round trips.
///
/// # Errors
///
/// Returns [`ChainError::Reachability`] once every attempt failed, or the client's error
/// if the probe could not be run at all.
pub async fn probe_with_retry(
    client: &dyn ClusterClient,
    namespace: &str,
    host: String,
    port: u16,
    mode: AddressingMode,
    policy: ProbePolicy,
) -> Result<ReachabilityResult, ChainError> {
    let attempts = policy.attempts.max(1);
    let mut probe = ProbeSpec {
        namespace: namespace.to_string(),
        host,
        port,
        mode,
        request_timeout: policy.request_timeout,
        attempt: 1,
    };

    let mut last_output = String::new();
    for attempt in 1..=attempts {
        probe.attempt = attempt;
        let outcome = client.run_probe(&probe).await?;
        record_probe_attempt(mode, outcome.succeeded);

        if outcome.succeeded {
            info!(
                cluster = %client.name(),
                namespace = %namespace,
                target = %probe.target(),
                mode = %mode,
                attempt,
                "Probe succeeded"
            );
            return Ok(ReachabilityResult {
                source_cluster: client.name().to_string(),
                source_namespace: namespace.to_string(),
                target: probe.target(),
                mode,
                succeeded: true,
                attempts: attempt,
                output: outcome.output,
            });
        }

        warn!(
            cluster = %client.name(),
            namespace = %namespace,
            target = %probe.target(),
            mode = %mode,
            attempt,
            max_attempts = attempts,
            output = %outcome.output,
            "Probe failed"
        );
        last_output = outcome.output;

        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ChainError::Reachability {
        source_cluster: client.name().to_string(),
        source_namespace: namespace.to_string(),
        target: probe.target(),
        mode: mode.to_string(),
        attempts,
        detail: last_output,
    })
}
