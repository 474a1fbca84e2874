// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CoreDNS reload detection and the settle policy.
//!
//! CoreDNS picks up a changed Corefile through its `reload` plugin, which logs
//! `Reloading complete` once the new configuration is active. Every DNS pod of a cluster
//! whose Corefile changed must report a reload newer than the change. Even then, resolver
//! caches may still hold negative answers for the peer zones for a while, so a settle
//! delay follows, optionally confirmed by one DNS-mode probe.

use crate::client::{AddressingMode, ClusterClient, ReloadStatus};
use crate::cluster::ClusterRole;
use crate::context::StageContext;
use crate::errors::ChainError;
use crate::metrics::record_reload_wait;
use crate::pipeline::chaining::ChainingOutcome;
use crate::pipeline::verifier::{
    probe_with_retry, service_dns_name, ReachabilityResult, VerifySettings,
};
use crate::retry::{poll_until, Check, PollPolicy, PollResult};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// What happens after CoreDNS reported a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Time to wait before DNS-mode probes are trusted
    pub delay: Duration,
    /// Run one DNS-mode probe after the delay to confirm resolution works
    pub confirm: bool,
}

/// Reload observation for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadObservation {
    pub cluster: String,
    /// True when the Corefile did not change and no reload was awaited
    pub skipped: bool,
    pub attempts: u32,
    pub reloaded: usize,
    pub total: usize,
}

/// Wait until every cluster whose Corefile changed has reloaded it.
///
/// # Errors
///
/// Returns [`ChainError::ReloadNotObserved`] for the first cluster that did not reload
/// within the policy.
pub async fn await_reload(
    ctx: &StageContext,
    applied: &[ChainingOutcome],
    policy: PollPolicy,
) -> Result<Vec<ReloadObservation>, ChainError> {
    let waits = applied
        .iter()
        .map(|outcome| wait_for_reload(ctx.client(outcome.role).as_ref(), outcome, policy));
    futures::future::join_all(waits).await.into_iter().collect()
}

async fn wait_for_reload(
    client: &dyn ClusterClient,
    outcome: &ChainingOutcome,
    policy: PollPolicy,
) -> Result<ReloadObservation, ChainError> {
    let cluster = client.name().to_string();
    if !outcome.changed {
        info!(cluster = %cluster, "Corefile unchanged, no reload expected");
        return Ok(ReloadObservation {
            cluster,
            skipped: true,
            attempts: 0,
            reloaded: 0,
            total: 0,
        });
    }

    info!(
        cluster = %cluster,
        max_attempts = policy.max_attempts,
        "Waiting for CoreDNS to reload the Corefile"
    );

    let result = poll_until(policy, "CoreDNS reload", |_| async move {
        let status = client.get_reload_status(outcome.applied_at.elapsed()).await?;
        Ok(if status.is_complete() {
            Check::Ready(status)
        } else {
            Check::Pending(status)
        })
    })
    .await?;

    match result {
        PollResult::Ready { value, attempts } => {
            let waited = outcome.applied_at.elapsed();
            record_reload_wait(&cluster, waited);
            info!(
                cluster = %cluster,
                reloaded = value.reloaded,
                waited_secs = waited.as_secs(),
                "CoreDNS reload observed"
            );
            Ok(observation(cluster, attempts, value))
        }
        PollResult::Exhausted { last, .. } => Err(ChainError::ReloadNotObserved {
            cluster,
            timeout_secs: policy.budget().as_secs(),
            reloaded: last.reloaded,
            total: last.total,
        }),
    }
}

fn observation(cluster: String, attempts: u32, status: ReloadStatus) -> ReloadObservation {
    ReloadObservation {
        cluster,
        skipped: false,
        attempts,
        reloaded: status.reloaded,
        total: status.total,
    }
}

/// Apply the settle policy.
///
/// Returns the confirmation probe's result when the policy asks for one. The probe runs
/// from the primary namespace of the first pair to its secondary counterpart.
///
/// # Errors
///
/// Returns [`ChainError::Reachability`] if the confirmation probe fails.
pub async fn settle(
    ctx: &StageContext,
    policy: SettlePolicy,
    verify: &VerifySettings,
) -> Result<Option<ReachabilityResult>, ChainError> {
    if !policy.delay.is_zero() {
        info!(delay_secs = policy.delay.as_secs(), "Letting resolver caches settle");
        tokio::time::sleep(policy.delay).await;
    }

    if !policy.confirm {
        return Ok(None);
    }

    let pair = ctx.pairs.first();
    let host = service_dns_name(
        &verify.target.service,
        &pair.secondary,
        &verify.cluster_domain,
    );
    let result = probe_with_retry(
        ctx.client(ClusterRole::Primary).as_ref(),
        &pair.primary,
        host,
        verify.target.port,
        AddressingMode::Dns,
        verify.probe,
    )
    .await?;
    Ok(Some(result))
}
