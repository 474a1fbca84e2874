// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster readiness stage.

use crate::client::{ClusterClient, ReadinessReport};
use crate::cluster::ClusterRole;
use crate::context::StageContext;
use crate::errors::ChainError;
use crate::retry::{poll_until, Check, PollPolicy, PollResult};
use serde::Serialize;
use tracing::{info, warn};

/// Readiness of one cluster once its checks passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterReadiness {
    pub cluster: String,
    pub attempts: u32,
    pub report: ReadinessReport,
}

/// Poll both clusters until healthy.
///
/// Both clusters are always polled to completion before the outcome is decided.
///
/// # Errors
///
/// Returns [`ChainError::ClusterNotReady`] naming the failing checks when one cluster is
/// unhealthy, or [`ChainError::ClustersNotReady`] listing both when neither is.
pub async fn wait_for_clusters(
    ctx: &StageContext,
    policy: PollPolicy,
) -> Result<Vec<ClusterReadiness>, ChainError> {
    let (primary, secondary) = futures::join!(
        wait_for_cluster(ctx.client(ClusterRole::Primary).as_ref(), policy),
        wait_for_cluster(ctx.client(ClusterRole::Secondary).as_ref(), policy)
    );
    match (primary, secondary) {
        (Ok(primary), Ok(secondary)) => Ok(vec![primary, secondary]),
        (
            Err(primary @ ChainError::ClusterNotReady { .. }),
            Err(secondary @ ChainError::ClusterNotReady { .. }),
        ) => Err(ChainError::ClustersNotReady {
            failures: vec![primary, secondary],
        }),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

/// Poll one cluster until all of its health checks pass.
///
/// # Errors
///
/// Returns [`ChainError::ClusterNotReady`] once the policy is exhausted.
pub async fn wait_for_cluster(
    client: &dyn ClusterClient,
    policy: PollPolicy,
) -> Result<ClusterReadiness, ChainError> {
    let cluster = client.name().to_string();
    info!(cluster = %cluster, max_attempts = policy.max_attempts, "Checking cluster readiness");

    let result = poll_until(policy, "cluster readiness", |attempt| {
        let cluster = cluster.clone();
        async move {
            let report = client.get_readiness().await?;
            if report.is_ready() {
                Ok(Check::Ready(report))
            } else {
                warn!(
                    cluster = %cluster,
                    attempt,
                    failing = %report.failing_summary(),
                    "Cluster not ready yet"
                );
                Ok(Check::Pending(report))
            }
        }
    })
    .await?;

    match result {
        PollResult::Ready { value, attempts } => {
            info!(cluster = %cluster, attempts, "Cluster is ready");
            Ok(ClusterReadiness {
                cluster,
                attempts,
                report: value,
            })
        }
        PollResult::Exhausted { last, attempts } => Err(ChainError::ClusterNotReady {
            cluster,
            attempts,
            failing: last.failing_summary(),
        }),
    }
}
