// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer provisioning and DNS chaining.
//!
//! Each cluster's DNS service is exposed to the peer through an internal load balancer.
//! Once both load balancers publish addresses, every cluster's Corefile gets one forward
//! block per namespace pair, sending queries for the peer namespace's service zone to the
//! peer's load balancer. The two directions are applied independently: chaining cluster A
//! needs only A's client and B's endpoint addresses.

use crate::client::ClusterClient;
use crate::cluster::{ClusterRole, NamespacePairs};
use crate::constants::{DNS_LB_SERVICE, DNS_NAMESPACE};
use crate::context::StageContext;
use crate::corefile::ForwardZone;
use crate::errors::ChainError;
use crate::retry::{poll_until, Check, PollPolicy, PollResult};
use serde::Serialize;
use std::net::IpAddr;
use tokio::time::Instant;
use tracing::{info, warn};

/// Addresses a cluster's DNS load balancer exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsEndpoint {
    pub cluster: String,
    pub role: ClusterRole,
    pub addresses: Vec<IpAddr>,
}

/// Result of chaining one cluster's resolver to its peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainingOutcome {
    pub cluster: String,
    pub role: ClusterRole,
    /// Peer DNS addresses the forward blocks point at
    pub upstreams: Vec<IpAddr>,
    /// Zones forwarded to the peer
    pub zones: Vec<String>,
    /// Whether the Corefile changed (a reload is only expected if it did)
    pub changed: bool,
    pub checksum: String,
    /// Taken just before the Corefile was written
    #[serde(skip)]
    pub applied_at: Instant,
}

/// Expose both clusters' DNS and chain each cluster to the other.
///
/// # Errors
///
/// Returns [`ChainError::EndpointUnavailable`] if a load balancer never publishes an
/// address, or the client's error if the resolver configuration cannot be written.
pub async fn apply_chaining(
    ctx: &StageContext,
    lb_wait: PollPolicy,
    cluster_domain: &str,
) -> Result<Vec<ChainingOutcome>, ChainError> {
    let primary = ctx.client(ClusterRole::Primary);
    let secondary = ctx.client(ClusterRole::Secondary);

    let (primary_endpoint, secondary_endpoint) = futures::join!(
        expose_dns(primary.as_ref(), lb_wait),
        expose_dns(secondary.as_ref(), lb_wait)
    );
    let primary_endpoint = primary_endpoint?;
    let secondary_endpoint = secondary_endpoint?;

    let (primary_outcome, secondary_outcome) = futures::join!(
        chain_cluster(
            primary.as_ref(),
            &ctx.pairs,
            ClusterRole::Primary,
            &secondary_endpoint,
            cluster_domain
        ),
        chain_cluster(
            secondary.as_ref(),
            &ctx.pairs,
            ClusterRole::Secondary,
            &primary_endpoint,
            cluster_domain
        )
    );
    Ok(vec![primary_outcome?, secondary_outcome?])
}

/// Ensure the DNS load balancer exists and wait for its addresses.
///
/// # Errors
///
/// Returns [`ChainError::EndpointUnavailable`] once the policy is exhausted.
pub async fn expose_dns(
    client: &dyn ClusterClient,
    policy: PollPolicy,
) -> Result<DnsEndpoint, ChainError> {
    client.ensure_dns_load_balancer().await?;
    info!(cluster = %client.name(), "Waiting for DNS load balancer addresses");

    let result = poll_until(policy, "DNS load balancer", |_| async move {
        let addresses = client.get_dns_endpoint().await?;
        Ok(if addresses.is_empty() {
            Check::Pending(())
        } else {
            Check::Ready(addresses)
        })
    })
    .await?;

    match result {
        PollResult::Ready { value, attempts } => {
            info!(
                cluster = %client.name(),
                addresses = ?value,
                attempts,
                "DNS load balancer is ready"
            );
            Ok(DnsEndpoint {
                cluster: client.name().to_string(),
                role: client.descriptor().role,
                addresses: value,
            })
        }
        PollResult::Exhausted { attempts, .. } => Err(ChainError::EndpointUnavailable {
            cluster: client.name().to_string(),
            what: format!("load balancer {DNS_NAMESPACE}/{DNS_LB_SERVICE}"),
            reason: format!("no ingress address after {attempts} checks"),
        }),
    }
}

/// Forward zones `role`'s cluster needs: one per pair, for the peer namespace.
#[must_use]
pub fn forward_zones(
    pairs: &NamespacePairs,
    role: ClusterRole,
    peer_addresses: &[IpAddr],
    cluster_domain: &str,
) -> Vec<ForwardZone> {
    pairs
        .iter()
        .map(|pair| {
            ForwardZone::for_namespace(
                pair.namespace_for(role.peer()),
                cluster_domain,
                peer_addresses.iter().copied(),
            )
        })
        .collect()
}

/// Namespaces configured on both clusters.
///
/// Each cluster forwards the other's copy of such a namespace zone, so a query for it that
/// reaches either resolver through its load balancer is forwarded back and forth.
#[must_use]
pub fn mirrored_namespaces(pairs: &NamespacePairs) -> Vec<String> {
    let secondary = pairs.namespaces_for(ClusterRole::Secondary);
    pairs
        .namespaces_for(ClusterRole::Primary)
        .into_iter()
        .filter(|ns| secondary.contains(ns))
        .collect()
}

async fn chain_cluster(
    client: &dyn ClusterClient,
    pairs: &NamespacePairs,
    role: ClusterRole,
    peer: &DnsEndpoint,
    cluster_domain: &str,
) -> Result<ChainingOutcome, ChainError> {
    for namespace in mirrored_namespaces(pairs) {
        warn!(
            cluster = %client.name(),
            namespace = %namespace,
            "Namespace exists on both clusters; each resolver forwards its zone to the other, \
             so queries for it can loop between the clusters"
        );
    }

    let zones = forward_zones(pairs, role, &peer.addresses, cluster_domain);
    let applied_at = Instant::now();
    let update = client.apply_resolver_config(&zones).await?;

    info!(
        cluster = %client.name(),
        peer = %peer.cluster,
        zones = zones.len(),
        changed = update.changed,
        checksum = %update.checksum,
        "Applied DNS chaining"
    );

    Ok(ChainingOutcome {
        cluster: client.name().to_string(),
        role,
        upstreams: peer.addresses.clone(),
        zones: zones.into_iter().map(|z| z.zone).collect(),
        changed: update.changed,
        checksum: update.checksum,
        applied_at,
    })
}
