// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants for resources created in the clusters.
//!
//! Everything dnschain creates (DNS load balancer, probe workloads, replicated secrets)
//! carries these labels so it can be found and cleaned up with a single selector.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Label Values
// ============================================================================

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_DNSCHAIN: &str = "dnschain";

/// Value for `app.kubernetes.io/part-of`
pub const PART_OF_DNSCHAIN: &str = "dnschain";

/// Component value for the DNS load balancer
pub const COMPONENT_DNS_ENDPOINT: &str = "dns-endpoint";

/// Component value for the probe target workload
pub const COMPONENT_PROBE_TARGET: &str = "probe-target";

/// Component value for one-shot probe client pods
pub const COMPONENT_PROBE_CLIENT: &str = "probe-client";

/// Component value for replicated secrets
pub const COMPONENT_SECRET: &str = "search-credentials";

// ============================================================================
// dnschain-Specific Labels
// ============================================================================

/// Label carrying the cluster that launched a probe pod
pub const DNSCHAIN_SOURCE_CLUSTER_LABEL: &str = "dnschain.firestoned.io/source-cluster";

/// Label carrying the addressing mode of a probe pod
pub const DNSCHAIN_PROBE_MODE_LABEL: &str = "dnschain.firestoned.io/probe-mode";

/// Builds the standard label set for a resource of the given component.
#[must_use]
pub fn build_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), name.into());
    labels.insert(K8S_COMPONENT.into(), component.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_DNSCHAIN.into());
    labels.insert(K8S_PART_OF.into(), PART_OF_DNSCHAIN.into());
    labels
}
