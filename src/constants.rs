// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the DNS chaining orchestrator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Cluster DNS Constants
// ============================================================================

/// Namespace holding the cluster DNS service (CoreDNS)
pub const DNS_NAMESPACE: &str = "kube-system";

/// Name of the CoreDNS `ConfigMap`
pub const COREDNS_CONFIGMAP: &str = "coredns";

/// Key of the Corefile inside the CoreDNS `ConfigMap`
pub const COREFILE_KEY: &str = "Corefile";

/// Name of the CoreDNS `Deployment`
pub const COREDNS_DEPLOYMENT: &str = "coredns";

/// Label selector matching the cluster DNS pods
pub const DNS_POD_SELECTOR: &str = "k8s-app=kube-dns";

/// Label key/value of the cluster DNS pods (used as a Service selector)
pub const DNS_APP_LABEL_KEY: &str = "k8s-app";
pub const DNS_APP_LABEL_VALUE: &str = "kube-dns";

/// Name of the `LoadBalancer` Service exposing cluster DNS to the peer cluster
pub const DNS_LB_SERVICE: &str = "internal-dns-lb";

/// Standard DNS port
pub const DNS_PORT: u16 = 53;

/// Log line emitted by the CoreDNS `reload` plugin once a new Corefile is active
pub const COREDNS_RELOAD_MARKER: &str = "Reloading complete";

/// Annotation holding the SHA-256 checksum of the Corefile last written by this tool
pub const COREFILE_CHECKSUM_ANNOTATION: &str = "dnschain.firestoned.io/corefile-sha256";

/// Default cluster domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Cache TTL written into forward blocks
pub const FORWARD_CACHE_SECS: u32 = 30;

// ============================================================================
// Probe Constants
// ============================================================================

/// Default name of the probe target Service/Deployment
pub const DEFAULT_PROBE_SERVICE: &str = "sample-nginx";

/// Default port of the probe target Service
pub const DEFAULT_PROBE_PORT: u16 = 80;

/// Default image used for the probe client pod
pub const DEFAULT_PROBE_IMAGE: &str = "curlimages/curl:8.10.1";

/// Default image used for the probe target workload
pub const DEFAULT_PROBE_TARGET_IMAGE: &str = "nginx:1.27-alpine";

/// Per-request timeout handed to the probe client
pub const DEFAULT_PROBE_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default number of probe attempts before a reachability failure is reported
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 5;

/// Default delay between probe attempts
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;

/// Maximum time a single probe pod may take to complete
pub const PROBE_POD_TIMEOUT_SECS: u64 = 120;

/// Poll interval while waiting for a probe pod to finish
pub const PROBE_POD_POLL_MILLIS: u64 = 1000;

// ============================================================================
// Readiness Constants
// ============================================================================

/// Default number of readiness polls per cluster
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;

/// Default delay between readiness polls
pub const DEFAULT_READINESS_INTERVAL_SECS: u64 = 10;

/// Default time to wait for a probe target Service to get a ready endpoint
pub const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 180;

/// Delay between probe target endpoint polls
pub const ENDPOINT_POLL_INTERVAL_SECS: u64 = 5;

// ============================================================================
// Load Balancer Constants
// ============================================================================

/// Default time to wait for the DNS load balancer to publish ingress addresses
pub const DEFAULT_LB_TIMEOUT_SECS: u64 = 600;

/// Default delay between load balancer status polls
pub const DEFAULT_LB_POLL_INTERVAL_SECS: u64 = 15;

// ============================================================================
// Reload Constants
// ============================================================================

/// Default time to wait for CoreDNS to report a reload
pub const DEFAULT_RELOAD_TIMEOUT_SECS: u64 = 300;

/// Default delay between reload polls
pub const DEFAULT_RELOAD_POLL_INTERVAL_SECS: u64 = 10;

/// Default settle delay after reload has been observed
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 15;

// ============================================================================
// Kubernetes Client Constants
// ============================================================================

/// Connection timeout for kube clients
pub const KUBE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout for kube clients
pub const KUBE_READ_TIMEOUT_SECS: u64 = 60;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "dnschain";

// ============================================================================
// Secret Constants
// ============================================================================

/// Default name of the replicated search/index access secret
pub const DEFAULT_SECRET_NAME: &str = "search-index-credentials";

// ============================================================================
// External Script Constants
// ============================================================================

/// Default interpreter for external scripts
pub const DEFAULT_SCRIPT_INTERPRETER: &str = "sh";

/// Default directory holding the procedure scripts
pub const DEFAULT_PROCEDURE_DIR: &str = "../procedure";

/// Default storage class scripts, relative to the procedure directory
pub const DEFAULT_STORAGE_CLASS_CONFIGURE_SCRIPT: &str = "storageclass-configure.sh";
pub const DEFAULT_STORAGE_CLASS_VERIFY_SCRIPT: &str = "storageclass-verify.sh";

/// Default mediated kubeconfig location
pub const DEFAULT_MEDIATED_KUBECONFIG: &str = "./kubeconfig";

/// Environment variable names handed to external scripts
pub const ENV_KUBECONFIG: &str = "KUBECONFIG";
pub const ENV_CLUSTER_0: &str = "CLUSTER_0";
pub const ENV_CLUSTER_1: &str = "CLUSTER_1";
pub const ENV_NAMESPACE_0: &str = "NAMESPACE_0";
pub const ENV_NAMESPACE_1: &str = "NAMESPACE_1";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
