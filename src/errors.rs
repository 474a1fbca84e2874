// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the DNS chaining pipeline.
//!
//! Every failure carries enough context (cluster, namespace, target, stage) to reproduce
//! the failing operation by hand. [`ChainError::kind`] maps each variant onto the
//! pipeline's error taxonomy, which decides whether a failure is retried locally or
//! aborts the entry point.

use crate::context::Stage;
use thiserror::Error;

/// Coarse classification of a [`ChainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid input or inconsistent configuration; raised before any cluster mutation
    Precondition,
    /// A cluster did not become healthy in time
    ReadinessTimeout,
    /// A probe did not complete a round trip
    Reachability,
    /// CoreDNS did not report a reload in time
    ReloadNotObserved,
    /// An external script exited non-zero
    ExternalOperation,
    /// The Kubernetes API rejected or failed a call
    Kubernetes,
    /// A Service or load balancer never published a usable address
    EndpointUnavailable,
    /// A replicated secret could not be read back
    SecretMissing,
    /// Local I/O failure
    Io,
}

impl ErrorKind {
    /// Stable identifier used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::ReadinessTimeout => "readiness_timeout",
            Self::Reachability => "reachability",
            Self::ReloadNotObserved => "reload_not_observed",
            Self::ExternalOperation => "external_operation",
            Self::Kubernetes => "kubernetes",
            Self::EndpointUnavailable => "endpoint_unavailable",
            Self::SecretMissing => "secret_missing",
            Self::Io => "io",
        }
    }
}

/// Errors produced by the DNS chaining pipeline.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Input or configuration is inconsistent
    ///
    /// Returned before any cluster is touched. Never retried.
    #[error("Precondition violated: {reason}")]
    Precondition {
        /// Explanation of what is invalid
        reason: String,
    },

    /// Primary and secondary namespace lists have different lengths
    #[error(
        "Primary and secondary namespace lists must have the same length (primary: {primary}, secondary: {secondary})"
    )]
    NamespaceCountMismatch {
        /// Number of primary namespaces
        primary: usize,
        /// Number of secondary namespaces
        secondary: usize,
    },

    /// A cluster did not pass its health checks within the polling bound
    #[error("Cluster '{cluster}' not ready after {attempts} attempts; failing checks: {failing}")]
    ClusterNotReady {
        /// Cluster name
        cluster: String,
        /// Number of polls performed
        attempts: u32,
        /// Failing checks with details, comma separated
        failing: String,
    },

    /// Both clusters failed their health checks
    #[error("{}", join_messages(.failures))]
    ClustersNotReady {
        /// One [`ChainError::ClusterNotReady`] per unhealthy cluster
        failures: Vec<ChainError>,
    },

    /// A probe never observed a full round trip
    #[error(
        "Probe from {source_cluster}/{source_namespace} to {target} ({mode} mode) failed after {attempts} attempts: {detail}"
    )]
    Reachability {
        /// Cluster the probe ran in
        source_cluster: String,
        /// Namespace the probe ran in
        source_namespace: String,
        /// Address or DNS name probed
        target: String,
        /// Addressing mode (`direct` or `dns`)
        mode: String,
        /// Number of attempts made
        attempts: u32,
        /// Output of the last attempt
        detail: String,
    },

    /// CoreDNS never logged a completed reload
    #[error(
        "CoreDNS reload not observed on cluster '{cluster}' within {timeout_secs}s ({reloaded}/{total} DNS pods reloaded)"
    )]
    ReloadNotObserved {
        /// Cluster name
        cluster: String,
        /// Polling bound in seconds
        timeout_secs: u64,
        /// DNS pods that reported a reload
        reloaded: usize,
        /// DNS pods observed
        total: usize,
    },

    /// An external script exited with a non-zero status
    #[error("External operation `{command}` failed ({status}): {stderr}")]
    ExternalOperation {
        /// Rendered command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// Kubernetes API failure
    #[error("Kubernetes API call '{operation}' on cluster '{cluster}' failed: {source}")]
    Kube {
        /// Cluster name
        cluster: String,
        /// Human-readable operation, e.g. "get configmap kube-system/coredns"
        operation: String,
        /// Underlying client error
        source: kube::Error,
    },

    /// A kubeconfig could not be read or turned into a client
    #[error("Failed to load kubeconfig {path}: {reason}")]
    Kubeconfig {
        /// Path of the kubeconfig file
        path: String,
        /// Reason for the failure
        reason: String,
    },

    /// A Service or load balancer has no usable address
    #[error("{what} on cluster '{cluster}' is not available: {reason}")]
    EndpointUnavailable {
        /// Cluster name
        cluster: String,
        /// What was being waited for, e.g. "service ns-a/sample-nginx"
        what: String,
        /// Reason for the failure
        reason: String,
    },

    /// A replicated secret is absent or empty after provisioning
    #[error("Secret '{name}' is missing or empty in {cluster}/{namespace}")]
    SecretMissing {
        /// Cluster name
        cluster: String,
        /// Namespace name
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Local I/O failure
    #[error("I/O error during {operation}: {source}")]
    Io {
        /// What was being done
        operation: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// A pipeline stage failed
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        /// Stage that failed
        stage: Stage,
        /// Failure raised inside the stage
        source: Box<ChainError>,
    },
}

impl ChainError {
    /// Build a precondition error.
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Returns a closure that wraps a `kube::Error` with cluster and operation context.
    pub fn kube(
        cluster: impl Into<String>,
        operation: impl Into<String>,
    ) -> impl FnOnce(kube::Error) -> Self {
        let cluster = cluster.into();
        let operation = operation.into();
        move |source| Self::Kube {
            cluster,
            operation,
            source,
        }
    }

    /// Wrap this error with the stage it was raised in.
    ///
    /// Wrapping is not nested: an error that already carries a stage keeps it.
    #[must_use]
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } | Self::NamespaceCountMismatch { .. } => {
                ErrorKind::Precondition
            }
            Self::Kubeconfig { .. } => ErrorKind::Precondition,
            Self::ClusterNotReady { .. } | Self::ClustersNotReady { .. } => {
                ErrorKind::ReadinessTimeout
            }
            Self::Reachability { .. } => ErrorKind::Reachability,
            Self::ReloadNotObserved { .. } => ErrorKind::ReloadNotObserved,
            Self::ExternalOperation { .. } => ErrorKind::ExternalOperation,
            Self::Kube { .. } => ErrorKind::Kubernetes,
            Self::EndpointUnavailable { .. } => ErrorKind::EndpointUnavailable,
            Self::SecretMissing { .. } => ErrorKind::SecretMissing,
            Self::Io { .. } => ErrorKind::Io,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// The stage this error was raised in, if it has been wrapped.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the pipeline retries this kind of failure locally.
    ///
    /// Only reachability failures are retried; everything else aborts the entry point.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Reachability
    }
}

fn join_messages(errors: &[ChainError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
