// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access context resolution and the per-stage execution context.
//!
//! Cluster identity (which kubeconfig, which context, which namespaces) is never passed
//! through process-wide environment variables. Instead every stage receives an immutable
//! [`StageContext`] holding a freshly resolved [`AccessContext`] and one connected
//! [`ClusterClient`] per cluster. External scripts get an explicit environment built from
//! the same context via [`AccessContext::script_env`].
//!
//! # Access modes
//!
//! - **Direct** - each cluster has its own kubeconfig; both files are joined into one
//!   search path for scripts, and each cluster's context is named after the cluster.
//! - **Mediated** - a single kubeconfig materialised by a bastion/jump-host login holds
//!   both clusters. Cluster identifiers must not be supplied: the first context of the
//!   mediated kubeconfig is the primary cluster, the second the secondary.

use crate::client::ClusterClient;
use crate::cluster::{ClusterDescriptor, ClusterRole, NamespacePair, NamespacePairs};
use crate::constants::{ENV_CLUSTER_0, ENV_CLUSTER_1, ENV_KUBECONFIG, ENV_NAMESPACE_0, ENV_NAMESPACE_1};
use crate::errors::ChainError;
use kube::config::Kubeconfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variables that identify a cluster or namespace to external scripts.
///
/// These are removed from every child process environment before the context-derived
/// values are set, so nothing inherited from the parent can leak into a script.
pub const IDENTITY_ENV_VARS: [&str; 5] = [
    ENV_KUBECONFIG,
    ENV_CLUSTER_0,
    ENV_CLUSTER_1,
    ENV_NAMESPACE_0,
    ENV_NAMESPACE_1,
];

/// Pipeline stages, in the order they can appear in an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    InitContext,
    CreateNamespacesAndSecrets,
    StorageClass,
    ClusterReady,
    CrossClusterDirect,
    ApplyDnsChaining,
    ResolverReload,
    CrossClusterDns,
}

impl Stage {
    /// Stable identifier used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitContext => "init-context",
            Self::CreateNamespacesAndSecrets => "create-namespaces-and-secrets",
            Self::StorageClass => "storage-class",
            Self::ClusterReady => "cluster-ready",
            Self::CrossClusterDirect => "cross-cluster-direct",
            Self::ApplyDnsChaining => "apply-dns-chaining",
            Self::ResolverReload => "resolver-reload",
            Self::CrossClusterDns => "cross-cluster-dns",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the clusters are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AccessMode {
    /// One kubeconfig per cluster
    #[default]
    Direct,
    /// One mediated kubeconfig (bastion / jump host) holding both clusters
    Mediated,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Mediated => write!(f, "mediated"),
        }
    }
}

/// Raw access inputs, as supplied by configuration.
#[derive(Debug, Clone, Default)]
pub struct AccessSettings {
    pub mode: AccessMode,
    pub primary_cluster: Option<String>,
    pub secondary_cluster: Option<String>,
    pub primary_kubeconfig: Option<PathBuf>,
    pub secondary_kubeconfig: Option<PathBuf>,
    /// Combined search path (`KUBECONFIG`-style, platform path-list separator)
    pub search_path: Option<OsString>,
    pub mediated_kubeconfig: PathBuf,
    /// Active pair explicitly selected by the caller
    pub active_pair: Option<NamespacePair>,
}

/// Fully resolved view of how to reach both clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub mode: AccessMode,
    /// Kubeconfig files, in search order
    pub search_path: Vec<PathBuf>,
    pub primary: ClusterDescriptor,
    pub secondary: ClusterDescriptor,
}

impl AccessContext {
    /// Resolve the access context for a stage.
    ///
    /// Either returns a complete context or fails; nothing is partially applied.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when required inputs are missing, when identity
    /// inputs are supplied in mediated mode, or when a kubeconfig file does not exist.
    /// Returns [`ChainError::Kubeconfig`] when the mediated kubeconfig cannot be parsed.
    pub fn resolve(settings: &AccessSettings, pairs: &NamespacePairs) -> Result<Self, ChainError> {
        let context = match settings.mode {
            AccessMode::Direct => Self::resolve_direct(settings, pairs)?,
            AccessMode::Mediated => Self::resolve_mediated(settings, pairs)?,
        };

        debug!(
            mode = %context.mode,
            primary = %context.primary.name,
            secondary = %context.secondary.name,
            "Resolved access context"
        );

        Ok(context)
    }

    fn resolve_direct(
        settings: &AccessSettings,
        pairs: &NamespacePairs,
    ) -> Result<Self, ChainError> {
        let primary_name = settings.primary_cluster.clone().ok_or_else(|| {
            ChainError::precondition("primary cluster name is required in direct access mode")
        })?;
        let secondary_name = settings.secondary_cluster.clone().ok_or_else(|| {
            ChainError::precondition("secondary cluster name is required in direct access mode")
        })?;

        let (primary_path, secondary_path) =
            match (&settings.primary_kubeconfig, &settings.secondary_kubeconfig) {
                (Some(p), Some(s)) => (p.clone(), s.clone()),
                (None, None) => split_search_path(settings.search_path.as_ref())?,
                _ => {
                    return Err(ChainError::precondition(
                        "either both per-cluster kubeconfigs or neither must be given",
                    ))
                }
            };

        ensure_file(&primary_path, &primary_name)?;
        ensure_file(&secondary_path, &secondary_name)?;

        Ok(Self {
            mode: AccessMode::Direct,
            search_path: vec![primary_path.clone(), secondary_path.clone()],
            primary: ClusterDescriptor {
                context: Some(primary_name.clone()),
                name: primary_name,
                role: ClusterRole::Primary,
                kubeconfig: primary_path,
                namespaces: pairs.namespaces_for(ClusterRole::Primary),
            },
            secondary: ClusterDescriptor {
                context: Some(secondary_name.clone()),
                name: secondary_name,
                role: ClusterRole::Secondary,
                kubeconfig: secondary_path,
                namespaces: pairs.namespaces_for(ClusterRole::Secondary),
            },
        })
    }

    fn resolve_mediated(
        settings: &AccessSettings,
        pairs: &NamespacePairs,
    ) -> Result<Self, ChainError> {
        if settings.primary_cluster.is_some() || settings.secondary_cluster.is_some() {
            return Err(ChainError::precondition(
                "cluster identifiers must not be set in mediated access mode",
            ));
        }
        if settings.active_pair.is_some() {
            return Err(ChainError::precondition(
                "namespace identifiers must not be set in mediated access mode",
            ));
        }

        let path = settings.mediated_kubeconfig.clone();
        ensure_file(&path, "mediated access")?;

        let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| ChainError::Kubeconfig {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let contexts: Vec<String> = kubeconfig.contexts.iter().map(|c| c.name.clone()).collect();
        let [primary_context, secondary_context, ..] = contexts.as_slice() else {
            return Err(ChainError::Kubeconfig {
                path: path.display().to_string(),
                reason: format!(
                    "mediated kubeconfig must define a context per cluster, found {}",
                    contexts.len()
                ),
            });
        };

        Ok(Self {
            mode: AccessMode::Mediated,
            search_path: vec![path.clone()],
            primary: ClusterDescriptor {
                name: primary_context.clone(),
                role: ClusterRole::Primary,
                kubeconfig: path.clone(),
                context: Some(primary_context.clone()),
                namespaces: pairs.namespaces_for(ClusterRole::Primary),
            },
            secondary: ClusterDescriptor {
                name: secondary_context.clone(),
                role: ClusterRole::Secondary,
                kubeconfig: path,
                context: Some(secondary_context.clone()),
                namespaces: pairs.namespaces_for(ClusterRole::Secondary),
            },
        })
    }

    #[must_use]
    pub fn cluster(&self, role: ClusterRole) -> &ClusterDescriptor {
        match role {
            ClusterRole::Primary => &self.primary,
            ClusterRole::Secondary => &self.secondary,
        }
    }

    /// The `KUBECONFIG` value for external scripts.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if a path contains the path-list separator.
    pub fn kubeconfig_env(&self) -> Result<OsString, ChainError> {
        std::env::join_paths(&self.search_path).map_err(|e| {
            ChainError::precondition(format!("kubeconfig search path cannot be joined: {e}"))
        })
    }

    /// Environment handed to external scripts for this context.
    ///
    /// In direct mode this carries the combined kubeconfig path, both cluster names and,
    /// when a pair is given, both namespaces. In mediated mode only the mediated
    /// kubeconfig is exported.
    ///
    /// # Errors
    ///
    /// See [`AccessContext::kubeconfig_env`].
    pub fn script_env(
        &self,
        pair: Option<&NamespacePair>,
    ) -> Result<BTreeMap<String, OsString>, ChainError> {
        let mut env = BTreeMap::new();
        env.insert(ENV_KUBECONFIG.to_string(), self.kubeconfig_env()?);

        if self.mode == AccessMode::Direct {
            env.insert(ENV_CLUSTER_0.to_string(), self.primary.name.clone().into());
            env.insert(ENV_CLUSTER_1.to_string(), self.secondary.name.clone().into());
            if let Some(pair) = pair {
                env.insert(ENV_NAMESPACE_0.to_string(), pair.primary.clone().into());
                env.insert(ENV_NAMESPACE_1.to_string(), pair.secondary.clone().into());
            }
        }

        Ok(env)
    }
}

fn split_search_path(search_path: Option<&OsString>) -> Result<(PathBuf, PathBuf), ChainError> {
    let search_path = search_path.ok_or_else(|| {
        ChainError::precondition(
            "direct access mode needs per-cluster kubeconfigs or a kubeconfig search path",
        )
    })?;

    let entries: Vec<PathBuf> = std::env::split_paths(search_path)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    match <[PathBuf; 2]>::try_from(entries) {
        Ok([primary, secondary]) => Ok((primary, secondary)),
        Err(entries) => Err(ChainError::precondition(format!(
            "kubeconfig search path must list exactly two files (primary, secondary), found {}",
            entries.len()
        ))),
    }
}

fn ensure_file(path: &Path, owner: &str) -> Result<(), ChainError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ChainError::precondition(format!(
            "kubeconfig for {owner} not found at {}",
            path.display()
        )))
    }
}

/// Immutable context handed to every operation of one stage.
#[derive(Clone)]
pub struct StageContext {
    pub stage: Stage,
    pub access: Arc<AccessContext>,
    pub pairs: Arc<NamespacePairs>,
    primary: Arc<dyn ClusterClient>,
    secondary: Arc<dyn ClusterClient>,
}

impl StageContext {
    #[must_use]
    pub fn new(
        stage: Stage,
        access: Arc<AccessContext>,
        pairs: Arc<NamespacePairs>,
        primary: Arc<dyn ClusterClient>,
        secondary: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            stage,
            access,
            pairs,
            primary,
            secondary,
        }
    }

    /// Client for the cluster in `role`.
    #[must_use]
    pub fn client(&self, role: ClusterRole) -> &Arc<dyn ClusterClient> {
        match role {
            ClusterRole::Primary => &self.primary,
            ClusterRole::Secondary => &self.secondary,
        }
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("stage", &self.stage)
            .field("access", &self.access)
            .field("pairs", &self.pairs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
