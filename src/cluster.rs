// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster and namespace-pair model.
//!
//! A run always involves exactly two clusters: the primary (index 0) and the secondary
//! (index 1). Namespaces are paired positionally: the `i`-th primary namespace must be
//! able to reach the `i`-th secondary namespace and vice versa. [`NamespacePairs`] can
//! only be constructed from lists of equal length, so every later stage can rely on the
//! 1:1 correspondence without re-checking it.

use crate::errors::ChainError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Maximum length of a namespace name (DNS-1123 label)
const MAX_NAMESPACE_LEN: usize = 63;

/// Position of a cluster in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Primary,
    Secondary,
}

impl ClusterRole {
    /// The other cluster.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    /// Index used in environment variable names (`CLUSTER_0`, `CLUSTER_1`).
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Identifies one cluster for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    /// Cluster name, used in logs and error messages
    pub name: String,
    /// Primary or secondary
    pub role: ClusterRole,
    /// Kubeconfig file holding this cluster's credentials
    pub kubeconfig: PathBuf,
    /// Context to select inside the kubeconfig (`None` = current context)
    pub context: Option<String>,
    /// Namespaces under test in this cluster
    pub namespaces: Vec<String>,
}

/// Two namespaces, one per cluster, that must reach one another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NamespacePair {
    /// Namespace in the primary cluster
    pub primary: String,
    /// Namespace in the secondary cluster
    pub secondary: String,
}

impl NamespacePair {
    /// The namespace of this pair that lives in `role`'s cluster.
    #[must_use]
    pub fn namespace_for(&self, role: ClusterRole) -> &str {
        match role {
            ClusterRole::Primary => &self.primary,
            ClusterRole::Secondary => &self.secondary,
        }
    }
}

impl fmt::Display for NamespacePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.primary, self.secondary)
    }
}

/// Ordered, non-empty list of namespace pairs with validated names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePairs {
    pairs: Vec<NamespacePair>,
}

impl NamespacePairs {
    /// Parse two comma-separated namespace lists.
    ///
    /// Whitespace around entries is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NamespaceCountMismatch`] when the lists differ in length and
    /// [`ChainError::Precondition`] for empty lists or invalid names.
    pub fn parse(primary: &str, secondary: &str) -> Result<Self, ChainError> {
        Self::from_lists(split_list(primary), split_list(secondary))
    }

    /// Build pairs from two already-split lists.
    ///
    /// # Errors
    ///
    /// Same as [`NamespacePairs::parse`].
    pub fn from_lists(primary: Vec<String>, secondary: Vec<String>) -> Result<Self, ChainError> {
        if primary.len() != secondary.len() {
            return Err(ChainError::NamespaceCountMismatch {
                primary: primary.len(),
                secondary: secondary.len(),
            });
        }
        if primary.is_empty() {
            return Err(ChainError::precondition("no namespace pairs configured"));
        }

        for name in primary.iter().chain(secondary.iter()) {
            validate_namespace(name)?;
        }

        let pairs = primary
            .into_iter()
            .zip(secondary)
            .map(|(primary, secondary)| NamespacePair { primary, secondary })
            .collect();

        Ok(Self { pairs })
    }

    /// Restrict the run to a single pair.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the pair is not part of the configured list.
    pub fn narrow_to(&self, primary: &str, secondary: &str) -> Result<Self, ChainError> {
        let pair = self
            .pairs
            .iter()
            .find(|p| p.primary == primary && p.secondary == secondary)
            .cloned()
            .ok_or_else(|| {
                ChainError::precondition(format!(
                    "active pair {primary}<->{secondary} is not one of the configured namespace pairs"
                ))
            })?;
        Ok(Self { pairs: vec![pair] })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NamespacePair> {
        self.pairs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Never true for a constructed list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> &NamespacePair {
        &self.pairs[0]
    }

    /// All namespaces of the pairs that live in `role`'s cluster, in order.
    #[must_use]
    pub fn namespaces_for(&self, role: ClusterRole) -> Vec<String> {
        self.pairs
            .iter()
            .map(|p| p.namespace_for(role).to_string())
            .collect()
    }
}

impl<'a> IntoIterator for &'a NamespacePairs {
    type Item = &'a NamespacePair;
    type IntoIter = std::slice::Iter<'a, NamespacePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// Namespace lists as supplied by configuration, before validation.
///
/// Every stage builds its [`NamespacePairs`] from these, so a mismatch is reported by
/// the first stage of an entry point, before anything touches a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceLists {
    /// Comma-separated primary namespaces
    pub primary: String,
    /// Comma-separated secondary namespaces
    pub secondary: String,
}

impl NamespaceLists {
    #[must_use]
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    /// Validate the lists and optionally narrow them to the active pair.
    ///
    /// # Errors
    ///
    /// See [`NamespacePairs::parse`] and [`NamespacePairs::narrow_to`].
    pub fn resolve(&self, active: Option<&NamespacePair>) -> Result<NamespacePairs, ChainError> {
        let pairs = NamespacePairs::parse(&self.primary, &self.secondary)?;
        match active {
            Some(pair) => pairs.narrow_to(&pair.primary, &pair.secondary),
            None => Ok(pairs),
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    if list.trim().is_empty() {
        return Vec::new();
    }
    list.split(',').map(|s| s.trim().to_string()).collect()
}

/// Validate a namespace name as a DNS-1123 label.
fn validate_namespace(name: &str) -> Result<(), ChainError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAMESPACE_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(ChainError::precondition(format!(
            "invalid namespace name '{name}': must be a lowercase DNS-1123 label"
        )))
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
