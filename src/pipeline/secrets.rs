// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Namespace and secret provisioning stage.
//!
//! For every namespace pair, the primary namespace (primary cluster) and the secondary
//! namespace (secondary cluster) are created if missing and receive the search/index
//! access secret. Every write is read back: the stage only succeeds if the secret exists
//! and is non-empty everywhere.

use crate::client::{ClusterClient, SecretPayload};
use crate::cluster::ClusterRole;
use crate::context::StageContext;
use crate::errors::ChainError;
use serde::Serialize;
use tracing::info;

/// Where a secret has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretPlacement {
    pub cluster: String,
    pub namespace: String,
    pub secret: String,
}

/// Provision namespaces and secrets for every pair.
///
/// # Errors
///
/// Returns a precondition error if the secret has no content (checked before anything is
/// written), [`ChainError::SecretMissing`] if a read-back finds nothing, or the client's
/// error if a write fails.
pub async fn provision(
    ctx: &StageContext,
    secret: &SecretPayload,
) -> Result<Vec<SecretPlacement>, ChainError> {
    if !secret.has_content() {
        return Err(ChainError::precondition(format!(
            "secret '{}' has no data to replicate",
            secret.name
        )));
    }

    let mut placements = Vec::new();
    for pair in ctx.pairs.iter() {
        info!(pair = %pair, secret = %secret.name, "Provisioning namespace pair");
        for role in [ClusterRole::Primary, ClusterRole::Secondary] {
            let client = ctx.client(role);
            let namespace = pair.namespace_for(role);
            placements.push(provision_one(client.as_ref(), namespace, secret).await?);
        }
    }
    Ok(placements)
}

async fn provision_one(
    client: &dyn ClusterClient,
    namespace: &str,
    secret: &SecretPayload,
) -> Result<SecretPlacement, ChainError> {
    client.ensure_namespace(namespace).await?;
    client.upsert_secret(namespace, secret).await?;

    let stored = client.get_secret(namespace, &secret.name).await?;
    if !stored.as_ref().is_some_and(SecretPayload::has_content) {
        return Err(ChainError::SecretMissing {
            cluster: client.name().to_string(),
            namespace: namespace.to_string(),
            name: secret.name.clone(),
        });
    }

    Ok(SecretPlacement {
        cluster: client.name().to_string(),
        namespace: namespace.to_string(),
        secret: secret.name.clone(),
    })
}
