// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Staged entry points.
//!
//! Each entry point is a fixed, fail-fast sequence of stages:
//!
//! | Entry point | Stages |
//! |---|---|
//! | [`Pipeline::run_prerequisites`] | init-context, create-namespaces-and-secrets, storage-class |
//! | [`Pipeline::run_chain`] | init-context, cluster-ready, cross-cluster-direct, apply-dns-chaining, resolver-reload, cross-cluster-dns |
//! | [`Pipeline::run_verify`] | init-context, cross-cluster-direct or cross-cluster-dns |
//!
//! Every stage starts from a freshly resolved [`StageContext`]: namespace lists are
//! validated, the access context is resolved and both clusters are connected again. A
//! stage error is wrapped with the stage name, counted in the stage metrics and stops the
//! entry point.

pub mod chaining;
pub mod readiness;
pub mod reload;
pub mod secrets;
pub mod storage;
pub mod verifier;

use crate::client::{AddressingMode, ClientFactory, SecretPayload};
use crate::cluster::{NamespaceLists, NamespacePair};
use crate::context::{AccessContext, AccessMode, AccessSettings, Stage, StageContext};
use crate::errors::ChainError;
use crate::metrics::{record_stage_failure, record_stage_success};
use crate::retry::PollPolicy;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use self::chaining::ChainingOutcome;
use self::readiness::ClusterReadiness;
use self::reload::{ReloadObservation, SettlePolicy};
use self::secrets::SecretPlacement;
use self::storage::{StorageOutcome, StorageScripts};
use self::verifier::{ReachabilityResult, VerifySettings};

/// Typed settings for every stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub readiness: PollPolicy,
    pub verify: VerifySettings,
    /// Bound on waiting for the DNS load balancers
    pub lb_wait: PollPolicy,
    /// Bound on waiting for CoreDNS to reload
    pub reload_wait: PollPolicy,
    pub settle: SettlePolicy,
    pub secret: SecretPayload,
    pub storage: StorageScripts,
}

/// What the run resolved at init-context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub access_mode: String,
    pub primary_cluster: String,
    pub secondary_cluster: String,
    pub pairs: Vec<NamespacePair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerequisitesReport {
    pub context: ContextSummary,
    pub secrets: Vec<SecretPlacement>,
    pub storage: StorageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub context: ContextSummary,
    pub readiness: Vec<ClusterReadiness>,
    pub direct: Vec<ReachabilityResult>,
    pub chaining: Vec<ChainingOutcome>,
    pub reload: Vec<ReloadObservation>,
    /// Confirmation probe run by the settle policy
    pub settle: Option<ReachabilityResult>,
    pub dns: Vec<ReachabilityResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub context: ContextSummary,
    pub mode: AddressingMode,
    pub results: Vec<ReachabilityResult>,
}

/// Runs the entry points against the clusters `factory` connects to.
pub struct Pipeline<F> {
    factory: F,
    access: AccessSettings,
    namespaces: NamespaceLists,
    settings: PipelineSettings,
}

impl<F: ClientFactory> Pipeline<F> {
    pub fn new(
        factory: F,
        access: AccessSettings,
        namespaces: NamespaceLists,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            factory,
            access,
            namespaces,
            settings,
        }
    }

    /// Provision namespaces, secrets and the storage class.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, wrapped in [`ChainError::Stage`].
    pub async fn run_prerequisites(&self) -> Result<PrerequisitesReport, ChainError> {
        let context = self.init_context().await?;

        let secrets = self
            .run_stage(Stage::CreateNamespacesAndSecrets, |ctx| async move {
                secrets::provision(&ctx, &self.settings.secret).await
            })
            .await?;

        let storage = self
            .run_stage(Stage::StorageClass, |ctx| async move {
                storage::configure_storage(&ctx, &self.settings.storage).await
            })
            .await?;

        Ok(PrerequisitesReport {
            context,
            secrets,
            storage,
        })
    }

    /// Verify health and direct reachability, chain DNS and verify DNS reachability.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, wrapped in [`ChainError::Stage`].
    pub async fn run_chain(&self) -> Result<ChainReport, ChainError> {
        let settings = &self.settings;
        let context = self.init_context().await?;

        let readiness = self
            .run_stage(Stage::ClusterReady, |ctx| async move {
                readiness::wait_for_clusters(&ctx, settings.readiness).await
            })
            .await?;

        let direct = self
            .run_stage(Stage::CrossClusterDirect, |ctx| async move {
                verifier::verify(&ctx, AddressingMode::Direct, &settings.verify).await
            })
            .await?;

        let chaining = self
            .run_stage(Stage::ApplyDnsChaining, |ctx| async move {
                chaining::apply_chaining(&ctx, settings.lb_wait, &settings.verify.cluster_domain)
                    .await
            })
            .await?;

        let applied = &chaining;
        let (reload, settle) = self
            .run_stage(Stage::ResolverReload, |ctx| async move {
                let reload = reload::await_reload(&ctx, applied, settings.reload_wait).await?;
                let settle = reload::settle(&ctx, settings.settle, &settings.verify).await?;
                Ok((reload, settle))
            })
            .await?;

        let dns = self
            .run_stage(Stage::CrossClusterDns, |ctx| async move {
                verifier::verify(&ctx, AddressingMode::Dns, &settings.verify).await
            })
            .await?;

        Ok(ChainReport {
            context,
            readiness,
            direct,
            chaining,
            reload,
            settle,
            dns,
        })
    }

    /// Verify reachability in one addressing mode.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, wrapped in [`ChainError::Stage`].
    pub async fn run_verify(&self, mode: AddressingMode) -> Result<VerifyReport, ChainError> {
        let context = self.init_context().await?;
        let stage = match mode {
            AddressingMode::Direct => Stage::CrossClusterDirect,
            AddressingMode::Dns => Stage::CrossClusterDns,
        };

        let results = self
            .run_stage(stage, |ctx| async move {
                verifier::verify(&ctx, mode, &self.settings.verify).await
            })
            .await?;

        Ok(VerifyReport {
            context,
            mode,
            results,
        })
    }

    async fn init_context(&self) -> Result<ContextSummary, ChainError> {
        self.run_stage(Stage::InitContext, |ctx| async move {
            if ctx.access.mode == AccessMode::Mediated {
                info!(
                    kubeconfig = %self.access.mediated_kubeconfig.display(),
                    primary = %ctx.access.primary.name,
                    secondary = %ctx.access.secondary.name,
                    "Mediated cluster access active, cluster identities taken from the mediated kubeconfig"
                );
            }
            Ok(ContextSummary {
                access_mode: ctx.access.mode.to_string(),
                primary_cluster: ctx.access.primary.name.clone(),
                secondary_cluster: ctx.access.secondary.name.clone(),
                pairs: ctx.pairs.iter().cloned().collect(),
            })
        })
        .await
    }

    /// Build a fresh context for `stage`.
    async fn stage_context(&self, stage: Stage) -> Result<StageContext, ChainError> {
        let active = match self.access.mode {
            AccessMode::Direct => self.access.active_pair.as_ref(),
            AccessMode::Mediated => None,
        };
        let pairs = self.namespaces.resolve(active)?;
        let access = AccessContext::resolve(&self.access, &pairs)?;

        let (primary, secondary) = futures::join!(
            self.factory.connect(&access, &access.primary),
            self.factory.connect(&access, &access.secondary)
        );

        Ok(StageContext::new(
            stage,
            Arc::new(access),
            Arc::new(pairs),
            primary?,
            secondary?,
        ))
    }

    async fn run_stage<T, B, Fut>(&self, stage: Stage, body: B) -> Result<T, ChainError>
    where
        B: FnOnce(StageContext) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        info!(stage = %stage, "Starting stage");
        let started = Instant::now();

        let result = match self.stage_context(stage).await {
            Ok(ctx) => body(ctx).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                record_stage_success(stage, elapsed);
                info!(
                    stage = %stage,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Stage completed"
                );
                Ok(value)
            }
            Err(e) => {
                record_stage_failure(stage, elapsed, e.kind());
                error!(
                    stage = %stage,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "Stage failed"
                );
                Err(e.in_stage(stage))
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
