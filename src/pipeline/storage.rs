// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Storage class stage.
//!
//! Runs the configure script and then the verify script against both clusters. The
//! scripts receive the context's script environment (combined `KUBECONFIG`, `CLUSTER_0`,
//! `CLUSTER_1`, plus `NAMESPACE_0`/`NAMESPACE_1` when the run is narrowed to one pair).
//! Skipped in mediated access mode, where storage is managed out of band.

use crate::context::{AccessMode, StageContext};
use crate::errors::ChainError;
use crate::scripts::{run_script, ScriptCommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Scripts run by the storage class stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageScripts {
    pub interpreter: String,
    /// Directory both scripts run in; relative script paths resolve against it
    pub working_dir: Option<PathBuf>,
    pub configure: PathBuf,
    pub verify: PathBuf,
    /// Arguments passed to both scripts
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOutcome {
    Configured,
    Skipped,
}

/// Configure and verify the storage class on both clusters.
///
/// # Errors
///
/// Returns [`ChainError::ExternalOperation`] if either script fails.
pub async fn configure_storage(
    ctx: &StageContext,
    scripts: &StorageScripts,
) -> Result<StorageOutcome, ChainError> {
    if ctx.access.mode == AccessMode::Mediated {
        info!("Skipping storage class configuration in mediated access mode");
        return Ok(StorageOutcome::Skipped);
    }

    let pair = (ctx.pairs.len() == 1).then(|| ctx.pairs.first());
    let env = ctx.access.script_env(pair)?;

    let command = |script: &PathBuf| {
        let command = scripts
            .args
            .iter()
            .fold(ScriptCommand::new(&scripts.interpreter, script), |command, arg| {
                command.arg(arg)
            })
            .envs(env.clone());
        match &scripts.working_dir {
            Some(dir) => command.working_dir(dir),
            None => command,
        }
    };

    run_script(&command(&scripts.configure)).await?;
    let output = run_script(&command(&scripts.verify)).await?;
    info!(output = %output.stdout.trim(), "Storage class verified on both clusters");

    Ok(StorageOutcome::Configured)
}
