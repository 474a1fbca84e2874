// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! External script execution.
//!
//! Scripts are run as `interpreter script args...` with an explicit environment. The
//! cluster identity variables in [`IDENTITY_ENV_VARS`] are always removed from the
//! inherited environment first, so a script only ever sees the identity the caller put
//! in [`ScriptCommand::env`].
//!
//! Exit status 0 is success; stdout is the script's structured return channel.

use crate::context::IDENTITY_ENV_VARS;
use crate::errors::ChainError;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub interpreter: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Variables set on top of the inherited (identity-stripped) environment
    pub env: BTreeMap<String, OsString>,
}

impl ScriptCommand {
    #[must_use]
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, env: BTreeMap<String, OsString>) -> Self {
        self.env.extend(env);
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command line for logs and errors.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.interpreter.clone(), self.script.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in IDENTITY_ENV_VARS {
            command.env_remove(var);
        }
        command.envs(&self.env);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Captured result of a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Run a script and fail on non-zero exit.
///
/// # Errors
///
/// Returns [`ChainError::ExternalOperation`] on non-zero exit and [`ChainError::Io`] if
/// the interpreter cannot be started.
pub async fn run_script(command: &ScriptCommand) -> Result<ScriptOutput, ChainError> {
    let output = run_script_allow_failure(command).await?;
    if output.success() {
        info!(command = %command.display(), "External script succeeded");
        Ok(output)
    } else {
        Err(ChainError::ExternalOperation {
            command: command.display(),
            status: output.status(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Run a script and return its output whatever the exit status.
///
/// Used for cleanup steps whose failure must not abort the run.
///
/// # Errors
///
/// Returns [`ChainError::Io`] if the interpreter cannot be started.
pub async fn run_script_allow_failure(command: &ScriptCommand) -> Result<ScriptOutput, ChainError> {
    debug!(
        command = %command.display(),
        working_dir = ?command.working_dir,
        env = ?command.env.keys().collect::<Vec<_>>(),
        "Running external script"
    );

    let output = command
        .to_command()
        .output()
        .await
        .map_err(|source| ChainError::Io {
            operation: format!("spawn `{}`", command.display()),
            source,
        })?;

    let result = ScriptOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success() {
        warn!(
            command = %command.display(),
            status = %result.status(),
            stderr = %result.stderr.trim(),
            "External script exited unsuccessfully"
        );
    }

    Ok(result)
}

#[cfg(test)]
#[path = "scripts_tests.rs"]
mod scripts_tests;
