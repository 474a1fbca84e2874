// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration.
//!
//! Every option is a flag that falls back to an environment variable, so the tool can be
//! driven either interactively or from CI jobs that export the usual `CLUSTER_*` and
//! `KUBECONFIG*` variables. The parsed [`Config`] is converted into typed values for the
//! pipeline: [`Config::namespace_lists`], [`Config::access_settings`] and
//! [`Config::settings`].

use crate::client::{AddressingMode, ProbeTargetSpec, SecretPayload};
use crate::cluster::{NamespaceLists, NamespacePair};
use crate::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_ENDPOINT_TIMEOUT_SECS, DEFAULT_LB_POLL_INTERVAL_SECS,
    DEFAULT_LB_TIMEOUT_SECS, DEFAULT_MEDIATED_KUBECONFIG, DEFAULT_PROBE_ATTEMPTS,
    DEFAULT_PROBE_IMAGE, DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_PROBE_PORT,
    DEFAULT_PROBE_REQUEST_TIMEOUT_SECS, DEFAULT_PROBE_SERVICE, DEFAULT_PROBE_TARGET_IMAGE,
    DEFAULT_PROCEDURE_DIR, DEFAULT_READINESS_ATTEMPTS, DEFAULT_READINESS_INTERVAL_SECS,
    DEFAULT_RELOAD_POLL_INTERVAL_SECS, DEFAULT_RELOAD_TIMEOUT_SECS, DEFAULT_SCRIPT_INTERPRETER,
    DEFAULT_SECRET_NAME, DEFAULT_SETTLE_DELAY_SECS, DEFAULT_STORAGE_CLASS_CONFIGURE_SCRIPT,
    DEFAULT_STORAGE_CLASS_VERIFY_SCRIPT, ENDPOINT_POLL_INTERVAL_SECS,
};
use crate::context::{AccessMode, AccessSettings};
use crate::errors::ChainError;
use crate::pipeline::reload::SettlePolicy;
use crate::pipeline::storage::StorageScripts;
use crate::pipeline::verifier::{ProbePolicy, VerifySettings};
use crate::pipeline::PipelineSettings;
use crate::retry::PollPolicy;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// dnschain - verify cross-region connectivity and chain CoreDNS between two clusters
#[derive(Parser, Debug)]
#[command(name = "dnschain", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create namespaces, replicate the access secret and configure the storage class
    Prerequisites,

    /// Check cluster health, verify direct reachability, chain DNS and verify by name
    ///
    /// Stages run in order and stop at the first failure: cluster-ready,
    /// cross-cluster-direct, apply-dns-chaining, resolver-reload, cross-cluster-dns.
    Chain,

    /// Run only the cross-cluster reachability check
    Verify {
        /// Address the peer by endpoint IP (direct) or by chained DNS name (dns)
        #[arg(long, value_enum, default_value_t = AddressingMode::Direct)]
        mode: AddressingMode,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// How the clusters are reached
    #[arg(long, value_enum, env = "CLUSTER_ACCESS_MODE", default_value_t = AccessMode::Direct)]
    pub access_mode: AccessMode,

    /// Comma-separated namespaces under test in the primary cluster
    #[arg(long, env = "CLUSTER_0_NAMESPACE_ARR")]
    pub primary_namespaces: String,

    /// Comma-separated namespaces under test in the secondary cluster, paired by position
    #[arg(long, env = "CLUSTER_1_NAMESPACE_ARR")]
    pub secondary_namespaces: String,

    /// Kubeconfig search path listing the primary then the secondary kubeconfig
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig_search_path: Option<OsString>,

    /// Kubeconfig of the primary cluster (direct access)
    #[arg(long, env = "KUBECONFIG_0")]
    pub primary_kubeconfig: Option<PathBuf>,

    /// Kubeconfig of the secondary cluster (direct access)
    #[arg(long, env = "KUBECONFIG_1")]
    pub secondary_kubeconfig: Option<PathBuf>,

    /// Kubeconfig materialised by the bastion login (mediated access)
    #[arg(long, env = "MEDIATED_KUBECONFIG", default_value = DEFAULT_MEDIATED_KUBECONFIG)]
    pub mediated_kubeconfig: PathBuf,

    /// Primary cluster name, also its kubeconfig context (direct access)
    #[arg(long, env = "CLUSTER_0")]
    pub primary_cluster: Option<String>,

    /// Secondary cluster name, also its kubeconfig context (direct access)
    #[arg(long, env = "CLUSTER_1")]
    pub secondary_cluster: Option<String>,

    /// Restrict the run to the pair with this primary namespace
    #[arg(long = "namespace-0", env = "NAMESPACE_0")]
    pub namespace_0: Option<String>,

    /// Restrict the run to the pair with this secondary namespace
    #[arg(long = "namespace-1", env = "NAMESPACE_1")]
    pub namespace_1: Option<String>,

    /// Name of the replicated search/index access secret
    #[arg(long, env = "SEARCH_SECRET_NAME", default_value = DEFAULT_SECRET_NAME)]
    pub secret_name: String,

    /// Secret entry as KEY=VALUE (repeatable, or comma-separated in the environment)
    #[arg(
        long = "secret-literal",
        env = "SEARCH_SECRET_LITERALS",
        value_delimiter = ','
    )]
    pub secret_literals: Vec<String>,

    /// Service (and Deployment) name of the probe target
    #[arg(long, env = "PROBE_SERVICE", default_value = DEFAULT_PROBE_SERVICE)]
    pub probe_service: String,

    #[arg(long, env = "PROBE_PORT", default_value_t = DEFAULT_PROBE_PORT)]
    pub probe_port: u16,

    /// Image of the probe client pods
    #[arg(long, env = "PROBE_IMAGE", default_value = DEFAULT_PROBE_IMAGE)]
    pub probe_image: String,

    /// Image of the probe target workload
    #[arg(long, env = "PROBE_TARGET_IMAGE", default_value = DEFAULT_PROBE_TARGET_IMAGE)]
    pub probe_target_image: String,

    #[arg(long, env = "CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// Readiness polls per cluster before giving up
    #[arg(long, env = "READINESS_ATTEMPTS", default_value_t = DEFAULT_READINESS_ATTEMPTS)]
    pub readiness_attempts: u32,

    #[arg(long, env = "READINESS_INTERVAL_SECS", default_value_t = DEFAULT_READINESS_INTERVAL_SECS)]
    pub readiness_interval_secs: u64,

    /// Probe executions before a reachability failure is reported
    #[arg(long, env = "PROBE_ATTEMPTS", default_value_t = DEFAULT_PROBE_ATTEMPTS)]
    pub probe_attempts: u32,

    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value_t = DEFAULT_PROBE_INTERVAL_SECS)]
    pub probe_interval_secs: u64,

    /// Timeout of a single HTTP request made by a probe
    #[arg(long, env = "PROBE_TIMEOUT_SECS", default_value_t = DEFAULT_PROBE_REQUEST_TIMEOUT_SECS)]
    pub probe_timeout_secs: u64,

    /// Time to wait for a probe target to get a ready endpoint
    #[arg(long, env = "ENDPOINT_TIMEOUT_SECS", default_value_t = DEFAULT_ENDPOINT_TIMEOUT_SECS)]
    pub endpoint_timeout_secs: u64,

    /// Time to wait for the DNS load balancers to publish addresses
    #[arg(long, env = "LB_TIMEOUT_SECS", default_value_t = DEFAULT_LB_TIMEOUT_SECS)]
    pub lb_timeout_secs: u64,

    #[arg(long, env = "LB_POLL_INTERVAL_SECS", default_value_t = DEFAULT_LB_POLL_INTERVAL_SECS)]
    pub lb_poll_interval_secs: u64,

    /// Time to wait for CoreDNS to report a reload
    #[arg(long, env = "RELOAD_TIMEOUT_SECS", default_value_t = DEFAULT_RELOAD_TIMEOUT_SECS)]
    pub reload_timeout_secs: u64,

    #[arg(long, env = "RELOAD_POLL_INTERVAL_SECS", default_value_t = DEFAULT_RELOAD_POLL_INTERVAL_SECS)]
    pub reload_poll_interval_secs: u64,

    /// Delay after a reload before DNS probes are trusted
    #[arg(long, env = "SETTLE_DELAY_SECS", default_value_t = DEFAULT_SETTLE_DELAY_SECS)]
    pub settle_delay_secs: u64,

    /// Confirm resolution with one DNS probe after the settle delay
    #[arg(long, env = "SETTLE_CONFIRM")]
    pub settle_confirm: bool,

    #[arg(long, env = "SCRIPT_INTERPRETER", default_value = DEFAULT_SCRIPT_INTERPRETER)]
    pub script_interpreter: String,

    /// Directory holding the procedure scripts; scripts run from inside it
    #[arg(long, env = "PROCEDURE_DIR", default_value = DEFAULT_PROCEDURE_DIR)]
    pub procedure_dir: PathBuf,

    #[arg(
        long,
        env = "STORAGE_CLASS_CONFIGURE_SCRIPT",
        default_value = DEFAULT_STORAGE_CLASS_CONFIGURE_SCRIPT
    )]
    pub storage_class_configure_script: PathBuf,

    #[arg(
        long,
        env = "STORAGE_CLASS_VERIFY_SCRIPT",
        default_value = DEFAULT_STORAGE_CLASS_VERIFY_SCRIPT
    )]
    pub storage_class_verify_script: PathBuf,

    /// Argument passed to both storage class scripts (repeatable)
    #[arg(
        long = "storage-script-arg",
        env = "STORAGE_SCRIPT_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true
    )]
    pub storage_script_args: Vec<String>,

    /// Write Prometheus metrics in text exposition format to this file at exit
    #[arg(long, env = "DNSCHAIN_METRICS_OUTPUT")]
    pub metrics_output: Option<PathBuf>,
}

impl Config {
    #[must_use]
    pub fn namespace_lists(&self) -> NamespaceLists {
        NamespaceLists::new(&self.primary_namespaces, &self.secondary_namespaces)
    }

    /// Inputs for resolving the access context.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if only one of the two active namespaces is set.
    pub fn access_settings(&self) -> Result<AccessSettings, ChainError> {
        let active_pair = match (&self.namespace_0, &self.namespace_1) {
            (Some(primary), Some(secondary)) => Some(NamespacePair {
                primary: primary.clone(),
                secondary: secondary.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(ChainError::precondition(
                    "NAMESPACE_0 and NAMESPACE_1 must be set together",
                ))
            }
        };

        Ok(AccessSettings {
            mode: self.access_mode,
            primary_cluster: self.primary_cluster.clone(),
            secondary_cluster: self.secondary_cluster.clone(),
            primary_kubeconfig: self.primary_kubeconfig.clone(),
            secondary_kubeconfig: self.secondary_kubeconfig.clone(),
            search_path: self.kubeconfig_search_path.clone(),
            mediated_kubeconfig: self.mediated_kubeconfig.clone(),
            active_pair,
        })
    }

    /// The replicated secret.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for a literal without `=` or with an empty key.
    pub fn secret(&self) -> Result<SecretPayload, ChainError> {
        let mut data = BTreeMap::new();
        for literal in &self.secret_literals {
            let (key, value) = literal
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| {
                    ChainError::precondition(format!(
                        "secret literal must have the form KEY=VALUE, got '{literal}'"
                    ))
                })?;
            data.insert(key.trim().to_string(), value.to_string());
        }
        Ok(SecretPayload {
            name: self.secret_name.clone(),
            data,
        })
    }

    /// Typed settings for every pipeline stage.
    ///
    /// # Errors
    ///
    /// See [`Config::secret`].
    pub fn settings(&self) -> Result<PipelineSettings, ChainError> {
        Ok(PipelineSettings {
            readiness: PollPolicy::new(
                Duration::from_secs(self.readiness_interval_secs),
                self.readiness_attempts,
            ),
            verify: VerifySettings {
                target: ProbeTargetSpec {
                    service: self.probe_service.clone(),
                    port: self.probe_port,
                    image: self.probe_target_image.clone(),
                },
                probe: ProbePolicy {
                    attempts: self.probe_attempts.max(1),
                    interval: Duration::from_secs(self.probe_interval_secs),
                    request_timeout: Duration::from_secs(self.probe_timeout_secs),
                },
                endpoint_wait: PollPolicy::within(
                    Duration::from_secs(self.endpoint_timeout_secs),
                    Duration::from_secs(ENDPOINT_POLL_INTERVAL_SECS),
                ),
                cluster_domain: self.cluster_domain.clone(),
            },
            lb_wait: PollPolicy::within(
                Duration::from_secs(self.lb_timeout_secs),
                Duration::from_secs(self.lb_poll_interval_secs),
            ),
            reload_wait: PollPolicy::within(
                Duration::from_secs(self.reload_timeout_secs),
                Duration::from_secs(self.reload_poll_interval_secs),
            ),
            settle: SettlePolicy {
                delay: Duration::from_secs(self.settle_delay_secs),
                confirm: self.settle_confirm,
            },
            secret: self.secret()?,
            storage: StorageScripts {
                interpreter: self.script_interpreter.clone(),
                working_dir: Some(self.procedure_dir.clone()),
                configure: self.storage_class_configure_script.clone(),
                verify: self.storage_class_verify_script.clone(),
                args: self.storage_script_args.clone(),
            },
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
