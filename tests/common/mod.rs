// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for live-cluster integration tests
//!
//! The tests need two reachable clusters, described by:
//!
//! - `DNSCHAIN_TEST_KUBECONFIG_0` / `DNSCHAIN_TEST_KUBECONFIG_1` - kubeconfig per cluster
//! - `DNSCHAIN_TEST_CLUSTER_0` / `DNSCHAIN_TEST_CLUSTER_1` - context (and cluster) names

#![allow(dead_code)]

use dnschain::client::{ProbeTargetSpec, SecretPayload};
use dnschain::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_PROBE_PORT, DEFAULT_PROBE_SERVICE, DEFAULT_PROBE_TARGET_IMAGE,
};
use dnschain::context::{AccessMode, AccessSettings};
use dnschain::pipeline::reload::SettlePolicy;
use dnschain::pipeline::storage::StorageScripts;
use dnschain::pipeline::verifier::{ProbePolicy, VerifySettings};
use dnschain::pipeline::PipelineSettings;
use dnschain::retry::PollPolicy;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One live cluster under test
#[derive(Debug, Clone)]
pub struct LiveCluster {
    pub name: String,
    pub kubeconfig: PathBuf,
}

/// Read both clusters from the environment or skip the test
pub fn live_clusters_or_skip() -> Option<(LiveCluster, LiveCluster)> {
    let read = |index: u8| -> Option<LiveCluster> {
        let kubeconfig = std::env::var(format!("DNSCHAIN_TEST_KUBECONFIG_{index}")).ok()?;
        let name = std::env::var(format!("DNSCHAIN_TEST_CLUSTER_{index}")).ok()?;
        Some(LiveCluster {
            name,
            kubeconfig: PathBuf::from(kubeconfig),
        })
    };

    match (read(0), read(1)) {
        (Some(primary), Some(secondary)) => Some((primary, secondary)),
        _ => {
            eprintln!(
                "Skipping integration test: DNSCHAIN_TEST_KUBECONFIG_0/1 and \
                 DNSCHAIN_TEST_CLUSTER_0/1 are not set"
            );
            None
        }
    }
}

/// Direct access settings for the two live clusters
pub fn access_settings(primary: &LiveCluster, secondary: &LiveCluster) -> AccessSettings {
    AccessSettings {
        mode: AccessMode::Direct,
        primary_cluster: Some(primary.name.clone()),
        secondary_cluster: Some(secondary.name.clone()),
        primary_kubeconfig: Some(primary.kubeconfig.clone()),
        secondary_kubeconfig: Some(secondary.kubeconfig.clone()),
        ..AccessSettings::default()
    }
}

/// Pipeline settings with short bounds suitable for CI clusters
pub fn pipeline_settings(storage: StorageScripts) -> PipelineSettings {
    let mut data = BTreeMap::new();
    data.insert("username".to_string(), "integration".to_string());
    data.insert("password".to_string(), "integration-secret".to_string());

    PipelineSettings {
        readiness: PollPolicy::new(Duration::from_secs(10), 30),
        verify: VerifySettings {
            target: ProbeTargetSpec {
                service: DEFAULT_PROBE_SERVICE.to_string(),
                port: DEFAULT_PROBE_PORT,
                image: DEFAULT_PROBE_TARGET_IMAGE.to_string(),
            },
            probe: ProbePolicy {
                attempts: 5,
                interval: Duration::from_secs(10),
                request_timeout: Duration::from_secs(10),
            },
            endpoint_wait: PollPolicy::within(Duration::from_secs(180), Duration::from_secs(5)),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        },
        lb_wait: PollPolicy::within(Duration::from_secs(600), Duration::from_secs(15)),
        reload_wait: PollPolicy::within(Duration::from_secs(300), Duration::from_secs(10)),
        settle: SettlePolicy {
            delay: Duration::from_secs(15),
            confirm: true,
        },
        secret: SecretPayload {
            name: "dnschain-integration".to_string(),
            data,
        },
        storage,
    }
}

/// Build a raw client for cleanup
pub async fn kube_client(cluster: &LiveCluster) -> Result<Client, Box<dyn std::error::Error>> {
    let kubeconfig = Kubeconfig::read_from(&cluster.kubeconfig)?;
    let options = KubeConfigOptions {
        context: Some(cluster.name.clone()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    Ok(Client::try_from(config)?)
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Deleted test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("Test namespace already deleted: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
