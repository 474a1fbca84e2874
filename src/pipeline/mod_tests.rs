// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the pipeline entry points, run against two fake clusters.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::client::fake::{nodes_not_ready_report, ready_report, FakeFactory};
    use crate::client::ProbeTargetSpec;
    use crate::corefile::Corefile;
    use crate::errors::ErrorKind;
    use crate::pipeline::verifier::ProbePolicy;
    use std::collections::{BTreeMap, VecDeque};
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const MEDIATED_KUBECONFIG: &str = r"
apiVersion: v1
kind: Config
clusters:
- name: paris
  cluster:
    server: https://paris.example.com
- name: frankfurt
  cluster:
    server: https://frankfurt.example.com
contexts:
- name: proxy-paris
  context:
    cluster: paris
    user: bastion
- name: proxy-frankfurt
  context:
    cluster: frankfurt
    user: bastion
users:
- name: bastion
  user:
    token: abc
current-context: proxy-paris
";

    struct Harness {
        factory: FakeFactory,
        _kubeconfigs: Vec<NamedTempFile>,
        access: AccessSettings,
        namespaces: NamespaceLists,
        settings: PipelineSettings,
    }

    impl Harness {
        fn direct(primary_namespaces: &str, secondary_namespaces: &str) -> Self {
            let primary = NamedTempFile::new().unwrap();
            let secondary = NamedTempFile::new().unwrap();
            let access = AccessSettings {
                mode: AccessMode::Direct,
                primary_cluster: Some("paris".to_string()),
                secondary_cluster: Some("frankfurt".to_string()),
                primary_kubeconfig: Some(primary.path().to_path_buf()),
                secondary_kubeconfig: Some(secondary.path().to_path_buf()),
                ..AccessSettings::default()
            };
            Self {
                factory: FakeFactory::healthy(),
                _kubeconfigs: vec![primary, secondary],
                access,
                namespaces: NamespaceLists::new(primary_namespaces, secondary_namespaces),
                settings: settings(),
            }
        }

        fn mediated(primary_namespaces: &str, secondary_namespaces: &str) -> Self {
            let mut kubeconfig = NamedTempFile::new().unwrap();
            kubeconfig.write_all(MEDIATED_KUBECONFIG.as_bytes()).unwrap();
            let access = AccessSettings {
                mode: AccessMode::Mediated,
                mediated_kubeconfig: kubeconfig.path().to_path_buf(),
                ..AccessSettings::default()
            };
            Self {
                factory: FakeFactory::healthy(),
                _kubeconfigs: vec![kubeconfig],
                access,
                namespaces: NamespaceLists::new(primary_namespaces, secondary_namespaces),
                settings: settings(),
            }
        }

        fn pipeline(&self) -> Pipeline<FakeFactory> {
            Pipeline::new(
                self.factory.clone(),
                self.access.clone(),
                self.namespaces.clone(),
                self.settings.clone(),
            )
        }
    }

    fn settings() -> PipelineSettings {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), "indexer".to_string());
        data.insert("password".to_string(), "s3cret".to_string());

        PipelineSettings {
            readiness: PollPolicy::new(Duration::from_secs(1), 3),
            verify: VerifySettings {
                target: ProbeTargetSpec {
                    service: "sample-nginx".to_string(),
                    port: 80,
                    image: "nginx:1.27-alpine".to_string(),
                },
                probe: ProbePolicy {
                    attempts: 3,
                    interval: Duration::from_secs(1),
                    request_timeout: Duration::from_secs(5),
                },
                endpoint_wait: PollPolicy::new(Duration::from_secs(1), 3),
                cluster_domain: "cluster.local".to_string(),
            },
            lb_wait: PollPolicy::new(Duration::from_secs(1), 5),
            reload_wait: PollPolicy::new(Duration::from_secs(1), 5),
            settle: SettlePolicy {
                delay: Duration::ZERO,
                confirm: false,
            },
            secret: SecretPayload {
                name: "search-index-credentials".to_string(),
                data,
            },
            storage: StorageScripts {
                interpreter: "sh".to_string(),
                working_dir: None,
                configure: PathBuf::from("storageclass-configure.sh"),
                verify: PathBuf::from("storageclass-verify.sh"),
                args: Vec::new(),
            },
        }
    }

    #[cfg(unix)]
    fn script(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{body}").unwrap();
        file
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prerequisites_replicates_secret_into_every_namespace() {
        let mut harness = Harness::direct("ns-a,ns-b", "ns-a,ns-b");
        let configure = script("test \"$CLUSTER_0\" = paris && test \"$CLUSTER_1\" = frankfurt");
        let verify = script("echo storage class present");
        harness.settings.storage.configure = configure.path().to_path_buf();
        harness.settings.storage.verify = verify.path().to_path_buf();

        let report = harness.pipeline().run_prerequisites().await.unwrap();

        assert_eq!(report.storage, StorageOutcome::Configured);
        assert_eq!(report.secrets.len(), 4);
        for cluster in [&harness.factory.primary, &harness.factory.secondary] {
            let state = cluster.state();
            for ns in ["ns-a", "ns-b"] {
                assert!(state.namespaces.contains(ns));
                let secret = state
                    .secrets
                    .get(&(ns.to_string(), "search-index-credentials".to_string()))
                    .unwrap();
                assert!(secret.has_content());
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_storage_scripts_receive_args_and_active_pair() {
        let mut harness = Harness::direct("ns-a,ns-b", "ns-c,ns-d");
        harness.access.active_pair = Some(NamespacePair {
            primary: "ns-b".to_string(),
            secondary: "ns-d".to_string(),
        });
        let configure = script(
            "test \"$NAMESPACE_0\" = ns-b && test \"$NAMESPACE_1\" = ns-d && test \"$1\" = gp3",
        );
        let verify = script("test \"$1\" = gp3");
        harness.settings.storage.configure = configure.path().to_path_buf();
        harness.settings.storage.verify = verify.path().to_path_buf();
        harness.settings.storage.args = vec!["gp3".to_string()];

        let report = harness.pipeline().run_prerequisites().await.unwrap();

        assert_eq!(report.storage, StorageOutcome::Configured);
        assert_eq!(report.secrets.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prerequisites_storage_script_failure_stops_entry_point() {
        let mut harness = Harness::direct("ns-a", "ns-b");
        let configure = script("echo no storage backend >&2; exit 4");
        harness.settings.storage.configure = configure.path().to_path_buf();

        let err = harness.pipeline().run_prerequisites().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::StorageClass));
        assert_eq!(err.kind(), ErrorKind::ExternalOperation);
    }

    #[tokio::test]
    async fn test_prerequisites_skips_storage_in_mediated_mode() {
        let harness = Harness::mediated("ns-a", "ns-b");

        let report = harness.pipeline().run_prerequisites().await.unwrap();

        assert_eq!(report.storage, StorageOutcome::Skipped);
        assert_eq!(report.context.access_mode, "mediated");
        assert_eq!(report.context.primary_cluster, "proxy-paris");
        assert_eq!(report.context.secondary_cluster, "proxy-frankfurt");
    }

    #[tokio::test]
    async fn test_rerunning_prerequisites_leaves_secrets_unchanged() {
        let harness = Harness::mediated("ns-a,ns-b", "ns-a,ns-b");

        harness.pipeline().run_prerequisites().await.unwrap();
        let first_primary = harness.factory.primary.state().secrets.clone();
        let first_secondary = harness.factory.secondary.state().secrets.clone();

        let report = harness.pipeline().run_prerequisites().await.unwrap();

        assert_eq!(report.secrets.len(), 4);
        assert_eq!(first_primary.len(), 2);
        assert_eq!(first_secondary.len(), 2);
        let primary = harness.factory.primary.state();
        let secondary = harness.factory.secondary.state();
        assert_eq!(primary.secrets, first_primary);
        assert_eq!(secondary.secrets, first_secondary);
        assert_eq!(primary.secret_writes, 4);
        assert_eq!(secondary.secret_writes, 4);
    }

    #[tokio::test]
    async fn test_namespace_count_mismatch_rejected_before_any_write() {
        let harness = Harness::direct("ns-a,ns-b", "ns-a");

        let err = harness.pipeline().run_prerequisites().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::InitContext));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        match err {
            ChainError::Stage { source, .. } => assert!(matches!(
                *source,
                ChainError::NamespaceCountMismatch {
                    primary: 2,
                    secondary: 1
                }
            )),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(harness.factory.connects(), 0);
        assert_eq!(harness.factory.primary.state().secret_writes, 0);
        assert_eq!(harness.factory.secondary.state().secret_writes, 0);
    }

    #[tokio::test]
    async fn test_lost_secret_is_reported_as_missing() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.secondary.state().lose_secrets = true;

        let err = harness.pipeline().run_prerequisites().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::CreateNamespacesAndSecrets));
        assert_eq!(err.kind(), ErrorKind::SecretMissing);
        assert!(err.to_string().contains("frankfurt/ns-b"));
    }

    #[tokio::test]
    async fn test_empty_secret_is_a_precondition_violation() {
        let mut harness = Harness::direct("ns-a", "ns-b");
        harness.settings.secret.data.clear();

        let err = harness.pipeline().run_prerequisites().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(harness.factory.primary.state().secret_writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_end_to_end() {
        let harness = Harness::direct("ns-a,ns-b", "ns-a,ns-b");

        let report = harness.pipeline().run_chain().await.unwrap();

        assert_eq!(report.readiness.len(), 2);
        assert_eq!(report.direct.len(), 4);
        assert!(report
            .direct
            .iter()
            .all(|r| r.succeeded && r.mode == AddressingMode::Direct));
        assert_eq!(report.direct[0].source_cluster, "paris");
        assert_eq!(report.direct[0].source_namespace, "ns-a");
        assert_eq!(report.direct[0].target, "10.2.0.10:80");

        assert_eq!(report.chaining.len(), 2);
        assert!(report.chaining.iter().all(|c| c.changed));
        assert_eq!(
            report.chaining[0].zones,
            vec!["ns-a.svc.cluster.local", "ns-b.svc.cluster.local"]
        );
        assert!(report.reload.iter().all(|r| !r.skipped && r.reloaded == 2));

        assert_eq!(report.dns.len(), 4);
        assert!(report.dns.iter().all(|r| r.succeeded));
        assert_eq!(
            report.dns[0].target,
            "sample-nginx.ns-a.svc.cluster.local:80"
        );

        let corefile = harness.factory.primary.state().corefile.clone();
        assert!(corefile.contains("forward . 10.2.255.10 10.2.255.11"));
    }

    #[test]
    fn test_mirrored_namespaces_are_detected() {
        let pairs = NamespaceLists::new("ns-a,ns-b,ns-c", "ns-a,ns-x,ns-b")
            .resolve(None)
            .unwrap();

        assert_eq!(
            chaining::mirrored_namespaces(&pairs),
            vec!["ns-a".to_string(), "ns-b".to_string()]
        );

        let disjoint = NamespaceLists::new("ns-a", "ns-b").resolve(None).unwrap();
        assert!(chaining::mirrored_namespaces(&disjoint).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rechaining_is_idempotent() {
        let harness = Harness::direct("ns-a", "ns-b");

        harness.pipeline().run_chain().await.unwrap();
        let first = harness.factory.primary.state().corefile.clone();
        let second_report = harness.pipeline().run_chain().await.unwrap();

        let state = harness.factory.primary.state();
        assert_eq!(state.corefile, first);
        assert_eq!(state.corefile_writes, 1);
        assert!(second_report.chaining.iter().all(|c| !c.changed));
        assert!(second_report.reload.iter().all(|r| r.skipped));

        let parsed = Corefile::parse(&state.corefile).unwrap();
        let blocks = parsed
            .server_keys()
            .into_iter()
            .filter(|k| *k == "ns-b.svc.cluster.local:53")
            .count();
        assert_eq!(blocks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_verify_before_chaining_fails() {
        let harness = Harness::direct("ns-a", "ns-b");

        let err = harness
            .pipeline()
            .run_verify(AddressingMode::Dns)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::CrossClusterDns));
        assert_eq!(err.kind(), ErrorKind::Reachability);
        assert!(err.to_string().contains("sample-nginx.ns-b.svc.cluster.local"));
        assert_eq!(harness.factory.primary.state().probes.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_verify_retries_transient_failures() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.primary.state().direct_failures_remaining = 2;

        let report = harness
            .pipeline()
            .run_verify(AddressingMode::Direct)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(report.results[1].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_verify_gives_up_after_bounded_attempts() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.secondary.state().direct_failures_remaining = 10;

        let err = harness
            .pipeline()
            .run_verify(AddressingMode::Direct)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Reachability);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_pair_narrows_the_run() {
        let mut harness = Harness::direct("ns-a,ns-b", "ns-c,ns-d");
        harness.access.active_pair = Some(NamespacePair {
            primary: "ns-b".to_string(),
            secondary: "ns-d".to_string(),
        });

        let report = harness
            .pipeline()
            .run_verify(AddressingMode::Direct)
            .await
            .unwrap();

        assert_eq!(report.context.pairs.len(), 1);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].source_namespace, "ns-b");
        assert_eq!(report.results[1].source_namespace, "ns-d");
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_names_failing_checks() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.secondary.state().readiness = VecDeque::from([nodes_not_ready_report()]);

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ClusterReady));
        assert_eq!(err.kind(), ErrorKind::ReadinessTimeout);
        let message = err.to_string();
        assert!(message.contains("frankfurt"));
        assert!(message.contains("nodes-ready (1/3 nodes ready)"));
        assert_eq!(harness.factory.primary.state().corefile_writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_reports_both_unhealthy_clusters() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.primary.state().readiness = VecDeque::from([nodes_not_ready_report()]);
        harness.factory.secondary.state().readiness = VecDeque::from([nodes_not_ready_report()]);

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ClusterReady));
        assert_eq!(err.kind(), ErrorKind::ReadinessTimeout);
        let message = err.to_string();
        assert!(message.contains("Cluster 'paris' not ready"));
        assert!(message.contains("Cluster 'frankfurt' not ready"));
        assert_eq!(message.matches("nodes-ready (1/3 nodes ready)").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_waits_for_recovery() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.primary.state().readiness = VecDeque::from([
            nodes_not_ready_report(),
            nodes_not_ready_report(),
            ready_report(),
        ]);

        let report = harness.pipeline().run_chain().await.unwrap();

        assert_eq!(report.readiness[0].attempts, 3);
        assert_eq!(report.readiness[1].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_not_observed_is_distinct_from_reachability() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.primary.state().reload_after_polls = None;

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ResolverReload));
        assert_eq!(err.kind(), ErrorKind::ReloadNotObserved);
        assert!(!err.is_retryable());
        match err {
            ChainError::Stage { source, .. } => match *source {
                ChainError::ReloadNotObserved {
                    cluster,
                    reloaded,
                    total,
                    ..
                } => {
                    assert_eq!(cluster, "paris");
                    assert_eq!(reloaded, 0);
                    assert_eq!(total, 2);
                }
                other => panic!("unexpected error: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_log_read_aborts_reload_wait() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.secondary.state().log_read_denied = Some(403);

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ResolverReload));
        assert_eq!(err.kind(), ErrorKind::Kubernetes);
        assert!(err.to_string().contains("pods/log is forbidden"));
        assert_eq!(harness.factory.secondary.state().reload_polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dns_load_balancer_never_ready() {
        let harness = Harness::direct("ns-a", "ns-b");
        harness.factory.secondary.state().lb_ready_after_polls = 100;

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ApplyDnsChaining));
        assert_eq!(err.kind(), ErrorKind::EndpointUnavailable);
        assert!(err.to_string().contains("kube-system/internal-dns-lb"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_right_after_reload_fails_on_stale_cache() {
        let mut harness = Harness::direct("ns-a", "ns-b");
        harness.settings.settle = SettlePolicy {
            delay: Duration::ZERO,
            confirm: true,
        };
        harness.settings.verify.probe.attempts = 1;
        harness.factory.primary.state().cache_stale_for = Duration::from_secs(10);

        let err = harness.pipeline().run_chain().await.unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ResolverReload));
        assert_eq!(err.kind(), ErrorKind::Reachability);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_lets_stale_cache_expire() {
        let mut harness = Harness::direct("ns-a", "ns-b");
        harness.settings.settle = SettlePolicy {
            delay: Duration::from_secs(15),
            confirm: true,
        };
        harness.settings.verify.probe.attempts = 1;
        harness.factory.primary.state().cache_stale_for = Duration::from_secs(10);

        let report = harness.pipeline().run_chain().await.unwrap();

        let confirmation = report.settle.unwrap();
        assert!(confirmation.succeeded);
        assert_eq!(confirmation.mode, AddressingMode::Dns);
        assert_eq!(
            confirmation.target,
            "sample-nginx.ns-b.svc.cluster.local:80"
        );
    }

    #[tokio::test]
    async fn test_every_stage_connects_fresh_clients() {
        let harness = Harness::mediated("ns-a", "ns-b");

        harness.pipeline().run_prerequisites().await.unwrap();

        // three stages, two clusters each
        assert_eq!(harness.factory.connects(), 6);
    }
}
