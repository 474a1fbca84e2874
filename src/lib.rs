// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # dnschain - cross-region connectivity verification and CoreDNS chaining
//!
//! dnschain proves that workloads in two independently managed Kubernetes clusters can
//! reach each other, first by IP and then by name. It chains each cluster's CoreDNS to
//! the other through internal load balancers so that
//! `<service>.<peer-namespace>.svc.cluster.local` resolves across clusters.
//!
//! ## Overview
//!
//! Work is organised as fail-fast staged entry points (see [`pipeline`]):
//!
//! - **prerequisites** - create namespaces, replicate the search/index access secret,
//!   configure the storage class
//! - **chain** - wait for both clusters to be healthy, verify direct reachability, expose
//!   DNS through load balancers, merge forward zones into each Corefile, wait for CoreDNS
//!   to reload, settle, then verify reachability by DNS name
//!
//! ## Modules
//!
//! - [`cluster`] - cluster descriptors and validated namespace pairs
//! - [`context`] - access context resolution and the per-stage context
//! - [`client`] - the [`client::ClusterClient`] capability trait and its `kube` implementation
//! - [`corefile`] - idempotent Corefile editing
//! - [`pipeline`] - stages and entry points
//! - [`scripts`] - external script runner
//! - [`retry`] - backoff for API calls and bounded polling
//! - [`metrics`] - Prometheus metrics
//! - [`config`] - CLI and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use dnschain::corefile::{merge_forward_zones, ForwardZone};
//!
//! let zone = ForwardZone::for_namespace(
//!     "ns-b",
//!     "cluster.local",
//!     ["10.1.255.10".parse().unwrap()],
//! );
//! let corefile = merge_forward_zones(".:53 {\n    forward . /etc/resolv.conf\n}\n", &[zone])
//!     .unwrap();
//! assert!(corefile.contains("ns-b.svc.cluster.local:53"));
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod context;
pub mod corefile;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod scripts;
