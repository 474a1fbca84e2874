// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CoreDNS Corefile editing.
//!
//! DNS chaining adds one server block per peer namespace zone to each cluster's Corefile:
//!
//! ```text
//! ns-b.svc.cluster.local:53 {
//!     errors
//!     cache 30
//!     forward . 10.0.1.10 10.0.2.10 {
//!         force_tcp
//!     }
//! }
//! ```
//!
//! The editor splits a Corefile into top-level server blocks and the text between them,
//! replaces blocks whose key matches a zone being applied and appends the rest. Blocks for
//! other zones, comments and formatting are left byte-for-byte intact, so applying the
//! same zones twice yields the same Corefile.

use crate::constants::{DNS_PORT, FORWARD_CACHE_SECS};
use crate::errors::ChainError;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::net::IpAddr;

/// A forwarding rule for one peer namespace zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardZone {
    /// Zone name without trailing dot, e.g. `ns-b.svc.cluster.local`
    pub zone: String,
    /// Peer DNS endpoint addresses, sorted and de-duplicated
    pub upstreams: Vec<IpAddr>,
}

impl ForwardZone {
    /// Build a forwarding rule; upstreams are sorted and de-duplicated so the rendered
    /// block does not depend on the order a load balancer reported its addresses in.
    #[must_use]
    pub fn new(zone: impl Into<String>, upstreams: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut upstreams: Vec<IpAddr> = upstreams.into_iter().collect();
        upstreams.sort();
        upstreams.dedup();
        Self {
            zone: zone.into().trim_end_matches('.').to_string(),
            upstreams,
        }
    }

    /// Forwarding rule for a namespace's service zone (`<namespace>.svc.<cluster_domain>`).
    #[must_use]
    pub fn for_namespace(
        namespace: &str,
        cluster_domain: &str,
        upstreams: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        Self::new(
            format!("{namespace}.svc.{}", cluster_domain.trim_matches('.')),
            upstreams,
        )
    }

    /// Server block key, e.g. `ns-b.svc.cluster.local:53`.
    #[must_use]
    pub fn server_key(&self) -> String {
        format!("{}:{DNS_PORT}", self.zone)
    }

    /// Whether `name` falls inside this zone.
    #[must_use]
    pub fn covers(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.');
        name == self.zone || name.ends_with(&format!(".{}", self.zone))
    }

    /// Render the server block.
    #[must_use]
    pub fn render(&self) -> String {
        let upstreams = self
            .upstreams
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        let mut block = String::new();
        let _ = writeln!(block, "{} {{", self.server_key());
        let _ = writeln!(block, "    errors");
        let _ = writeln!(block, "    cache {FORWARD_CACHE_SECS}");
        let _ = writeln!(block, "    forward . {upstreams} {{");
        let _ = writeln!(block, "        force_tcp");
        let _ = writeln!(block, "    }}");
        block.push('}');
        block
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Anything outside a server block (whitespace, comments, snippets)
    Text(String),
    /// A top-level server block; `key` is the normalised header
    Block { key: String, text: String },
}

/// A Corefile split into top-level server blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corefile {
    segments: Vec<Segment>,
}

impl Corefile {
    /// Split a Corefile into server blocks.
    ///
    /// Braces inside comments and quoted strings are ignored.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if braces are unbalanced.
    pub fn parse(source: &str) -> Result<Self, ChainError> {
        let mut segments = Vec::new();
        let mut depth = 0usize;
        let mut in_comment = false;
        let mut in_quote = false;
        let mut segment_start = 0usize;
        let mut line_start = 0usize;
        let mut header_start = 0usize;

        for (idx, ch) in source.char_indices() {
            if in_comment {
                if ch == '\n' {
                    in_comment = false;
                    if depth == 0 {
                        line_start = idx + 1;
                    }
                }
                continue;
            }
            if in_quote {
                if ch == '"' {
                    in_quote = false;
                }
                continue;
            }

            match ch {
                '#' => in_comment = true,
                '"' => in_quote = true,
                '\n' if depth == 0 => line_start = idx + 1,
                '{' => {
                    if depth == 0 {
                        header_start = line_start.max(segment_start);
                        if header_start > segment_start {
                            segments.push(Segment::Text(
                                source[segment_start..header_start].to_string(),
                            ));
                        }
                    }
                    depth += 1;
                }
                '}' => {
                    if depth == 0 {
                        return Err(ChainError::precondition(format!(
                            "Corefile has an unmatched '}}' at byte {idx}"
                        )));
                    }
                    depth -= 1;
                    if depth == 0 {
                        let text = &source[header_start..=idx];
                        let header = text.split('{').next().unwrap_or_default();
                        segments.push(Segment::Block {
                            key: normalize_key(header),
                            text: text.to_string(),
                        });
                        segment_start = idx + 1;
                        line_start = idx + 1;
                    }
                }
                _ => {}
            }
        }

        if depth != 0 {
            return Err(ChainError::precondition(
                "Corefile has an unterminated server block",
            ));
        }
        if segment_start < source.len() {
            segments.push(Segment::Text(source[segment_start..].to_string()));
        }

        Ok(Self { segments })
    }

    /// Normalised keys of all server blocks, in order.
    #[must_use]
    pub fn server_keys(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Block { key, .. } => Some(key.as_str()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Insert or replace the server block for `zone`.
    pub fn upsert(&mut self, zone: &ForwardZone) {
        let key = normalize_key(&zone.server_key());
        let rendered = zone.render();

        if let Some(Segment::Block { text, .. }) = self
            .segments
            .iter_mut()
            .find(|s| matches!(s, Segment::Block { key: k, .. } if *k == key))
        {
            *text = rendered;
            return;
        }

        if !self.render().ends_with('\n') && !self.segments.is_empty() {
            self.segments.push(Segment::Text("\n".to_string()));
        }
        self.segments.push(Segment::Block {
            key,
            text: rendered,
        });
        self.segments.push(Segment::Text("\n".to_string()));
    }

    /// Whether a server block exists for `zone`.
    #[must_use]
    pub fn contains_zone(&self, zone: &str) -> bool {
        let key = normalize_key(&format!("{}:{DNS_PORT}", zone.trim_end_matches('.')));
        self.server_keys().contains(&key.as_str())
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(text) | Segment::Block { text, .. } => text.as_str(),
            })
            .collect()
    }
}

/// Merge forward zones into a Corefile.
///
/// # Errors
///
/// Returns a precondition error if the existing Corefile cannot be parsed or a zone has
/// no upstreams.
pub fn merge_forward_zones(corefile: &str, zones: &[ForwardZone]) -> Result<String, ChainError> {
    let mut parsed = Corefile::parse(corefile)?;
    for zone in zones {
        if zone.upstreams.is_empty() {
            return Err(ChainError::precondition(format!(
                "forward zone {} has no upstream addresses",
                zone.zone
            )));
        }
        parsed.upsert(zone);
    }
    Ok(parsed.render())
}

/// SHA-256 of a Corefile, hex encoded.
#[must_use]
pub fn checksum(corefile: &str) -> String {
    format!("{:x}", Sha256::digest(corefile.as_bytes()))
}

/// Normalise a server block header: drop the `dns://` scheme and trailing dots, and
/// default the port to 53. Multi-zone headers keep their zones in order.
fn normalize_key(header: &str) -> String {
    header
        .split_whitespace()
        .map(|token| {
            let token = token.strip_prefix("dns://").unwrap_or(token);
            let (host, port) = match token.rsplit_once(':') {
                Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
                    (host, port.to_string())
                }
                _ => (token, DNS_PORT.to_string()),
            };
            let host = host.trim_end_matches('.');
            let host = if host.is_empty() { "." } else { host };
            format!("{host}:{port}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "corefile_tests.rs"]
mod corefile_tests;
