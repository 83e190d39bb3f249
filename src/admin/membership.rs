// Copyright 2025 Neo4j Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cluster membership views and split-brain detection.
//!
//! Each member reports the servers it considers part of the cluster. Views that share at
//! least one server belong to the same partition; a healthy cluster has exactly one.

use super::Row;
use crate::types::v1alpha1::k8s::SplitBrainRemediation;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

const STATE_ENABLED: &str = "Enabled";
const HEALTH_AVAILABLE: &str = "Available";

/// One row of `SHOW SERVERS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub address: String,
    pub state: String,
    pub health: String,
}

impl ServerInfo {
    pub fn from_row(row: &Row) -> Self {
        let text = |column: &str| {
            row.get(column)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            name: text("name"),
            address: text("address"),
            state: text("state"),
            health: text("health"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == STATE_ENABLED && self.health == HEALTH_AVAILABLE
    }

    /// Pod name behind the advertised address. Advertised addresses are per-pod DNS
    /// names, so the first label is the pod; bare IPs are kept whole.
    pub fn member(&self) -> String {
        member_from_address(&self.address)
    }
}

pub fn member_from_address(address: &str) -> String {
    let host = address
        .rsplit_once(':')
        .map(|(host, _port)| host)
        .unwrap_or(address);
    if host.parse::<IpAddr>().is_ok() {
        return host.to_owned();
    }
    host.split('.').next().unwrap_or(host).to_owned()
}

/// What one member believes the cluster consists of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub member: String,
    pub servers: Vec<ServerInfo>,
    /// Members reported as enabled and available, always including the reporter.
    pub peers: BTreeSet<String>,
}

impl MemberView {
    pub fn from_rows(member: &str, rows: &[Row]) -> Self {
        let servers: Vec<ServerInfo> = rows.iter().map(ServerInfo::from_row).collect();
        let mut peers: BTreeSet<String> = servers
            .iter()
            .filter(|s| s.is_active())
            .map(ServerInfo::member)
            .collect();
        peers.insert(member.to_owned());

        Self {
            member: member.to_owned(),
            servers,
            peers,
        }
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}

/// Connected components of overlapping views, largest first. Ties go to the component
/// whose smallest member sorts first.
pub fn partition(views: &[MemberView]) -> Vec<BTreeSet<String>> {
    let mut sets = DisjointSet::new(views.len());
    for i in 0..views.len() {
        for j in (i + 1)..views.len() {
            if !views[i].peers.is_disjoint(&views[j].peers) {
                sets.union(i, j);
            }
        }
    }

    let mut components: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (i, view) in views.iter().enumerate() {
        components
            .entry(sets.find(i))
            .or_default()
            .extend(view.peers.iter().cloned());
    }

    let mut partitions: Vec<BTreeSet<String>> = components.into_values().collect();
    partitions.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
    partitions
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub views: Vec<MemberView>,
    /// Members that did not answer.
    pub unreachable: Vec<String>,
    pub partitions: Vec<BTreeSet<String>>,
    /// Union of all reported servers, by address.
    pub servers: Vec<ServerInfo>,
}

impl HealthReport {
    pub fn new(views: Vec<MemberView>, unreachable: Vec<String>) -> Self {
        let partitions = partition(&views);
        let servers: BTreeMap<String, ServerInfo> = views
            .iter()
            .flat_map(|v| v.servers.iter())
            .map(|s| (s.address.clone(), s.clone()))
            .collect();

        Self {
            views,
            unreachable,
            partitions,
            servers: servers.into_values().collect(),
        }
    }

    pub fn is_split(&self) -> bool {
        self.partitions.len() > 1
    }

    pub fn is_healthy(&self) -> bool {
        !self.is_split() && self.unreachable.is_empty()
    }

    fn known_members(&self) -> BTreeSet<&str> {
        self.views
            .iter()
            .map(|v| v.member.as_str())
            .chain(self.unreachable.iter().map(String::as_str))
            .collect()
    }

    /// Known members outside the largest partition.
    pub fn minority_members(&self) -> Vec<String> {
        let Some((majority, rest)) = self.partitions.split_first() else {
            return Vec::new();
        };
        let known = self.known_members();
        let minority: BTreeSet<&String> = rest
            .iter()
            .flatten()
            .filter(|m| !majority.contains(*m) && known.contains(m.as_str()))
            .collect();
        minority.into_iter().cloned().collect()
    }

    /// Members to restart, in order. Empty unless the cluster is split and the policy
    /// opts in.
    pub fn remediation_plan(&self, policy: SplitBrainRemediation) -> Vec<String> {
        if !self.is_split() {
            return Vec::new();
        }
        match policy {
            SplitBrainRemediation::Disabled => Vec::new(),
            SplitBrainRemediation::RestartMinority => self.minority_members(),
            SplitBrainRemediation::RollingRestart => {
                let mut plan = self.minority_members();
                let known = self.known_members();
                let majority = self.partitions.first().into_iter().flatten();
                plan.extend(
                    majority
                        .filter(|m| known.contains(m.as_str()))
                        .cloned()
                        .collect::<Vec<_>>(),
                );
                plan
            }
        }
    }
}
