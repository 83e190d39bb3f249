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

//! `neo4j.conf` rendered into a ConfigMap.

use super::{BACKUP_PORT, CLUSTER_LABEL, Neo4jCluster, ROLE_LABEL, Role};
use crate::version::Version;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

pub const CONFIG_FILE_NAME: &str = "neo4j.conf";
pub const CONFIG_MOUNT_PATH: &str = "/config";

/// Port name the Kubernetes discovery resolver looks up on the headless service.
pub const DISCOVERY_PORT_NAME: &str = "tcp-discovery";

impl Neo4jCluster {
    /// Settings as a sorted map. User entries go in first so operator-managed keys win.
    pub fn neo4j_settings(&self, version: &Version) -> BTreeMap<String, String> {
        let mut settings = self.spec.config.clone();
        let mut set = |key: &str, value: String| {
            settings.insert(key.to_owned(), value);
        };

        let topology = &self.spec.topology;
        set("server.default_listen_address", "0.0.0.0".to_owned());
        set("dbms.cluster.discovery.resolver_type", "K8S".to_owned());
        set(
            "dbms.kubernetes.label_selector",
            format!(
                "{CLUSTER_LABEL}={},{ROLE_LABEL}={}",
                self.name(),
                Role::Headless
            ),
        );
        set(version.discovery_port_key(), DISCOVERY_PORT_NAME.to_owned());
        if version.requires_discovery_v2_switch() {
            set("dbms.cluster.discovery.version", "V2_ONLY".to_owned());
        }
        set(
            "dbms.cluster.minimum_initial_system_primaries_count",
            topology.primaries.to_string(),
        );
        set(
            "initial.dbms.default_primaries_count",
            topology.primaries.to_string(),
        );
        set(
            "initial.dbms.default_secondaries_count",
            topology.secondaries.to_string(),
        );
        set("server.backup.enabled", "true".to_owned());
        set(
            "server.backup.listen_address",
            format!("0.0.0.0:{BACKUP_PORT}"),
        );

        let unrestricted: Vec<&str> = self
            .spec
            .plugins
            .iter()
            .flat_map(|p| p.unrestricted.iter().map(String::as_str))
            .collect();
        if !unrestricted.is_empty() {
            set(
                "dbms.security.procedures.unrestricted",
                unrestricted.join(","),
            );
        }

        settings
    }

    pub fn new_config_map(&self, version: &Version) -> corev1::ConfigMap {
        let rendered: String = self
            .neo4j_settings(version)
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect();

        corev1::ConfigMap {
            metadata: self.new_metadata(Role::Config, self.role_labels(Role::Config)),
            data: Some([(CONFIG_FILE_NAME.to_owned(), rendered)].into_iter().collect()),
            ..Default::default()
        }
    }
}
