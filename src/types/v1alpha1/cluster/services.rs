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

use super::workloads::neo4j_ports;
use super::{BOLT_PORT, HTTP_PORT, Neo4jCluster, Role};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::util::intstr;

fn service_port(name: &str, port: i32) -> corev1::ServicePort {
    corev1::ServicePort {
        port,
        target_port: Some(intstr::IntOrString::Int(port)),
        name: Some(name.to_owned()),
        protocol: Some("TCP".to_owned()),
        ..Default::default()
    }
}

impl Neo4jCluster {
    /// Headless service giving every member a stable DNS name. Its discovery port is
    /// what the Kubernetes resolver looks up, so it publishes not-ready addresses.
    pub fn new_headless_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: self.new_metadata(Role::Headless, self.role_labels(Role::Headless)),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                cluster_ip: Some("None".to_owned()),
                publish_not_ready_addresses: Some(true),
                selector: Some(self.selector_labels()),
                ports: Some(
                    neo4j_ports()
                        .into_iter()
                        .map(|(name, port)| service_port(name, port))
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// a new client Service for bolt and http
    pub fn new_client_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: self.new_metadata(Role::Client, self.role_labels(Role::Client)),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(self.selector_labels()),
                ports: Some(vec![
                    service_port("http", HTTP_PORT),
                    service_port("bolt", BOLT_PORT),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// `bolt://` and `http://` URLs of the client service.
    pub fn client_endpoints(&self) -> (String, String) {
        let host = format!(
            "{}.{}.svc.cluster.local",
            self.client_service_name(),
            self.namespace().unwrap_or_default()
        );
        (
            format!("neo4j://{host}:{BOLT_PORT}"),
            format!("http://{host}:{HTTP_PORT}"),
        )
    }

    /// HTTP address of one member through the headless service.
    pub fn member_http_address(&self, pod_name: &str) -> String {
        format!(
            "http://{pod_name}.{}.{}.svc.cluster.local:{HTTP_PORT}",
            self.headless_service_name(),
            self.namespace().unwrap_or_default()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::config::DISCOVERY_PORT_NAME;

    #[test]
    fn test_headless_service_publishes_discovery_port() {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let svc = cluster.new_headless_service();

        assert_eq!(svc.metadata.name.as_deref(), Some("graph-headless"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert!(
            spec.ports
                .unwrap()
                .iter()
                .any(|p| p.name.as_deref() == Some(DISCOVERY_PORT_NAME) && p.port == 6000)
        );
    }

    #[test]
    fn test_client_service_exposes_bolt_and_http_only() {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let svc = cluster.new_client_service();
        let names: Vec<String> = svc
            .spec
            .unwrap()
            .ports
            .unwrap()
            .into_iter()
            .filter_map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["http", "bolt"]);

        let (bolt, http) = cluster.client_endpoints();
        assert_eq!(bolt, "neo4j://graph-client.default.svc.cluster.local:7687");
        assert_eq!(http, "http://graph-client.default.svc.cluster.local:7474");
    }
}
