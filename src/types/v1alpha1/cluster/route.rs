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

//! OpenShift Route, built as a generic object.
//!
//! There are no typed bindings for `route.openshift.io`, so the route crosses the API
//! boundary as a [`Generic`] tree.

use super::{HTTP_PORT, Neo4jCluster, ObjectType, Role, RouteSpec};
use crate::types::generic::{Generic, ToGeneric};
use std::collections::BTreeMap;

pub const ROUTE_GROUP: &str = "route.openshift.io";
pub const ROUTE_VERSION: &str = "v1";

pub fn route_type() -> ObjectType {
    ObjectType::new(ROUTE_GROUP, ROUTE_VERSION, "Route", "routes")
}

/// Everything the operator decides about a route, before marshalling.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDescriptor {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner: OwnerDescriptor,
    pub service: String,
    pub weight: i32,
    pub target_port: i32,
    pub path: String,
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OwnerDescriptor {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl ToGeneric for OwnerDescriptor {
    fn to_generic(&self) -> Generic {
        Generic::map([
            ("apiVersion", self.api_version.to_generic()),
            ("kind", self.kind.to_generic()),
            ("name", self.name.to_generic()),
            ("uid", self.uid.to_generic()),
            ("controller", true.to_generic()),
            ("blockOwnerDeletion", true.to_generic()),
        ])
    }
}

impl ToGeneric for RouteDescriptor {
    fn to_generic(&self) -> Generic {
        let mut spec = Generic::map([
            (
                "to",
                Generic::map([
                    ("kind", "Service".to_generic()),
                    ("name", self.service.to_generic()),
                    ("weight", self.weight.to_generic()),
                ]),
            ),
            (
                "port",
                Generic::map([("targetPort", self.target_port.to_generic())]),
            ),
            ("path", self.path.to_generic()),
        ]);
        if let Some(host) = &self.host {
            spec.insert("host", host.to_generic());
        }

        Generic::map([
            ("apiVersion", route_type().api_version().to_generic()),
            ("kind", "Route".to_generic()),
            (
                "metadata",
                Generic::map([
                    ("name", self.name.to_generic()),
                    ("namespace", self.namespace.to_generic()),
                    ("labels", self.labels.to_generic()),
                    ("annotations", self.annotations.to_generic()),
                    ("ownerReferences", Generic::List(vec![self.owner.to_generic()])),
                ]),
            ),
            ("spec", spec),
        ])
    }
}

impl Neo4jCluster {
    pub fn new_route(&self, route: &RouteSpec) -> RouteDescriptor {
        let owner = self.new_owner_ref();
        RouteDescriptor {
            name: self.resource_name(Role::Route),
            namespace: self.namespace().unwrap_or_default(),
            labels: self.role_labels(Role::Route),
            annotations: route.annotations.clone().unwrap_or_default(),
            owner: OwnerDescriptor {
                api_version: owner.api_version,
                kind: owner.kind,
                name: owner.name,
                uid: owner.uid,
            },
            service: self.client_service_name(),
            weight: 100,
            target_port: HTTP_PORT,
            path: route.path.clone().unwrap_or_else(|| "/".to_owned()),
            host: route.host.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn route_tree() -> Generic {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let spec = RouteSpec {
            host: Some("neo4j.apps.example.com".to_owned()),
            path: None,
            annotations: Some(
                [(
                    "haproxy.router.openshift.io/timeout".to_owned(),
                    "60s".to_owned(),
                )]
                .into_iter()
                .collect(),
            ),
        };
        cluster.new_route(&spec).to_generic()
    }

    #[test]
    fn test_route_contract() {
        let tree = route_tree();
        let text = |path: &str| match tree.pointer(path) {
            Some(Generic::String(s)) => s.clone(),
            other => panic!("{path}: {other:?}"),
        };

        assert_eq!(text("apiVersion"), "route.openshift.io/v1");
        assert_eq!(text("kind"), "Route");
        assert_eq!(text("metadata.name"), "graph-route");
        assert_eq!(text("metadata.namespace"), "default");
        assert_eq!(text("spec.to.kind"), "Service");
        assert_eq!(text("spec.to.name"), "graph-client");
        assert_eq!(text("spec.path"), "/");
        assert_eq!(text("spec.host"), "neo4j.apps.example.com");
        assert_eq!(tree.pointer("spec.to.weight"), Some(&Generic::Number(100.0)));
        assert_eq!(
            tree.pointer("spec.port.targetPort"),
            Some(&Generic::Number(7474.0))
        );
    }

    #[test]
    fn test_route_maps_are_generic() {
        let tree = route_tree();
        assert!(matches!(tree.pointer("metadata.labels"), Some(Generic::Map(_))));
        assert!(matches!(
            tree.pointer("metadata.annotations"),
            Some(Generic::Map(_))
        ));
        assert_eq!(
            tree.pointer("metadata.labels.neo4j.com/role"),
            None,
            "dotted label keys are not path segments"
        );
        let Some(Generic::Map(labels)) = tree.pointer("metadata.labels") else {
            unreachable!()
        };
        assert_eq!(
            labels.get("neo4j.com/role"),
            Some(&Generic::String("route".to_owned()))
        );
    }

    #[test]
    fn test_route_numbers_are_floats_and_render_as_integers() {
        let tree = route_tree();
        let mut numbers = Vec::new();
        tree.walk(&mut |node| {
            if let Generic::Number(n) = node {
                numbers.push(*n);
            }
        });
        assert_eq!(numbers.len(), 2);

        let wire = tree.to_wire_json();
        assert_eq!(wire["spec"]["to"]["weight"], serde_json::json!(100));
        assert_eq!(wire["spec"]["port"]["targetPort"], serde_json::json!(7474));
    }
}
