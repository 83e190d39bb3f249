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

//! The ordered set of objects a cluster consists of.
//!
//! Synthesis is a pure function of the cluster object, its parsed image version and
//! [`PlatformFacts`]. Running it twice on the same input yields the same names and the
//! same manifests, so the reconciler can compare content hashes instead of live objects.

use super::{Neo4jCluster, Role, security::IdentityPolicy};
use crate::types;
use crate::types::generic::{Generic, ToGeneric};
use crate::version::Version;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::Serialize;
use tracing::warn;

/// Facts about the hosting platform, discovered once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformFacts {
    /// `route.openshift.io/v1` is served.
    pub routes_available: bool,
}

/// Apply order. Configuration lands before workloads, workloads before network
/// exposure, job templates last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplyStage {
    Configuration,
    Workload,
    Exposure,
    Operations,
}

/// Group, version, kind and plural of a Kubernetes type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ObjectType {
    pub fn of<K: k8s_openapi::Resource>() -> Self {
        Self::new(K::GROUP, K::VERSION, K::KIND, K::URL_PATH_SEGMENT)
    }

    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_owned(),
            version: version.to_owned(),
            kind: kind.to_owned(),
            plural: plural.to_owned(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    pub object_type: ObjectType,
    pub namespace: String,
    pub name: String,
    pub stage: ApplyStage,
    pub manifest: serde_json::Value,
}

impl DesiredObject {
    /// Wraps a typed object. Typed objects keep their native integer encoding.
    pub fn typed<K>(object: &K, stage: ApplyStage) -> Result<Self, types::error::Error>
    where
        K: k8s_openapi::Resource + k8s_openapi::Metadata<Ty = metav1::ObjectMeta> + Serialize,
    {
        let metadata = object.metadata();
        Ok(Self {
            object_type: ObjectType::of::<K>(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            name: metadata.name.clone().unwrap_or_default(),
            stage,
            manifest: serde_json::to_value(object)?,
        })
    }

    /// Wraps a generic tree, rendered for the wire.
    pub fn generic(
        object_type: ObjectType,
        tree: &Generic,
        stage: ApplyStage,
    ) -> Result<Self, types::error::Error> {
        let text = |path: &str| match tree.pointer(path) {
            Some(Generic::String(s)) => Some(s.clone()),
            _ => None,
        };
        let name = text("metadata.name").ok_or(types::error::Error::InternalError {
            msg: format!("generic {} has no metadata.name", object_type.kind),
        })?;

        Ok(Self {
            namespace: text("metadata.namespace").unwrap_or_default(),
            name,
            stage,
            manifest: tree.to_wire_json(),
            object_type,
        })
    }

    pub fn kind(&self) -> &str {
        &self.object_type.kind
    }

    /// `Kind/name`, for logs and events.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.object_type.kind, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredObjectSet {
    objects: Vec<DesiredObject>,
}

impl DesiredObjectSet {
    /// Orders objects by stage, keeping synthesis order within a stage.
    pub fn new(mut objects: Vec<DesiredObject>) -> Self {
        objects.sort_by_key(|o| o.stage);
        Self { objects }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DesiredObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn find(&self, kind: &str, name: &str) -> Option<&DesiredObject> {
        self.objects
            .iter()
            .find(|o| o.kind() == kind && o.name == name)
    }
}

impl<'a> IntoIterator for &'a DesiredObjectSet {
    type Item = &'a DesiredObject;
    type IntoIter = std::slice::Iter<'a, DesiredObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

impl Neo4jCluster {
    /// Builds every object the cluster should own.
    pub fn desired_objects(
        &self,
        version: &Version,
        facts: &PlatformFacts,
    ) -> Result<DesiredObjectSet, types::error::Error> {
        use ApplyStage::*;

        let identity = IdentityPolicy::classify(&self.spec);
        let mut objects = vec![
            DesiredObject::typed(&self.new_service_account(), Configuration)?,
            DesiredObject::typed(&self.new_discovery_role(), Configuration)?,
            DesiredObject::typed(&self.new_discovery_role_binding(), Configuration)?,
            DesiredObject::typed(&self.new_config_map(version), Configuration)?,
            DesiredObject::typed(&self.new_statefulset(Role::Primary, &identity)?, Workload)?,
        ];

        if self.has_secondaries() {
            objects.push(DesiredObject::typed(
                &self.new_statefulset(Role::Secondary, &identity)?,
                Workload,
            )?);
        }
        if let Some(pdb) = self.new_primary_pdb() {
            objects.push(DesiredObject::typed(&pdb, Workload)?);
        }
        if let Some(hpa) = self.new_secondary_autoscaler() {
            objects.push(DesiredObject::typed(&hpa, Workload)?);
        }

        objects.push(DesiredObject::typed(&self.new_headless_service(), Exposure)?);
        objects.push(DesiredObject::typed(&self.new_client_service(), Exposure)?);

        if let Some(route) = &self.spec.route {
            if facts.routes_available {
                objects.push(DesiredObject::generic(
                    super::route::route_type(),
                    &self.new_route(route).to_generic(),
                    Exposure,
                )?);
            } else {
                warn!(
                    "cluster {} requests a route but route.openshift.io is not served, skipping",
                    self.key()
                );
            }
        }

        if let Some(cron) = self.new_backup_cron_job(version, &identity)? {
            objects.push(DesiredObject::typed(&cron, Operations)?);
        }

        Ok(DesiredObjectSet::new(objects))
    }
}
