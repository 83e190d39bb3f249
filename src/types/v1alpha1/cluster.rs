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

mod autoscaling;
mod config;
pub mod desired;
mod jobs;
mod pdb;
mod rbac;
pub mod route;
pub mod security;
mod services;
mod workloads;

use crate::types;
use crate::types::error::{ImageVersionSnafu, InvalidSpecSnafu, NoNamespaceSnafu};
use crate::types::v1alpha1::autoscaling::AutoscalingSpec;
use crate::types::v1alpha1::backup::{BackupSpec, RestoreSpec};
use crate::types::v1alpha1::k8s;
use crate::types::v1alpha1::persistence::StorageSpec;
use crate::types::v1alpha1::plugin::PluginSpec;
use crate::types::v1alpha1::region::MultiRegionSpec;
use crate::types::v1alpha1::topology::{SplitBrainSpec, Topology};
use crate::version::Version;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use strum::Display;

pub use desired::{ApplyStage, DesiredObject, DesiredObjectSet, ObjectType, PlatformFacts};
pub use workloads::member_selector;

pub const GROUP: &str = "neo4j.com";
pub const MANAGER: &str = "neo4j-operator";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const CLUSTER_LABEL: &str = const_str::concat!(GROUP, "/cluster");
pub const ROLE_LABEL: &str = const_str::concat!(GROUP, "/role");
pub const FINALIZER: &str = const_str::concat!(GROUP, "/finalizer");

pub const DEFAULT_AUTH_KEY: &str = "NEO4J_AUTH";

pub const HTTP_PORT: i32 = 7474;
pub const BOLT_PORT: i32 = 7687;
pub const DISCOVERY_PORT: i32 = 6000;
pub const RAFT_PORT: i32 = 7000;
pub const ROUTING_PORT: i32 = 7688;
pub const BACKUP_PORT: i32 = 6362;

/// Suffix of every object the operator derives from a cluster: `{cluster}-{role}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    #[strum(serialize = "sa")]
    ServiceAccount,
    Discovery,
    Config,
    Primary,
    Secondary,
    Headless,
    Client,
    Route,
    Backup,
    Restore,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default = "default_repository")]
    pub repository: String,

    /// `MAJOR.MINOR[.PATCH][-suffix]`, e.g. `5.26.0-enterprise` or `2025.01.0-enterprise-ubi9`.
    #[x_kube(validation = Rule::new("self != ''").message("image tag must not be empty"))]
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<k8s::ImagePullPolicy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_secrets: Vec<String>,
}

fn default_repository() -> String {
    "neo4j".to_owned()
}

impl ImageSpec {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Secret holding `user/password` for the initial admin user.
    #[x_kube(validation = Rule::new("self != ''").message("auth secret name must not be empty"))]
    pub secret_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl AuthSpec {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_AUTH_KEY)
    }
}

/// OpenShift route in front of the client service's HTTP port.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "neo4j.com",
    version = "v1alpha1",
    kind = "Neo4jCluster",
    namespaced,
    status = "crate::types::v1alpha1::status::Status",
    shortname = "n4jc",
    plural = "neo4jclusters",
    singular = "neo4jcluster",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Primaries", "type":"integer", "jsonPath":".spec.topology.primaries"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jClusterSpec {
    pub topology: Topology,

    pub image: ImageSpec,

    #[serde(default)]
    pub storage: StorageSpec,

    pub auth: AuthSpec,

    /// Replaces the derived pod security context entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<corev1::PodSecurityContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    /// Extra `neo4j.conf` settings. Keys the operator manages take precedence.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<corev1::EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_region: Option<MultiRegionSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteSpec>,

    #[serde(default)]
    pub split_brain: SplitBrainSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<k8s::PodManagementPolicy>,
}

impl Neo4jCluster {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    /// `{namespace}/{name}`, the work-queue identity of the cluster.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            ResourceExt::namespace(self).unwrap_or_default(),
            self.name()
        )
    }

    pub fn resource_name(&self, role: Role) -> String {
        format!("{}-{}", self.name(), role)
    }

    pub fn service_account_name(&self) -> String {
        self.resource_name(Role::ServiceAccount)
    }

    pub fn headless_service_name(&self) -> String {
        self.resource_name(Role::Headless)
    }

    /// Status entry of the one restore a cluster runs.
    pub fn restore_operation_name(&self) -> String {
        self.resource_name(Role::Restore)
    }

    pub fn client_service_name(&self) -> String {
        self.resource_name(Role::Client)
    }

    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Labels carried by every owned object. The managed-by label also scopes the
    /// operator's watches.
    pub fn common_labels(&self) -> BTreeMap<String, String> {
        [
            (MANAGED_BY_LABEL.to_owned(), MANAGER.to_owned()),
            ("app.kubernetes.io/name".to_owned(), "neo4j".to_owned()),
            ("app.kubernetes.io/instance".to_owned(), self.name()),
            (CLUSTER_LABEL.to_owned(), self.name()),
        ]
        .into_iter()
        .collect()
    }

    /// Matches every member of the cluster, whatever its role.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        [(CLUSTER_LABEL.to_owned(), self.name())]
            .into_iter()
            .collect()
    }

    pub fn role_selector_labels(&self, role: Role) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(ROLE_LABEL.to_owned(), role.to_string());
        labels
    }

    pub fn role_labels(&self, role: Role) -> BTreeMap<String, String> {
        let mut labels = self.common_labels();
        labels.insert(ROLE_LABEL.to_owned(), role.to_string());
        labels
    }

    pub fn new_metadata(&self, role: Role, labels: BTreeMap<String, String>) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(self.resource_name(role)),
            namespace: self.namespace().ok(),
            owner_references: Some(vec![self.new_owner_ref()]),
            labels: Some(labels),
            ..Default::default()
        }
    }

    pub fn version(&self) -> Result<Version, types::error::Error> {
        Version::parse(&self.spec.image.tag).context(ImageVersionSnafu {
            image: self.spec.image.reference(),
        })
    }

    /// Secondaries are synthesized when requested or when autoscaling may add them.
    pub fn has_secondaries(&self) -> bool {
        self.spec.topology.secondaries > 0 || self.autoscaling_enabled()
    }

    pub fn autoscaling_enabled(&self) -> bool {
        self.spec.autoscaling.as_ref().is_some_and(|a| a.enabled)
    }

    /// Semantic checks the admission schema cannot express. Returns the parsed image
    /// version on success.
    pub fn validate(&self) -> Result<Version, types::error::Error> {
        let version = self.version()?;
        if !version.is_supported() {
            return Err(types::error::Error::UnsupportedVersion { version });
        }

        let topology = &self.spec.topology;
        if topology.primaries < 1 {
            return InvalidSpecSnafu {
                message: format!("primaries must be at least 1, got {}", topology.primaries),
            }
            .fail();
        }
        if topology.secondaries < 0 {
            return InvalidSpecSnafu {
                message: format!("secondaries must not be negative, got {}", topology.secondaries),
            }
            .fail();
        }

        if let Some(scaling) = self.spec.autoscaling.as_ref().filter(|a| a.enabled)
            && (scaling.min_secondaries < 0 || scaling.min_secondaries > scaling.max_secondaries)
        {
            return InvalidSpecSnafu {
                message: format!(
                    "autoscaling bounds are inconsistent: min {} max {}",
                    scaling.min_secondaries, scaling.max_secondaries
                ),
            }
            .fail();
        }

        if let Some(restore) = &self.spec.restore
            && let Some(message) = restore_problem(restore)
        {
            return InvalidSpecSnafu { message }.fail();
        }

        if self.spec.plugins.iter().any(|p| p.name.trim().is_empty()) {
            return InvalidSpecSnafu {
                message: "plugin names must not be empty".to_owned(),
            }
            .fail();
        }

        Ok(version)
    }
}

/// A local artifact has to sit on a claim the members can mount next to their own volumes.
fn restore_problem(restore: &RestoreSpec) -> Option<String> {
    if restore.from_path.contains("://") {
        return None;
    }
    if !restore.from_path.starts_with('/') {
        return Some(format!("restore path '{}' must be absolute or a URI", restore.from_path));
    }
    let Some(dir) = restore.mount_dir() else {
        return Some(format!(
            "restore path '{}' needs claimName or a URI",
            restore.from_path
        ));
    };
    let taken = [workloads::DATA_MOUNT_PATH, config::CONFIG_MOUNT_PATH];
    if dir == "/"
        || taken
            .iter()
            .any(|path| dir == *path || dir.starts_with(&format!("{path}/")))
    {
        return Some(format!("restore directory '{dir}' overlaps a member volume"));
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_are_deterministic() {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        assert_eq!(cluster.resource_name(Role::Primary), "graph-primary");
        assert_eq!(cluster.resource_name(Role::Secondary), "graph-secondary");
        assert_eq!(cluster.service_account_name(), "graph-sa");
        assert_eq!(cluster.headless_service_name(), "graph-headless");
        assert_eq!(cluster.resource_name(Role::Config), "graph-config");
        assert_eq!(cluster.key(), "default/graph");
    }

    #[test]
    fn test_validate_returns_version() {
        let cluster = crate::tests::create_test_cluster("2025.01.0-enterprise");
        let version = cluster.validate().expect("calendar release should validate");
        assert!(version.is_calendar);
    }

    #[test]
    fn test_validate_rejects_unsupported_and_unparsable_versions() {
        let cluster = crate::tests::create_test_cluster("5.27.0-enterprise");
        let err = cluster.validate().unwrap_err();
        assert!(err.is_version_error(), "{err}");

        let cluster = crate::tests::create_test_cluster("latest");
        let err = cluster.validate().unwrap_err();
        assert!(err.is_version_error(), "{err}");
    }

    #[test]
    fn test_validate_restore_source() {
        let mut cluster = crate::tests::create_test_cluster("2025.02.0-enterprise");
        let restore = |from_path: &str, claim_name: Option<&str>| RestoreSpec {
            from_path: from_path.to_owned(),
            claim_name: claim_name.map(str::to_owned),
            ..Default::default()
        };

        cluster.spec.restore = Some(restore("/backups/movies.backup", Some("backup-pvc")));
        assert!(cluster.validate().is_ok());
        cluster.spec.restore = Some(restore("s3://bucket/movies.backup", None));
        assert!(cluster.validate().is_ok());

        for (from_path, claim_name) in [
            ("/backups/movies.backup", None),
            ("movies.backup", Some("backup-pvc")),
            ("/movies.backup", Some("backup-pvc")),
            ("/data/movies.backup", Some("backup-pvc")),
        ] {
            cluster.spec.restore = Some(restore(from_path, claim_name));
            let err = cluster.validate().unwrap_err();
            assert!(!err.is_version_error(), "{from_path}: {err}");
        }
    }

    #[test]
    fn test_validate_rejects_bad_autoscaling_bounds() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        cluster.spec.autoscaling = Some(AutoscalingSpec {
            enabled: true,
            min_secondaries: 4,
            max_secondaries: 2,
            target_cpu_utilization: 70,
        });

        let err = cluster.validate().unwrap_err();
        assert!(matches!(err, types::error::Error::InvalidSpec { .. }));
        assert!(!err.is_version_error());
    }

    #[test]
    fn test_image_reference() {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        assert_eq!(cluster.spec.image.reference(), "neo4j:5.26.0-enterprise");
    }
}
