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

use super::config::{CONFIG_MOUNT_PATH, DISCOVERY_PORT_NAME};
use super::security::IdentityPolicy;
use super::{
    BACKUP_PORT, BOLT_PORT, CLUSTER_LABEL, DISCOVERY_PORT, HTTP_PORT, Neo4jCluster, RAFT_PORT,
    ROUTING_PORT, Role,
};
use crate::types;
use crate::types::v1alpha1::region::{REGION_LABEL, ZONE_LABEL};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub const CONTAINER_NAME: &str = "neo4j";
pub const DATA_VOLUME_NAME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/data";
const CONFIG_VOLUME_NAME: &str = "config";
const RESTORE_VOLUME_NAME: &str = "restore";
const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

fn container_port(name: &str, port: i32) -> corev1::ContainerPort {
    corev1::ContainerPort {
        container_port: port,
        name: Some(name.to_owned()),
        protocol: Some("TCP".to_owned()),
        ..Default::default()
    }
}

/// Named container ports, shared with the services.
pub(super) fn neo4j_ports() -> [(&'static str, i32); 6] {
    [
        ("http", HTTP_PORT),
        ("bolt", BOLT_PORT),
        (DISCOVERY_PORT_NAME, DISCOVERY_PORT),
        ("tcp-raft", RAFT_PORT),
        ("tcp-routing", ROUTING_PORT),
        ("tcp-backup", BACKUP_PORT),
    ]
}

fn plain_env(name: &str, value: impl Into<String>) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn bolt_probe(initial_delay: i32, period: i32, failure_threshold: i32) -> corev1::Probe {
    corev1::Probe {
        tcp_socket: Some(corev1::TCPSocketAction {
            port: IntOrString::Int(BOLT_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

impl Neo4jCluster {
    fn neo4j_env(&self, role: Role) -> Result<Vec<corev1::EnvVar>, types::error::Error> {
        let namespace = self.namespace()?;
        let mut env = vec![
            corev1::EnvVar {
                name: "POD_NAME".to_owned(),
                value_from: Some(corev1::EnvVarSource {
                    field_ref: Some(corev1::ObjectFieldSelector {
                        field_path: "metadata.name".to_owned(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            corev1::EnvVar {
                name: "NEO4J_AUTH".to_owned(),
                value_from: Some(corev1::EnvVarSource {
                    secret_key_ref: Some(corev1::SecretKeySelector {
                        name: self.spec.auth.secret_name.clone(),
                        key: self.spec.auth.key().to_owned(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            plain_env("NEO4J_ACCEPT_LICENSE_AGREEMENT", "yes"),
            plain_env("NEO4J_CONF", CONFIG_MOUNT_PATH),
            // Each member advertises its stable per-pod DNS name.
            plain_env(
                "NEO4J_server_default__advertised__address",
                format!(
                    "$(POD_NAME).{}.{namespace}.svc.cluster.local",
                    self.headless_service_name()
                ),
            ),
            plain_env(
                "NEO4J_initial_server_mode__constraint",
                match role {
                    Role::Secondary => "SECONDARY",
                    _ => "PRIMARY",
                },
            ),
        ];

        if !self.spec.plugins.is_empty() {
            let names: Vec<&str> = self.spec.plugins.iter().map(|p| p.name.as_str()).collect();
            env.push(plain_env("NEO4J_PLUGINS", serde_json::to_string(&names)?));
        }

        // User-provided variables override operator-managed ones
        for user_env in &self.spec.env {
            env.retain(|e| e.name != user_env.name);
            env.push(user_env.clone());
        }

        Ok(env)
    }

    fn data_volume_claim_template(&self, role: Role) -> corev1::PersistentVolumeClaim {
        let storage = &self.spec.storage;
        let mut labels = self.role_labels(role);
        if let Some(user_labels) = &storage.labels {
            labels.extend(user_labels.clone());
        }

        corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(DATA_VOLUME_NAME.to_owned()),
                labels: Some(labels),
                annotations: storage.annotations.clone(),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                storage_class_name: storage.storage_class_name.clone(),
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(
                        [("storage".to_owned(), Quantity(storage.size.clone()))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Members of one cluster prefer distinct nodes. A multi-region spec pins them to
    /// the region and the listed zones.
    fn member_affinity(&self) -> corev1::Affinity {
        let anti_affinity = corev1::PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                corev1::WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: corev1::PodAffinityTerm {
                        label_selector: Some(metav1::LabelSelector {
                            match_labels: Some(self.selector_labels()),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_LABEL.to_owned(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        };

        let node_affinity = self.spec.multi_region.as_ref().and_then(|region| {
            let mut expressions = Vec::new();
            if let Some(name) = &region.region {
                expressions.push(corev1::NodeSelectorRequirement {
                    key: REGION_LABEL.to_owned(),
                    operator: "In".to_owned(),
                    values: Some(vec![name.clone()]),
                });
            }
            if !region.zones.is_empty() {
                expressions.push(corev1::NodeSelectorRequirement {
                    key: ZONE_LABEL.to_owned(),
                    operator: "In".to_owned(),
                    values: Some(region.zones.clone()),
                });
            }
            (!expressions.is_empty()).then(|| corev1::NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(corev1::NodeSelector {
                    node_selector_terms: vec![corev1::NodeSelectorTerm {
                        match_expressions: Some(expressions),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            })
        });

        corev1::Affinity {
            node_affinity,
            pod_anti_affinity: Some(anti_affinity),
            ..Default::default()
        }
    }

    fn zone_spread(&self, role: Role) -> Option<Vec<corev1::TopologySpreadConstraint>> {
        self.spec.multi_region.as_ref()?;
        Some(vec![corev1::TopologySpreadConstraint {
            max_skew: 1,
            topology_key: ZONE_LABEL.to_owned(),
            when_unsatisfiable: "ScheduleAnyway".to_owned(),
            label_selector: Some(metav1::LabelSelector {
                match_labels: Some(self.role_selector_labels(role)),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }

    fn role_replicas(&self, role: Role) -> Option<i32> {
        match role {
            Role::Secondary if self.autoscaling_enabled() => None,
            Role::Secondary => Some(self.spec.topology.secondaries),
            _ => Some(self.spec.topology.primaries),
        }
    }

    /// StatefulSet for `Role::Primary` or `Role::Secondary`. Replicas are left to the
    /// autoscaler when secondaries autoscale.
    pub fn new_statefulset(
        &self,
        role: Role,
        identity: &IdentityPolicy,
    ) -> Result<v1::StatefulSet, types::error::Error> {
        if !matches!(role, Role::Primary | Role::Secondary) {
            return Err(types::error::Error::InternalError {
                msg: format!("no StatefulSet for role {role}"),
            });
        }

        let labels = self.role_labels(role);

        let mut volume_mounts = vec![
            corev1::VolumeMount {
                name: DATA_VOLUME_NAME.to_owned(),
                mount_path: DATA_MOUNT_PATH.to_owned(),
                ..Default::default()
            },
            corev1::VolumeMount {
                name: CONFIG_VOLUME_NAME.to_owned(),
                mount_path: CONFIG_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            },
        ];
        let mut volumes = vec![corev1::Volume {
            name: CONFIG_VOLUME_NAME.to_owned(),
            config_map: Some(corev1::ConfigMapVolumeSource {
                name: self.resource_name(Role::Config),
                ..Default::default()
            }),
            ..Default::default()
        }];
        // Servers read a seed artifact themselves when the restored database is created.
        if let Some((claim, dir)) = self.spec.restore.as_ref().and_then(|restore| {
            Some((restore.claim_name.clone()?, restore.mount_dir()?))
        }) {
            volume_mounts.push(corev1::VolumeMount {
                name: RESTORE_VOLUME_NAME.to_owned(),
                mount_path: dir,
                read_only: Some(true),
                ..Default::default()
            });
            volumes.push(corev1::Volume {
                name: RESTORE_VOLUME_NAME.to_owned(),
                persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                    claim_name: claim,
                    read_only: Some(true),
                }),
                ..Default::default()
            });
        }

        let container = corev1::Container {
            name: CONTAINER_NAME.to_owned(),
            image: Some(self.spec.image.reference()),
            image_pull_policy: self
                .spec
                .image
                .pull_policy
                .as_ref()
                .map(ToString::to_string),
            env: Some(self.neo4j_env(role)?),
            ports: Some(
                neo4j_ports()
                    .into_iter()
                    .map(|(name, port)| container_port(name, port))
                    .collect(),
            ),
            volume_mounts: Some(volume_mounts),
            resources: self.spec.resources.clone(),
            security_context: identity.container_security_context(),
            // Store recovery after an unclean shutdown can take minutes.
            startup_probe: Some(bolt_probe(10, 10, 60)),
            readiness_probe: Some(bolt_probe(0, 10, 3)),
            liveness_probe: Some(bolt_probe(0, 20, 3)),
            ..Default::default()
        };

        let pull_secrets = (!self.spec.image.pull_secrets.is_empty()).then(|| {
            self.spec
                .image
                .pull_secrets
                .iter()
                .map(|name| corev1::LocalObjectReference { name: name.clone() })
                .collect()
        });

        Ok(v1::StatefulSet {
            metadata: self.new_metadata(role, labels.clone()),
            spec: Some(v1::StatefulSetSpec {
                replicas: self.role_replicas(role),
                service_name: Some(self.headless_service_name()),
                pod_management_policy: Some(
                    self.spec
                        .pod_management_policy
                        .clone()
                        .unwrap_or_default()
                        .to_string(),
                ),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.role_selector_labels(role)),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        service_account_name: Some(self.service_account_name()),
                        containers: vec![container],
                        security_context: Some(identity.pod_security_context()),
                        image_pull_secrets: pull_secrets,
                        affinity: Some(self.member_affinity()),
                        topology_spread_constraints: self.zone_spread(role),
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![self.data_volume_claim_template(role)]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Rejects updates the API server would refuse on an existing StatefulSet:
    /// selector, service name and volume claim templates are immutable.
    pub fn validate_statefulset_update(
        existing: &v1::StatefulSet,
        desired: &v1::StatefulSet,
    ) -> Result<(), types::error::Error> {
        let missing_spec = |which: &str| types::error::Error::InternalError {
            msg: format!("{which} StatefulSet missing spec"),
        };
        let existing_spec = existing.spec.as_ref().ok_or_else(|| missing_spec("existing"))?;
        let desired_spec = desired.spec.as_ref().ok_or_else(|| missing_spec("desired"))?;
        let name = existing.metadata.name.clone().unwrap_or_default();

        if existing_spec.selector.match_labels != desired_spec.selector.match_labels {
            return Err(types::error::Error::ImmutableFieldModified {
                name,
                field: "spec.selector".to_owned(),
                message: "StatefulSet selector cannot be modified".to_owned(),
            });
        }

        if existing_spec.service_name != desired_spec.service_name {
            return Err(types::error::Error::ImmutableFieldModified {
                name,
                field: "spec.serviceName".to_owned(),
                message: "StatefulSet serviceName cannot be modified".to_owned(),
            });
        }

        let existing_vcts = existing_spec.volume_claim_templates.as_deref().unwrap_or_default();
        let desired_vcts = desired_spec.volume_claim_templates.as_deref().unwrap_or_default();
        if existing_vcts.len() != desired_vcts.len() {
            return Err(types::error::Error::ImmutableFieldModified {
                name,
                field: "spec.volumeClaimTemplates".to_owned(),
                message: format!(
                    "storage layout changed from {} to {} claims",
                    existing_vcts.len(),
                    desired_vcts.len()
                ),
            });
        }

        for (i, (existing_vct, desired_vct)) in existing_vcts.iter().zip(desired_vcts).enumerate() {
            if existing_vct.metadata.name != desired_vct.metadata.name {
                return Err(types::error::Error::ImmutableFieldModified {
                    name,
                    field: format!("spec.volumeClaimTemplates[{i}].metadata.name"),
                    message: format!(
                        "claim template renamed from {:?} to {:?}",
                        existing_vct.metadata.name, desired_vct.metadata.name
                    ),
                });
            }

            let class = |vct: &corev1::PersistentVolumeClaim| {
                vct.spec
                    .as_ref()
                    .and_then(|s| s.storage_class_name.clone())
            };
            // The API server may default the class on live objects; only an explicit
            // change counts.
            if let Some(desired_class) = class(desired_vct)
                && class(existing_vct).as_ref() != Some(&desired_class)
            {
                return Err(types::error::Error::ImmutableFieldModified {
                    name,
                    field: format!("spec.volumeClaimTemplates[{i}].spec.storageClassName"),
                    message: format!(
                        "storage class changed from {:?} to '{desired_class}'",
                        class(existing_vct)
                    ),
                });
            }

            let size = |vct: &corev1::PersistentVolumeClaim| {
                vct.spec
                    .as_ref()
                    .and_then(|s| s.resources.as_ref())
                    .and_then(|r| r.requests.as_ref())
                    .and_then(|r| r.get("storage"))
                    .map(|q| q.0.clone())
            };
            if size(existing_vct) != size(desired_vct) {
                return Err(types::error::Error::ImmutableFieldModified {
                    name,
                    field: format!("spec.volumeClaimTemplates[{i}].spec.resources"),
                    message: format!(
                        "storage size changed from {:?} to {:?}",
                        size(existing_vct),
                        size(desired_vct)
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Label selector string for every member of a cluster.
pub fn member_selector(cluster_name: &str) -> String {
    format!("{CLUSTER_LABEL}={cluster_name}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v1alpha1::autoscaling::AutoscalingSpec;
    use crate::types::v1alpha1::region::MultiRegionSpec;

    fn pod_spec(sts: &v1::StatefulSet) -> corev1::PodSpec {
        sts.spec
            .clone()
            .expect("StatefulSet should have spec")
            .template
            .spec
            .expect("Pod template should have spec")
    }

    fn env_value(container: &corev1::Container, name: &str) -> Option<String> {
        container
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    }

    #[test]
    fn test_primary_statefulset_shape() {
        let cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let identity = IdentityPolicy::classify(&cluster.spec);
        let sts = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("graph-primary"));
        let spec = sts.spec.clone().unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name.as_deref(), Some("graph-headless"));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));

        let pod = pod_spec(&sts);
        assert_eq!(pod.service_account_name.as_deref(), Some("graph-sa"));
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("neo4j:5.26.0-enterprise"));
        assert_eq!(
            env_value(container, "NEO4J_initial_server_mode__constraint").as_deref(),
            Some("PRIMARY")
        );
        assert_eq!(
            env_value(container, "NEO4J_server_default__advertised__address").as_deref(),
            Some("$(POD_NAME).graph-headless.default.svc.cluster.local")
        );

        let auth = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "NEO4J_AUTH")
            .and_then(|e| e.value_from.clone())
            .and_then(|v| v.secret_key_ref)
            .expect("auth should come from the secret");
        assert_eq!(auth.name, "graph-auth");
        assert_eq!(auth.key, "NEO4J_AUTH");

        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![7474, 7687, 6000, 7000, 7688, 6362]);
    }

    #[test]
    fn test_members_mount_restore_artifact_read_only() {
        let mut cluster = crate::tests::create_test_cluster("2025.02.0-enterprise");
        cluster.spec.restore = Some(crate::types::v1alpha1::backup::RestoreSpec {
            from_path: "/backups/movies.backup".to_owned(),
            claim_name: Some("backup-pvc".to_owned()),
            database: "movies".to_owned(),
            ..Default::default()
        });
        let identity = IdentityPolicy::classify(&cluster.spec);
        let pod = pod_spec(&cluster.new_statefulset(Role::Primary, &identity).unwrap());

        let mount = pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == RESTORE_VOLUME_NAME)
            .expect("restore claim should be mounted");
        assert_eq!(mount.mount_path, "/backups");
        assert_eq!(mount.read_only, Some(true));

        let volume = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == RESTORE_VOLUME_NAME)
            .unwrap();
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "backup-pvc"
        );

        cluster.spec.restore = None;
        let pod = pod_spec(&cluster.new_statefulset(Role::Primary, &identity).unwrap());
        assert_eq!(pod.volumes.unwrap().len(), 1);
    }

    #[test]
    fn test_secondary_replicas_left_to_autoscaler() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        cluster.spec.topology.secondaries = 2;
        let identity = IdentityPolicy::classify(&cluster.spec);

        let sts = cluster.new_statefulset(Role::Secondary, &identity).unwrap();
        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(2));
        assert_eq!(
            env_value(&pod_spec(&sts).containers[0], "NEO4J_initial_server_mode__constraint")
                .as_deref(),
            Some("SECONDARY")
        );

        cluster.spec.autoscaling = Some(AutoscalingSpec {
            enabled: true,
            min_secondaries: 1,
            max_secondaries: 4,
            target_cpu_utilization: 70,
        });
        let sts = cluster.new_statefulset(Role::Secondary, &identity).unwrap();
        assert_eq!(sts.spec.unwrap().replicas, None);
    }

    #[test]
    fn test_user_env_overrides_operator_env() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        cluster.spec.env = vec![corev1::EnvVar {
            name: "NEO4J_ACCEPT_LICENSE_AGREEMENT".to_owned(),
            value: Some("eval".to_owned()),
            ..Default::default()
        }];
        let identity = IdentityPolicy::classify(&cluster.spec);
        let sts = cluster.new_statefulset(Role::Primary, &identity).unwrap();
        let container = &pod_spec(&sts).containers[0];
        let matching: Vec<_> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .filter(|e| e.name == "NEO4J_ACCEPT_LICENSE_AGREEMENT")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].value.as_deref(), Some("eval"));
    }

    #[test]
    fn test_multi_region_pins_nodes_and_spreads_zones() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        cluster.spec.multi_region = Some(MultiRegionSpec {
            region: Some("eu-west-1".to_owned()),
            zones: vec!["eu-west-1a".to_owned(), "eu-west-1b".to_owned()],
        });
        let identity = IdentityPolicy::classify(&cluster.spec);
        let pod = pod_spec(&cluster.new_statefulset(Role::Primary, &identity).unwrap());

        let terms = pod
            .affinity
            .and_then(|a| a.node_affinity)
            .and_then(|n| n.required_during_scheduling_ignored_during_execution)
            .expect("node affinity should be required")
            .node_selector_terms;
        let keys: Vec<String> = terms[0]
            .match_expressions
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![REGION_LABEL, ZONE_LABEL]);

        let spread = pod.topology_spread_constraints.unwrap();
        assert_eq!(spread[0].topology_key, ZONE_LABEL);
    }

    #[test]
    fn test_identity_policy_applied() {
        let cluster = crate::tests::create_test_cluster("2025.01.0-enterprise-ubi9");
        let identity = IdentityPolicy::classify(&cluster.spec);
        let pod = pod_spec(&cluster.new_statefulset(Role::Primary, &identity).unwrap());
        let ctx = pod.security_context.unwrap();
        assert_eq!(ctx.run_as_user, None);
        assert_eq!(ctx.run_as_non_root, Some(true));
    }

    #[test]
    fn test_statefulset_safe_update_allowed() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let identity = IdentityPolicy::classify(&cluster.spec);
        let existing = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        cluster.spec.image.tag = "5.26.1-enterprise".to_owned();
        cluster.spec.topology.primaries = 5;
        let desired = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        Neo4jCluster::validate_statefulset_update(&existing, &desired)
            .expect("image and replica changes are allowed");
    }

    #[test]
    fn test_statefulset_storage_class_change_rejected() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        cluster.spec.storage.storage_class_name = Some("standard".to_owned());
        let identity = IdentityPolicy::classify(&cluster.spec);
        let existing = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        cluster.spec.storage.storage_class_name = Some("fast-ssd".to_owned());
        let desired = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        let err = Neo4jCluster::validate_statefulset_update(&existing, &desired).unwrap_err();
        match err {
            types::error::Error::ImmutableFieldModified { name, field, .. } => {
                assert_eq!(name, "graph-primary");
                assert!(field.ends_with("storageClassName"), "{field}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_statefulset_storage_size_change_rejected() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        let identity = IdentityPolicy::classify(&cluster.spec);
        let existing = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        cluster.spec.storage.size = "50Gi".to_owned();
        let desired = cluster.new_statefulset(Role::Primary, &identity).unwrap();

        assert!(matches!(
            Neo4jCluster::validate_statefulset_update(&existing, &desired),
            Err(types::error::Error::ImmutableFieldModified { .. })
        ));
    }
}
