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

//! Backup Jobs running `neo4j-admin`.

use super::security::IdentityPolicy;
use super::{BACKUP_PORT, Neo4jCluster, Role};
use crate::types;
use crate::types::v1alpha1::backup::BackupSpec;
use crate::version::Version;
use crate::version::command::{ADMIN_BINARY, BackupCommand};
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

const BACKUP_VOLUME_NAME: &str = "backups";
const JOB_BACKOFF_LIMIT: i32 = 2;
/// Kubernetes object names are limited to 63 characters.
const MAX_NAME_LEN: usize = 63;

/// Lowercases and replaces anything outside `[a-z0-9-]` so a free-form trigger can be
/// part of an object name.
fn sanitize_name_part(raw: &str) -> String {
    let cleaned: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    cleaned.trim_matches('-').to_owned()
}

impl Neo4jCluster {
    pub fn backup_cron_job_name(&self) -> String {
        self.resource_name(Role::Backup)
    }

    pub fn backup_job_name(&self, trigger: &str) -> String {
        let mut name = format!("{}-{}", self.backup_cron_job_name(), sanitize_name_part(trigger));
        name.truncate(MAX_NAME_LEN);
        name.trim_end_matches('-').to_owned()
    }

    /// Backup sources: the backup port of every primary.
    fn backup_sources(&self) -> Result<Vec<String>, types::error::Error> {
        let namespace = self.namespace()?;
        let statefulset = self.resource_name(Role::Primary);
        let headless = self.headless_service_name();
        Ok((0..self.spec.topology.primaries)
            .map(|i| format!("{statefulset}-{i}.{headless}.{namespace}.svc.cluster.local:{BACKUP_PORT}"))
            .collect())
    }

    fn backup_command(&self, backup: &BackupSpec) -> Result<BackupCommand, types::error::Error> {
        Ok(BackupCommand {
            database: backup.database.clone(),
            to_path: backup.path.clone(),
            from: self.backup_sources()?,
            compress: backup.compress,
            verify: backup.verify,
            parallel_download: backup.parallel_download,
            remote_address_resolution: backup.remote_address_resolution,
            skip_recovery: backup.skip_recovery,
        })
    }

    fn admin_pod_template(
        &self,
        role: Role,
        args: Vec<String>,
        claim_name: Option<&str>,
        mount_path: &str,
        identity: &IdentityPolicy,
    ) -> corev1::PodTemplateSpec {
        let volume = corev1::Volume {
            name: BACKUP_VOLUME_NAME.to_owned(),
            persistent_volume_claim: claim_name.map(|claim| {
                corev1::PersistentVolumeClaimVolumeSource {
                    claim_name: claim.to_owned(),
                    ..Default::default()
                }
            }),
            // Without a claim the artifact lives as long as the pod; useful for
            // verification runs only.
            empty_dir: claim_name
                .is_none()
                .then(corev1::EmptyDirVolumeSource::default),
            ..Default::default()
        };

        let container = corev1::Container {
            name: role.to_string(),
            image: Some(self.spec.image.reference()),
            image_pull_policy: self
                .spec
                .image
                .pull_policy
                .as_ref()
                .map(ToString::to_string),
            command: Some(vec![ADMIN_BINARY.to_owned()]),
            args: Some(args),
            env: Some(vec![corev1::EnvVar {
                name: "NEO4J_ACCEPT_LICENSE_AGREEMENT".to_owned(),
                value: Some("yes".to_owned()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: BACKUP_VOLUME_NAME.to_owned(),
                mount_path: mount_path.to_owned(),
                ..Default::default()
            }]),
            security_context: identity.container_security_context(),
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

        corev1::PodTemplateSpec {
            metadata: Some(metav1::ObjectMeta {
                labels: Some(self.role_labels(role)),
                ..Default::default()
            }),
            spec: Some(corev1::PodSpec {
                restart_policy: Some("Never".to_owned()),
                service_account_name: Some(self.service_account_name()),
                containers: vec![container],
                security_context: Some(identity.pod_security_context()),
                image_pull_secrets: pull_secrets,
                volumes: Some(vec![volume]),
                ..Default::default()
            }),
        }
    }

    fn backup_job_spec(
        &self,
        version: &Version,
        backup: &BackupSpec,
        identity: &IdentityPolicy,
    ) -> Result<batchv1::JobSpec, types::error::Error> {
        let args = self.backup_command(backup)?.args(version);
        Ok(batchv1::JobSpec {
            backoff_limit: Some(JOB_BACKOFF_LIMIT),
            template: self.admin_pod_template(
                Role::Backup,
                args,
                backup.claim_name.as_deref(),
                &backup.path,
                identity,
            ),
            ..Default::default()
        })
    }

    /// Scheduled backups. `None` without a schedule.
    pub fn new_backup_cron_job(
        &self,
        version: &Version,
        identity: &IdentityPolicy,
    ) -> Result<Option<batchv1::CronJob>, types::error::Error> {
        let Some(backup) = &self.spec.backup else {
            return Ok(None);
        };
        let Some(schedule) = &backup.schedule else {
            return Ok(None);
        };

        Ok(Some(batchv1::CronJob {
            metadata: self.new_metadata(Role::Backup, self.role_labels(Role::Backup)),
            spec: Some(batchv1::CronJobSpec {
                schedule: schedule.clone(),
                concurrency_policy: Some("Forbid".to_owned()),
                successful_jobs_history_limit: Some(3),
                failed_jobs_history_limit: Some(3),
                job_template: batchv1::JobTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(self.role_labels(Role::Backup)),
                        ..Default::default()
                    }),
                    spec: Some(self.backup_job_spec(version, backup, identity)?),
                },
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    /// One-off backup for a trigger value.
    pub fn new_backup_job(
        &self,
        version: &Version,
        identity: &IdentityPolicy,
        trigger: &str,
    ) -> Result<Option<batchv1::Job>, types::error::Error> {
        let Some(backup) = &self.spec.backup else {
            return Ok(None);
        };

        let mut metadata = self.new_metadata(Role::Backup, self.role_labels(Role::Backup));
        metadata.name = Some(self.backup_job_name(trigger));
        Ok(Some(batchv1::Job {
            metadata,
            spec: Some(self.backup_job_spec(version, backup, identity)?),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn with_backup(tag: &str) -> Neo4jCluster {
        let mut cluster = crate::tests::create_test_cluster(tag);
        cluster.spec.backup = Some(BackupSpec {
            schedule: Some("0 3 * * *".to_owned()),
            path: "/backups".to_owned(),
            claim_name: Some("backup-pvc".to_owned()),
            database: "neo4j".to_owned(),
            compress: true,
            parallel_download: true,
            ..Default::default()
        });
        cluster
    }

    fn container_args(template: &corev1::PodTemplateSpec) -> Vec<String> {
        template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn test_cron_job_runs_version_gated_backup() {
        let cluster = with_backup("2025.11.0-enterprise");
        let version = cluster.validate().unwrap();
        let identity = IdentityPolicy::classify(&cluster.spec);

        let cron = cluster
            .new_backup_cron_job(&version, &identity)
            .unwrap()
            .expect("schedule should produce a CronJob");
        assert_eq!(cron.metadata.name.as_deref(), Some("graph-backup"));

        let spec = cron.spec.unwrap();
        assert_eq!(spec.schedule, "0 3 * * *");
        let args = container_args(&spec.job_template.spec.unwrap().template);
        assert_eq!(args[..2], ["database", "backup"]);
        assert!(args.contains(&"--parallel-download=true".to_owned()));
        assert!(args.contains(&"--compress".to_owned()));
        assert!(args.contains(&format!(
            "--from={}",
            [
                "graph-primary-0.graph-headless.default.svc.cluster.local:6362",
                "graph-primary-1.graph-headless.default.svc.cluster.local:6362",
                "graph-primary-2.graph-headless.default.svc.cluster.local:6362",
            ]
            .join(",")
        )));
        assert_eq!(args.last().map(String::as_str), Some("neo4j"));
    }

    #[test]
    fn test_cron_job_drops_advanced_flags_on_old_versions() {
        let cluster = with_backup("5.26.0-enterprise");
        let version = cluster.validate().unwrap();
        let identity = IdentityPolicy::classify(&cluster.spec);

        let cron = cluster
            .new_backup_cron_job(&version, &identity)
            .unwrap()
            .unwrap();
        let args = container_args(&cron.spec.unwrap().job_template.spec.unwrap().template);
        assert!(!args.iter().any(|a| a.ends_with("=true")));
    }

    #[test]
    fn test_no_cron_job_without_schedule() {
        let mut cluster = with_backup("5.26.0-enterprise");
        if let Some(backup) = cluster.spec.backup.as_mut() {
            backup.schedule = None;
        }
        let version = cluster.validate().unwrap();
        let identity = IdentityPolicy::classify(&cluster.spec);
        assert!(
            cluster
                .new_backup_cron_job(&version, &identity)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_backup_job_names_are_sanitized() {
        let cluster = with_backup("5.26.0-enterprise");
        assert_eq!(cluster.backup_job_name("Nightly Run#7"), "graph-backup-nightly-run-7");
        assert!(cluster.backup_job_name(&"x".repeat(100)).len() <= 63);
    }
}
