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

//! One-off backup Jobs and the seeded restore, tracked in the cluster status across passes.

use super::Error;
use super::apply::apply_object;
use super::observe::Observation;
use crate::context::Context;
use crate::types::v1alpha1::backup::RestoreSpec;
use crate::types::v1alpha1::cluster::security::IdentityPolicy;
use crate::types::v1alpha1::cluster::{ApplyStage, DesiredObject, Neo4jCluster, ObjectType};
use crate::types::v1alpha1::status::operation::{Operation, OperationKind, OperationPhase};
use crate::version::Version;
use k8s_openapi::api::batch::v1 as batchv1;
use kube::runtime::events::EventType;
use tokio::time::Instant;
use tracing::{info, warn};

/// Settled operations kept in the status.
const SETTLED_HISTORY: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationsState {
    pub operations: Vec<Operation>,
    pub last_backup_trigger: Option<String>,
    /// Set when the restored database could not be seeded.
    pub admin_problem: Option<String>,
}

impl OperationsState {
    pub fn has_pending(&self) -> bool {
        self.operations.iter().any(|op| !op.is_settled())
    }

    fn track(&mut self, name: String, kind: OperationKind, now: &str) {
        self.operations.push(Operation {
            name,
            kind,
            phase: OperationPhase::Running,
            started_at: now.to_owned(),
            database_online: false,
        });
    }

    /// Drops the oldest settled backups beyond the history limit. The restore entry stays
    /// for the life of the cluster; it is what keeps the restore from running twice.
    fn prune(&mut self) {
        let prunable = |op: &Operation| op.kind == OperationKind::Backup && op.is_settled();
        let settled = self.operations.iter().filter(|op| prunable(op)).count();
        let mut excess = settled.saturating_sub(SETTLED_HISTORY);
        self.operations.retain(|op| {
            if excess > 0 && prunable(op) {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// Phase of a Job from its terminal conditions.
pub fn job_phase(job: &batchv1::Job) -> OperationPhase {
    let status = job.status.as_ref();
    let condition = |type_: &str| {
        status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == type_ && c.status == "True")
            })
    };

    if condition("Complete") || status.and_then(|s| s.succeeded).unwrap_or_default() > 0 {
        OperationPhase::Succeeded
    } else if condition("Failed") {
        OperationPhase::Failed
    } else {
        OperationPhase::Running
    }
}

async fn start_job(ctx: &Context, job: &batchv1::Job) -> Result<(), Error> {
    let object = DesiredObject::typed(job, ApplyStage::Operations)?;
    apply_object(ctx, &object).await?;
    Ok(())
}

async fn poll(ctx: &Context, cluster: &Neo4jCluster, op: &mut Operation) -> Result<(), Error> {
    let live = ctx
        .platform
        .get(&ObjectType::of::<batchv1::Job>(), &cluster.namespace()?, &op.name)
        .await?;
    let phase = match live {
        Some(live) => job_phase(&serde_json::from_value(live)?),
        None => {
            warn!("{} job {} disappeared", op.kind, op.name);
            OperationPhase::Failed
        }
    };
    if phase == op.phase {
        return Ok(());
    }

    op.phase = phase;
    match phase {
        OperationPhase::Succeeded => {
            info!("{} job {} succeeded", op.kind, op.name);
            ctx.record(
                cluster,
                EventType::Normal,
                &format!("{}Succeeded", op.kind),
                &format!("job {} completed", op.name),
            )
            .await;
        }
        OperationPhase::Failed => {
            ctx.record(
                cluster,
                EventType::Warning,
                &format!("{}Failed", op.kind),
                &format!("job {} failed", op.name),
            )
            .await;
        }
        OperationPhase::Running => {}
    }
    Ok(())
}

/// Starts requested backups, polls running ones and seeds the restored database once
/// members are ready.
pub async fn sync_operations(
    ctx: &Context,
    cluster: &Neo4jCluster,
    version: &Version,
    observation: &Observation,
    deadline: Instant,
    now: &str,
) -> Result<OperationsState, Error> {
    let status = cluster.status.clone().unwrap_or_default();
    let mut state = OperationsState {
        operations: status.operations,
        last_backup_trigger: status.last_backup_trigger,
        admin_problem: None,
    };
    let identity = IdentityPolicy::classify(&cluster.spec);

    if let Some(trigger) = cluster.spec.backup.as_ref().and_then(|b| b.trigger.as_ref())
        && state.last_backup_trigger.as_ref() != Some(trigger)
        && let Some(job) = cluster.new_backup_job(version, &identity, trigger)?
    {
        let name = cluster.backup_job_name(trigger);
        start_job(ctx, &job).await?;
        info!("started backup job {} for trigger '{}'", name, trigger);
        ctx.record(
            cluster,
            EventType::Normal,
            "BackupStarted",
            &format!("job {name} for trigger '{trigger}'"),
        )
        .await;
        state.track(name, OperationKind::Backup, now);
        state.last_backup_trigger = Some(trigger.clone());
    }

    for op in state
        .operations
        .iter_mut()
        .filter(|op| op.phase == OperationPhase::Running)
    {
        poll(ctx, cluster, op).await?;
    }

    let restore_tracked = state
        .operations
        .iter()
        .any(|op| op.kind == OperationKind::Restore);
    let ready_members = observation.ready_members();
    if !restore_tracked
        && let Some(restore) = &cluster.spec.restore
        && observation.workloads_ready()
        && let Some(member) = ready_members.first()
    {
        match seed_database(ctx, cluster, version, member, restore, deadline).await {
            Ok(()) => {
                state.operations.push(Operation {
                    name: cluster.restore_operation_name(),
                    kind: OperationKind::Restore,
                    phase: OperationPhase::Succeeded,
                    started_at: now.to_owned(),
                    database_online: true,
                });
                ctx.record(
                    cluster,
                    EventType::Normal,
                    "RestoreSeeded",
                    &format!("database {} seeded from {}", restore.database, restore.seed_uri()),
                )
                .await;
            }
            Err(e) => {
                warn!("database {} not seeded yet: {}", restore.database, e);
                state.admin_problem = Some(e.to_string());
            }
        }
    }

    state.prune();
    Ok(state)
}

async fn seed_database(
    ctx: &Context,
    cluster: &Neo4jCluster,
    version: &Version,
    member: &str,
    restore: &RestoreSpec,
    deadline: Instant,
) -> Result<(), Error> {
    let credentials = ctx.admin_credentials(cluster).await?;
    let endpoint = Context::member_endpoints(cluster, &credentials, &[member.to_owned()])
        .into_iter()
        .next()
        .ok_or_else(|| crate::types::error::Error::InternalError {
            msg: "no endpoint for restore target".to_owned(),
        })?;
    ctx.admin
        .seed_database(&endpoint, version, restore, deadline)
        .await
        .map_err(|source| Error::Admin { source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::reconcile::observe::{MemberCounts, server_records};
    use crate::tests::{
        FakeConnector, FakePlatform, auth_secret, create_test_cluster, member_endpoint,
        member_pod, test_context, test_context_with,
    };
    use crate::types::v1alpha1::backup::{BackupSpec, RestoreSpec};
    use crate::types::v1alpha1::status::Status;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const NOW: &str = "2025-06-01T12:00:00Z";

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn not_ready() -> Observation {
        Observation {
            primaries: MemberCounts {
                desired: 3,
                ready: 0,
            },
            ..Default::default()
        }
    }

    fn with_backup(trigger: &str) -> Neo4jCluster {
        let mut cluster = create_test_cluster("2025.11.0-enterprise");
        cluster.spec.backup = Some(BackupSpec {
            trigger: Some(trigger.to_owned()),
            path: "/backups".to_owned(),
            database: "neo4j".to_owned(),
            ..Default::default()
        });
        cluster
    }

    #[test]
    fn test_job_phase() {
        let mut job = batchv1::Job::default();
        assert_eq!(job_phase(&job), OperationPhase::Running);

        job.status = Some(batchv1::JobStatus {
            conditions: Some(vec![batchv1::JobCondition {
                type_: "Failed".to_owned(),
                status: "True".to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(job_phase(&job), OperationPhase::Failed);

        job.status = Some(batchv1::JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        assert_eq!(job_phase(&job), OperationPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_new_trigger_starts_one_backup() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let version = Version::parse("2025.11.0").unwrap();
        let mut cluster = with_backup("nightly-1");

        let state = sync_operations(&ctx, &cluster, &version, &not_ready(), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(state.last_backup_trigger.as_deref(), Some("nightly-1"));
        assert_eq!(state.operations.len(), 1);
        assert_eq!(state.operations[0].name, "graph-backup-nightly-1");
        assert!(state.has_pending());
        assert_eq!(platform.object_names("Job"), vec!["graph-backup-nightly-1"]);

        // Same trigger on the next pass: nothing new is started.
        cluster.status = Some(Status {
            operations: state.operations.clone(),
            last_backup_trigger: state.last_backup_trigger.clone(),
            ..Default::default()
        });
        let state = sync_operations(&ctx, &cluster, &version, &not_ready(), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(state.operations.len(), 1);
    }

    #[tokio::test]
    async fn test_finished_backup_is_settled() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let version = Version::parse("2025.11.0").unwrap();
        let mut cluster = with_backup("nightly-1");

        let state = sync_operations(&ctx, &cluster, &version, &not_ready(), deadline(), NOW)
            .await
            .unwrap();
        platform.set_object_status(
            "Job",
            "graph-backup-nightly-1",
            serde_json::json!({"succeeded": 1}),
        );
        cluster.status = Some(Status {
            operations: state.operations,
            last_backup_trigger: state.last_backup_trigger,
            ..Default::default()
        });

        let state = sync_operations(&ctx, &cluster, &version, &not_ready(), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(state.operations[0].phase, OperationPhase::Succeeded);
        assert!(!state.has_pending());
        assert!(platform.event_reasons().contains(&"BackupSucceeded".to_owned()));
    }

    fn with_restore() -> Neo4jCluster {
        let mut cluster = create_test_cluster("2025.02.0-enterprise");
        cluster.spec.restore = Some(RestoreSpec {
            from_path: "/backups/movies.backup".to_owned(),
            claim_name: Some("backup-pvc".to_owned()),
            database: "movies".to_owned(),
            ..Default::default()
        });
        cluster
    }

    fn ready(cluster: &Neo4jCluster) -> Observation {
        Observation {
            primaries: MemberCounts {
                desired: 3,
                ready: 3,
            },
            servers: server_records(cluster, &[member_pod("graph-primary-0", "primary", true)]),
            ..Default::default()
        }
    }

    fn seeding_context(platform: &FakePlatform) -> (Arc<Context>, Arc<Mutex<Vec<String>>>) {
        platform.insert_secret(auth_secret("graph-auth", "NEO4J_AUTH", "neo4j/password"));
        let connector = FakeConnector::default();
        connector.respond(&member_endpoint("graph-primary-0").address, Ok(vec![]));
        let statements = connector.statements();
        (test_context_with(platform.clone(), connector), statements)
    }

    #[tokio::test]
    async fn test_restore_seeds_members_from_artifact() {
        let platform = FakePlatform::default();
        let (ctx, statements) = seeding_context(&platform);
        let version = Version::parse("2025.02.0").unwrap();
        let mut cluster = with_restore();

        let state = sync_operations(&ctx, &cluster, &version, &not_ready(), deadline(), NOW)
            .await
            .unwrap();
        assert!(state.operations.is_empty());
        assert!(statements.lock().unwrap().is_empty());

        let state = sync_operations(&ctx, &cluster, &version, &ready(&cluster), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(state.operations.len(), 1);
        assert_eq!(state.operations[0].name, "graph-restore");
        assert_eq!(state.operations[0].kind, OperationKind::Restore);
        assert!(state.operations[0].database_online);
        assert!(!state.has_pending());
        // Every hosting server loads the artifact from its own read-only mount.
        assert_eq!(
            statements.lock().unwrap().as_slice(),
            ["CREATE DATABASE `movies` IF NOT EXISTS DEFAULT LANGUAGE CYPHER 25 \
              OPTIONS {seedURI: 'file:///backups/movies.backup'}"]
        );
        assert!(platform.object_names("Job").is_empty());
        assert!(platform.event_reasons().contains(&"RestoreSeeded".to_owned()));

        cluster.status = Some(Status {
            operations: state.operations,
            ..Default::default()
        });
        sync_operations(&ctx, &cluster, &version, &ready(&cluster), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(statements.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_is_not_repeated_after_many_backups() {
        let platform = FakePlatform::default();
        let (ctx, statements) = seeding_context(&platform);
        let version = Version::parse("2025.02.0").unwrap();
        let mut cluster = with_restore();

        let mut state = sync_operations(&ctx, &cluster, &version, &ready(&cluster), deadline(), NOW)
            .await
            .unwrap();
        for i in 0..SETTLED_HISTORY + 2 {
            state.track(format!("graph-backup-nightly-{i}"), OperationKind::Backup, NOW);
            if let Some(op) = state.operations.last_mut() {
                op.phase = OperationPhase::Succeeded;
            }
        }
        cluster.status = Some(Status {
            operations: state.operations,
            ..Default::default()
        });

        let state = sync_operations(&ctx, &cluster, &version, &ready(&cluster), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(state.operations.len(), SETTLED_HISTORY + 1);
        assert_eq!(state.operations[0].kind, OperationKind::Restore);
        assert_eq!(statements.lock().unwrap().len(), 1);

        cluster.status = Some(Status {
            operations: state.operations,
            ..Default::default()
        });
        sync_operations(&ctx, &cluster, &version, &ready(&cluster), deadline(), NOW)
            .await
            .unwrap();
        assert_eq!(statements.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_recent_history() {
        let mut state = OperationsState::default();
        for i in 0..8 {
            state.track(format!("job-{i}"), OperationKind::Backup, NOW);
        }
        for op in state.operations.iter_mut().take(7) {
            op.phase = OperationPhase::Succeeded;
        }
        state.prune();
        assert_eq!(state.operations.len(), SETTLED_HISTORY + 1);
        assert_eq!(state.operations[0].name, "job-2");
        assert!(state.has_pending());
    }
}
