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

//! The reconciliation pass: fetch, finalize or converge, then report.

pub mod apply;
pub mod finalize;
pub mod health;
pub mod observe;
pub mod operations;
pub mod status;

use crate::context::Context;
use crate::types::v1alpha1::cluster::{FINALIZER, Neo4jCluster};
use crate::types::v1alpha1::status::condition::{CONDITION_FAILED, find_condition};
use crate::types::v1alpha1::status::phase::Phase;
use crate::types::v1alpha1::status::server::Endpoints;
use crate::{admin, context, types};
use chrono::SecondsFormat;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::Snafu;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },

    #[snafu(display("failed to apply {} after {} changes: {}", object, applied, source))]
    Apply {
        object: String,
        applied: usize,
        source: context::Error,
    },

    #[snafu(display("admin request failed: {}", source))]
    Admin { source: admin::Error },

    #[snafu(display("reconcile of {} ran out of time", key))]
    Deadline { key: String },
}

/// How a failed pass is reported and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The spec cannot be turned into objects. Retrying does not help.
    Validation,
    TransientPlatform,
    /// Members could not be reached through the admin protocol.
    Connectivity,
    /// Some objects were applied before a failure.
    PartialApply,
    /// The image tag is not a supported Neo4j release.
    VersionParse,
    SplitBrain,
}

impl ErrorClass {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorClass::Validation | ErrorClass::VersionParse)
    }

    /// Phase written for this class. `None` leaves the phase to the next successful pass.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ErrorClass::Validation | ErrorClass::VersionParse => Some(Phase::Failed),
            ErrorClass::Connectivity | ErrorClass::SplitBrain => Some(Phase::Degraded),
            ErrorClass::TransientPlatform | ErrorClass::PartialApply => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "InvalidSpec",
            ErrorClass::TransientPlatform => "PlatformError",
            ErrorClass::Connectivity => "AdminUnreachable",
            ErrorClass::PartialApply => "PartialApply",
            ErrorClass::VersionParse => "UnsupportedVersion",
            ErrorClass::SplitBrain => "SplitBrainDetected",
        }
    }
}

fn classify_types(error: &types::error::Error) -> ErrorClass {
    if error.is_version_error() {
        ErrorClass::VersionParse
    } else {
        ErrorClass::Validation
    }
}

fn classify_context(error: &context::Error) -> ErrorClass {
    match error {
        context::Error::Types { source } => classify_types(source),
        context::Error::Kube {
            source: kube::Error::Api(ae),
        } if matches!(ae.code, 400 | 422) => ErrorClass::Validation,
        context::Error::Serde { .. } => ErrorClass::Validation,
        _ => ErrorClass::TransientPlatform,
    }
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Types { source } => classify_types(source),
            Error::Context { source } => classify_context(source),
            Error::Apply {
                source, applied, ..
            } => match classify_context(source) {
                ErrorClass::Validation => ErrorClass::Validation,
                _ if *applied > 0 => ErrorClass::PartialApply,
                _ => ErrorClass::TransientPlatform,
            },
            Error::Admin { source } if source.is_connectivity() => ErrorClass::Connectivity,
            Error::Admin { .. } | Error::Deadline { .. } => ErrorClass::TransientPlatform,
            Error::Serde { .. } => ErrorClass::Validation,
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Entry point for the controller. Every pass is bounded by the reconcile timeout.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.key()))]
pub async fn reconcile_cluster(
    cluster: Arc<Neo4jCluster>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let key = cluster.key();
    let deadline = Instant::now() + ctx.settings.reconcile_timeout;

    let result = match tokio::time::timeout_at(deadline, reconcile_pass(&ctx, &cluster, deadline))
        .await
    {
        Ok(result) => result,
        Err(_) => DeadlineSnafu { key: key.clone() }.fail(),
    };

    if result.is_ok() {
        ctx.reset_backoff(&key);
    }
    result
}

async fn reconcile_pass(
    ctx: &Arc<Context>,
    cluster: &Neo4jCluster,
    deadline: Instant,
) -> Result<Action, Error> {
    let namespace = cluster.namespace()?;
    ctx.touch_namespace(&namespace).await;

    let Some(latest) = ctx.platform.get_cluster(&namespace, &cluster.name()).await? else {
        debug!("cluster {} is gone", cluster.key());
        ctx.forget_cluster(cluster).await;
        return Ok(Action::await_change());
    };

    if latest.metadata.deletion_timestamp.is_some() {
        return finalize::finalize(ctx, &latest).await;
    }

    let latest = ensure_finalizer(ctx, latest).await?;
    match converge(ctx, &latest, deadline).await {
        Ok(action) => Ok(action),
        Err(e) => report_error(ctx, &latest, e).await,
    }
}

async fn ensure_finalizer(ctx: &Context, mut cluster: Neo4jCluster) -> Result<Neo4jCluster, Error> {
    let finalizers = cluster.metadata.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == FINALIZER) {
        return Ok(cluster);
    }

    finalizers.push(FINALIZER.to_owned());
    let finalizers = finalizers.clone();
    ctx.platform.set_finalizers(&cluster, &finalizers).await?;
    debug!("added finalizer to {}", cluster.key());
    Ok(cluster)
}

async fn converge(
    ctx: &Arc<Context>,
    cluster: &Neo4jCluster,
    deadline: Instant,
) -> Result<Action, Error> {
    let version = cluster.validate()?;
    let desired = cluster.desired_objects(&version, &ctx.facts)?;

    let report = apply::apply_desired(ctx, cluster, &desired).await?;
    if report.changed() > 0 {
        ctx.record(cluster, EventType::Normal, "ObjectsApplied", &report.summary())
            .await;
    }

    let mut observation = observe::observe(ctx, cluster, deadline).await?;
    let now = now();
    let ops =
        operations::sync_operations(ctx, cluster, &version, &observation, deadline, &now).await?;
    if observation.admin_problem.is_none() {
        observation.admin_problem = ops.admin_problem.clone();
    }

    let assessment = status::assess(&observation, report.changed());
    if assessment.is_split_brain()
        && let Some(health) = observation.health.as_ref()
    {
        let already_reported = cluster.status.as_ref().is_some_and(|s| s.phase == Phase::Degraded);
        if !already_reported {
            ctx.record(
                cluster,
                EventType::Warning,
                "SplitBrainDetected",
                &format!("{} membership partitions", health.partitions.len()),
            )
            .await;
        }
        health::spawn_remediation(ctx, cluster, health);
    }

    let (bolt, http) = cluster.client_endpoints();
    let generation = cluster.metadata.generation;
    let version_string = version.to_string();
    ctx.update_status(cluster, |status| {
        status::apply_assessment(status, &assessment, &now);
        status.servers = observation.servers.clone();
        status.endpoints = Endpoints {
            bolt: Some(bolt.clone()),
            http: Some(http.clone()),
            route: observation.route_url.clone(),
        };
        status.observed_generation = generation;
        status.version = Some(version_string.clone());
        status.operations = ops.operations.clone();
        status.last_backup_trigger = ops.last_backup_trigger.clone();
    })
    .await?;

    info!("{} is {}", cluster.key(), assessment.phase);
    Ok(status::requeue_action(
        assessment.phase,
        ops.has_pending(),
        &ctx.settings,
    ))
}

/// Writes terminal and connectivity failures into the status. Everything else goes back
/// to the controller for a backoff retry.
async fn report_error(ctx: &Context, cluster: &Neo4jCluster, error: Error) -> Result<Action, Error> {
    let class = error.class();
    let action = match class {
        ErrorClass::Validation | ErrorClass::VersionParse => Action::await_change(),
        ErrorClass::Connectivity => Action::requeue(ctx.settings.progress_requeue),
        ErrorClass::PartialApply => {
            // The pass is retried with backoff; the status still names the object that failed.
            let assessment = status::assess_error(class, &error.to_string());
            let now = now();
            let generation = cluster.metadata.generation;
            if let Err(e) = ctx
                .update_status(cluster, |status| {
                    status::apply_assessment(status, &assessment, &now);
                    status.observed_generation = generation;
                })
                .await
            {
                warn!("{}: recording partial apply failed: {}", cluster.key(), e);
            }
            return Err(error);
        }
        _ => return Err(error),
    };

    let message = error.to_string();
    warn!("{}: {}", cluster.key(), message);

    let already_reported = cluster
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_FAILED))
        .is_some_and(|c| c.message == message);

    let assessment = status::assess_error(class, &message);
    let now = now();
    let generation = cluster.metadata.generation;
    ctx.update_status(cluster, |status| {
        status::apply_assessment(status, &assessment, &now);
        status.observed_generation = generation;
    })
    .await?;

    if class.is_terminal() && !already_reported {
        ctx.record(cluster, EventType::Warning, class.reason(), &message)
            .await;
    }
    Ok(action)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{
        FakeConnector, FakePlatform, auth_secret, create_test_cluster, member_endpoint,
        member_pod, server_row, test_context, test_context_with,
    };
    use crate::types::v1alpha1::cluster::DEFAULT_AUTH_KEY;
    use crate::types::v1alpha1::status::condition::{CONDITION_READY, is_condition_true};

    const MEMBERS: [&str; 3] = ["graph-primary-0", "graph-primary-1", "graph-primary-2"];

    async fn run(ctx: &Arc<Context>, platform: &FakePlatform) -> Result<Action, Error> {
        reconcile_cluster(Arc::new(platform.cluster()), ctx.clone()).await
    }

    #[test]
    fn test_error_classes() {
        let version = Error::Types {
            source: types::error::Error::ImageVersion {
                image: "neo4j:latest".to_owned(),
                source: crate::version::Error::Empty,
            },
        };
        assert_eq!(version.class(), ErrorClass::VersionParse);
        assert!(version.class().is_terminal());

        let partial = Error::Apply {
            object: "StatefulSet/graph-primary".to_owned(),
            applied: 2,
            source: context::Error::ClusterGone { key: "default/graph".to_owned() },
        };
        assert_eq!(partial.class(), ErrorClass::PartialApply);

        let first = Error::Apply {
            object: "ServiceAccount/graph".to_owned(),
            applied: 0,
            source: context::Error::ClusterGone { key: "default/graph".to_owned() },
        };
        assert_eq!(first.class(), ErrorClass::TransientPlatform);

        let unreachable = Error::Admin {
            source: admin::Error::Transport {
                endpoint: "graph-primary-0".to_owned(),
                message: "connection refused".to_owned(),
            },
        };
        assert_eq!(unreachable.class(), ErrorClass::Connectivity);
        assert!(!unreachable.class().is_terminal());

        let deadline = Error::Deadline { key: "default/graph".to_owned() };
        assert_eq!(deadline.class(), ErrorClass::TransientPlatform);
    }

    #[tokio::test]
    async fn test_first_pass_adds_finalizer_and_objects() {
        let platform = FakePlatform::default();
        platform.insert_cluster(create_test_cluster("5.26.0-enterprise"));
        let ctx = test_context(platform.clone());

        let action = run(&ctx, &platform).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.settings.progress_requeue));

        let cluster = platform.cluster();
        assert_eq!(cluster.metadata.finalizers, Some(vec![FINALIZER.to_owned()]));
        assert!(platform.object("StatefulSet", "graph-primary").is_some());
        assert!(platform.object("ConfigMap", "graph-config").is_some());

        let status = cluster.status.unwrap();
        assert_eq!(status.phase, Phase::Progressing);
        assert_eq!(status.version.as_deref(), Some("5.26.0"));
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.endpoints.bolt.is_some());
        assert!(platform.event_reasons().contains(&"ObjectsApplied".to_owned()));
    }

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let platform = FakePlatform::default();
        platform.insert_cluster(create_test_cluster("5.26.0-enterprise"));
        let ctx = test_context(platform.clone());

        run(&ctx, &platform).await.unwrap();
        let before = platform.mutations();
        let status_before = platform.cluster().status;

        run(&ctx, &platform).await.unwrap();
        assert_eq!(platform.mutations(), before);
        assert_eq!(platform.cluster().status, status_before);
    }

    /// A cluster on a calendar version whose members all answer a healthy membership view.
    fn healthy_cluster_context(platform: &FakePlatform) -> Arc<Context> {
        platform.insert_cluster(create_test_cluster("2025.01.0-enterprise"));
        platform.insert_secret(auth_secret("graph-auth", DEFAULT_AUTH_KEY, "neo4j/password"));
        let connector = FakeConnector::default();
        let rows: Vec<_> = MEMBERS
            .iter()
            .map(|m| server_row(m, "Enabled", "Available"))
            .collect();
        for member in MEMBERS {
            connector.respond(&member_endpoint(member).address, Ok(rows.clone()));
        }
        test_context_with(platform.clone(), connector)
    }

    fn set_primaries_status(platform: &FakePlatform, ready: i32) {
        platform.set_object_status(
            "StatefulSet",
            "graph-primary",
            serde_json::json!({ "replicas": ready, "readyReplicas": ready, "updatedReplicas": ready }),
        );
    }

    #[tokio::test]
    async fn test_cluster_becomes_ready() {
        let platform = FakePlatform::default();
        let ctx = healthy_cluster_context(&platform);

        run(&ctx, &platform).await.unwrap();
        set_primaries_status(&platform, 3);
        for member in MEMBERS {
            platform.insert_pod(member_pod(member, "primary", true));
        }

        let action = run(&ctx, &platform).await.unwrap();
        let status = platform.cluster().status.unwrap();
        assert_eq!(status.phase, Phase::Ready);
        assert!(is_condition_true(&status.conditions, CONDITION_READY));
        assert_eq!(status.servers.len(), 3);
        assert_eq!(
            action,
            Action::requeue(ctx.settings.health_poll_interval.unwrap())
        );
        assert_eq!(ctx.backoff_attempts(&platform.cluster().key()), 0);
    }

    #[tokio::test]
    async fn test_ready_workload_without_ready_pods_is_not_ready() {
        let platform = FakePlatform::default();
        let ctx = healthy_cluster_context(&platform);

        run(&ctx, &platform).await.unwrap();
        set_primaries_status(&platform, 3);
        for member in MEMBERS {
            platform.insert_pod(member_pod(member, "primary", false));
        }

        run(&ctx, &platform).await.unwrap();
        let status = platform.cluster().status.unwrap();
        assert_eq!(status.phase, Phase::Progressing);
        assert!(!is_condition_true(&status.conditions, CONDITION_READY));
    }

    #[tokio::test]
    async fn test_scaled_down_statefulset_is_restored() {
        let platform = FakePlatform::default();
        let ctx = healthy_cluster_context(&platform);
        run(&ctx, &platform).await.unwrap();
        set_primaries_status(&platform, 3);
        for member in MEMBERS {
            platform.insert_pod(member_pod(member, "primary", true));
        }
        run(&ctx, &platform).await.unwrap();
        assert_eq!(platform.cluster().status.unwrap().phase, Phase::Ready);

        platform.edit_object("StatefulSet", "graph-primary", |live| {
            live["spec"]["replicas"] = serde_json::json!(1);
        });
        set_primaries_status(&platform, 1);

        run(&ctx, &platform).await.unwrap();
        let live = platform.object("StatefulSet", "graph-primary").unwrap();
        assert_eq!(live["spec"]["replicas"], 3);
        let status = platform.cluster().status.unwrap();
        assert_eq!(status.phase, Phase::Progressing);
        assert!(!is_condition_true(&status.conditions, CONDITION_READY));
    }

    #[tokio::test]
    async fn test_partial_apply_is_recorded_in_status() {
        let platform = FakePlatform::default();
        platform.insert_cluster(create_test_cluster("5.26.0-enterprise"));
        let ctx = test_context(platform.clone());
        platform.fail_applies_of(Some("StatefulSet"));

        let err = run(&ctx, &platform).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::PartialApply);
        assert!(platform.object("ConfigMap", "graph-config").is_some());
        assert!(platform.object("StatefulSet", "graph-primary").is_none());

        let status = platform.cluster().status.unwrap();
        assert_eq!(status.phase, Phase::Progressing);
        assert_eq!(status.observed_generation, Some(1));
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.reason, "PartialApply");
        assert!(ready.message.contains("StatefulSet/graph-primary"));

        platform.fail_applies_of(None);
        run(&ctx, &platform).await.unwrap();
        assert!(platform.object("StatefulSet", "graph-primary").is_some());
        let status = platform.cluster().status.unwrap();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_ne!(ready.reason, "PartialApply");
    }

    #[tokio::test]
    async fn test_unsupported_version_fails_once() {
        let platform = FakePlatform::default();
        platform.insert_cluster(create_test_cluster("4.4.30-enterprise"));
        let ctx = test_context(platform.clone());

        let action = run(&ctx, &platform).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = platform.cluster().status.unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(is_condition_true(&status.conditions, CONDITION_FAILED));
        assert!(platform.object_names("StatefulSet").is_empty());

        let before = platform.mutations();
        run(&ctx, &platform).await.unwrap();
        assert_eq!(platform.mutations(), before);
        assert_eq!(
            platform.event_reasons(),
            vec!["UnsupportedVersion".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_missing_cluster_is_ignored() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());

        let action = reconcile_cluster(
            Arc::new(create_test_cluster("5.26.0-enterprise")),
            ctx.clone(),
        )
        .await
        .unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(platform.mutations(), 0);
    }
}
