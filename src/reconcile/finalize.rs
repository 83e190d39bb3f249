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

use super::Error;
use crate::context::Context;
use crate::types::v1alpha1::cluster::{FINALIZER, Neo4jCluster, ObjectType};
use crate::types::v1alpha1::status::operation::OperationKind;
use crate::types::v1alpha1::status::phase::Phase;
use k8s_openapi::api::batch::v1 as batchv1;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

/// Cleans up after a deleted cluster and releases its finalizer.
///
/// Owned objects are collected through their owner references. Backup Jobs are deleted
/// here so that a running backup stops with the cluster.
pub async fn finalize(ctx: &Context, cluster: &Neo4jCluster) -> Result<Action, Error> {
    let finalizers = cluster.metadata.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        debug!("{} is being deleted without our finalizer", cluster.key());
        ctx.forget_cluster(cluster).await;
        return Ok(Action::await_change());
    }

    if let Err(e) = ctx
        .update_status(cluster, |status| status.phase = Phase::Terminating)
        .await
    {
        warn!("failed to mark {} as terminating: {}", cluster.key(), e);
    }

    let namespace = cluster.namespace()?;
    let cron_jobs = ObjectType::of::<batchv1::CronJob>();
    ctx.platform
        .delete(&cron_jobs, &namespace, &cluster.backup_cron_job_name())
        .await?;

    let jobs = ObjectType::of::<batchv1::Job>();
    let job_names: Vec<String> = cluster
        .status
        .iter()
        .flat_map(|s| s.operations.iter())
        .filter(|op| op.kind == OperationKind::Backup)
        .map(|op| op.name.clone())
        .collect();
    for name in &job_names {
        if ctx.platform.delete(&jobs, &namespace, name).await? {
            info!("deleted job {} of {}", name, cluster.key());
        }
    }

    ctx.forget_cluster(cluster).await;

    let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != FINALIZER).collect();
    ctx.platform.set_finalizers(cluster, &remaining).await?;
    ctx.record(cluster, EventType::Normal, "Finalized", "released cluster resources")
        .await;
    info!("finalized {}", cluster.key());
    Ok(Action::await_change())
}
