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

//! Split-brain remediation. Detection lives in the admin client; this module only acts
//! when a cluster opts in.

use crate::admin::HealthReport;
use crate::context::Context;
use crate::types::v1alpha1::cluster::{Neo4jCluster, ObjectType};
use crate::types::v1alpha1::k8s::SplitBrainRemediation;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(30);

/// Starts a remediation task for a split cluster. Returns `None` when the policy does
/// not ask for one, nothing needs restarting or a remediation is already running.
pub fn spawn_remediation(
    ctx: &Arc<Context>,
    cluster: &Neo4jCluster,
    report: &HealthReport,
) -> Option<JoinHandle<()>> {
    let policy = cluster.spec.split_brain.remediation;
    let plan = report.remediation_plan(policy);
    if plan.is_empty() {
        return None;
    }

    let key = cluster.key();
    if !ctx.begin_remediation(&key) {
        info!("split-brain remediation of {} already in progress", key);
        return None;
    }

    let step_delay = match policy {
        SplitBrainRemediation::RollingRestart => cluster
            .spec
            .split_brain
            .step_delay_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STEP_DELAY),
        _ => Duration::ZERO,
    };

    warn!(
        "{}: split brain, {} restarting {:?}",
        key, policy, plan
    );
    let ctx = ctx.clone();
    let cluster = cluster.clone();
    Some(tokio::spawn(async move {
        restart_members(&ctx, &cluster, &plan, step_delay).await;
        ctx.finish_remediation(&key);
    }))
}

async fn restart_members(
    ctx: &Context,
    cluster: &Neo4jCluster,
    plan: &[String],
    step_delay: Duration,
) {
    let namespace = cluster.namespace().unwrap_or_default();
    let pods = ObjectType::of::<corev1::Pod>();

    for (step, member) in plan.iter().enumerate() {
        if step > 0 && !step_delay.is_zero() {
            tokio::select! {
                _ = ctx.shutdown_token().cancelled() => {
                    info!("remediation of {} interrupted by shutdown", cluster.key());
                    return;
                }
                _ = tokio::time::sleep(step_delay) => {}
            }
        }

        match ctx.platform.delete(&pods, &namespace, member).await {
            Ok(_) => {
                info!("restarted member {} of {}", member, cluster.key());
                ctx.record(
                    cluster,
                    EventType::Warning,
                    "SplitBrainRemediation",
                    &format!("restarted member {member}"),
                )
                .await;
            }
            Err(e) => {
                warn!("failed to restart member {} of {}: {}", member, cluster.key(), e);
                return;
            }
        }
    }
}
