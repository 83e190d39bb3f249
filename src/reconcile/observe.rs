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

//! Live state of a cluster's members: workload readiness, pods and cluster health.

use super::Error;
use crate::admin::HealthReport;
use crate::context::Context;
use crate::types::v1alpha1::cluster::route::route_type;
use crate::types::v1alpha1::cluster::{
    BOLT_PORT, Neo4jCluster, ObjectType, ROLE_LABEL, Role, member_selector,
};
use crate::types::v1alpha1::status::server::ServerRecord;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::core::v1 as corev1;
use tokio::time::Instant;
use tracing::debug;

pub const SERVER_READY: &str = "Ready";
pub const SERVER_NOT_READY: &str = "NotReady";
pub const SERVER_UNREACHABLE: &str = "Unreachable";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberCounts {
    pub desired: i32,
    pub ready: i32,
}

impl MemberCounts {
    pub fn is_ready(&self) -> bool {
        self.ready >= self.desired
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub primaries: MemberCounts,
    pub secondaries: MemberCounts,
    pub servers: Vec<ServerRecord>,
    /// `None` until every workload is ready.
    pub health: Option<HealthReport>,
    /// Why the members could not be asked about their health.
    pub admin_problem: Option<String>,
    pub route_url: Option<String>,
}

impl Observation {
    pub fn workloads_ready(&self) -> bool {
        self.primaries.is_ready() && self.secondaries.is_ready()
    }

    pub fn ready_members(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|s| s.status == SERVER_READY)
            .map(|s| s.name.clone())
            .collect()
    }
}

fn pod_is_ready(pod: &corev1::Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// One record per member pod, sorted by name.
pub fn server_records(cluster: &Neo4jCluster, pods: &[corev1::Pod]) -> Vec<ServerRecord> {
    let namespace = cluster.namespace().unwrap_or_default();
    let headless = cluster.headless_service_name();
    let mut records: Vec<ServerRecord> = pods
        .iter()
        .filter_map(|pod| {
            let name = pod.metadata.name.clone()?;
            let role = pod
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(ROLE_LABEL))
                .cloned()
                .unwrap_or_default();
            Some(ServerRecord {
                address: format!("{name}.{headless}.{namespace}.svc.cluster.local:{BOLT_PORT}"),
                status: if pod_is_ready(pod) {
                    SERVER_READY
                } else {
                    SERVER_NOT_READY
                }
                .to_owned(),
                name,
                role,
            })
        })
        .collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));
    records
}

/// Marks members that did not answer the health query.
pub fn mark_unreachable(servers: &mut [ServerRecord], report: &HealthReport) {
    for server in servers.iter_mut() {
        if report.unreachable.contains(&server.name) {
            server.status = SERVER_UNREACHABLE.to_owned();
        }
    }
}

/// Replica count the cluster asks for. Autoscaled secondaries follow the autoscaler's
/// last recommendation, bounded below by the configured minimum.
async fn desired_replicas(ctx: &Context, cluster: &Neo4jCluster, role: Role) -> Result<i32, Error> {
    let topology = &cluster.spec.topology;
    let scaling = cluster.spec.autoscaling.as_ref().filter(|a| a.enabled);
    match (role, scaling) {
        (Role::Secondary, Some(scaling)) => {
            let floor = scaling.min_secondaries.max(1);
            let live = ctx
                .platform
                .get(
                    &ObjectType::of::<autoscalingv2::HorizontalPodAutoscaler>(),
                    &cluster.namespace()?,
                    &cluster.resource_name(Role::Secondary),
                )
                .await?;
            let recommended = match live {
                Some(live) => {
                    let hpa: autoscalingv2::HorizontalPodAutoscaler = serde_json::from_value(live)?;
                    hpa.status.map(|s| s.desired_replicas).unwrap_or_default()
                }
                None => 0,
            };
            Ok(recommended.max(floor))
        }
        (Role::Secondary, None) => Ok(topology.secondaries),
        _ => Ok(topology.primaries),
    }
}

/// Members that are ready and run the current revision. Nothing counts while the
/// StatefulSet controller has not caught up with the latest spec or the live replica
/// count differs from `desired`.
pub fn settled_ready(sts: &appsv1::StatefulSet, desired: i32) -> i32 {
    let Some(status) = sts.status.as_ref() else {
        return 0;
    };
    if let Some(generation) = sts.metadata.generation
        && status.observed_generation.is_none_or(|observed| observed < generation)
    {
        return 0;
    }
    if sts
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .is_some_and(|replicas| replicas != desired)
    {
        return 0;
    }
    status
        .ready_replicas
        .unwrap_or_default()
        .min(status.updated_replicas.unwrap_or_default())
}

async fn workload_counts(
    ctx: &Context,
    cluster: &Neo4jCluster,
    role: Role,
) -> Result<MemberCounts, Error> {
    let desired = desired_replicas(ctx, cluster, role).await?;
    let live = ctx
        .platform
        .get(
            &ObjectType::of::<appsv1::StatefulSet>(),
            &cluster.namespace()?,
            &cluster.resource_name(role),
        )
        .await?;
    let Some(live) = live else {
        return Ok(MemberCounts { desired, ready: 0 });
    };

    let sts: appsv1::StatefulSet = serde_json::from_value(live)?;
    Ok(MemberCounts {
        desired,
        ready: settled_ready(&sts, desired),
    })
}

async fn route_url(ctx: &Context, cluster: &Neo4jCluster) -> Result<Option<String>, Error> {
    let Some(route) = &cluster.spec.route else {
        return Ok(None);
    };
    if !ctx.facts.routes_available {
        return Ok(None);
    }

    let host = match &route.host {
        Some(host) => Some(host.clone()),
        None => ctx
            .platform
            .get(&route_type(), &cluster.namespace()?, &cluster.resource_name(Role::Route))
            .await?
            .and_then(|live| {
                live.pointer("/spec/host")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            }),
    };
    let path = route.path.as_deref().unwrap_or("/");
    Ok(host.map(|host| format!("http://{host}{path}")))
}

/// Reads workload and pod state, then asks the members about the cluster once every
/// workload is ready.
pub async fn observe(
    ctx: &Context,
    cluster: &Neo4jCluster,
    deadline: Instant,
) -> Result<Observation, Error> {
    let primaries = workload_counts(ctx, cluster, Role::Primary).await?;
    let secondaries = if cluster.has_secondaries() {
        workload_counts(ctx, cluster, Role::Secondary).await?
    } else {
        MemberCounts::default()
    };

    let pods = ctx
        .platform
        .list_pods(&cluster.namespace()?, &member_selector(&cluster.name()))
        .await?;

    let mut observation = Observation {
        primaries,
        secondaries,
        servers: server_records(cluster, &pods),
        route_url: route_url(ctx, cluster).await?,
        ..Default::default()
    };

    let members = observation.ready_members();
    if !observation.workloads_ready() || members.is_empty() {
        debug!(
            "{}: members not ready yet ({}/{} primaries, {}/{} secondaries)",
            cluster.key(),
            primaries.ready,
            primaries.desired,
            secondaries.ready,
            secondaries.desired
        );
        return Ok(observation);
    }

    let credentials = match ctx.admin_credentials(cluster).await {
        Ok(credentials) => credentials,
        Err(e) if e.is_credentials() => {
            observation.admin_problem = Some(e.to_string());
            return Ok(observation);
        }
        Err(e) => return Err(e.into()),
    };

    let endpoints = Context::member_endpoints(cluster, &credentials, &members);
    let report = ctx.admin.inspect_cluster(&endpoints, deadline).await;
    mark_unreachable(&mut observation.servers, &report);
    if report.views.is_empty() {
        observation.admin_problem = Some(format!(
            "none of {} members answered the health query",
            members.len()
        ));
    }
    observation.health = Some(report);
    Ok(observation)
}
