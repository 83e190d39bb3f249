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

use crate::admin::AdminClient;
use crate::admin::monitor::spawn_health_monitor;
use crate::admin::transport::HttpConnector;
use crate::cache::{CacheManager, WatchScope};
use crate::config::OperatorConfig;
use crate::context::{Context, KubePlatform, spawn_memory_probe};
use crate::error_policy::error_policy;
use crate::reconcile::reconcile_cluster;
use crate::types::v1alpha1::cluster::Neo4jCluster;
use futures::StreamExt;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::policy::v1 as policyv1;
use kube::runtime::controller::{self, Controller};
use kube::{Client, CustomResourceExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod admin;
pub mod cache;
pub mod config;
mod context;
pub mod error_policy;
pub mod reconcile;
pub mod types;
pub mod version;


shadow_rs::shadow!(build);

pub async fn run(config: OperatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "neo4j operator {} ({}) built {}",
        build::PKG_VERSION,
        build::SHORT_COMMIT,
        build::BUILD_TIME
    );

    let client = Client::try_default().await?;
    let platform = KubePlatform::new(client.clone());
    let facts = platform.discover_facts().await;
    info!("platform facts: {:?}", facts);

    let connector = HttpConnector::new(config.admin_request_timeout())?;
    let admin = AdminClient::new(Arc::new(connector), config.pool_settings());
    let shutdown = CancellationToken::new();

    let context = Arc::new(Context::new(
        Arc::new(platform),
        admin,
        CacheManager::new(config.cache_settings()),
        facts,
        config.reconcile_settings(),
        shutdown.clone(),
    ));

    let monitor = spawn_health_monitor(
        context.admin.pool().clone(),
        config.monitor_interval(),
        shutdown.clone(),
    );
    let probe = spawn_memory_probe(
        context.clone(),
        config.memory_probe_interval(),
        shutdown.clone(),
    );

    let scope = WatchScope::new(config.watch_namespace.clone());
    let owned = scope.owned_config();
    Controller::new(
        scope.api::<Neo4jCluster>(client.clone()),
        kube::runtime::watcher::Config::default(),
    )
    .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
    .owns(scope.api::<corev1::ConfigMap>(client.clone()), owned.clone())
    .owns(scope.api::<corev1::Service>(client.clone()), owned.clone())
    .owns(scope.api::<corev1::ServiceAccount>(client.clone()), owned.clone())
    .owns(scope.api::<appsv1::StatefulSet>(client.clone()), owned.clone())
    .owns(scope.api::<policyv1::PodDisruptionBudget>(client.clone()), owned.clone())
    .owns(
        scope.api::<autoscalingv2::HorizontalPodAutoscaler>(client.clone()),
        owned.clone(),
    )
    .owns(scope.api::<batchv1::CronJob>(client.clone()), owned.clone())
    .owns(scope.api::<batchv1::Job>(client.clone()), owned)
    .shutdown_on_signal()
    .run(reconcile_cluster, error_policy, context)
    .for_each(|res| async move {
        match res {
            Ok((cluster, _)) => info!(
                "reconciled {}/{}",
                cluster.namespace.unwrap_or_default(),
                cluster.name
            ),
            Err(e) => warn!("reconcile failed: {}", e),
        }
    })
    .await;

    shutdown.cancel();
    let _ = tokio::join!(monitor, probe);
    info!("operator stopped");
    Ok(())
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer
        .write_all(serde_yaml_ng::to_string(&Neo4jCluster::crd())?.as_bytes())
        .await?;
    writer.flush().await?;

    Ok(())
}
