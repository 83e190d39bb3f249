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

use crate::admin::{self, AdminClient, Credentials, Endpoint};
use crate::cache::CacheManager;
use crate::config::ReconcileSettings;
use crate::types;
use crate::types::v1alpha1::cluster::route::ROUTE_GROUP;
use crate::types::v1alpha1::cluster::{MANAGER, Neo4jCluster, ObjectType, PlatformFacts};
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::GroupVersionKind;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Resource};
use snafu::futures::TryFutureExt;
use snafu::{OptionExt, Snafu};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts of a status write before giving up on the pass.
const STATUS_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("cluster {} disappeared while writing its status", key))]
    ClusterGone { key: String },

    #[snafu(display("credential secret '{}' not found", name))]
    CredentialSecretNotFound { name: String },

    #[snafu(display("credential secret '{}' missing required key '{}'", secret_name, key))]
    CredentialSecretMissingKey { secret_name: String, key: String },

    #[snafu(display(
        "credential secret '{}' has invalid data encoding for key '{}'",
        secret_name,
        key
    ))]
    CredentialSecretInvalidEncoding { secret_name: String, key: String },

    #[snafu(display("credential secret '{}': {}", secret_name, source))]
    CredentialSecretMalformed {
        secret_name: String,
        source: admin::Error,
    },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Conflicts, throttling, server errors and transport failures clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => matches!(ae.code, 409 | 429) || ae.code >= 500,
            Error::Kube { .. } | Error::ClusterGone { .. } => true,
            _ => false,
        }
    }

    /// Problems with the credential secret the user has to fix.
    pub fn is_credentials(&self) -> bool {
        matches!(
            self,
            Error::CredentialSecretNotFound { .. }
                | Error::CredentialSecretMissingKey { .. }
                | Error::CredentialSecretInvalidEncoding { .. }
                | Error::CredentialSecretMalformed { .. }
        )
    }
}

/// Everything the reconciler needs from the Kubernetes API.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str)
    -> Result<Option<Neo4jCluster>, Error>;

    async fn get(
        &self,
        object_type: &ObjectType,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error>;

    /// Server-side apply of a full manifest.
    async fn apply(
        &self,
        object_type: &ObjectType,
        namespace: &str,
        name: &str,
        manifest: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Returns `false` when the object was already gone.
    async fn delete(&self, object_type: &ObjectType, namespace: &str, name: &str)
    -> Result<bool, Error>;

    async fn list_pods(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<corev1::Pod>, Error>;

    /// Writes `cluster.status`, guarded by the object's resourceVersion.
    async fn replace_status(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster, Error>;

    async fn set_finalizers(&self, cluster: &Neo4jCluster, finalizers: &[String])
    -> Result<(), Error>;

    async fn record(
        &self,
        cluster: &Neo4jCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>;
}

pub struct KubePlatform {
    client: kube::Client,
    recorder: Recorder,
}

impl KubePlatform {
    pub fn new(client: kube::Client) -> Self {
        let reporter = Reporter {
            controller: MANAGER.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn dynamic_api(&self, object_type: &ObjectType, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&object_type.group, &object_type.version, &object_type.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &object_type.plural);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    /// Probes the API server for optional platform APIs.
    pub async fn discover_facts(&self) -> PlatformFacts {
        let routes_available = kube::discovery::group(&self.client, ROUTE_GROUP)
            .await
            .is_ok();
        info!("platform discovery: routes available = {}", routes_available);
        PlatformFacts { routes_available }
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Neo4jCluster>, Error> {
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    async fn get(
        &self,
        object_type: &ObjectType,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let object = self
            .dynamic_api(object_type, namespace)
            .get_opt(name)
            .context(KubeSnafu)
            .await?;
        Ok(object.map(serde_json::to_value).transpose()?)
    }

    async fn apply(
        &self,
        object_type: &ObjectType,
        namespace: &str,
        name: &str,
        manifest: &serde_json::Value,
    ) -> Result<(), Error> {
        self.dynamic_api(object_type, namespace)
            .patch(name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(manifest))
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        object_type: &ObjectType,
        namespace: &str,
        name: &str,
    ) -> Result<bool, Error> {
        match self
            .dynamic_api(object_type, namespace)
            .delete(name, &DeleteParams::background())
            .context(KubeSnafu)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<corev1::Pod>, Error> {
        let api: Api<corev1::Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(label_selector))
            .context(KubeSnafu)
            .await?;
        Ok(pods.items)
    }

    async fn replace_status(&self, cluster: &Neo4jCluster) -> Result<Neo4jCluster, Error> {
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), &cluster.namespace()?);
        api.replace_status(&cluster.name(), &PostParams::default(), cluster)
            .context(KubeSnafu)
            .await
    }

    async fn set_finalizers(
        &self,
        cluster: &Neo4jCluster,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let api: Api<Neo4jCluster> = Api::namespaced(self.client.clone(), &cluster.namespace()?);
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(&cluster.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        cluster: &Neo4jCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &cluster.object_ref(&()),
            )
            .context(KubeSnafu)
            .await
    }
}

pub struct Context {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) admin: AdminClient,
    pub(crate) cache: CacheManager,
    pub(crate) facts: PlatformFacts,
    pub(crate) settings: ReconcileSettings,
    /// Failed passes in a row, per cluster key.
    backoff: Mutex<HashMap<String, u32>>,
    /// Clusters with a split-brain remediation in flight.
    remediations: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl Context {
    pub fn new(
        platform: Arc<dyn Platform>,
        admin: AdminClient,
        cache: CacheManager,
        facts: PlatformFacts,
        settings: ReconcileSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            platform,
            admin,
            cache,
            facts,
            settings,
            backoff: Mutex::new(HashMap::new()),
            remediations: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Publishes an event. Failing to record never fails the pass.
    pub async fn record(
        &self,
        cluster: &Neo4jCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        if let Err(e) = self
            .platform
            .record(cluster, event_type, reason, message)
            .await
        {
            warn!("failed to record {} event for {}: {}", reason, cluster.key(), e);
        }
    }

    /// Applies `mutate` to the cluster's status and writes it back.
    ///
    /// Nothing is written when the status is unchanged. A failed write is retried against
    /// a freshly fetched object.
    pub async fn update_status<F>(
        &self,
        cluster: &Neo4jCluster,
        mutate: F,
    ) -> Result<Neo4jCluster, Error>
    where
        F: Fn(&mut types::v1alpha1::status::Status),
    {
        let namespace = cluster.namespace()?;
        let name = cluster.name();
        let mut current = cluster.clone();
        let mut attempt = 1;

        loop {
            let mut status = current.status.clone().unwrap_or_default();
            mutate(&mut status);
            if current.status.clone().unwrap_or_default() == status {
                return Ok(current);
            }

            let mut target = current.clone();
            target.status = Some(status);
            match self.platform.replace_status(&target).await {
                Ok(updated) => return Ok(updated),
                Err(e) if attempt < STATUS_WRITE_ATTEMPTS => {
                    info!(
                        "status update of {} failed ({}), retrying against the latest object",
                        cluster.key(),
                        e
                    );
                    current = self
                        .platform
                        .get_cluster(&namespace, &name)
                        .await?
                        .context(ClusterGoneSnafu { key: cluster.key() })?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads the admin user from the cluster's auth secret.
    pub async fn admin_credentials(&self, cluster: &Neo4jCluster) -> Result<Credentials, Error> {
        let auth = &cluster.spec.auth;
        let secret: corev1::Secret = match self
            .platform
            .get(
                &ObjectType::of::<corev1::Secret>(),
                &cluster.namespace()?,
                &auth.secret_name,
            )
            .await?
        {
            Some(raw) => serde_json::from_value(raw)?,
            None => {
                return CredentialSecretNotFoundSnafu {
                    name: auth.secret_name.clone(),
                }
                .fail();
            }
        };

        let key = auth.key();
        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|b| b.0.clone())
            .or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|data| data.get(key))
                    .map(|s| s.clone().into_bytes())
            })
            .context(CredentialSecretMissingKeySnafu {
                secret_name: auth.secret_name.clone(),
                key,
            })?;

        let raw = String::from_utf8(bytes).map_err(|_| Error::CredentialSecretInvalidEncoding {
            secret_name: auth.secret_name.clone(),
            key: key.to_owned(),
        })?;

        Credentials::parse(&raw).map_err(|source| Error::CredentialSecretMalformed {
            secret_name: auth.secret_name.clone(),
            source,
        })
    }

    pub fn member_endpoints(
        cluster: &Neo4jCluster,
        credentials: &Credentials,
        members: &[String],
    ) -> Vec<Endpoint> {
        members
            .iter()
            .map(|member| Endpoint {
                member: member.clone(),
                address: cluster.member_http_address(member),
                credentials: credentials.clone(),
            })
            .collect()
    }

    /// Bumps the failure counter of `key`, returning failures so far (before this one).
    pub fn next_attempt(&self, key: &str) -> u32 {
        match self.backoff.lock() {
            Ok(mut counters) => {
                let attempts = counters.entry(key.to_owned()).or_default();
                let previous = *attempts;
                *attempts = attempts.saturating_add(1);
                previous
            }
            Err(_) => 0,
        }
    }

    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut counters) = self.backoff.lock() {
            counters.remove(key);
        }
    }

    pub fn backoff_attempts(&self, key: &str) -> u32 {
        self.backoff
            .lock()
            .ok()
            .and_then(|counters| counters.get(key).copied())
            .unwrap_or_default()
    }

    /// Marks `namespace` active, dropping the state of namespaces evicted over the cap.
    pub async fn touch_namespace(&self, namespace: &str) {
        for evicted in self.cache.touch_namespace(namespace) {
            self.drop_namespace_state(&evicted).await;
        }
    }

    /// Drops pooled admin connections and backoff counters of one namespace.
    pub async fn drop_namespace_state(&self, namespace: &str) {
        let evicted = self.admin.evict_endpoints(&format!(".{namespace}.svc.")).await;
        let prefix = format!("{namespace}/");
        if let Ok(mut counters) = self.backoff.lock() {
            counters.retain(|key, _| !key.starts_with(&prefix));
        }
        debug!(
            "dropped cached state of namespace {} ({} admin endpoints)",
            namespace, evicted
        );
    }

    /// Forgets everything cached for one cluster.
    pub async fn forget_cluster(&self, cluster: &Neo4jCluster) {
        let fragment = format!(
            ".{}.{}.svc.",
            cluster.headless_service_name(),
            cluster.namespace().unwrap_or_default()
        );
        let evicted = self.admin.evict_endpoints(&fragment).await;
        self.reset_backoff(&cluster.key());
        debug!("released {} admin endpoints of {}", evicted, cluster.key());
    }

    /// Registers a remediation for `key`. `false` when one is already running.
    pub fn begin_remediation(&self, key: &str) -> bool {
        self.remediations
            .lock()
            .map(|mut running| running.insert(key.to_owned()))
            .unwrap_or(false)
    }

    pub fn finish_remediation(&self, key: &str) {
        if let Ok(mut running) = self.remediations.lock() {
            running.remove(key);
        }
    }

    pub fn remediation_running(&self, key: &str) -> bool {
        self.remediations
            .lock()
            .map(|running| running.contains(key))
            .unwrap_or(false)
    }
}

/// Reclaims caches whenever the process runs close to its memory limit.
pub fn spawn_memory_probe(
    ctx: Arc<Context>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("memory pressure probe started, interval {:?}", interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("memory pressure probe stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    for namespace in ctx.cache.reclaim_if_pressured().await {
                        ctx.drop_namespace_state(&namespace).await;
                    }
                }
            }
        }
    })
}
