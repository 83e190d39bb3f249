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

//! Bounded caches and memory accounting for the operator process.

use crate::types::v1alpha1::cluster::{MANAGED_BY_LABEL, MANAGER};
use kube::runtime::watcher;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_NAMESPACE_CAP: usize = 256;
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.85;
const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
const MAX_POOLED_BUFFERS: usize = 16;
/// Buffers that grew past this are dropped instead of pooled.
const MAX_POOLED_BUFFER_BYTES: usize = 1 << 20;

/// Which objects the operator's watches see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchScope {
    pub namespace: Option<String>,
}

impl WatchScope {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    pub fn owned_label_selector() -> String {
        format!("{MANAGED_BY_LABEL}={MANAGER}")
    }

    /// Watch configuration for owned objects: only those carrying the managed-by label.
    pub fn owned_config(&self) -> watcher::Config {
        watcher::Config::default().labels(&Self::owned_label_selector())
    }

    pub fn api<K>(&self, client: kube::Client) -> kube::Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => kube::Api::namespaced(client, ns),
            None => kube::Api::all(client),
        }
    }
}

/// Recycled serialization buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let mut buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_default();
        buffer.clear();

        let result = f(&mut buffer);

        if buffer.capacity() <= MAX_POOLED_BUFFER_BYTES
            && let Ok(mut buffers) = self.buffers.lock()
            && buffers.len() < MAX_POOLED_BUFFERS
        {
            buffers.push(buffer);
        }
        result
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.clear();
            buffers.shrink_to_fit();
        }
    }
}

/// Namespaces with cached state, least recently active evicted first.
#[derive(Debug)]
pub struct NamespaceTracker {
    cap: usize,
    last_active: HashMap<String, Instant>,
}

impl NamespaceTracker {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            last_active: HashMap::new(),
        }
    }

    /// Marks `namespace` active. Returns the namespaces evicted to stay within the cap.
    pub fn touch(&mut self, namespace: &str, now: Instant) -> Vec<String> {
        self.last_active.insert(namespace.to_owned(), now);

        let mut evicted = Vec::new();
        while self.last_active.len() > self.cap {
            let Some(oldest) = self
                .last_active
                .iter()
                .filter(|(ns, _)| ns.as_str() != namespace)
                .min_by_key(|(_, at)| **at)
                .map(|(ns, _)| ns.clone())
            else {
                break;
            };
            self.last_active.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    /// Drops namespaces inactive for at least `idle_after`.
    pub fn evict_idle(&mut self, now: Instant, idle_after: Duration) -> Vec<String> {
        let idle: Vec<String> = self
            .last_active
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= idle_after)
            .map(|(ns, _)| ns.clone())
            .collect();
        for ns in &idle {
            self.last_active.remove(ns);
        }
        idle
    }

    pub fn forget(&mut self, namespace: &str) {
        self.last_active.remove(namespace);
    }

    pub fn len(&self) -> usize {
        self.last_active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_active.is_empty()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.last_active.contains_key(namespace)
    }
}

/// `memory.current / memory.max` of a cgroup v2 hierarchy. `None` when unlimited.
pub fn memory_ratio(current: &str, max: &str) -> Option<f64> {
    let max = max.trim();
    if max == "max" {
        return None;
    }
    let current: f64 = current.trim().parse().ok()?;
    let max: f64 = max.parse().ok()?;
    (max > 0.0).then(|| current / max)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub namespace_cap: usize,
    pub memory_threshold: f64,
    /// Namespaces idle this long are dropped under memory pressure.
    pub idle_after: Duration,
    pub cgroup_root: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace_cap: DEFAULT_NAMESPACE_CAP,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            idle_after: Duration::from_secs(600),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
        }
    }
}

pub struct CacheManager {
    settings: CacheSettings,
    buffers: BufferPool,
    namespaces: Mutex<NamespaceTracker>,
}

impl CacheManager {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            namespaces: Mutex::new(NamespaceTracker::new(settings.namespace_cap)),
            buffers: BufferPool::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Hex sha256 of the manifest's JSON encoding, serialized into a pooled buffer.
    pub fn desired_hash(&self, manifest: &serde_json::Value) -> Result<String, serde_json::Error> {
        self.buffers.with_buffer(|buffer| {
            serde_json::to_writer(&mut *buffer, manifest)?;
            Ok(Sha256::digest(buffer.as_slice())
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect())
        })
    }

    /// Records activity in `namespace`. Returns namespaces evicted over the cap.
    pub fn touch_namespace(&self, namespace: &str) -> Vec<String> {
        let evicted = match self.namespaces.lock() {
            Ok(mut tracker) => tracker.touch(namespace, Instant::now()),
            Err(_) => Vec::new(),
        };
        if !evicted.is_empty() {
            debug!("namespace cap reached, evicting {:?}", evicted);
        }
        evicted
    }

    pub fn forget_namespace(&self, namespace: &str) {
        if let Ok(mut tracker) = self.namespaces.lock() {
            tracker.forget(namespace);
        }
    }

    pub fn tracked_namespaces(&self) -> usize {
        self.namespaces.lock().map(|t| t.len()).unwrap_or_default()
    }

    pub async fn memory_pressure(&self) -> Option<f64> {
        read_memory_ratio(&self.settings.cgroup_root).await
    }

    /// Drops idle namespaces and pooled buffers. Returns the dropped namespaces.
    pub fn reclaim(&self) -> Vec<String> {
        self.buffers.clear();
        let dropped = match self.namespaces.lock() {
            Ok(mut tracker) => tracker.evict_idle(Instant::now(), self.settings.idle_after),
            Err(_) => Vec::new(),
        };
        info!(
            "memory reclamation dropped {} idle namespaces and pooled buffers",
            dropped.len()
        );
        dropped
    }

    /// Reclaims when the cgroup is above the threshold.
    pub async fn reclaim_if_pressured(&self) -> Vec<String> {
        match self.memory_pressure().await {
            Some(ratio) if ratio >= self.settings.memory_threshold => {
                info!(
                    "memory usage at {:.0}% of the limit, reclaiming caches",
                    ratio * 100.0
                );
                self.reclaim()
            }
            _ => Vec::new(),
        }
    }
}

async fn read_memory_ratio(root: &Path) -> Option<f64> {
    let current = tokio::fs::read_to_string(root.join("memory.current"))
        .await
        .ok()?;
    let max = tokio::fs::read_to_string(root.join("memory.max")).await.ok()?;
    memory_ratio(&current, &max)
}
