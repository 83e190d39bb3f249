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

//! Operator process settings. Every flag can also be set through a `NEO4J_OPERATOR_*`
//! environment variable.

use crate::admin::PoolSettings;
use crate::cache::{CacheSettings, DEFAULT_MEMORY_THRESHOLD, DEFAULT_NAMESPACE_CAP};
use std::time::Duration;

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Clusters reconciled at the same time.
    #[arg(long, env = "NEO4J_OPERATOR_MAX_CONCURRENT_RECONCILES", default_value_t = 4)]
    pub max_concurrent_reconciles: u16,

    /// Upper bound of one reconcile pass, in seconds. Admin calls inherit it.
    #[arg(long, env = "NEO4J_OPERATOR_RECONCILE_TIMEOUT", default_value_t = 60)]
    pub reconcile_timeout: u64,

    /// Requeue interval of Ready clusters, in seconds. 0 waits for changes instead.
    #[arg(long, env = "NEO4J_OPERATOR_HEALTH_POLL_INTERVAL", default_value_t = 60)]
    pub health_poll_interval: u64,

    /// Requeue interval while a cluster is Progressing or Degraded, in seconds.
    #[arg(long, env = "NEO4J_OPERATOR_PROGRESS_REQUEUE", default_value_t = 10)]
    pub progress_requeue: u64,

    /// Requeue interval while backup jobs run, in seconds.
    #[arg(long, env = "NEO4J_OPERATOR_JOB_POLL_INTERVAL", default_value_t = 15)]
    pub job_poll_interval: u64,

    /// Admin connections checked out at the same time.
    #[arg(long, env = "NEO4J_OPERATOR_ADMIN_POOL_SIZE", default_value_t = 4)]
    pub admin_pool_size: usize,

    /// Seconds to wait for a free admin connection.
    #[arg(long, env = "NEO4J_OPERATOR_ADMIN_ACQUIRE_TIMEOUT", default_value_t = 2)]
    pub admin_acquire_timeout: u64,

    /// Consecutive failures that open an endpoint's circuit.
    #[arg(long, env = "NEO4J_OPERATOR_BREAKER_THRESHOLD", default_value_t = 3)]
    pub breaker_threshold: u32,

    /// Seconds an open circuit waits before a trial call.
    #[arg(long, env = "NEO4J_OPERATOR_BREAKER_COOLDOWN", default_value_t = 30)]
    pub breaker_cooldown: u64,

    /// Seconds between health sweeps of pooled admin connections.
    #[arg(long, env = "NEO4J_OPERATOR_MONITOR_INTERVAL", default_value_t = 30)]
    pub monitor_interval: u64,

    /// Per-request timeout of the admin HTTP transport, in seconds.
    #[arg(long, env = "NEO4J_OPERATOR_ADMIN_REQUEST_TIMEOUT", default_value_t = 10)]
    pub admin_request_timeout: u64,

    /// Namespaces with cached state before the least recently active is evicted.
    #[arg(long, env = "NEO4J_OPERATOR_NAMESPACE_CAP", default_value_t = DEFAULT_NAMESPACE_CAP)]
    pub namespace_cap: usize,

    /// Fraction of the cgroup memory limit that triggers cache reclamation.
    #[arg(long, env = "NEO4J_OPERATOR_MEMORY_THRESHOLD", default_value_t = DEFAULT_MEMORY_THRESHOLD)]
    pub memory_threshold: f64,

    /// Seconds between memory pressure probes.
    #[arg(long, env = "NEO4J_OPERATOR_MEMORY_PROBE_INTERVAL", default_value_t = 30)]
    pub memory_probe_interval: u64,

    /// Watch a single namespace instead of the whole cluster.
    #[arg(long, env = "NEO4J_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            reconcile_timeout: 60,
            health_poll_interval: 60,
            progress_requeue: 10,
            job_poll_interval: 15,
            admin_pool_size: 4,
            admin_acquire_timeout: 2,
            breaker_threshold: 3,
            breaker_cooldown: 30,
            monitor_interval: 30,
            admin_request_timeout: 10,
            namespace_cap: DEFAULT_NAMESPACE_CAP,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            memory_probe_interval: 30,
            watch_namespace: None,
        }
    }
}

/// Timing knobs of a reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub reconcile_timeout: Duration,
    /// `None` parks Ready clusters until something changes.
    pub health_poll_interval: Option<Duration>,
    pub progress_requeue: Duration,
    pub job_poll_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        OperatorConfig::default().reconcile_settings()
    }
}

impl OperatorConfig {
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout.max(1)),
            health_poll_interval: (self.health_poll_interval > 0)
                .then(|| Duration::from_secs(self.health_poll_interval)),
            progress_requeue: Duration::from_secs(self.progress_requeue.max(1)),
            job_poll_interval: Duration::from_secs(self.job_poll_interval.max(1)),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.admin_pool_size,
            acquire_timeout: Duration::from_secs(self.admin_acquire_timeout),
            failure_threshold: self.breaker_threshold,
            cooldown: Duration::from_secs(self.breaker_cooldown),
            ..Default::default()
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            namespace_cap: self.namespace_cap,
            memory_threshold: self.memory_threshold,
            ..Default::default()
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval.max(1))
    }

    pub fn memory_probe_interval(&self) -> Duration {
        Duration::from_secs(self.memory_probe_interval.max(1))
    }

    pub fn admin_request_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_request_timeout.max(1))
    }
}
