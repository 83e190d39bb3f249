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

use super::breaker::{BreakerState, CircuitBreaker};
use super::{
    AcquireTimeoutSnafu, CircuitOpenSnafu, Connection, Connector, DeadlineExceededSnafu,
    Endpoint, Error, PoolClosedSnafu, Row,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Connections checked out at the same time, across all endpoints.
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub ping_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(2),
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolEntry {
    handle: Option<Arc<dyn Connection>>,
    /// Held while a connection to the endpoint is being opened.
    dialing: Arc<Mutex<()>>,
    last_health_check: Option<Instant>,
    breaker: CircuitBreaker,
}

impl PoolEntry {
    fn new(settings: &PoolSettings) -> Self {
        Self {
            handle: None,
            dialing: Arc::new(Mutex::new(())),
            last_health_check: None,
            breaker: CircuitBreaker::new(settings.failure_threshold, settings.cooldown),
        }
    }
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    permits: Semaphore,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        Self {
            connector,
            permits: Semaphore::new(settings.max_connections.max(1)),
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Runs one statement against `endpoint`.
    ///
    /// Fails fast while the endpoint's breaker is open. Waiting for a free connection is
    /// bounded by the acquire timeout and never outlives `deadline`.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        statement: &str,
        deadline: Instant,
    ) -> Result<Vec<Row>, Error> {
        let address = endpoint.address.as_str();
        let now = Instant::now();
        if now >= deadline {
            return DeadlineExceededSnafu { endpoint: address }.fail();
        }

        {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .entry(address.to_owned())
                .or_insert_with(|| PoolEntry::new(&self.settings));
            if !entry.breaker.allow(now) {
                return CircuitOpenSnafu { endpoint: address }.fail();
            }
        }

        let acquire_deadline = deadline.min(now + self.settings.acquire_timeout);
        let _permit = match timeout_at(acquire_deadline, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                self.cancel_trial(address).await;
                return PoolClosedSnafu.fail();
            }
            Err(_) => {
                self.cancel_trial(address).await;
                return AcquireTimeoutSnafu { endpoint: address }.fail();
            }
        };

        let result = match timeout_at(deadline, self.run(endpoint, statement)).await {
            Ok(result) => result,
            Err(_) => DeadlineExceededSnafu { endpoint: address }.fail(),
        };
        self.settle(address, &result).await;
        result
    }

    async fn run(&self, endpoint: &Endpoint, statement: &str) -> Result<Vec<Row>, Error> {
        let connection = self.connection(endpoint).await?;
        connection.run(statement).await
    }

    fn pooled(entries: &HashMap<String, PoolEntry>, address: &str) -> Option<Arc<dyn Connection>> {
        entries.get(address).and_then(|e| e.handle.clone())
    }

    async fn connection(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, Error> {
        let dialing = {
            let entries = self.entries.lock().await;
            if let Some(handle) = Self::pooled(&entries, &endpoint.address) {
                return Ok(handle);
            }
            entries.get(&endpoint.address).map(|e| e.dialing.clone())
        };

        // Concurrent callers for the same endpoint wait here and reuse the first handle.
        let _dialing = match &dialing {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        if let Some(handle) = Self::pooled(&*self.entries.lock().await, &endpoint.address) {
            return Ok(handle);
        }

        debug!("opening admin connection to {}", endpoint.address);
        let handle = self.connector.connect(endpoint).await?;
        if let Some(entry) = self.entries.lock().await.get_mut(&endpoint.address) {
            entry.handle = Some(handle.clone());
            entry.last_health_check = Some(Instant::now());
        }
        Ok(handle)
    }

    async fn settle(&self, address: &str, result: &Result<Vec<Row>, Error>) {
        let mut entries = self.entries.lock().await;
        // Evicted while the call was in flight.
        let Some(entry) = entries.get_mut(address) else {
            return;
        };

        match result {
            Err(e) if e.trips_breaker() => {
                entry.breaker.record_failure(Instant::now());
                entry.handle = None;
                if entry.breaker.state() == BreakerState::Open {
                    warn!("circuit opened for {}: {}", address, e);
                }
            }
            // A rejected statement still proves the endpoint is reachable.
            _ => entry.breaker.record_success(),
        }
    }

    async fn cancel_trial(&self, address: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(address) {
            entry.breaker.cancel_trial();
        }
    }

    /// Pings every pooled connection and drops the ones that fail. Returns how many
    /// were dropped.
    pub async fn health_sweep(&self) -> usize {
        let snapshot: Vec<(String, Arc<dyn Connection>)> = self
            .entries
            .lock()
            .await
            .iter()
            .filter_map(|(address, e)| e.handle.clone().map(|h| (address.clone(), h)))
            .collect();

        let mut dropped = 0;
        for (address, handle) in snapshot {
            let healthy = matches!(
                timeout(self.settings.ping_timeout, handle.ping()).await,
                Ok(Ok(()))
            );

            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(&address) else {
                continue;
            };
            if healthy {
                entry.last_health_check = Some(now);
            } else {
                debug!("dropping unhealthy admin connection to {}", address);
                entry.handle = None;
                entry.breaker.record_failure(now);
                dropped += 1;
            }
        }
        dropped
    }

    /// Removes all state for endpoints whose address contains `fragment`.
    pub async fn evict_matching(&self, fragment: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|address, _| !address.contains(fragment));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn breaker_state(&self, address: &str) -> Option<BreakerState> {
        self.entries
            .lock()
            .await
            .get(address)
            .map(|e| e.breaker.state())
    }

    pub async fn has_connection(&self, address: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(address)
            .is_some_and(|e| e.handle.is_some())
    }

    pub async fn last_health_check(&self, address: &str) -> Option<Instant> {
        self.entries
            .lock()
            .await
            .get(address)
            .and_then(|e| e.last_health_check)
    }
}
