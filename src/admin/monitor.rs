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

use super::pool::ConnectionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawns the background sweep over pooled admin connections. Runs every `interval`
/// until `token` is cancelled.
pub fn spawn_health_monitor(
    pool: Arc<ConnectionPool>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("admin health monitor started, interval {:?}", interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("admin health monitor stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let dropped = pool.health_sweep().await;
                    if dropped > 0 {
                        debug!("health sweep dropped {} admin connections", dropped);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::admin::PoolSettings;
    use crate::tests::{FakeConnector, member_endpoint};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_sweeps_until_cancelled() {
        let connector = FakeConnector::default();
        let member = member_endpoint("graph-primary-0");
        connector.respond(&member.address, Ok(vec![]));
        connector.fail_pings(&member.address);

        let pool = Arc::new(ConnectionPool::new(Arc::new(connector), PoolSettings::default()));
        pool.execute(&member, "RETURN 1", Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert!(pool.has_connection(&member.address).await);

        let token = CancellationToken::new();
        let handle = spawn_health_monitor(pool.clone(), Duration::from_secs(30), token.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!pool.has_connection(&member.address).await);

        token.cancel();
        handle.await.unwrap();
    }
}
