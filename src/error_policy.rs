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

use crate::context::Context;
use crate::reconcile::Error;
use crate::types::v1alpha1::cluster::Neo4jCluster;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;

/// `base * 2^attempt`, capped. `attempt` counts failures before this one.
pub fn calculate_backoff(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE_SECS.saturating_mul(2_u64.saturating_pow(attempt.min(16)));
    Duration::from_secs(delay.min(BACKOFF_MAX_SECS))
}

pub fn error_policy(cluster: Arc<Neo4jCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = cluster.key();
    let class = error.class();
    if class.is_terminal() {
        error!("{}: {} ({:?}), waiting for a spec change", key, error, class);
        return Action::await_change();
    }

    let delay = calculate_backoff(ctx.next_attempt(&key));
    warn!(
        "{}: {} ({:?}), retrying in {}s",
        key,
        error,
        class,
        delay.as_secs()
    );
    Action::requeue(delay)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context;
    use crate::tests::{FakePlatform, create_test_cluster, test_context};
    use crate::types;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(calculate_backoff(0), Duration::from_secs(5));
        assert_eq!(calculate_backoff(1), Duration::from_secs(10));
        assert_eq!(calculate_backoff(2), Duration::from_secs(20));
        assert_eq!(calculate_backoff(5), Duration::from_secs(160));
        assert_eq!(calculate_backoff(6), Duration::from_secs(300));
        assert_eq!(calculate_backoff(u32::MAX), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_transient_errors_back_off_per_cluster() {
        let ctx = test_context(FakePlatform::default());
        let cluster = Arc::new(create_test_cluster("5.26.0-enterprise"));
        let error = Error::Context {
            source: context::Error::ClusterGone {
                key: cluster.key(),
            },
        };

        let delays: Vec<Action> = (0..3)
            .map(|_| error_policy(cluster.clone(), &error, ctx.clone()))
            .collect();
        assert_eq!(delays, vec![
            Action::requeue(Duration::from_secs(5)),
            Action::requeue(Duration::from_secs(10)),
            Action::requeue(Duration::from_secs(20)),
        ]);

        ctx.reset_backoff(&cluster.key());
        assert_eq!(
            error_policy(cluster.clone(), &error, ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_terminal_errors_wait_for_change() {
        let ctx = test_context(FakePlatform::default());
        let cluster = Arc::new(create_test_cluster("5.26.0-enterprise"));
        let error = Error::Types {
            source: types::error::Error::InvalidSpec {
                message: "primaries must be at least 1, got 0".to_owned(),
            },
        };

        assert_eq!(error_policy(cluster.clone(), &error, ctx.clone()), Action::await_change());
        assert_eq!(ctx.backoff_attempts(&cluster.key()), 0);
    }
}
