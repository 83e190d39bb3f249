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

//! Administrative access to Neo4j members.
//!
//! Calls go through a bounded [`pool::ConnectionPool`] that keeps one circuit breaker per
//! endpoint. Every call carries a deadline; running out of time counts as an endpoint
//! failure.

pub mod breaker;
pub mod membership;
pub mod monitor;
pub mod pool;
pub mod transport;

use crate::types::v1alpha1::backup::RestoreSpec;
use crate::version::Version;
use crate::version::command::{SHOW_SERVERS_STATEMENT, seed_database_statement};
use async_trait::async_trait;
use futures::future::join_all;
use snafu::Snafu;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

pub use membership::{HealthReport, MemberView, ServerInfo};
pub use pool::{ConnectionPool, PoolSettings};

#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("circuit open for {}", endpoint))]
    CircuitOpen { endpoint: String },

    #[snafu(display("timed out waiting for a pooled connection to {}", endpoint))]
    AcquireTimeout { endpoint: String },

    #[snafu(display("connection pool is closed"))]
    PoolClosed,

    #[snafu(display("deadline exceeded calling {}", endpoint))]
    DeadlineExceeded { endpoint: String },

    #[snafu(display("transport error talking to {}: {}", endpoint, message))]
    Transport { endpoint: String, message: String },

    #[snafu(display("{} rejected the statement: {} {}", endpoint, code, message))]
    Query {
        endpoint: String,
        code: String,
        message: String,
    },

    #[snafu(display("malformed response from {}: {}", endpoint, message))]
    MalformedResponse { endpoint: String, message: String },

    #[snafu(display("auth value must have the form user/password"))]
    InvalidCredentials,
}

impl Error {
    /// The endpoint could not be reached or did not answer in time.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::CircuitOpen { .. }
                | Error::AcquireTimeout { .. }
                | Error::DeadlineExceeded { .. }
                | Error::Transport { .. }
        )
    }

    /// Failures that count against the endpoint's breaker.
    fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Error::DeadlineExceeded { .. } | Error::Transport { .. }
        )
    }
}

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, serde_json::Value>;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Parses the `user/password` form of `NEO4J_AUTH`.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw.trim().split_once('/') {
            Some((user, password)) if !user.is_empty() && !password.is_empty() => Ok(Self {
                user: user.to_owned(),
                password: password.to_owned(),
            }),
            _ => InvalidCredentialsSnafu.fail(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A member's administrative endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Pod name of the member.
    pub member: String,
    /// Base URL, e.g. `http://graph-primary-0.graph-headless.default.svc.cluster.local:7474`.
    pub address: String,
    pub credentials: Credentials,
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn run(&self, statement: &str) -> Result<Vec<Row>, Error>;

    async fn ping(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, Error>;
}

pub struct AdminClient {
    pool: Arc<ConnectionPool>,
}

impl AdminClient {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(connector, settings)),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        statement: &str,
        deadline: Instant,
    ) -> Result<Vec<Row>, Error> {
        self.pool.execute(endpoint, statement, deadline).await
    }

    /// Asks every member for its view of the cluster and merges the answers. Detection
    /// only: nothing is changed on the members.
    pub async fn inspect_cluster(&self, members: &[Endpoint], deadline: Instant) -> HealthReport {
        let answers = join_all(
            members
                .iter()
                .map(|member| self.execute(member, SHOW_SERVERS_STATEMENT, deadline)),
        )
        .await;

        let mut views = Vec::with_capacity(members.len());
        let mut unreachable = Vec::new();
        for (member, answer) in members.iter().zip(answers) {
            match answer {
                Ok(rows) => views.push(MemberView::from_rows(&member.member, &rows)),
                Err(e) => {
                    debug!("member {} did not report membership: {}", member.member, e);
                    unreachable.push(member.member.clone());
                }
            }
        }

        HealthReport::new(views, unreachable)
    }

    /// Creates `database` from a backup artifact. The hosting servers fetch and load the
    /// artifact in the background after the statement returns.
    pub async fn seed_database(
        &self,
        endpoint: &Endpoint,
        version: &Version,
        restore: &RestoreSpec,
        deadline: Instant,
    ) -> Result<(), Error> {
        let statement = seed_database_statement(
            version,
            &restore.database,
            &restore.seed_uri(),
            restore.overwrite_destination,
        );
        self.execute(endpoint, &statement, deadline).await?;
        info!(
            "database {} seeded from {} via {}",
            restore.database,
            restore.seed_uri(),
            endpoint.member
        );
        Ok(())
    }

    /// Drops pooled state for every endpoint whose address contains `fragment`.
    pub async fn evict_endpoints(&self, fragment: &str) -> usize {
        self.pool.evict_matching(fragment).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{FakeConnector, member_endpoint, server_row};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_credentials_parse() {
        let creds = Credentials::parse("neo4j/s3cret").unwrap();
        assert_eq!(creds.user, "neo4j");
        assert_eq!(creds.password, "s3cret");
        assert!(!format!("{creds:?}").contains("s3cret"));

        assert_eq!(Credentials::parse("neo4j"), Err(Error::InvalidCredentials));
        assert_eq!(Credentials::parse("/pw"), Err(Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_inspect_cluster_reports_unreachable_members() {
        let connector = FakeConnector::default();
        let members = vec![member_endpoint("graph-primary-0"), member_endpoint("graph-primary-1")];
        let view = vec![
            server_row("graph-primary-0", "Enabled", "Available"),
            server_row("graph-primary-1", "Enabled", "Available"),
        ];
        connector.respond(&members[0].address, Ok(view));
        connector.respond(
            &members[1].address,
            Err(Error::Transport {
                endpoint: members[1].address.clone(),
                message: "connection refused".to_owned(),
            }),
        );

        let client = AdminClient::new(Arc::new(connector), PoolSettings::default());
        let report = client.inspect_cluster(&members, far_deadline()).await;
        assert_eq!(report.unreachable, vec!["graph-primary-1"]);
        assert!(!report.is_split());
        assert_eq!(report.servers.len(), 2);
    }

    #[tokio::test]
    async fn test_seed_database_sends_seeded_statement() {
        let connector = FakeConnector::default();
        let member = member_endpoint("graph-primary-0");
        connector.respond(&member.address, Ok(vec![]));
        let statements = connector.statements();
        let restore = RestoreSpec {
            from_path: "/backups/movies.backup".to_owned(),
            claim_name: Some("backup-pvc".to_owned()),
            database: "movies".to_owned(),
            ..Default::default()
        };

        let client = AdminClient::new(Arc::new(connector), PoolSettings::default());
        client
            .seed_database(
                &member,
                &Version::parse("2025.01.0").unwrap(),
                &restore,
                far_deadline(),
            )
            .await
            .unwrap();

        assert_eq!(
            statements.lock().unwrap().as_slice(),
            ["CREATE DATABASE `movies` IF NOT EXISTS DEFAULT LANGUAGE CYPHER 25 \
              OPTIONS {seedURI: 'file:///backups/movies.backup'}"]
        );
    }
}
