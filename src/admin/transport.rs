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

//! Neo4j HTTP transactional endpoint.
//!
//! Statements run as auto-commit transactions against the `system` database:
//! `POST {base}/db/system/tx/commit`.

use super::{Connection, Connector, Endpoint, Error, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const COMMIT_PATH: &str = "/db/system/tx/commit";

#[derive(Serialize)]
struct StatementRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
}

#[derive(Deserialize, Default)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ServerError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn transport_error(endpoint: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::DeadlineExceeded {
            endpoint: endpoint.to_owned(),
        }
    } else {
        Error::Transport {
            endpoint: endpoint.to_owned(),
            message: e.to_string(),
        }
    }
}

pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Transport {
                endpoint: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Connection>, Error> {
        // HTTP is connectionless; the reqwest client keeps its own keep-alive pool.
        Ok(Arc::new(HttpConnection {
            client: self.client.clone(),
            endpoint: endpoint.clone(),
        }))
    }
}

pub struct HttpConnection {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl HttpConnection {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.address.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn run(&self, statement: &str) -> Result<Vec<Row>, Error> {
        let address = self.endpoint.address.as_str();
        debug!("running admin statement on {}", address);

        let response = self
            .client
            .post(self.url(COMMIT_PATH))
            .basic_auth(
                &self.endpoint.credentials.user,
                Some(&self.endpoint.credentials.password),
            )
            .json(&StatementRequest {
                statements: [Statement { statement }],
            })
            .send()
            .await
            .map_err(|e| transport_error(address, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Query {
                endpoint: address.to_owned(),
                code: "Neo.ClientError.Security.Unauthorized".to_owned(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(Error::Transport {
                endpoint: address.to_owned(),
                message: format!("HTTP {status}"),
            });
        }

        let body: CommitResponse = response.json().await.map_err(|e| {
            Error::MalformedResponse {
                endpoint: address.to_owned(),
                message: e.to_string(),
            }
        })?;

        if let Some(error) = body.errors.into_iter().next() {
            return Err(Error::Query {
                endpoint: address.to_owned(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(body
            .results
            .into_iter()
            .flat_map(|result| {
                let columns = result.columns;
                result
                    .data
                    .into_iter()
                    .map(move |data| columns.iter().cloned().zip(data.row).collect::<Row>())
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), Error> {
        let address = self.endpoint.address.as_str();
        let response = self
            .client
            .get(self.url("/"))
            .send()
            .await
            .map_err(|e| transport_error(address, e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transport {
                endpoint: address.to_owned(),
                message: format!("HTTP {}", response.status()),
            })
        }
    }
}
