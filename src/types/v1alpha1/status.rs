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

pub mod condition;
pub mod operation;
pub mod phase;
pub mod server;

use kube::KubeSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub phase: phase::Phase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<condition::Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<server::ServerRecord>,

    #[serde(default)]
    pub endpoints: server::Endpoints,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Version parsed from the image tag during the last successful synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<operation::Operation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_trigger: Option<String>,
}

impl Status {
    pub fn pending_operations(&self) -> impl Iterator<Item = &operation::Operation> {
        self.operations.iter().filter(|op| !op.is_settled())
    }
}
