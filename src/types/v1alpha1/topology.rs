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

use super::k8s::SplitBrainRemediation;
use kube::KubeSchema;
use serde::{Deserialize, Serialize};

/// Member counts. Primaries host the system database and take part in write quorums;
/// secondaries are read replicas.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[x_kube(validation = Rule::new("self >= 1").message("at least one primary is required"))]
    pub primaries: i32,

    #[serde(default)]
    #[x_kube(validation = Rule::new("self >= 0").message("secondaries must not be negative"))]
    pub secondaries: i32,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            primaries: 3,
            secondaries: 0,
        }
    }
}

impl Topology {
    pub fn members(&self) -> i32 {
        self.primaries + self.secondaries
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SplitBrainSpec {
    #[serde(default)]
    pub remediation: SplitBrainRemediation,

    /// Pause between restarts of a rolling remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_delay_seconds: Option<u64>,
}
