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

use k8s_openapi::schemars::JsonSchema;
use kube::KubeSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Display, PartialEq, Eq)]
pub enum OperationKind {
    Backup,
    Restore,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Display, PartialEq, Eq)]
pub enum OperationPhase {
    Running,
    Succeeded,
    Failed,
}

/// A backup Job or the seeded restore, started by the operator and tracked across passes.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Backup Job name, or `{cluster}-restore` for the restore.
    pub name: String,

    pub kind: OperationKind,

    pub phase: OperationPhase,

    pub started_at: String,

    /// Restores only: the database was created from the backup artifact.
    #[serde(default)]
    pub database_online: bool,
}

impl Operation {
    pub fn is_settled(&self) -> bool {
        match (self.kind, self.phase) {
            (_, OperationPhase::Running) => false,
            (OperationKind::Restore, OperationPhase::Succeeded) => self.database_online,
            _ => true,
        }
    }
}
