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

use kube::KubeSchema;
use serde::{Deserialize, Serialize};

/// A server plugin installed by the image entrypoint through `NEO4J_PLUGINS`.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    /// Plugin identifier understood by the image, e.g. `apoc` or `graph-data-science`.
    #[x_kube(validation = Rule::new("self != ''").message("plugin name must not be empty"))]
    pub name: String,

    /// Procedure namespaces to mark unrestricted, e.g. `apoc.*`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrestricted: Vec<String>,
}
