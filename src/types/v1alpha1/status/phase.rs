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

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::Display;

/// Coarse lifecycle state of a cluster.
///
/// `Pending -> Progressing -> Ready`, back to `Progressing` on drift or a spec change,
/// `Degraded` on partial health failure, `Failed` on unrecoverable spec problems and
/// `Terminating` once deletion was requested.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Display, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    #[strum(serialize = "Pending")]
    Pending,

    #[strum(serialize = "Progressing")]
    Progressing,

    #[strum(serialize = "Ready")]
    Ready,

    #[strum(serialize = "Degraded")]
    Degraded,

    #[strum(serialize = "Failed")]
    Failed,

    #[strum(serialize = "Terminating")]
    Terminating,
}

impl JsonSchema for Phase {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("Phase")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "Phase"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {
                "type": "string",
                "enum": ["Pending", "Progressing", "Ready", "Degraded", "Failed", "Terminating"]
            }
        }
    }
}
