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

/// Online backups through `neo4j-admin database backup`.
///
/// With a `schedule` the operator keeps a CronJob in place. Changing `trigger` to a new
/// value starts a one-off backup Job that is tracked in the status until it finishes.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    #[x_kube(validation = Rule::new("self != ''").message("backup path must not be empty"))]
    pub path: String,

    /// Claim the backup path lives on. Without it the job writes to an emptyDir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub compress: bool,

    #[serde(default)]
    pub verify: bool,

    #[serde(default)]
    pub parallel_download: bool,

    #[serde(default)]
    pub remote_address_resolution: bool,

    #[serde(default)]
    pub skip_recovery: bool,
}

/// Database seeded from a backup artifact once the members are ready.
///
/// Every server that hosts the database reads the artifact itself, so a path on
/// `claimName` needs a claim the members can all mount read-only.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Absolute path of the artifact on `claimName`, or a URI the servers can fetch
    /// (`s3://`, `gs://`, `azb://`, `https://`).
    #[x_kube(validation = Rule::new("self != ''").message("restore path must not be empty"))]
    pub from_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    /// Replaces an existing database of the same name instead of keeping it.
    #[serde(default)]
    pub overwrite_destination: bool,
}

impl RestoreSpec {
    fn is_remote(&self) -> bool {
        self.from_path.contains("://")
    }

    /// Where the members mount `claimName`: the directory holding the artifact.
    pub fn mount_dir(&self) -> Option<String> {
        if self.is_remote() {
            return None;
        }
        self.claim_name.as_ref()?;
        Some(match self.from_path.trim_end_matches('/').rsplit_once('/') {
            Some(("", _)) | None => "/".to_owned(),
            Some((dir, _)) => dir.to_owned(),
        })
    }

    pub fn seed_uri(&self) -> String {
        if self.is_remote() {
            self.from_path.clone()
        } else {
            format!("file://{}", self.from_path)
        }
    }
}

fn default_database() -> String {
    "neo4j".to_owned()
}
