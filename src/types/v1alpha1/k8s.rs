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

//! Kubernetes enum types shared by the cluster spec.

use k8s_openapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// StatefulSet pod management policy.
///
/// Neo4j members discover each other before any of them reports ready, so `Parallel` is
/// the default: with `OrderedReady` the first primary would wait forever for a quorum that
/// is never scheduled.
///
/// https://kubernetes.io/docs/tutorials/stateful-application/basic-stateful-set/#pod-management-policy
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum PodManagementPolicy {
    #[strum(to_string = "OrderedReady")]
    OrderedReady,

    #[strum(to_string = "Parallel")]
    #[default]
    Parallel,
}

/// https://kubernetes.io/docs/concepts/containers/images/#image-pull-policy
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum ImagePullPolicy {
    #[strum(to_string = "Always")]
    Always,

    #[strum(to_string = "Never")]
    Never,

    #[strum(to_string = "IfNotPresent")]
    #[default]
    IfNotPresent,
}

/// What the operator may do once members disagree about cluster membership.
///
/// Detection always runs and is always reported. Restarting members is destructive, so
/// anything but `Disabled` has to be requested per cluster.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum SplitBrainRemediation {
    #[strum(to_string = "Disabled")]
    #[default]
    Disabled,

    /// Restart every member outside the largest membership view.
    #[strum(to_string = "RestartMinority")]
    RestartMinority,

    /// Restart members one by one, waiting between steps.
    #[strum(to_string = "RollingRestart")]
    RollingRestart,
}
