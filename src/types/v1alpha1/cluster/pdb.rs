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

use super::{Neo4jCluster, Role};
use k8s_openapi::api::policy::v1 as policyv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

impl Neo4jCluster {
    /// Raft majority of the configured primaries.
    pub fn primary_quorum(&self) -> i32 {
        self.spec.topology.primaries / 2 + 1
    }

    /// Keeps voluntary disruptions from breaking the primaries' quorum. A single primary
    /// has no quorum to protect, and a budget would only block node drains.
    pub fn new_primary_pdb(&self) -> Option<policyv1::PodDisruptionBudget> {
        if self.spec.topology.primaries <= 1 {
            return None;
        }

        Some(policyv1::PodDisruptionBudget {
            metadata: self.new_metadata(Role::Primary, self.role_labels(Role::Primary)),
            spec: Some(policyv1::PodDisruptionBudgetSpec {
                min_available: Some(IntOrString::Int(self.primary_quorum())),
                selector: Some(metav1::LabelSelector {
                    match_labels: Some(self.role_selector_labels(Role::Primary)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
