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
use k8s_openapi::Resource as _;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;

impl Neo4jCluster {
    pub fn new_service_account(&self) -> corev1::ServiceAccount {
        corev1::ServiceAccount {
            metadata: self.new_metadata(Role::ServiceAccount, self.common_labels()),
            ..Default::default()
        }
    }

    /// The Kubernetes discovery resolver inside each member lists services.
    pub fn new_discovery_role(&self) -> rbacv1::Role {
        rbacv1::Role {
            metadata: self.new_metadata(Role::Discovery, self.common_labels()),
            rules: Some(vec![rbacv1::PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["services".to_owned(), "endpoints".to_owned()]),
                verbs: vec!["get".to_owned(), "list".to_owned(), "watch".to_owned()],
                ..Default::default()
            }]),
        }
    }

    pub fn new_discovery_role_binding(&self) -> rbacv1::RoleBinding {
        rbacv1::RoleBinding {
            metadata: self.new_metadata(Role::Discovery, self.common_labels()),
            subjects: Some(vec![rbacv1::Subject {
                kind: corev1::ServiceAccount::KIND.to_owned(),
                namespace: self.namespace().ok(),
                name: self.service_account_name(),
                ..Default::default()
            }]),
            role_ref: rbacv1::RoleRef {
                api_group: rbacv1::Role::GROUP.to_owned(),
                kind: rbacv1::Role::KIND.to_owned(),
                name: self.resource_name(Role::Discovery),
            },
        }
    }
}
