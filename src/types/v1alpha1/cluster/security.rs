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

//! Pod and container identity derivation.

use super::Neo4jClusterSpec;
use k8s_openapi::api::core::v1 as corev1;

/// Marker in image tags built on Red Hat UBI, which run under an arbitrary uid on
/// OpenShift-style platforms.
const UBI_TAG_MARKER: &str = "-ubi";

/// uid, gid and fsGroup of the `neo4j` user in the community images.
pub const NEO4J_UID: i64 = 7474;
pub const NEO4J_GID: i64 = 7474;
pub const NEO4J_FS_GROUP: i64 = 7474;

#[derive(Debug, Clone, PartialEq)]
pub enum IdentityPolicy {
    /// User-supplied pod security context, used as is.
    Override(corev1::PodSecurityContext),
    /// The platform assigns uid and gid; the pod only asserts non-root.
    ArbitraryIdentity,
    /// The image's built-in `neo4j` user.
    FixedIdentity,
}

impl IdentityPolicy {
    pub fn classify(spec: &Neo4jClusterSpec) -> Self {
        if let Some(ctx) = &spec.security_context {
            return Self::Override(ctx.clone());
        }
        if spec.image.tag.contains(UBI_TAG_MARKER) {
            Self::ArbitraryIdentity
        } else {
            Self::FixedIdentity
        }
    }

    pub fn pod_security_context(&self) -> corev1::PodSecurityContext {
        match self {
            Self::Override(ctx) => ctx.clone(),
            Self::ArbitraryIdentity => corev1::PodSecurityContext {
                run_as_non_root: Some(true),
                seccomp_profile: Some(corev1::SeccompProfile {
                    type_: "RuntimeDefault".to_owned(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Self::FixedIdentity => corev1::PodSecurityContext {
                run_as_user: Some(NEO4J_UID),
                run_as_group: Some(NEO4J_GID),
                fs_group: Some(NEO4J_FS_GROUP),
                fs_group_change_policy: Some("OnRootMismatch".to_owned()),
                run_as_non_root: Some(true),
                ..Default::default()
            },
        }
    }

    /// Container-level hardening. An override leaves the container context to the user.
    pub fn container_security_context(&self) -> Option<corev1::SecurityContext> {
        match self {
            Self::Override(_) => None,
            Self::ArbitraryIdentity | Self::FixedIdentity => Some(corev1::SecurityContext {
                allow_privilege_escalation: Some(false),
                capabilities: Some(corev1::Capabilities {
                    drop: Some(vec!["ALL".to_owned()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }
}
