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
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;

impl Neo4jCluster {
    /// CPU-driven autoscaler for the secondary StatefulSet. Primaries never autoscale:
    /// changing their count changes the Raft quorum.
    pub fn new_secondary_autoscaler(&self) -> Option<autoscalingv2::HorizontalPodAutoscaler> {
        let scaling = self.spec.autoscaling.as_ref().filter(|a| a.enabled)?;

        Some(autoscalingv2::HorizontalPodAutoscaler {
            metadata: self.new_metadata(Role::Secondary, self.role_labels(Role::Secondary)),
            spec: Some(autoscalingv2::HorizontalPodAutoscalerSpec {
                scale_target_ref: autoscalingv2::CrossVersionObjectReference {
                    api_version: Some(appsv1::StatefulSet::API_VERSION.to_owned()),
                    kind: appsv1::StatefulSet::KIND.to_owned(),
                    name: self.resource_name(Role::Secondary),
                },
                min_replicas: Some(scaling.min_secondaries.max(1)),
                max_replicas: scaling.max_secondaries,
                metrics: Some(vec![autoscalingv2::MetricSpec {
                    type_: "Resource".to_owned(),
                    resource: Some(autoscalingv2::ResourceMetricSource {
                        name: "cpu".to_owned(),
                        target: autoscalingv2::MetricTarget {
                            type_: "Utilization".to_owned(),
                            average_utilization: Some(scaling.target_cpu_utilization),
                            ..Default::default()
                        },
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::types::v1alpha1::autoscaling::AutoscalingSpec;

    #[test]
    fn test_autoscaler_targets_secondaries() {
        let mut cluster = crate::tests::create_test_cluster("5.26.0-enterprise");
        assert!(cluster.new_secondary_autoscaler().is_none());

        cluster.spec.autoscaling = Some(AutoscalingSpec {
            enabled: true,
            min_secondaries: 0,
            max_secondaries: 4,
            target_cpu_utilization: 60,
        });
        let hpa = cluster.new_secondary_autoscaler().unwrap();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.scale_target_ref.kind, "StatefulSet");
        assert_eq!(spec.scale_target_ref.name, "graph-secondary");
        assert_eq!(spec.min_replicas, Some(1));
        assert_eq!(spec.max_replicas, 4);
        let target = &spec.metrics.unwrap()[0];
        assert_eq!(
            target.resource.as_ref().unwrap().target.average_utilization,
            Some(60)
        );
    }
}
