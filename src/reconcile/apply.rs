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

//! Hash-guarded server-side apply of the desired object set.

use super::{ApplySnafu, Error};
use crate::context::Context;
use crate::types::v1alpha1::cluster::{DesiredObject, DesiredObjectSet, Neo4jCluster};
use k8s_openapi::api::apps::v1 as appsv1;
use snafu::ResultExt;
use tracing::{debug, info};

/// Annotation carrying the content hash of the manifest an object was last applied from.
pub const DESIRED_HASH_ANNOTATION: &str = "neo4j.com/desired-hash";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: usize,
}

impl ApplyReport {
    pub fn changed(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    /// Event note listing what changed.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.created.is_empty() {
            parts.push(format!("created {}", self.created.join(", ")));
        }
        if !self.updated.is_empty() {
            parts.push(format!("updated {}", self.updated.join(", ")));
        }
        parts.join("; ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

fn live_hash(live: &serde_json::Value) -> Option<&str> {
    live.pointer("/metadata/annotations")
        .and_then(|annotations| annotations.get(DESIRED_HASH_ANNOTATION))
        .and_then(serde_json::Value::as_str)
}

fn with_hash(manifest: &serde_json::Value, hash: &str) -> serde_json::Value {
    let mut manifest = manifest.clone();
    if let Some(metadata) = manifest
        .get_mut("metadata")
        .and_then(serde_json::Value::as_object_mut)
    {
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(DESIRED_HASH_ANNOTATION.to_owned(), hash.into());
        }
    }
    manifest
}

/// Whether `live` lost or changed a field the desired value sets. Fields the API server
/// adds on its own (defaults, status, managed metadata) do not count.
fn diverges(desired: &serde_json::Value, live: Option<&serde_json::Value>) -> bool {
    use serde_json::Value;

    match (desired, live) {
        (Value::Null, None | Some(Value::Null)) => false,
        (Value::Array(items), None) if items.is_empty() => false,
        (Value::Object(fields), None) if fields.is_empty() => false,
        (_, None) => true,
        (Value::Object(fields), Some(Value::Object(live))) => fields
            .iter()
            .any(|(key, value)| diverges(value, live.get(key))),
        (Value::Array(items), Some(Value::Array(live))) => {
            items.len() != live.len()
                || items.iter().zip(live).any(|(item, live)| diverges(item, Some(live)))
        }
        (Value::Number(a), Some(Value::Number(b))) => a.as_f64() != b.as_f64(),
        (desired, Some(live)) => desired != live,
    }
}

/// Compares everything but metadata and status, which the API server and other
/// controllers write.
fn drifted(manifest: &serde_json::Value, live: &serde_json::Value) -> bool {
    manifest.as_object().is_some_and(|fields| {
        fields
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "metadata" | "status"))
            .any(|(key, value)| diverges(value, live.get(key)))
    })
}

/// Rejects updates the API server would refuse on a live StatefulSet.
fn guard_immutable_fields(
    object: &DesiredObject,
    live: &serde_json::Value,
) -> Result<(), Error> {
    if object.kind() != "StatefulSet" {
        return Ok(());
    }
    let existing: appsv1::StatefulSet = serde_json::from_value(live.clone())?;
    let desired: appsv1::StatefulSet = serde_json::from_value(object.manifest.clone())?;
    Neo4jCluster::validate_statefulset_update(&existing, &desired)?;
    Ok(())
}

/// Applies one object unless its live hash matches and nothing changed it since.
pub async fn apply_object(ctx: &Context, object: &DesiredObject) -> Result<ApplyOutcome, Error> {
    let hash = ctx.cache.desired_hash(&object.manifest)?;
    let live = ctx
        .platform
        .get(&object.object_type, &object.namespace, &object.name)
        .await?;

    if let Some(live) = &live {
        if live_hash(live) == Some(hash.as_str()) {
            if !drifted(&object.manifest, live) {
                return Ok(ApplyOutcome::Unchanged);
            }
            info!("reverting drift on {}", object.display_name());
        }
        guard_immutable_fields(object, live)?;
    }

    ctx.platform
        .apply(
            &object.object_type,
            &object.namespace,
            &object.name,
            &with_hash(&object.manifest, &hash),
        )
        .await?;

    Ok(if live.is_some() {
        ApplyOutcome::Updated
    } else {
        ApplyOutcome::Created
    })
}

/// Applies the set in stage order. Stops at the first failure; objects applied before it
/// stay applied and are skipped by the next pass.
pub async fn apply_desired(
    ctx: &Context,
    cluster: &Neo4jCluster,
    desired: &DesiredObjectSet,
) -> Result<ApplyReport, Error> {
    let mut report = ApplyReport::default();

    for object in desired {
        let outcome = match apply_object(ctx, object).await {
            Ok(outcome) => outcome,
            Err(Error::Context { source }) => {
                return Err(source).context(ApplySnafu {
                    object: object.display_name(),
                    applied: report.changed(),
                });
            }
            Err(e) => return Err(e),
        };

        match outcome {
            ApplyOutcome::Created => {
                info!("created {} for {}", object.display_name(), cluster.key());
                report.created.push(object.display_name());
            }
            ApplyOutcome::Updated => {
                info!("updated {} for {}", object.display_name(), cluster.key());
                report.updated.push(object.display_name());
            }
            ApplyOutcome::Unchanged => report.unchanged += 1,
        }
    }

    debug!(
        "{}: {} created, {} updated, {} unchanged",
        cluster.key(),
        report.created.len(),
        report.updated.len(),
        report.unchanged
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::reconcile::ErrorClass;
    use crate::tests::{FakePlatform, create_test_cluster, test_context};
    use crate::types::v1alpha1::cluster::PlatformFacts;

    fn desired(cluster: &Neo4jCluster) -> DesiredObjectSet {
        let version = cluster.validate().unwrap();
        cluster
            .desired_objects(&version, &PlatformFacts::default())
            .unwrap()
    }

    #[test]
    fn test_with_hash_adds_annotation() {
        let manifest = serde_json::json!({"metadata": {"name": "graph-config"}});
        let annotated = with_hash(&manifest, "abc");
        assert_eq!(live_hash(&annotated), Some("abc"));

        let manifest = serde_json::json!({
            "metadata": {"name": "x", "annotations": {"keep": "me"}}
        });
        let annotated = with_hash(&manifest, "abc");
        assert_eq!(annotated["metadata"]["annotations"]["keep"], "me");
    }

    #[tokio::test]
    async fn test_second_apply_is_a_no_op() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let cluster = create_test_cluster("5.26.0-enterprise");
        let set = desired(&cluster);

        let first = apply_desired(&ctx, &cluster, &set).await.unwrap();
        assert_eq!(first.created.len(), set.len());
        let mutations = platform.mutations();

        let second = apply_desired(&ctx, &cluster, &set).await.unwrap();
        assert_eq!(second.changed(), 0);
        assert_eq!(second.unchanged, set.len());
        assert_eq!(platform.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_spec_change_updates_only_affected_objects() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let mut cluster = create_test_cluster("5.26.0-enterprise");
        apply_desired(&ctx, &cluster, &desired(&cluster)).await.unwrap();

        cluster
            .spec
            .config
            .insert("db.logs.query.enabled".to_owned(), "OFF".to_owned());
        let report = apply_desired(&ctx, &cluster, &desired(&cluster)).await.unwrap();
        assert_eq!(report.updated, vec!["ConfigMap/graph-config"]);
        assert!(report.created.is_empty());
    }

    #[test]
    fn test_drift_ignores_server_added_fields() {
        let manifest = serde_json::json!({
            "metadata": {"name": "graph-primary"},
            "spec": {"replicas": 3, "template": {"spec": {"volumes": []}}}
        });
        let live = serde_json::json!({
            "metadata": {"name": "graph-primary", "uid": "1", "generation": 2},
            "spec": {"replicas": 3.0, "revisionHistoryLimit": 10, "template": {"spec": {}}},
            "status": {"replicas": 3}
        });
        assert!(!drifted(&manifest, &live));

        let scaled = serde_json::json!({"spec": {"replicas": 1, "template": {"spec": {}}}});
        assert!(drifted(&manifest, &scaled));
    }

    #[tokio::test]
    async fn test_out_of_band_edit_is_reverted() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let cluster = create_test_cluster("5.26.0-enterprise");
        let set = desired(&cluster);
        apply_desired(&ctx, &cluster, &set).await.unwrap();

        platform.edit_object("StatefulSet", "graph-primary", |live| {
            live["spec"]["replicas"] = serde_json::json!(1);
        });
        let report = apply_desired(&ctx, &cluster, &set).await.unwrap();
        assert_eq!(report.updated, vec!["StatefulSet/graph-primary"]);
        assert_eq!(
            platform.object("StatefulSet", "graph-primary").unwrap()["spec"]["replicas"],
            3
        );

        let again = apply_desired(&ctx, &cluster, &set).await.unwrap();
        assert_eq!(again.changed(), 0);
    }

    #[tokio::test]
    async fn test_storage_class_change_is_rejected() {
        let platform = FakePlatform::default();
        let ctx = test_context(platform.clone());
        let mut cluster = create_test_cluster("5.26.0-enterprise");
        apply_desired(&ctx, &cluster, &desired(&cluster)).await.unwrap();

        cluster.spec.storage.storage_class_name = Some("fast-ssd".to_owned());
        let err = apply_desired(&ctx, &cluster, &desired(&cluster))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}
