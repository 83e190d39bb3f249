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

//! Phase and condition derivation. Pure: the same observation always yields the same
//! status, so a pass with nothing new to report writes nothing.

use super::ErrorClass;
use super::observe::Observation;
use crate::config::ReconcileSettings;
use crate::types::v1alpha1::status::Status;
use crate::types::v1alpha1::status::condition::{
    CONDITION_DEGRADED, CONDITION_FAILED, CONDITION_PROGRESSING, CONDITION_READY,
    ConditionStatus, find_condition, set_condition,
};
use crate::types::v1alpha1::status::phase::Phase;
use kube::runtime::controller::Action;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: &'static str,
    pub status: ConditionStatus,
    pub reason: &'static str,
    pub message: String,
}

impl ConditionUpdate {
    fn new(
        type_: &'static str,
        status: ConditionStatus,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub phase: Phase,
    pub conditions: Vec<ConditionUpdate>,
}

impl Assessment {
    pub fn is_split_brain(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == CONDITION_DEGRADED && c.reason == ErrorClass::SplitBrain.reason())
    }
}

fn readiness_message(observation: &Observation) -> String {
    let mut message = format!(
        "{}/{} primaries ready",
        observation.primaries.ready, observation.primaries.desired
    );
    if observation.secondaries.desired > 0 {
        message.push_str(&format!(
            ", {}/{} secondaries ready",
            observation.secondaries.ready, observation.secondaries.desired
        ));
    }
    message
}

fn degraded(reason: &'static str, message: String) -> Assessment {
    Assessment {
        phase: Phase::Degraded,
        conditions: vec![
            ConditionUpdate::new(CONDITION_READY, ConditionStatus::False, reason, message.clone()),
            ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::False, "Stable", ""),
            ConditionUpdate::new(CONDITION_DEGRADED, ConditionStatus::True, reason, message),
        ],
    }
}

/// Derives the phase of a cluster whose spec was valid and applied this pass.
pub fn assess(observation: &Observation, changed_objects: usize) -> Assessment {
    if !observation.workloads_ready() || changed_objects > 0 {
        let (reason, message) = if observation.workloads_ready() {
            ("Applying", format!("{changed_objects} objects changed"))
        } else {
            ("MembersNotReady", readiness_message(observation))
        };
        return Assessment {
            phase: Phase::Progressing,
            conditions: vec![
                ConditionUpdate::new(CONDITION_READY, ConditionStatus::False, reason, message.clone()),
                ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::True, reason, message),
            ],
        };
    }

    if let Some(report) = &observation.health
        && report.is_split()
    {
        let views: Vec<String> = report
            .partitions
            .iter()
            .map(|p| format!("[{}]", p.iter().cloned().collect::<Vec<_>>().join(", ")))
            .collect();
        return degraded(
            ErrorClass::SplitBrain.reason(),
            format!(
                "members disagree on membership: {} partitions {}",
                report.partitions.len(),
                views.join(" ")
            ),
        );
    }

    if let Some(problem) = &observation.admin_problem {
        return degraded(ErrorClass::Connectivity.reason(), problem.clone());
    }

    // Ready needs a membership answer, not just ready pods.
    let Some(report) = &observation.health else {
        let reason = "MembershipUnverified";
        let message = "workloads are ready but no member answered a membership check yet";
        return Assessment {
            phase: Phase::Progressing,
            conditions: vec![
                ConditionUpdate::new(CONDITION_READY, ConditionStatus::False, reason, message),
                ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::True, reason, message),
            ],
        };
    };

    let inactive: Vec<&str> = report
        .servers
        .iter()
        .filter(|s| !s.is_active())
        .map(|s| s.name.as_str())
        .collect();
    if !report.unreachable.is_empty() || !inactive.is_empty() {
        let mut unhealthy: Vec<&str> = report
            .unreachable
            .iter()
            .map(String::as_str)
            .chain(inactive)
            .collect();
        unhealthy.sort_unstable();
        unhealthy.dedup();
        return degraded(
            "MembersUnhealthy",
            format!("unhealthy members: {}", unhealthy.join(", ")),
        );
    }

    let message = readiness_message(observation);
    Assessment {
        phase: Phase::Ready,
        conditions: vec![
            ConditionUpdate::new(CONDITION_READY, ConditionStatus::True, "AllMembersReady", message),
            ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::False, "Stable", ""),
            ConditionUpdate::new(CONDITION_DEGRADED, ConditionStatus::False, "Healthy", ""),
        ],
    }
}

/// Phase and conditions after an error the reconciler reports instead of retrying.
pub fn assess_error(class: ErrorClass, message: &str) -> Assessment {
    let Some(phase) = class.phase() else {
        return Assessment {
            phase: Phase::Progressing,
            conditions: vec![
                ConditionUpdate::new(CONDITION_READY, ConditionStatus::False, class.reason(), message),
                ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::True, class.reason(), message),
            ],
        };
    };

    if phase == Phase::Degraded {
        return degraded(class.reason(), message.to_owned());
    }

    Assessment {
        phase,
        conditions: vec![
            ConditionUpdate::new(CONDITION_READY, ConditionStatus::False, class.reason(), message),
            ConditionUpdate::new(CONDITION_PROGRESSING, ConditionStatus::False, class.reason(), ""),
            ConditionUpdate::new(CONDITION_FAILED, ConditionStatus::True, class.reason(), message),
        ],
    }
}

/// Writes phase and conditions into `status`. A previous `Failed` condition is cleared
/// once the cluster is valid again.
pub fn apply_assessment(status: &mut Status, assessment: &Assessment, now: &str) {
    status.phase = assessment.phase;
    for update in &assessment.conditions {
        set_condition(
            &mut status.conditions,
            update.type_,
            update.status,
            update.reason,
            &update.message,
            now,
        );
    }

    let reports_failure = assessment
        .conditions
        .iter()
        .any(|c| c.type_ == CONDITION_FAILED);
    if !reports_failure && find_condition(&status.conditions, CONDITION_FAILED).is_some() {
        set_condition(
            &mut status.conditions,
            CONDITION_FAILED,
            ConditionStatus::False,
            "SpecValid",
            "",
            now,
        );
    }
}

/// When to look at the cluster again.
pub fn requeue_action(phase: Phase, pending_jobs: bool, settings: &ReconcileSettings) -> Action {
    match phase {
        Phase::Progressing | Phase::Degraded => Action::requeue(settings.progress_requeue),
        Phase::Ready if pending_jobs => Action::requeue(settings.job_poll_interval),
        Phase::Ready => settings
            .health_poll_interval
            .map(Action::requeue)
            .unwrap_or_else(Action::await_change),
        Phase::Pending | Phase::Failed | Phase::Terminating => Action::await_change(),
    }
}
