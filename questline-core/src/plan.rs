//! Plan materializer: turns a collaborator plan draft into a master plan.
//!
//! Drafts are untrusted. Every structural invariant is checked and every
//! violation reported; a draft is accepted as-is or rejected, never patched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoachError, CoachResult, DraftKind};
use crate::goal::MasterGoal;
use crate::milestone::MilestoneRecord;

/// A contiguous day range of the plan with its own focus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based.
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub focus: String,
    pub start_day: u32,
    pub end_day: u32,
    #[serde(default)]
    pub habits: Vec<String>,
}

impl Phase {
    pub fn contains(&self, day: u32) -> bool {
        (self.start_day..=self.end_day).contains(&day)
    }

    pub fn len_days(&self) -> u32 {
        self.end_day.saturating_sub(self.start_day) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MilestoneReward {
    pub bonus_xp: u32,
    /// Cosmetic or gameplay unlock (badge id, title, theme).
    #[serde(default)]
    pub unlock: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub target_day: u32,
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub reward: MilestoneReward,
}

/// Raw plan structure as returned by the authoring collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub daily_habits: Vec<String>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPlan {
    pub id: String,
    pub user_id: String,
    pub goal_id: String,
    pub phases: Vec<Phase>,
    pub daily_habits: Vec<String>,
    pub success_metrics: Vec<String>,
    pub milestones: Vec<Milestone>,
    /// Bumped on every regeneration of the plan body.
    pub version: u32,
}

impl MasterPlan {
    pub fn phase_for_day(&self, day: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.contains(day))
    }

    /// Target day of the milestone before `index`, or 0 for the first.
    pub fn previous_boundary(&self, index: usize) -> u32 {
        index
            .checked_sub(1)
            .and_then(|i| self.milestones.get(i))
            .map(|m| m.target_day)
            .unwrap_or(0)
    }
}

/// Result of materializing an accepted draft.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedPlan {
    pub plan: MasterPlan,
    pub milestones: Vec<MilestoneRecord>,
}

/// Check a draft against the goal's timeline, returning every violation found.
pub fn check_draft(draft: &PlanDraft, timeline_days: u32) -> Vec<String> {
    let mut violations = Vec::new();

    if draft.phases.is_empty() {
        violations.push("plan has no phases".to_string());
    }

    let mut expected_start = 1u32;
    for (i, phase) in draft.phases.iter().enumerate() {
        let label = format!("phase {} ({})", i + 1, phase.name);
        if phase.number as usize != i + 1 {
            violations.push(format!("{label}: numbered {}, expected {}", phase.number, i + 1));
        }
        if phase.start_day != expected_start {
            if phase.start_day > expected_start {
                violations.push(format!(
                    "{label}: gap, days {}..{} uncovered",
                    expected_start,
                    phase.start_day - 1
                ));
            } else {
                violations.push(format!(
                    "{label}: overlaps previous phase, starts day {} (expected {expected_start})",
                    phase.start_day
                ));
            }
        }
        if phase.end_day < phase.start_day {
            violations.push(format!(
                "{label}: ends day {} before it starts day {}",
                phase.end_day, phase.start_day
            ));
        }
        expected_start = phase.end_day.saturating_add(1);
    }

    if let Some(last) = draft.phases.last() {
        if last.end_day != timeline_days {
            violations.push(format!(
                "last phase ends day {}, timeline is {timeline_days} days",
                last.end_day
            ));
        }
    }

    if draft.daily_habits.iter().all(|h| h.trim().is_empty()) {
        violations.push("daily_habits is empty".to_string());
    }

    let mut previous_day = 0u32;
    for (i, milestone) in draft.milestones.iter().enumerate() {
        let owners = draft
            .phases
            .iter()
            .filter(|p| p.contains(milestone.target_day))
            .count();
        if owners != 1 {
            violations.push(format!(
                "milestone {} ({}): day {} falls in {owners} phases",
                i,
                milestone.title,
                milestone.target_day
            ));
        }
        if milestone.target_day <= previous_day {
            violations.push(format!(
                "milestone {} ({}): day {} not after previous milestone day {previous_day}",
                i, milestone.title, milestone.target_day
            ));
        }
        previous_day = milestone.target_day;
    }

    violations
}

/// Validate and persist-ready a draft for `goal`.
pub fn materialize_plan(goal: &MasterGoal, draft: PlanDraft) -> CoachResult<MaterializedPlan> {
    let violations = check_draft(&draft, goal.timeline_days);
    if !violations.is_empty() {
        return Err(CoachError::structural(DraftKind::Plan, violations));
    }

    let plan = MasterPlan {
        id: Uuid::new_v4().to_string(),
        user_id: goal.user_id.clone(),
        goal_id: goal.id.clone(),
        phases: draft.phases,
        daily_habits: draft.daily_habits,
        success_metrics: draft.success_metrics,
        milestones: draft.milestones,
        version: 1,
    };

    let milestones = (0..plan.milestones.len())
        .map(|idx| MilestoneRecord::new(&goal.user_id, Some(goal.id.clone()), idx))
        .collect();

    Ok(MaterializedPlan { plan, milestones })
}

/// Replace the body of an existing plan with a freshly validated draft.
///
/// Keeps the plan id, bumps `version`. Milestone records for indices that
/// still exist are kept (terminal ones stay terminal); new indices get fresh
/// `pending` records; non-terminal records past the new length are dropped.
pub fn rematerialize_plan(
    goal: &MasterGoal,
    current: &MasterPlan,
    existing: &[MilestoneRecord],
    draft: PlanDraft,
) -> CoachResult<(MasterPlan, Vec<MilestoneRecord>, Vec<String>)> {
    let MaterializedPlan { plan, .. } = materialize_plan(goal, draft)?;
    let plan = MasterPlan {
        id: current.id.clone(),
        version: current.version + 1,
        ..plan
    };

    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for record in existing {
        if record.milestone_index < plan.milestones.len() || record.is_terminal() {
            kept.push(record.clone());
        } else {
            dropped.push(record.id.clone());
        }
    }
    for idx in 0..plan.milestones.len() {
        if !kept.iter().any(|r| r.milestone_index == idx) {
            kept.push(MilestoneRecord::new(&goal.user_id, Some(goal.id.clone()), idx));
        }
    }
    kept.sort_by_key(|r| r.milestone_index);

    Ok((plan, kept, dropped))
}
