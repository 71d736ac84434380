//! Milestone tracker.
//!
//! A milestone's window runs from the day after the previous milestone's
//! target day through its own target day. Completion percentage is the share
//! of expected quest completions achieved inside that window and only ever
//! moves up while the record is non-terminal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoachError, CoachResult};
use crate::goal::MasterGoal;
use crate::plan::{MasterPlan, Milestone};
use crate::quest::{Quest, QuestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Missed,
}

impl MilestoneStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MilestoneStatus::Completed | MilestoneStatus::Missed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Completed => "completed",
            MilestoneStatus::Missed => "missed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub id: String,
    pub user_id: String,
    pub goal_id: Option<String>,
    /// Index into `MasterPlan::milestones`.
    pub milestone_index: usize,
    pub status: MilestoneStatus,
    pub completion_percentage: f64,
    pub completed_at: Option<DateTime<Utc>>,
    pub bonus_xp_awarded: u32,
}

impl MilestoneRecord {
    pub fn new(user_id: &str, goal_id: Option<String>, milestone_index: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            goal_id,
            milestone_index,
            status: MilestoneStatus::Pending,
            completion_percentage: 0.0,
            completed_at: None,
            bonus_xp_awarded: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise the percentage, never lowering it. Returns true on change.
    fn raise_to(&mut self, percentage: f64) -> bool {
        let next = percentage.clamp(0.0, 100.0);
        if next > self.completion_percentage {
            self.completion_percentage = next;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MilestonePolicy {
    /// Quest completions per day that count as full pace.
    pub expected_quests_per_day: u32,
}

impl Default for MilestonePolicy {
    fn default() -> Self {
        Self {
            expected_quests_per_day: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneReached {
    pub milestone_index: usize,
    pub title: String,
    pub bonus_xp: u32,
    pub unlock: Option<String>,
    pub celebration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MilestoneEvent {
    Reached(MilestoneReached),
    Missed { milestone_index: usize, title: String },
}

/// Inclusive date window covered by milestone `index`.
pub fn milestone_window(goal: &MasterGoal, plan: &MasterPlan, index: usize) -> Option<(NaiveDate, NaiveDate)> {
    let milestone = plan.milestones.get(index)?;
    let first_day = plan.previous_boundary(index) + 1;
    Some((goal.date_of_day(first_day), goal.date_of_day(milestone.target_day)))
}

/// Percentage implied by the goal's completed quests inside the window.
pub fn window_percentage(
    goal: &MasterGoal,
    plan: &MasterPlan,
    index: usize,
    quests: &[Quest],
    policy: MilestonePolicy,
) -> f64 {
    let Some((start, end)) = milestone_window(goal, plan, index) else {
        return 0.0;
    };
    let days = (end - start).num_days() + 1;
    let expected = days.max(1) as f64 * f64::from(policy.expected_quests_per_day.max(1));
    let completed = quests
        .iter()
        .filter(|q| q.goal_id.as_deref() == Some(goal.id.as_str()))
        .filter(|q| q.status == QuestStatus::Completed)
        .filter(|q| q.scheduled_for >= start && q.scheduled_for <= end)
        .count();
    (completed as f64 / expected * 100.0).min(100.0)
}

fn complete(record: &mut MilestoneRecord, milestone: &Milestone, now: DateTime<Utc>) -> MilestoneReached {
    record.completion_percentage = 100.0;
    record.status = MilestoneStatus::Completed;
    record.completed_at = Some(now);
    record.bonus_xp_awarded = milestone.reward.bonus_xp;

    let mut celebration = format!(
        "Milestone reached: {}! +{} XP",
        milestone.title, milestone.reward.bonus_xp
    );
    if let Some(unlock) = &milestone.reward.unlock {
        celebration.push_str(&format!(", unlocked {unlock}"));
    }

    MilestoneReached {
        milestone_index: record.milestone_index,
        title: milestone.title.clone(),
        bonus_xp: milestone.reward.bonus_xp,
        unlock: milestone.reward.unlock.clone(),
        celebration,
    }
}

/// Re-evaluate non-terminal milestones after quest completions.
///
/// `records` are updated in place; returns the milestones reached this call.
/// Each one's bonus is awarded exactly once because the record is terminal
/// afterwards.
pub fn track_progress(
    goal: &MasterGoal,
    plan: &MasterPlan,
    records: &mut [MilestoneRecord],
    quests: &[Quest],
    policy: MilestonePolicy,
    now: DateTime<Utc>,
) -> Vec<MilestoneReached> {
    let mut reached = Vec::new();
    for record in records.iter_mut().filter(|r| !r.is_terminal()) {
        let Some(milestone) = plan.milestones.get(record.milestone_index) else {
            continue;
        };
        let pct = window_percentage(goal, plan, record.milestone_index, quests, policy);
        record.raise_to(pct);
        if record.completion_percentage > 0.0 && record.status == MilestoneStatus::Pending {
            record.status = MilestoneStatus::InProgress;
        }
        if record.completion_percentage >= 100.0 {
            reached.push(complete(record, milestone, now));
        }
    }
    reached
}

/// Explicit progress report for one milestone, e.g. when the user checks off criteria.
pub fn report_progress(
    plan: &MasterPlan,
    record: &mut MilestoneRecord,
    percentage: f64,
    now: DateTime<Utc>,
) -> CoachResult<Option<MilestoneReached>> {
    if record.is_terminal() {
        return Err(CoachError::AlreadyTerminal {
            entity: "milestone",
            id: record.id.clone(),
            status: record.status.as_str().to_string(),
        });
    }
    let milestone = plan
        .milestones
        .get(record.milestone_index)
        .ok_or_else(|| CoachError::not_found("milestone", record.milestone_index.to_string()))?;

    record.raise_to(percentage);
    if record.status == MilestoneStatus::Pending {
        record.status = MilestoneStatus::InProgress;
    }
    if record.completion_percentage >= 100.0 {
        return Ok(Some(complete(record, milestone, now)));
    }
    Ok(None)
}

/// Mark milestones whose target date has passed as missed. No penalty applies.
pub fn sweep_missed(
    goal: &MasterGoal,
    plan: &MasterPlan,
    records: &mut [MilestoneRecord],
    today: NaiveDate,
) -> Vec<MilestoneEvent> {
    let mut events = Vec::new();
    for record in records.iter_mut().filter(|r| !r.is_terminal()) {
        let Some(milestone) = plan.milestones.get(record.milestone_index) else {
            continue;
        };
        if today > goal.date_of_day(milestone.target_day) {
            record.status = MilestoneStatus::Missed;
            events.push(MilestoneEvent::Missed {
                milestone_index: record.milestone_index,
                title: milestone.title.clone(),
            });
        }
    }
    events
}

/// First milestone still open, with its plan definition.
pub fn next_milestone<'a>(
    plan: &'a MasterPlan,
    records: &'a [MilestoneRecord],
) -> Option<(&'a MilestoneRecord, &'a Milestone)> {
    let mut open: Vec<&MilestoneRecord> = records.iter().filter(|r| !r.is_terminal()).collect();
    open.sort_by_key(|r| r.milestone_index);
    open.into_iter()
        .find_map(|r| plan.milestones.get(r.milestone_index).map(|m| (r, m)))
}
