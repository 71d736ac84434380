//! Per-call user context handed to the authoring collaborator.
//!
//! Built fresh for every generation or evaluation call and never cached.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::goal::MasterGoal;
use crate::plan::MasterPlan;
use crate::quest::{Quest, QuestStatus};
use crate::rewards::{StatMap, UserProgress};

/// Days of history summarized into `recent_*` fields.
pub const RECENT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    pub number: u32,
    pub name: String,
    pub focus: String,
    pub habits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: String,
    pub goal_text: String,
    pub day: u32,
    pub timeline_days: u32,
    pub overall_progress: f64,
    pub current_phase: Option<PhaseContext>,
    pub daily_habits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub date: NaiveDate,
    pub level: u32,
    pub total_xp: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub stats: StatMap,
    /// Metric keys of recent quests, most recent first, deduplicated.
    pub recent_quest_types: Vec<String>,
    /// Completion rate over the recent window, 0.0-1.0.
    pub recent_performance: f64,
    pub goal: Option<GoalProgress>,
    /// Why quests are being regenerated, when they are.
    pub reason: Option<String>,
}

impl UserContext {
    pub fn build(
        date: NaiveDate,
        progress: &UserProgress,
        goal: Option<(&MasterGoal, Option<&MasterPlan>)>,
        recent_quests: &[Quest],
    ) -> Self {
        let window_start = date - Duration::days(RECENT_WINDOW_DAYS);
        let mut recent: Vec<&Quest> = recent_quests
            .iter()
            .filter(|q| q.scheduled_for >= window_start && q.scheduled_for <= date)
            .collect();
        recent.sort_by(|a, b| b.scheduled_for.cmp(&a.scheduled_for));

        let mut recent_quest_types: Vec<String> = Vec::new();
        for q in &recent {
            if !recent_quest_types.contains(&q.metric_key) {
                recent_quest_types.push(q.metric_key.clone());
            }
        }

        let resolved: Vec<&&Quest> = recent
            .iter()
            .filter(|q| q.scheduled_for < date && q.is_terminal())
            .collect();
        let recent_performance = if resolved.is_empty() {
            0.0
        } else {
            resolved
                .iter()
                .filter(|q| q.status == QuestStatus::Completed)
                .count() as f64
                / resolved.len() as f64
        };

        let goal = goal.map(|(g, plan)| goal_progress(g, plan, date));

        Self {
            user_id: progress.user_id.clone(),
            date,
            level: progress.level,
            total_xp: progress.total_xp,
            current_streak: progress.current_streak,
            longest_streak: progress.longest_streak,
            stats: progress.stats.clone(),
            recent_quest_types,
            recent_performance,
            goal,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn phase_number(&self) -> Option<u32> {
        self.goal
            .as_ref()
            .and_then(|g| g.current_phase.as_ref())
            .map(|p| p.number)
    }
}

fn goal_progress(goal: &MasterGoal, plan: Option<&MasterPlan>, date: NaiveDate) -> GoalProgress {
    // days_elapsed + 1, clamped into the timeline
    let day = (goal.days_elapsed(date) + 1).clamp(1, i64::from(goal.timeline_days)) as u32;
    let current_phase = plan.and_then(|p| p.phase_for_day(day)).map(|p| PhaseContext {
        number: p.number,
        name: p.name.clone(),
        focus: p.focus.clone(),
        habits: p.habits.clone(),
    });
    GoalProgress {
        goal_id: goal.id.clone(),
        goal_text: goal.goal_text.clone(),
        day,
        timeline_days: goal.timeline_days,
        overall_progress: goal.overall_progress(date),
        current_phase,
        daily_habits: plan.map(|p| p.daily_habits.clone()).unwrap_or_default(),
    }
}
