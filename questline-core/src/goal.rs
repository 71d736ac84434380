//! Master goals and the five-criteria goal validator.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoachError, CoachResult};

pub const DEFAULT_TIMELINE_DAYS: u32 = 90;
pub const MIN_TIMELINE_DAYS: u32 = 7;
pub const MAX_TIMELINE_DAYS: u32 = 730;

/// Every criterion must reach this score.
const PASSING_SCORE: u8 = 5;
/// Any criterion at or below this score is disqualifying.
const FATAL_SCORE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

/// The user's long-term goal. Only `status` changes once active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterGoal {
    pub id: String,
    pub user_id: String,
    pub goal_text: String,
    pub timeline_days: u32,
    pub start_date: NaiveDate,
    pub target_date: NaiveDate,
    pub status: GoalStatus,
}

impl MasterGoal {
    pub fn new(
        user_id: impl Into<String>,
        goal_text: impl Into<String>,
        timeline_days: u32,
        start_date: NaiveDate,
    ) -> Self {
        let timeline_days = timeline_days.max(1);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            goal_text: goal_text.into(),
            timeline_days,
            start_date,
            target_date: start_date + Duration::days(i64::from(timeline_days) - 1),
            status: GoalStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == GoalStatus::Active
    }

    /// Days since `start_date`; 0 on the first day, negative before it.
    pub fn days_elapsed(&self, today: NaiveDate) -> i64 {
        (today - self.start_date).num_days()
    }

    /// 1-based plan day for `date`, or `None` outside the goal's timeline.
    pub fn plan_day(&self, date: NaiveDate) -> Option<u32> {
        let day = self.days_elapsed(date) + 1;
        (1..=i64::from(self.timeline_days))
            .contains(&day)
            .then_some(day as u32)
    }

    /// Calendar date of a 1-based plan day.
    pub fn date_of_day(&self, day: u32) -> NaiveDate {
        self.start_date + Duration::days(i64::from(day.max(1)) - 1)
    }

    /// Share of the timeline elapsed, 0-100.
    pub fn overall_progress(&self, today: NaiveDate) -> f64 {
        let elapsed = self.days_elapsed(today).clamp(0, i64::from(self.timeline_days));
        (elapsed as f64 / f64::from(self.timeline_days) * 100.0).clamp(0.0, 100.0)
    }

    /// All phases have elapsed.
    pub fn is_finished(&self, today: NaiveDate) -> bool {
        today > self.target_date
    }
}

/// Sub-scores in `[1, 10]` produced by the authoring collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalScores {
    pub clarity: u8,
    pub measurability: u8,
    pub achievability: u8,
    pub relevance: u8,
    pub timebound: u8,
}

impl GoalScores {
    pub fn as_array(&self) -> [(&'static str, u8); 5] {
        [
            ("clarity", self.clarity),
            ("measurability", self.measurability),
            ("achievability", self.achievability),
            ("relevance", self.relevance),
            ("timebound", self.timebound),
        ]
    }

    pub fn total(&self) -> u32 {
        self.as_array().iter().map(|(_, s)| u32::from(*s)).sum()
    }

    /// Every score at least 5 and none at or below 2.
    pub fn passes(&self) -> bool {
        let scores = self.as_array();
        scores.iter().all(|(_, s)| *s >= PASSING_SCORE)
            && !scores.iter().any(|(_, s)| *s <= FATAL_SCORE)
    }

    pub fn weakest(&self) -> (&'static str, u8) {
        self.as_array()
            .into_iter()
            .min_by_key(|(_, s)| *s)
            .unwrap_or(("clarity", self.clarity))
    }
}

/// Collaborator output for a proposed goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalAnalysis {
    pub scores: GoalScores,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub refined_goal: Option<String>,
    #[serde(default)]
    pub suggested_timeline_days: Option<u32>,
}

/// An accepted goal, ready to be materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedGoal {
    pub goal_text: String,
    pub timeline_days: u32,
    pub scores: GoalScores,
}

/// Apply the acceptance rule to a collaborator analysis.
///
/// Out-of-range scores mean the collaborator answered garbage, which is
/// reported as unavailable rather than as a user-facing rejection.
pub fn validate_goal(
    raw_goal: &str,
    requested_timeline: Option<u32>,
    analysis: GoalAnalysis,
) -> CoachResult<AcceptedGoal> {
    if let Some((name, score)) = analysis
        .scores
        .as_array()
        .into_iter()
        .find(|(_, s)| !(1..=10).contains(s))
    {
        return Err(CoachError::CollaboratorUnavailable(format!(
            "goal analysis score {name}={score} outside 1..=10"
        )));
    }

    if !analysis.scores.passes() {
        let mut suggestions = analysis.suggestions;
        if suggestions.is_empty() {
            let (name, score) = analysis.scores.weakest();
            suggestions.push(format!("improve {name} (scored {score}/10)"));
        }
        return Err(CoachError::ValidationRejected {
            scores: Some(analysis.scores),
            suggestions,
            refined_goal: analysis.refined_goal,
        });
    }

    let timeline_days = resolve_timeline(requested_timeline, analysis.suggested_timeline_days)?;

    let goal_text = analysis
        .refined_goal
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| raw_goal.trim())
        .to_string();

    Ok(AcceptedGoal {
        goal_text,
        timeline_days,
        scores: analysis.scores,
    })
}

/// Caller's timeline wins, then the collaborator's suggestion, then the default.
pub fn resolve_timeline(requested: Option<u32>, suggested: Option<u32>) -> CoachResult<u32> {
    let days = requested.or(suggested).unwrap_or(DEFAULT_TIMELINE_DAYS);
    if !(MIN_TIMELINE_DAYS..=MAX_TIMELINE_DAYS).contains(&days) {
        return Err(CoachError::ValidationRejected {
            scores: None,
            suggestions: vec![format!(
                "timeline must be between {MIN_TIMELINE_DAYS} and {MAX_TIMELINE_DAYS} days (got {days})"
            )],
            refined_goal: None,
        });
    }
    Ok(days)
}
