//! Weekly review aggregation, verdicts and difficulty adjustment.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quest::{Quest, QuestStatus};
use crate::rewards::{stat_increment, StatMap};
use crate::time::weekday_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Excellent,
    Good,
    Adequate,
    NeedsImprovement,
    Disappointing,
}

impl Verdict {
    /// Verdicts that count toward a difficulty decrease.
    pub fn is_poor(&self) -> bool {
        matches!(self, Verdict::NeedsImprovement | Verdict::Disappointing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyAdjustment {
    Increase,
    Maintain,
    Decrease,
}

/// Completion-rate floors for each verdict, checked top-down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewPolicy {
    pub excellent: f64,
    pub good: f64,
    pub adequate: f64,
    pub needs_improvement: f64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            excellent: 0.9,
            good: 0.7,
            adequate: 0.5,
            needs_improvement: 0.3,
        }
    }
}

impl ReviewPolicy {
    pub fn verdict(&self, completion_rate: f64) -> Verdict {
        if completion_rate >= self.excellent {
            Verdict::Excellent
        } else if completion_rate >= self.good {
            Verdict::Good
        } else if completion_rate >= self.adequate {
            Verdict::Adequate
        } else if completion_rate >= self.needs_improvement {
            Verdict::NeedsImprovement
        } else {
            Verdict::Disappointing
        }
    }
}

pub fn difficulty_adjustment(
    verdict: Verdict,
    streak_maintained: bool,
    previous: Option<Verdict>,
) -> DifficultyAdjustment {
    if verdict == Verdict::Excellent && streak_maintained {
        DifficultyAdjustment::Increase
    } else if verdict.is_poor() && previous.is_some_and(|p| p.is_poor()) {
        DifficultyAdjustment::Decrease
    } else {
        DifficultyAdjustment::Maintain
    }
}

/// Inputs for review commentary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReviewInsights {
    pub strongest_metric: Option<String>,
    pub weakest_metric: Option<String>,
    pub best_day: Option<NaiveDate>,
    pub failed_days: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReview {
    pub id: String,
    pub user_id: String,
    pub goal_id: Option<String>,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub verdict: Verdict,
    pub completion_rate: f64,
    pub total_quests: u32,
    pub completed_quests: u32,
    pub failed_quests: u32,
    pub skipped_quests: u32,
    pub xp_earned: u64,
    pub streak_maintained: bool,
    pub stats_gained: StatMap,
    pub difficulty_adjustment: Option<DifficultyAdjustment>,
    #[serde(default)]
    pub insights: ReviewInsights,
    pub created_at: DateTime<Utc>,
}

/// The last full review week as of `as_of`: the seven days ending the day
/// before the most recent `review_day` (0 = Sunday) on or before `as_of`.
/// Every date between two review days maps to the same week.
pub fn review_week(as_of: NaiveDate, review_day: u8) -> (NaiveDate, NaiveDate) {
    let since = (i64::from(weekday_index(as_of)) + 7 - i64::from(review_day % 7)) % 7;
    let week_end = as_of - Duration::days(since + 1);
    (week_end - Duration::days(6), week_end)
}

/// Identity and context for a review being built.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest<'a> {
    pub user_id: &'a str,
    pub goal_id: Option<&'a str>,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub previous_verdict: Option<Verdict>,
    /// Milestone bonuses paid out during the week.
    pub milestone_bonus_xp: u64,
    pub now: DateTime<Utc>,
}

/// Aggregate the quests of one week. Quests outside the window are ignored.
pub fn aggregate_week(req: &ReviewRequest<'_>, quests: &[Quest], policy: &ReviewPolicy) -> WeeklyReview {
    let in_week: Vec<&Quest> = quests
        .iter()
        .filter(|q| q.user_id == req.user_id)
        .filter(|q| q.scheduled_for >= req.week_start && q.scheduled_for <= req.week_end)
        .collect();

    let count = |status: QuestStatus| in_week.iter().filter(|q| q.status == status).count() as u32;
    let total_quests = in_week.len() as u32;
    let completed_quests = count(QuestStatus::Completed);
    let failed_quests = count(QuestStatus::Failed);
    let skipped_quests = count(QuestStatus::Skipped);

    let completion_rate = if total_quests == 0 {
        0.0
    } else {
        f64::from(completed_quests) / f64::from(total_quests)
    };

    let xp_earned = in_week
        .iter()
        .filter(|q| q.status == QuestStatus::Completed)
        .map(|q| u64::from(q.xp_awarded))
        .sum::<u64>()
        + req.milestone_bonus_xp;

    let mut stats_gained = StatMap::new();
    for q in in_week.iter().filter(|q| q.status == QuestStatus::Completed) {
        if let Some(stat) = q.stat_bonus {
            *stats_gained.entry(stat).or_insert(0) += stat_increment(q.difficulty);
        }
    }

    let insights = insights(&in_week);
    let streak_maintained = insights.failed_days.is_empty();
    let verdict = policy.verdict(completion_rate);

    WeeklyReview {
        id: Uuid::new_v4().to_string(),
        user_id: req.user_id.to_string(),
        goal_id: req.goal_id.map(str::to_string),
        week_start: req.week_start,
        week_end: req.week_end,
        verdict,
        completion_rate,
        total_quests,
        completed_quests,
        failed_quests,
        skipped_quests,
        xp_earned,
        streak_maintained,
        stats_gained,
        difficulty_adjustment: Some(difficulty_adjustment(
            verdict,
            streak_maintained,
            req.previous_verdict,
        )),
        insights,
        created_at: req.now,
    }
}

fn insights(quests: &[&Quest]) -> ReviewInsights {
    // metric -> (completed, total)
    let mut by_metric: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    // day -> (completed, failed)
    let mut by_day: BTreeMap<NaiveDate, (u32, u32)> = BTreeMap::new();

    for q in quests {
        let done = u32::from(q.status == QuestStatus::Completed);
        let failed = u32::from(q.status == QuestStatus::Failed);
        let m = by_metric.entry(q.metric_key.as_str()).or_insert((0, 0));
        m.0 += done;
        m.1 += 1;
        let d = by_day.entry(q.scheduled_for).or_insert((0, 0));
        d.0 += done;
        d.1 += failed;
    }

    let ratio = |(done, total): (u32, u32)| f64::from(done) / f64::from(total.max(1));
    let strongest_metric = by_metric
        .iter()
        .max_by(|a, b| ratio(*a.1).total_cmp(&ratio(*b.1)))
        .map(|(k, _)| k.to_string());
    let weakest_metric = by_metric
        .iter()
        .min_by(|a, b| ratio(*a.1).total_cmp(&ratio(*b.1)))
        .map(|(k, _)| k.to_string());
    let best_day = by_day
        .iter()
        .filter(|(_, (done, _))| *done > 0)
        .max_by_key(|(_, (done, _))| *done)
        .map(|(d, _)| *d);
    let failed_days = by_day
        .iter()
        .filter(|(_, (_, failed))| *failed > 0)
        .map(|(d, _)| *d)
        .collect();

    ReviewInsights {
        strongest_metric,
        weakest_metric,
        best_day,
        failed_days,
    }
}
