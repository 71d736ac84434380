#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use questline_core::{
    Difficulty, GoalAnalysis, GoalScores, MasterGoal, Milestone, MilestoneReward, Phase, PlanDraft,
    QuestDraft, UserContext,
};
use questline_engine::{Authoring, Coach, CollaboratorPolicy, EngineConfig, ExponentialBackoff, MemoryStore};

/// Scripted collaborator. Goals containing "vague" score poorly, goals
/// containing "broken" get a plan with a gap, and users listed in
/// `empty_quests_for` get an empty quest draft list.
#[derive(Default)]
pub struct FakeAuthoring {
    pub analyze_calls: AtomicU32,
    pub plan_calls: AtomicU32,
    pub quest_calls: AtomicU32,
    pub empty_quests_for: Vec<String>,
    pub unreachable: bool,
    /// `recent_quest_types` of every quest request, in call order.
    pub seen_recent_types: Mutex<Vec<Vec<String>>>,
}

impl FakeAuthoring {
    pub fn quest_calls(&self) -> u32 {
        self.quest_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> u32 {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn seen_recent_types(&self) -> Vec<Vec<String>> {
        self.seen_recent_types.lock().unwrap().clone()
    }
}

fn draft(title: &str, metric: &str, target: f64, difficulty: Difficulty, stat: Option<&str>) -> QuestDraft {
    QuestDraft {
        title: title.to_string(),
        description: String::new(),
        difficulty,
        target_value: target,
        metric_key: metric.to_string(),
        xp_reward: None,
        stat_bonus: stat.map(str::to_string),
    }
}

#[async_trait]
impl Authoring for FakeAuthoring {
    async fn analyze_goal(&self, goal_text: &str, _timeline_days: Option<u32>) -> Result<GoalAnalysis> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        let score = if goal_text.contains("vague") { 3 } else { 8 };
        Ok(GoalAnalysis {
            scores: GoalScores {
                clarity: score,
                measurability: score,
                achievability: 8,
                relevance: 8,
                timebound: 8,
            },
            suggestions: vec!["say what done looks like".to_string()],
            refined_goal: None,
            suggested_timeline_days: None,
        })
    }

    async fn generate_plan(&self, goal: &MasterGoal, _context: &UserContext) -> Result<PlanDraft> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let t = goal.timeline_days;
        let half = t / 2;
        let second_start = if goal.goal_text.contains("broken") { half + 2 } else { half + 1 };
        Ok(PlanDraft {
            phases: vec![
                Phase {
                    number: 1,
                    name: "Foundation".into(),
                    focus: "build the habit".into(),
                    start_day: 1,
                    end_day: half,
                    habits: vec!["walk daily".into()],
                },
                Phase {
                    number: 2,
                    name: "Push".into(),
                    focus: "raise volume".into(),
                    start_day: second_start,
                    end_day: t,
                    habits: vec!["long run weekly".into()],
                },
            ],
            daily_habits: vec!["log progress".into()],
            success_metrics: vec!["finish the race".into()],
            milestones: vec![
                Milestone {
                    title: "First day done".into(),
                    target_day: 1,
                    criteria: vec!["complete day one".into()],
                    reward: MilestoneReward {
                        bonus_xp: 50,
                        unlock: Some("starter badge".into()),
                    },
                },
                Milestone {
                    title: "Finish line".into(),
                    target_day: t,
                    criteria: vec!["race day".into()],
                    reward: MilestoneReward {
                        bonus_xp: 200,
                        unlock: None,
                    },
                },
            ],
        })
    }

    async fn generate_quests(&self, context: &UserContext, _reason: Option<&str>) -> Result<Vec<QuestDraft>> {
        self.quest_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_recent_types
            .lock()
            .unwrap()
            .push(context.recent_quest_types.clone());
        if self.unreachable {
            bail!("connection refused");
        }
        if self.empty_quests_for.contains(&context.user_id) {
            return Ok(Vec::new());
        }
        Ok(vec![
            draft("Walk 10k steps", "steps", 10_000.0, Difficulty::Medium, Some("endurance")),
            draft("Sleep 7 hours", "sleep_hours", 7.0, Difficulty::Easy, Some("vitality")),
            draft("Read 30 minutes", "reading", 30.0, Difficulty::Hard, Some("intelligence")),
        ])
    }
}

pub type TestCoach = Coach<MemoryStore, FakeAuthoring>;

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        collaborator: CollaboratorPolicy {
            timeout: std::time::Duration::from_secs(2),
            max_retries: 1,
            backoff: ExponentialBackoff::new(1, 5),
        },
        ..EngineConfig::default()
    }
}

pub fn coach_with(authoring: FakeAuthoring) -> (Arc<TestCoach>, Arc<MemoryStore>, Arc<FakeAuthoring>) {
    coach_with_config(authoring, fast_config())
}

pub fn coach_with_config(
    authoring: FakeAuthoring,
    config: EngineConfig,
) -> (Arc<TestCoach>, Arc<MemoryStore>, Arc<FakeAuthoring>) {
    let store = Arc::new(MemoryStore::new());
    let authoring = Arc::new(authoring);
    let coach = Arc::new(Coach::new(store.clone(), authoring.clone(), config));
    (coach, store, authoring)
}

/// Review weeks run Monday through Sunday.
pub fn monday_review_config() -> EngineConfig {
    EngineConfig {
        weekly_review_day: 1,
        ..fast_config()
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

/// Noon UTC on March `d`, 2026.
pub fn noon(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap()
}
