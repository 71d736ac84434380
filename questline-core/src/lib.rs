//! questline-core: deterministic goal/plan/quest domain for the Questline coach.
//!
//! No I/O and no async here. Storage, collaborators and scheduling live in
//! `questline-engine`.

pub mod context;
pub mod error;
pub mod goal;
pub mod health;
pub mod milestone;
pub mod plan;
pub mod quest;
pub mod review;
pub mod rewards;
pub mod sweep;
pub mod time;

pub use context::{GoalProgress, PhaseContext, UserContext};
pub use error::{CoachError, CoachResult, DraftKind};
pub use goal::{validate_goal, AcceptedGoal, GoalAnalysis, GoalScores, GoalStatus, MasterGoal};
pub use health::{channel_value, DailyHealthMetrics, HealthMetric, Workout};
pub use milestone::{
    MilestoneEvent, MilestonePolicy, MilestoneReached, MilestoneRecord, MilestoneStatus,
};
pub use plan::{
    materialize_plan, rematerialize_plan, MasterPlan, MaterializedPlan, Milestone,
    MilestoneReward, Phase, PlanDraft,
};
pub use quest::{
    quests_from_drafts, Difficulty, ProgressSource, Quest, QuestBatch, QuestDraft, QuestStatus,
};
pub use review::{
    aggregate_week, review_week, DifficultyAdjustment, ReviewInsights, ReviewPolicy,
    ReviewRequest, Verdict, WeeklyReview,
};
pub use rewards::{
    apply_reward, reward_for, telemetry_bonus, LevelUp, QuestReward, Stat, StatMap,
    TelemetryBonus, UserProgress,
};
pub use sweep::{expire_and_score, SweepOutcome};
