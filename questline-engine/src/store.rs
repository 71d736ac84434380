//! Storage seam and the in-memory implementation used by the CLI and tests.
//!
//! Every state transition writes through one [`Changeset`], which a store
//! applies under a single lock so readers never observe half a transition.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use questline_core::{
    CoachError, DailyHealthMetrics, GoalStatus, MasterGoal, MasterPlan, MilestoneRecord, Quest,
    UserProgress, WeeklyReview,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule would be broken by the commit.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<StoreError> for CoachError {
    fn from(err: StoreError) -> Self {
        CoachError::Persistence(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Records written by one transition. Upserts are keyed by record id
/// (plans by goal id, progress by user, metrics by user and date).
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub goals: Vec<MasterGoal>,
    pub plans: Vec<MasterPlan>,
    pub milestones: Vec<MilestoneRecord>,
    pub removed_milestones: Vec<String>,
    pub quests: Vec<Quest>,
    pub removed_quests: Vec<String>,
    pub progress: Option<UserProgress>,
    pub health: Vec<DailyHealthMetrics>,
    /// Append-only; a second review for the same user and week is a conflict.
    pub reviews: Vec<WeeklyReview>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
            && self.plans.is_empty()
            && self.milestones.is_empty()
            && self.removed_milestones.is_empty()
            && self.quests.is_empty()
            && self.removed_quests.is_empty()
            && self.progress.is_none()
            && self.health.is_empty()
            && self.reviews.is_empty()
    }
}

pub trait Store: Send + Sync {
    fn goal(&self, goal_id: &str) -> StoreResult<Option<MasterGoal>>;
    fn active_goal(&self, user_id: &str) -> StoreResult<Option<MasterGoal>>;
    fn plan_for_goal(&self, goal_id: &str) -> StoreResult<Option<MasterPlan>>;
    /// Milestone records of a goal, ordered by index.
    fn milestones(&self, goal_id: &str) -> StoreResult<Vec<MilestoneRecord>>;
    fn quest(&self, quest_id: &str) -> StoreResult<Option<Quest>>;
    /// Quests scheduled in `[start, end]`, ordered by day.
    fn quests_between(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<Quest>>;
    fn progress(&self, user_id: &str) -> StoreResult<Option<UserProgress>>;
    /// Every user with a progress record.
    fn user_ids(&self) -> StoreResult<Vec<String>>;
    fn health_metrics(&self, user_id: &str, date: NaiveDate) -> StoreResult<Option<DailyHealthMetrics>>;
    fn review(&self, user_id: &str, week_start: NaiveDate) -> StoreResult<Option<WeeklyReview>>;
    fn commit(&self, changes: Changeset) -> StoreResult<()>;

    fn quests_on(&self, user_id: &str, date: NaiveDate) -> StoreResult<Vec<Quest>> {
        self.quests_between(user_id, date, date)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct MemoryState {
    goals: HashMap<String, MasterGoal>,
    /// Keyed by goal id.
    plans: HashMap<String, MasterPlan>,
    milestones: HashMap<String, MilestoneRecord>,
    quests: HashMap<String, Quest>,
    progress: HashMap<String, UserProgress>,
    /// Keyed by `user_id/date`.
    health: HashMap<String, DailyHealthMetrics>,
    reviews: HashMap<String, WeeklyReview>,
}

fn health_key(user_id: &str, date: NaiveDate) -> String {
    format!("{user_id}/{date}")
}

impl MemoryState {
    fn check(&self, changes: &Changeset) -> StoreResult<()> {
        for review in &changes.reviews {
            let taken = self.reviews.values().any(|r| {
                r.user_id == review.user_id && r.week_start == review.week_start && r.id != review.id
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "review for {} week of {} already exists",
                    review.user_id, review.week_start
                )));
            }
        }

        for goal in changes.goals.iter().filter(|g| g.status == GoalStatus::Active) {
            let other_active = self
                .goals
                .values()
                .filter(|g| g.user_id == goal.user_id && g.id != goal.id && g.is_active())
                .any(|g| {
                    !changes
                        .goals
                        .iter()
                        .any(|c| c.id == g.id && c.status != GoalStatus::Active)
                });
            if other_active {
                return Err(StoreError::Conflict(format!(
                    "user {} already has an active goal",
                    goal.user_id
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: Changeset) {
        for id in changes.removed_quests {
            self.quests.remove(&id);
        }
        for id in changes.removed_milestones {
            self.milestones.remove(&id);
        }
        for g in changes.goals {
            self.goals.insert(g.id.clone(), g);
        }
        for p in changes.plans {
            self.plans.insert(p.goal_id.clone(), p);
        }
        for m in changes.milestones {
            self.milestones.insert(m.id.clone(), m);
        }
        for q in changes.quests {
            self.quests.insert(q.id.clone(), q);
        }
        if let Some(p) = changes.progress {
            self.progress.insert(p.user_id.clone(), p);
        }
        for h in changes.health {
            self.health.insert(health_key(&h.user_id, h.date), h);
        }
        for r in changes.reviews {
            self.reviews.insert(r.id.clone(), r);
        }
    }
}

/// Process-local store. Snapshots to and from JSON.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string_pretty(&*self.read()?)?)
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        let state: MemoryState = serde_json::from_str(json)?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Load a snapshot, or start empty if the file does not exist.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Replace the in-memory state with the snapshot at `path`, or with an
    /// empty state if the file does not exist.
    pub fn reload(&self, path: &Path) -> StoreResult<()> {
        let fresh = Self::load(path)?;
        let state = fresh.state.into_inner().map_err(|_| StoreError::Poisoned)?;
        *self.write()? = state;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn goal(&self, goal_id: &str) -> StoreResult<Option<MasterGoal>> {
        Ok(self.read()?.goals.get(goal_id).cloned())
    }

    fn active_goal(&self, user_id: &str) -> StoreResult<Option<MasterGoal>> {
        Ok(self
            .read()?
            .goals
            .values()
            .find(|g| g.user_id == user_id && g.is_active())
            .cloned())
    }

    fn plan_for_goal(&self, goal_id: &str) -> StoreResult<Option<MasterPlan>> {
        Ok(self.read()?.plans.get(goal_id).cloned())
    }

    fn milestones(&self, goal_id: &str) -> StoreResult<Vec<MilestoneRecord>> {
        let mut out: Vec<MilestoneRecord> = self
            .read()?
            .milestones
            .values()
            .filter(|m| m.goal_id.as_deref() == Some(goal_id))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.milestone_index);
        Ok(out)
    }

    fn quest(&self, quest_id: &str) -> StoreResult<Option<Quest>> {
        Ok(self.read()?.quests.get(quest_id).cloned())
    }

    fn quests_between(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<Quest>> {
        let mut out: Vec<Quest> = self
            .read()?
            .quests
            .values()
            .filter(|q| q.user_id == user_id && q.scheduled_for >= start && q.scheduled_for <= end)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn progress(&self, user_id: &str) -> StoreResult<Option<UserProgress>> {
        Ok(self.read()?.progress.get(user_id).cloned())
    }

    fn user_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self.read()?.progress.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn health_metrics(&self, user_id: &str, date: NaiveDate) -> StoreResult<Option<DailyHealthMetrics>> {
        Ok(self.read()?.health.get(&health_key(user_id, date)).cloned())
    }

    fn review(&self, user_id: &str, week_start: NaiveDate) -> StoreResult<Option<WeeklyReview>> {
        Ok(self
            .read()?
            .reviews
            .values()
            .find(|r| r.user_id == user_id && r.week_start == week_start)
            .cloned())
    }

    fn commit(&self, changes: Changeset) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut state = self.write()?;
        state.check(&changes)?;
        state.apply(changes);
        Ok(())
    }
}
