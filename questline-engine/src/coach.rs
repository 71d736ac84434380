//! Request-path operations. Every mutating call for a user runs under that
//! user's async lock and writes through a single changeset.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use questline_core::milestone::{next_milestone, report_progress, sweep_missed, track_progress};
use questline_core::quest::regenerations_used;
use questline_core::time::local_date;
use questline_core::{
    aggregate_week, apply_reward, channel_value, materialize_plan, quests_from_drafts,
    rematerialize_plan, review_week, reward_for, validate_goal, CoachError, CoachResult,
    DailyHealthMetrics, GoalStatus, LevelUp, MasterGoal, MasterPlan, MaterializedPlan,
    MilestoneEvent, MilestoneReached, MilestoneRecord, Phase, ProgressSource, Quest, QuestBatch,
    QuestStatus, ReviewRequest, StatMap, SweepOutcome, UserContext, UserProgress, WeeklyReview,
    expire_and_score,
};
use questline_health::HealthPatch;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::authoring::{call_collaborator, Authoring};
use crate::config::EngineConfig;
use crate::store::{Changeset, Store};

#[derive(Debug, Clone, Serialize)]
pub struct GoalSetup {
    pub goal: MasterGoal,
    pub plan: MasterPlan,
    pub milestones: Vec<MilestoneRecord>,
    /// Previously active goal abandoned by this call.
    pub replaced_goal_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextMilestone {
    pub index: usize,
    pub title: String,
    pub target_date: NaiveDate,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyStatus {
    pub date: NaiveDate,
    pub goal: Option<MasterGoal>,
    pub plan_version: Option<u32>,
    pub current_phase: Option<Phase>,
    pub todays_quests: Vec<Quest>,
    pub regenerations_remaining: u32,
    pub next_milestone: Option<NextMilestone>,
    /// The last full week has quests but no review yet.
    pub weekly_review_due: bool,
    pub overall_progress: f64,
    pub progress: UserProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationOutcome {
    pub quests: Vec<Quest>,
    pub regenerations_used: u32,
    pub regenerations_remaining: u32,
    pub can_regenerate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub quest: Quest,
    /// False when the call only recorded progress.
    pub completed: bool,
    pub xp_awarded: u32,
    pub level_up: Option<LevelUp>,
    pub milestones_reached: Vec<MilestoneReached>,
}

impl CompletionOutcome {
    fn progress_only(quest: Quest) -> Self {
        Self {
            quest,
            completed: false,
            xp_awarded: 0,
            level_up: None,
            milestones_reached: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneUpdate {
    pub record: MilestoneRecord,
    pub reached: Option<MilestoneReached>,
    pub level_up: Option<LevelUp>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    /// Quests whose value was set from telemetry.
    pub updated_quests: Vec<String>,
    pub completions: Vec<CompletionOutcome>,
    pub milestones_reached: Vec<MilestoneReached>,
    /// Net level change of the whole ingest, milestone bonuses included.
    pub level_up: Option<LevelUp>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GoalSweep {
    pub milestone_events: Vec<MilestoneEvent>,
    pub completed_goal_id: Option<String>,
}

fn merge_level_up(a: Option<LevelUp>, b: Option<LevelUp>) -> Option<LevelUp> {
    match (a, b) {
        (Some(first), Some(second)) => {
            let mut stat_deltas: StatMap = first.stat_deltas;
            for (stat, points) in second.stat_deltas {
                *stat_deltas.entry(stat).or_insert(0) += points;
            }
            Some(LevelUp {
                previous_level: first.previous_level,
                new_level: second.new_level,
                total_xp: second.total_xp,
                stat_deltas,
            })
        }
        (first, None) => first,
        (None, second) => second,
    }
}

/// Drop lock entries nobody holds or waits on, except `keep`.
fn prune_idle(locks: &mut HashMap<String, Arc<AsyncMutex<()>>>, keep: &str) {
    locks.retain(|user_id, lock| user_id == keep || Arc::strong_count(lock) > 1);
}

fn ensure_open(quest: &Quest) -> CoachResult<()> {
    if quest.is_terminal() {
        return Err(CoachError::AlreadyTerminal {
            entity: "quest",
            id: quest.id.clone(),
            status: quest.status.to_string(),
        });
    }
    Ok(())
}

pub struct Coach<S, A> {
    store: Arc<S>,
    authoring: Arc<A>,
    config: EngineConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl<S: Store, A: Authoring> Coach<S, A> {
    pub fn new(store: Arc<S>, authoring: Arc<A>, config: EngineConfig) -> Self {
        Self {
            store,
            authoring,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Local calendar day of `now` in the installation timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.config.timezone)
    }

    async fn lock_user(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            prune_idle(&mut locks, user_id);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn progress_or_new(&self, user_id: &str) -> CoachResult<UserProgress> {
        Ok(self
            .store
            .progress(user_id)?
            .unwrap_or_else(|| UserProgress::new(user_id)))
    }

    fn active_goal_with_plan(&self, user_id: &str) -> CoachResult<Option<(MasterGoal, Option<MasterPlan>)>> {
        let Some(goal) = self.store.active_goal(user_id)? else {
            return Ok(None);
        };
        let plan = self.store.plan_for_goal(&goal.id)?;
        Ok(Some((goal, plan)))
    }

    fn owned_quest(&self, user_id: &str, quest_id: &str) -> CoachResult<Quest> {
        self.store
            .quest(quest_id)?
            .filter(|q| q.user_id == user_id)
            .ok_or_else(|| CoachError::not_found("quest", quest_id))
    }

    /// Recent quests run through `date` itself so a regeneration sees the
    /// set it replaces.
    fn context_for(
        &self,
        user_id: &str,
        date: NaiveDate,
        goal: Option<(&MasterGoal, Option<&MasterPlan>)>,
        progress: &UserProgress,
    ) -> CoachResult<UserContext> {
        let recent = self.store.quests_between(
            user_id,
            date - Duration::days(questline_core::context::RECENT_WINDOW_DAYS),
            date,
        )?;
        Ok(UserContext::build(date, progress, goal, &recent))
    }

    /// Validate the goal with the collaborator, draft and materialize its
    /// plan, then persist goal, plan and milestone records together.
    pub async fn set_goal(
        &self,
        user_id: &str,
        goal_text: &str,
        timeline_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> CoachResult<GoalSetup> {
        let _guard = self.lock_user(user_id).await;
        let today = self.today(now);

        if goal_text.trim().is_empty() {
            return Err(CoachError::ValidationRejected {
                scores: None,
                suggestions: vec!["describe the goal you want to reach".to_string()],
                refined_goal: None,
            });
        }

        let authoring = &*self.authoring;
        let analysis = call_collaborator(&self.config.collaborator, "analyze_goal", move || {
            authoring.analyze_goal(goal_text, timeline_days)
        })
        .await?;
        let accepted = validate_goal(goal_text, timeline_days, analysis).inspect_err(|e| {
            info!(user_id, error = %e, "goal rejected");
        })?;

        let goal = MasterGoal::new(user_id, accepted.goal_text, accepted.timeline_days, today);
        let progress = self.progress_or_new(user_id)?;
        let context = self.context_for(user_id, today, Some((&goal, None)), &progress)?;

        let (goal_ref, ctx) = (&goal, &context);
        let draft = call_collaborator(&self.config.collaborator, "generate_plan", move || {
            authoring.generate_plan(goal_ref, ctx)
        })
        .await?;
        let MaterializedPlan { plan, milestones } = materialize_plan(&goal, draft)?;

        let mut changes = Changeset::new();
        let replaced_goal_id = match self.store.active_goal(user_id)? {
            Some(mut previous) => {
                previous.status = GoalStatus::Abandoned;
                let id = previous.id.clone();
                changes.goals.push(previous);
                Some(id)
            }
            None => None,
        };
        changes.goals.push(goal.clone());
        changes.plans.push(plan.clone());
        changes.milestones.extend(milestones.iter().cloned());
        changes.progress = Some(progress);
        self.store.commit(changes)?;

        info!(
            user_id,
            goal_id = %goal.id,
            timeline_days = goal.timeline_days,
            phases = plan.phases.len(),
            milestones = milestones.len(),
            "goal set"
        );
        Ok(GoalSetup {
            goal,
            plan,
            milestones,
            replaced_goal_id,
        })
    }

    pub async fn abandon_goal(&self, user_id: &str) -> CoachResult<MasterGoal> {
        let _guard = self.lock_user(user_id).await;
        let mut goal = self
            .store
            .active_goal(user_id)?
            .ok_or_else(|| CoachError::not_found("goal", user_id))?;
        goal.status = GoalStatus::Abandoned;
        self.store.commit(Changeset {
            goals: vec![goal.clone()],
            ..Changeset::new()
        })?;
        info!(user_id, goal_id = %goal.id, "goal abandoned");
        Ok(goal)
    }

    /// Redraft the active goal's plan. The plan keeps its id and its version
    /// goes up by one; terminal milestone records survive.
    pub async fn regenerate_plan(&self, user_id: &str, now: DateTime<Utc>) -> CoachResult<GoalSetup> {
        let _guard = self.lock_user(user_id).await;
        let today = self.today(now);
        let goal = self
            .store
            .active_goal(user_id)?
            .ok_or_else(|| CoachError::not_found("goal", user_id))?;
        let current = self
            .store
            .plan_for_goal(&goal.id)?
            .ok_or_else(|| CoachError::not_found("plan", goal.id.clone()))?;
        let existing = self.store.milestones(&goal.id)?;
        let progress = self.progress_or_new(user_id)?;
        let context = self.context_for(user_id, today, Some((&goal, Some(&current))), &progress)?;

        let authoring = &*self.authoring;
        let (goal_ref, ctx) = (&goal, &context);
        let draft = call_collaborator(&self.config.collaborator, "generate_plan", move || {
            authoring.generate_plan(goal_ref, ctx)
        })
        .await?;
        let (plan, milestones, dropped) = rematerialize_plan(&goal, &current, &existing, draft)?;

        self.store.commit(Changeset {
            plans: vec![plan.clone()],
            milestones: milestones.clone(),
            removed_milestones: dropped,
            ..Changeset::new()
        })?;
        info!(user_id, goal_id = %goal.id, version = plan.version, "plan regenerated");
        Ok(GoalSetup {
            goal,
            plan,
            milestones,
            replaced_goal_id: None,
        })
    }

    pub fn daily_status(&self, user_id: &str, today: NaiveDate) -> CoachResult<DailyStatus> {
        let progress = self.progress_or_new(user_id)?;
        let todays_quests = self.store.quests_on(user_id, today)?;
        let used = regenerations_used(&todays_quests);

        let (week_start, week_end) = review_week(today, self.config.weekly_review_day);
        let weekly_review_due = self.store.review(user_id, week_start)?.is_none()
            && !self.store.quests_between(user_id, week_start, week_end)?.is_empty();

        let mut status = DailyStatus {
            date: today,
            goal: None,
            plan_version: None,
            current_phase: None,
            todays_quests,
            regenerations_remaining: self.config.regeneration_cap.saturating_sub(used),
            next_milestone: None,
            weekly_review_due,
            overall_progress: 0.0,
            progress,
        };

        if let Some((goal, plan)) = self.active_goal_with_plan(user_id)? {
            status.overall_progress = goal.overall_progress(today);
            if let Some(plan) = plan {
                let records = self.store.milestones(&goal.id)?;
                status.plan_version = Some(plan.version);
                status.current_phase = goal
                    .plan_day(today)
                    .and_then(|day| plan.phase_for_day(day))
                    .cloned();
                status.next_milestone = next_milestone(&plan, &records).map(|(record, m)| NextMilestone {
                    index: record.milestone_index,
                    title: m.title.clone(),
                    target_date: goal.date_of_day(m.target_day),
                    completion_percentage: record.completion_percentage,
                });
            }
            status.goal = Some(goal);
        }
        Ok(status)
    }

    async fn author_quests(
        &self,
        user_id: &str,
        date: NaiveDate,
        progress: &UserProgress,
        reason: Option<&str>,
        regeneration_count: u32,
    ) -> CoachResult<Vec<Quest>> {
        let goal = self.active_goal_with_plan(user_id)?;
        let goal_ref = goal.as_ref().map(|(g, p)| (g, p.as_ref()));
        let context = self
            .context_for(user_id, date, goal_ref, progress)?
            .with_reason(reason.map(str::to_string));

        let authoring = &*self.authoring;
        let ctx = &context;
        let drafts = call_collaborator(&self.config.collaborator, "generate_quests", move || {
            authoring.generate_quests(ctx, reason)
        })
        .await?;

        let batch = QuestBatch {
            user_id,
            goal_id: goal.as_ref().map(|(g, _)| g.id.as_str()),
            scheduled_for: date,
            phase_number: context.phase_number(),
            regeneration_count,
        };
        quests_from_drafts(&batch, drafts)
    }

    /// Idempotent per user and day: an existing set is returned as-is
    /// without calling the collaborator.
    pub async fn generate_daily_quests(&self, user_id: &str, date: NaiveDate) -> CoachResult<Vec<Quest>> {
        let _guard = self.lock_user(user_id).await;
        let existing = self.store.quests_on(user_id, date)?;
        if !existing.is_empty() {
            debug!(user_id, %date, "quests already generated");
            return Ok(existing);
        }

        let progress = self.progress_or_new(user_id)?;
        let quests = self.author_quests(user_id, date, &progress, None, 0).await?;
        self.store.commit(Changeset {
            quests: quests.clone(),
            progress: Some(progress),
            ..Changeset::new()
        })?;
        info!(user_id, %date, count = quests.len(), "daily quests generated");
        Ok(quests)
    }

    /// Replace today's open quests with a fresh batch, up to the daily cap.
    /// Completed, failed and skipped quests are kept.
    pub async fn regenerate_quests(
        &self,
        user_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoachResult<RegenerationOutcome> {
        let _guard = self.lock_user(user_id).await;
        let today = self.today(now);
        let cap = self.config.regeneration_cap;

        let existing = self.store.quests_on(user_id, today)?;
        let used = regenerations_used(&existing);
        if used >= cap {
            warn!(user_id, %today, used, cap, "regeneration cap reached");
            return Err(CoachError::CapacityExceeded { cap, used });
        }

        let progress = self.progress_or_new(user_id)?;
        let fresh = self.author_quests(user_id, today, &progress, reason, used + 1).await?;

        let (kept, discarded): (Vec<Quest>, Vec<Quest>) = existing.into_iter().partition(Quest::is_terminal);
        self.store.commit(Changeset {
            quests: fresh.clone(),
            removed_quests: discarded.iter().map(|q| q.id.clone()).collect(),
            progress: Some(progress),
            ..Changeset::new()
        })?;

        let used = used + 1;
        info!(user_id, %today, used, discarded = discarded.len(), "quests regenerated");
        let mut quests = kept;
        quests.extend(fresh);
        Ok(RegenerationOutcome {
            quests,
            regenerations_used: used,
            regenerations_remaining: cap.saturating_sub(used),
            can_regenerate: used < cap,
        })
    }

    fn award(
        &self,
        quest: &mut Quest,
        progress: &mut UserProgress,
        metrics: Option<&DailyHealthMetrics>,
        now: DateTime<Utc>,
    ) -> CoachResult<CompletionOutcome> {
        let reward = reward_for(quest, metrics);
        quest.complete(now, reward.xp())?;
        let level_up = apply_reward(progress, &reward);
        info!(
            user_id = %quest.user_id,
            quest_id = %quest.id,
            xp = reward.xp(),
            bonus = reward.bonus.total(),
            "quest completed"
        );
        if let Some(up) = &level_up {
            info!(user_id = %quest.user_id, from = up.previous_level, to = up.new_level, "level up");
        }
        Ok(CompletionOutcome {
            quest: quest.clone(),
            completed: true,
            xp_awarded: reward.xp(),
            level_up,
            milestones_reached: Vec::new(),
        })
    }

    /// Re-evaluate the active goal's milestones against freshly completed
    /// quests and pay out bonuses for any that were reached.
    fn track_milestones(
        &self,
        user_id: &str,
        completed: &[Quest],
        progress: &mut UserProgress,
        changes: &mut Changeset,
        now: DateTime<Utc>,
    ) -> CoachResult<(Vec<MilestoneReached>, Option<LevelUp>)> {
        let Some((goal, Some(plan))) = self.active_goal_with_plan(user_id)? else {
            return Ok((Vec::new(), None));
        };
        if !completed.iter().any(|q| q.goal_id.as_deref() == Some(goal.id.as_str())) {
            return Ok((Vec::new(), None));
        }

        let mut records = self.store.milestones(&goal.id)?;
        let mut quests = self.store.quests_between(user_id, goal.start_date, goal.target_date)?;
        for q in quests.iter_mut() {
            if let Some(updated) = completed.iter().find(|c| c.id == q.id) {
                *q = updated.clone();
            }
        }

        let reached = track_progress(&goal, &plan, &mut records, &quests, self.config.milestone, now);
        let mut level_up = None;
        for r in &reached {
            info!(user_id, milestone = r.milestone_index, bonus_xp = r.bonus_xp, "milestone reached");
            level_up = merge_level_up(level_up, progress.add_xp(r.bonus_xp));
        }
        changes.milestones.extend(records);
        Ok((reached, level_up))
    }

    fn progress_locked(
        &self,
        mut quest: Quest,
        value: f64,
        now: DateTime<Utc>,
    ) -> CoachResult<CompletionOutcome> {
        ensure_open(&quest)?;
        if quest.progress_source == ProgressSource::Telemetry {
            debug!(user_id = %quest.user_id, quest_id = %quest.id, "manual value ignored, telemetry wins");
            return Ok(CompletionOutcome::progress_only(quest));
        }
        quest.record_progress(value, ProgressSource::Manual)?;
        if quest.reached_target() {
            return self.complete_locked(quest, now);
        }
        self.store.commit(Changeset {
            quests: vec![quest.clone()],
            ..Changeset::new()
        })?;
        Ok(CompletionOutcome::progress_only(quest))
    }

    fn complete_locked(&self, mut quest: Quest, now: DateTime<Utc>) -> CoachResult<CompletionOutcome> {
        ensure_open(&quest)?;
        let user_id = quest.user_id.clone();
        let mut progress = self.progress_or_new(&user_id)?;
        let metrics = self.store.health_metrics(&user_id, quest.scheduled_for)?;

        let mut outcome = self.award(&mut quest, &mut progress, metrics.as_ref(), now)?;
        let mut changes = Changeset::new();
        let (reached, bonus_level_up) =
            self.track_milestones(&user_id, std::slice::from_ref(&quest), &mut progress, &mut changes, now)?;
        outcome.milestones_reached = reached;
        outcome.level_up = merge_level_up(outcome.level_up, bonus_level_up);

        changes.quests.push(quest);
        changes.progress = Some(progress);
        self.store.commit(changes)?;
        Ok(outcome)
    }

    /// Complete a quest. A value below target only records progress.
    pub async fn complete_quest(
        &self,
        user_id: &str,
        quest_id: &str,
        actual_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> CoachResult<CompletionOutcome> {
        let _guard = self.lock_user(user_id).await;
        let mut quest = self.owned_quest(user_id, quest_id)?;
        ensure_open(&quest)?;

        let value = quest.clamp_value(actual_value.unwrap_or(quest.target_value));
        if value < quest.target_value {
            return self.progress_locked(quest, value, now);
        }
        if quest.progress_source != ProgressSource::Telemetry {
            quest.current_value = value;
            quest.progress_source = ProgressSource::Manual;
        }
        self.complete_locked(quest, now)
    }

    /// Manual progress. Reaching the target completes the quest.
    pub async fn update_quest_progress(
        &self,
        user_id: &str,
        quest_id: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> CoachResult<CompletionOutcome> {
        let _guard = self.lock_user(user_id).await;
        let quest = self.owned_quest(user_id, quest_id)?;
        self.progress_locked(quest, value, now)
    }

    pub async fn skip_quest(&self, user_id: &str, quest_id: &str) -> CoachResult<Quest> {
        let _guard = self.lock_user(user_id).await;
        let mut quest = self.owned_quest(user_id, quest_id)?;
        ensure_open(&quest)?;
        quest.transition(QuestStatus::Skipped)?;
        self.store.commit(Changeset {
            quests: vec![quest.clone()],
            ..Changeset::new()
        })?;
        info!(user_id, quest_id, "quest skipped");
        Ok(quest)
    }

    /// Explicit milestone progress, e.g. criteria checked off by the user.
    pub async fn update_milestone_progress(
        &self,
        user_id: &str,
        milestone_index: usize,
        percentage: f64,
        now: DateTime<Utc>,
    ) -> CoachResult<MilestoneUpdate> {
        let _guard = self.lock_user(user_id).await;
        let (goal, plan) = match self.active_goal_with_plan(user_id)? {
            Some((goal, Some(plan))) => (goal, plan),
            Some((goal, None)) => return Err(CoachError::not_found("plan", goal.id)),
            None => return Err(CoachError::not_found("goal", user_id)),
        };
        let mut record = self
            .store
            .milestones(&goal.id)?
            .into_iter()
            .find(|r| r.milestone_index == milestone_index)
            .ok_or_else(|| CoachError::not_found("milestone", milestone_index.to_string()))?;

        let reached = report_progress(&plan, &mut record, percentage, now)?;
        let mut changes = Changeset::new();
        let mut level_up = None;
        if let Some(r) = &reached {
            let mut progress = self.progress_or_new(user_id)?;
            level_up = progress.add_xp(r.bonus_xp);
            changes.progress = Some(progress);
            info!(user_id, milestone = milestone_index, bonus_xp = r.bonus_xp, "milestone reached");
        }
        changes.milestones.push(record.clone());
        self.store.commit(changes)?;
        Ok(MilestoneUpdate {
            record,
            reached,
            level_up,
        })
    }

    fn ingest_locked(&self, metrics: DailyHealthMetrics, now: DateTime<Utc>) -> CoachResult<IngestOutcome> {
        let user_id = metrics.user_id.clone();
        let mut quests = self.store.quests_on(&user_id, metrics.date)?;
        let mut progress = self.progress_or_new(&user_id)?;
        let mut changes = Changeset::new();
        let mut outcome = IngestOutcome::default();
        let mut completed = Vec::new();

        for quest in quests.iter_mut().filter(|q| !q.is_terminal()) {
            let Some(value) = channel_value(&metrics, &quest.metric_key) else {
                continue;
            };
            quest.record_progress(value, ProgressSource::Telemetry)?;
            outcome.updated_quests.push(quest.id.clone());
            if quest.reached_target() {
                let completion = self.award(quest, &mut progress, Some(&metrics), now)?;
                outcome.level_up = merge_level_up(outcome.level_up.take(), completion.level_up.clone());
                outcome.completions.push(completion);
                completed.push(quest.clone());
            }
            changes.quests.push(quest.clone());
        }

        if !completed.is_empty() {
            let (reached, bonus_level_up) =
                self.track_milestones(&user_id, &completed, &mut progress, &mut changes, now)?;
            outcome.milestones_reached = reached;
            outcome.level_up = merge_level_up(outcome.level_up.take(), bonus_level_up);
            changes.progress = Some(progress);
        }

        debug!(
            user_id,
            date = %metrics.date,
            updated = outcome.updated_quests.len(),
            completed = outcome.completions.len(),
            "health data ingested"
        );
        changes.health.push(metrics);
        self.store.commit(changes)?;
        Ok(outcome)
    }

    /// Store a normalized day of metrics (last write wins) and apply it to
    /// that day's open quests.
    pub async fn ingest_health_data(
        &self,
        metrics: DailyHealthMetrics,
        now: DateTime<Utc>,
    ) -> CoachResult<IngestOutcome> {
        let _guard = self.lock_user(&metrics.user_id).await;
        self.ingest_locked(metrics, now)
    }

    /// Fold a partial provider payload onto the stored day, then ingest it.
    pub async fn ingest_patch(&self, patch: HealthPatch, now: DateTime<Utc>) -> CoachResult<IngestOutcome> {
        let _guard = self.lock_user(&patch.user_id).await;
        let Some(date) = patch.date else {
            return Ok(IngestOutcome::default());
        };
        let base = self.store.health_metrics(&patch.user_id, date)?;
        match patch.apply(base, now) {
            Some(metrics) => self.ingest_locked(metrics, now),
            None => Ok(IngestOutcome::default()),
        }
    }

    /// Fail quests left open on earlier days and fold those days into the streak.
    pub async fn expire_overdue(&self, user_id: &str, today: NaiveDate) -> CoachResult<SweepOutcome> {
        let _guard = self.lock_user(user_id).await;
        let mut progress = self.progress_or_new(user_id)?;
        let from = progress
            .streak_evaluated_through
            .map(|d| d + Duration::days(1))
            .unwrap_or(NaiveDate::MIN);
        let mut quests = self.store.quests_between(user_id, from, today - Duration::days(1))?;

        let outcome = expire_and_score(&mut progress, &mut quests, today);
        if outcome.is_noop() {
            return Ok(outcome);
        }

        let expired: Vec<Quest> = quests
            .into_iter()
            .filter(|q| outcome.expired.contains(&q.id))
            .collect();
        self.store.commit(Changeset {
            quests: expired,
            progress: Some(progress),
            ..Changeset::new()
        })?;
        info!(
            user_id,
            %today,
            expired = outcome.expired.len(),
            streak_broken = outcome.streak_broken,
            "overdue quests swept"
        );
        Ok(outcome)
    }

    /// Miss overdue milestones and close the goal once its timeline has passed.
    pub async fn sweep_goal(&self, user_id: &str, today: NaiveDate) -> CoachResult<GoalSweep> {
        let _guard = self.lock_user(user_id).await;
        let Some((mut goal, plan)) = self.active_goal_with_plan(user_id)? else {
            return Ok(GoalSweep::default());
        };

        let mut sweep = GoalSweep::default();
        let mut changes = Changeset::new();
        if let Some(plan) = &plan {
            let mut records = self.store.milestones(&goal.id)?;
            sweep.milestone_events = sweep_missed(&goal, plan, &mut records, today);
            if !sweep.milestone_events.is_empty() {
                changes.milestones = records;
            }
        }
        if goal.is_finished(today) {
            goal.status = GoalStatus::Completed;
            sweep.completed_goal_id = Some(goal.id.clone());
            changes.goals.push(goal);
        }

        if !changes.is_empty() {
            self.store.commit(changes)?;
            info!(
                user_id,
                %today,
                missed = sweep.milestone_events.len(),
                goal_completed = sweep.completed_goal_id.is_some(),
                "goal swept"
            );
        }
        Ok(sweep)
    }

    /// Milestone bonuses paid on local days in `[start, end]` for the goals
    /// behind `quests` and the active goal.
    fn milestone_bonus_between(
        &self,
        quests: &[Quest],
        active_goal_id: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CoachResult<u64> {
        let mut goal_ids: Vec<&str> = quests
            .iter()
            .filter_map(|q| q.goal_id.as_deref())
            .chain(active_goal_id)
            .collect();
        goal_ids.sort_unstable();
        goal_ids.dedup();

        let mut total = 0;
        for goal_id in goal_ids {
            for record in self.store.milestones(goal_id)? {
                let paid_in_window = record
                    .completed_at
                    .map(|at| self.today(at))
                    .is_some_and(|d| d >= start && d <= end);
                if paid_in_window {
                    total += u64::from(record.bonus_xp_awarded);
                }
            }
        }
        Ok(total)
    }

    /// Review the last full week as of `as_of` (see [`review_week`]). Returns
    /// the stored review when one exists and `None` when the user had no
    /// quests that week.
    pub async fn weekly_review(
        &self,
        user_id: &str,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> CoachResult<Option<WeeklyReview>> {
        let _guard = self.lock_user(user_id).await;
        let (week_start, week_end) = review_week(as_of, self.config.weekly_review_day);
        if let Some(existing) = self.store.review(user_id, week_start)? {
            return Ok(Some(existing));
        }

        let quests = self.store.quests_between(user_id, week_start, week_end)?;
        if quests.is_empty() {
            debug!(user_id, %week_start, "no quests this week, review skipped");
            return Ok(None);
        }

        let previous_verdict = self
            .store
            .review(user_id, week_start - Duration::days(7))?
            .map(|r| r.verdict);
        let goal_id = self.store.active_goal(user_id)?.map(|g| g.id);
        let milestone_bonus_xp = self.milestone_bonus_between(&quests, goal_id.as_deref(), week_start, week_end)?;
        let request = ReviewRequest {
            user_id,
            goal_id: goal_id.as_deref(),
            week_start,
            week_end,
            previous_verdict,
            milestone_bonus_xp,
            now,
        };
        let review = aggregate_week(&request, &quests, &self.config.review);
        self.store.commit(Changeset {
            reviews: vec![review.clone()],
            ..Changeset::new()
        })?;
        info!(
            user_id,
            %week_start,
            verdict = ?review.verdict,
            completion_rate = review.completion_rate,
            "weekly review created"
        );
        Ok(Some(review))
    }
}
