//! Scheduled batch runs over every known user.
//!
//! A batch never fails as a whole: each user's unit of work is isolated and
//! its error is logged and collected into the [`BatchResult`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use futures_util::stream::{self, StreamExt};
use questline_core::time::{local_date, local_time, weekday_index};
use questline_core::{CoachError, CoachResult};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::authoring::Authoring;
use crate::coach::Coach;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Local time after which the day's batch runs.
    pub quest_generation_time: NaiveTime,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekly_review_day: u8,
    pub timezone: Tz,
    pub max_concurrent_users: usize,
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quest_generation_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            weekly_review_day: 0,
            timezone: Tz::UTC,
            max_concurrent_users: 8,
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.weekly_review_day > 6 {
            bail!("weekly_review_day must be 0-6 (0 = Sunday), got {}", self.weekly_review_day);
        }
        if self.max_concurrent_users == 0 {
            bail!("max_concurrent_users must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub user_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub processed_users: usize,
    pub errors: Vec<BatchError>,
}

/// Which runs a tick started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub generation: Option<BatchResult>,
    pub review: Option<BatchResult>,
}

/// Called around every tick of [`Scheduler::run`].
pub trait TickHooks {
    /// Return false to skip this tick.
    fn before_tick(&mut self) -> bool {
        true
    }

    /// Sees every tick that `before_tick` let through, including ones that
    /// started no run.
    fn after_tick(&mut self, _report: &TickReport) {}
}

impl TickReport {
    pub fn started_any(&self) -> bool {
        self.generation.is_some() || self.review.is_some()
    }
}

pub struct Scheduler<S, A> {
    coach: Arc<Coach<S, A>>,
    config: SchedulerConfig,
    last_generation: Option<NaiveDate>,
    last_review: Option<NaiveDate>,
}

impl<S: Store, A: Authoring> Scheduler<S, A> {
    pub fn new(coach: Arc<Coach<S, A>>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        if coach.config().weekly_review_day != config.weekly_review_day {
            bail!(
                "scheduler review day {} differs from the coach's review week day {}",
                config.weekly_review_day,
                coach.config().weekly_review_day
            );
        }
        Ok(Self {
            coach,
            config,
            last_generation: None,
            last_review: None,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    async fn for_each_user<'a, F, Fut>(&'a self, run: &'static str, work: F) -> BatchResult
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = (String, CoachResult<()>)> + 'a,
    {
        let users = match self.coach.store().user_ids() {
            Ok(users) => users,
            Err(e) => {
                error!(run, error = %e, "could not list users");
                return BatchResult {
                    processed_users: 0,
                    errors: vec![BatchError {
                        user_id: String::new(),
                        code: "persistence".to_string(),
                        message: e.to_string(),
                    }],
                };
            }
        };

        let total = users.len();
        let outcomes: Vec<(String, CoachResult<()>)> = stream::iter(users)
            .map(work)
            .buffer_unordered(self.config.max_concurrent_users.max(1))
            .collect()
            .await;

        let mut result = BatchResult::default();
        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(()) => result.processed_users += 1,
                Err(e) => {
                    warn!(run, user_id = %user_id, code = e.code(), error = %e, "user failed in batch");
                    result.errors.push(BatchError {
                        user_id,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result.errors.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        info!(run, total, processed = result.processed_users, failed = result.errors.len(), "batch finished");
        result
    }

    /// Per user: goal and milestone clock, overdue sweep, then today's quests.
    pub async fn run_scheduled_generation(&self, as_of: NaiveDate) -> BatchResult {
        let coach = &self.coach;
        self.for_each_user("generation", move |user_id| async move {
            let outcome = async {
                coach.sweep_goal(&user_id, as_of).await?;
                coach.expire_overdue(&user_id, as_of).await?;
                coach.generate_daily_quests(&user_id, as_of).await?;
                Ok::<(), CoachError>(())
            }
            .await;
            (user_id, outcome)
        })
        .await
    }

    pub async fn run_scheduled_weekly_review(&self, as_of: NaiveDate, now: DateTime<Utc>) -> BatchResult {
        let coach = &self.coach;
        self.for_each_user("weekly_review", move |user_id| async move {
            let outcome = coach.weekly_review(&user_id, as_of, now).await.map(|_| ());
            (user_id, outcome)
        })
        .await
    }

    /// Start whichever runs are due at `now` and not yet done today.
    /// Generation goes first so the reviewed week has its overdue quests failed.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let tz = self.config.timezone;
        let today = local_date(now, tz);
        let mut report = TickReport::default();
        if local_time(now, tz) < self.config.quest_generation_time {
            return report;
        }

        if self.last_generation != Some(today) {
            report.generation = Some(self.run_scheduled_generation(today).await);
            self.last_generation = Some(today);
        }
        if weekday_index(today) == self.config.weekly_review_day && self.last_review != Some(today) {
            report.review = Some(self.run_scheduled_weekly_review(today, now).await);
            self.last_review = Some(today);
        }
        report
    }

    /// Tick on an interval until `shutdown` resolves.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>, hooks: &mut impl TickHooks) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(
            timezone = %self.config.timezone,
            generation_time = %self.config.quest_generation_time,
            review_day = self.config.weekly_review_day,
            "scheduler started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    if !hooks.before_tick() {
                        continue;
                    }
                    let report = self.tick(Utc::now()).await;
                    hooks.after_tick(&report);
                }
            }
        }
    }
}
