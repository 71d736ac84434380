//! Goal/plan/quest authoring collaborator and the timeout/retry wrapper every
//! call goes through.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use questline_core::{CoachError, CoachResult, GoalAnalysis, MasterGoal, PlanDraft, QuestDraft, UserContext};
use tracing::warn;

/// Produces drafts. Output is untrusted; the engine validates everything.
#[async_trait]
pub trait Authoring: Send + Sync {
    async fn analyze_goal(&self, goal_text: &str, timeline_days: Option<u32>) -> Result<GoalAnalysis>;

    async fn generate_plan(&self, goal: &MasterGoal, context: &UserContext) -> Result<PlanDraft>;

    async fn generate_quests(&self, context: &UserContext, reason: Option<&str>) -> Result<Vec<QuestDraft>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        ExponentialBackoff {
            initial_delay_ms,
            max_delay_ms,
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = (self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(500, 5_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollaboratorPolicy {
    /// Budget for a single attempt.
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
}

impl Default for CollaboratorPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
            backoff: ExponentialBackoff::default(),
        }
    }
}

/// Run a collaborator call under `policy`. Exhausted attempts become
/// `CollaboratorUnavailable` carrying the last failure.
pub async fn call_collaborator<T, F, Fut>(policy: &CollaboratorPolicy, operation: &str, mut call: F) -> CoachResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = String::new();
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff.delay_for_attempt(attempt - 1)).await;
        }
        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = format!("{e:#}"),
            Err(_) => last_error = format!("timed out after {:?}", policy.timeout),
        }
        warn!(operation, attempt, error = %last_error, "collaborator call failed");
    }
    Err(CoachError::CollaboratorUnavailable(format!("{operation}: {last_error}")))
}
