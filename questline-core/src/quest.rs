//! Daily quest model and its one-way state machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoachError, CoachResult, DraftKind};
use crate::rewards::Stat;

/// `current_value` never exceeds this multiple of `target_value`.
pub const MAX_PROGRESS_MULTIPLE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    /// XP used when a draft does not name its own reward.
    pub fn default_xp(&self) -> u32 {
        match self {
            Difficulty::Easy => 10,
            Difficulty::Medium => 25,
            Difficulty::Hard => 50,
            Difficulty::Extreme => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl QuestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuestStatus::Completed | QuestStatus::Failed | QuestStatus::Skipped
        )
    }

    /// The allowed transition table.
    pub fn can_transition_to(&self, next: QuestStatus) -> bool {
        use QuestStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Skipped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Pending => "pending",
            QuestStatus::InProgress => "in_progress",
            QuestStatus::Completed => "completed",
            QuestStatus::Failed => "failed",
            QuestStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who last wrote `current_value`. Telemetry outranks manual entries for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    #[default]
    None,
    Manual,
    Telemetry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub user_id: String,
    pub goal_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    pub target_value: f64,
    pub current_value: f64,
    pub metric_key: String,
    pub xp_reward: u32,
    pub stat_bonus: Option<Stat>,
    pub scheduled_for: NaiveDate,
    pub status: QuestStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub regeneration_count: u32,
    pub phase_number: Option<u32>,
    /// XP actually granted on completion (base + telemetry bonus).
    #[serde(default)]
    pub xp_awarded: u32,
    #[serde(default)]
    pub progress_source: ProgressSource,
}

impl Quest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn reached_target(&self) -> bool {
        self.current_value >= self.target_value
    }

    pub fn clamp_value(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.0;
        }
        value.clamp(0.0, self.target_value * MAX_PROGRESS_MULTIPLE)
    }

    /// Guarded status change. Terminal sources yield `AlreadyTerminal`.
    pub fn transition(&mut self, next: QuestStatus) -> CoachResult<()> {
        if self.status == next {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(CoachError::AlreadyTerminal {
                entity: "quest",
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(CoachError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record progress without completing. Moves `pending` to `in_progress`.
    pub fn record_progress(&mut self, value: f64, source: ProgressSource) -> CoachResult<()> {
        if self.is_terminal() {
            return Err(CoachError::AlreadyTerminal {
                entity: "quest",
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.current_value = self.clamp_value(value);
        self.progress_source = source;
        if self.status == QuestStatus::Pending {
            self.transition(QuestStatus::InProgress)?;
        }
        Ok(())
    }

    /// Complete the quest. A `pending` quest is started first, so every
    /// completion passes through `in_progress`.
    pub fn complete(&mut self, now: DateTime<Utc>, xp_awarded: u32) -> CoachResult<()> {
        if self.status == QuestStatus::Pending {
            self.transition(QuestStatus::InProgress)?;
        }
        self.transition(QuestStatus::Completed)?;
        self.completed_at = Some(now);
        self.xp_awarded = xp_awarded;
        Ok(())
    }
}

/// Quest candidate as returned by the authoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    pub target_value: f64,
    pub metric_key: String,
    #[serde(default)]
    pub xp_reward: Option<u32>,
    #[serde(default)]
    pub stat_bonus: Option<String>,
}

/// Identity fields stamped onto every quest of a generated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestBatch<'a> {
    pub user_id: &'a str,
    pub goal_id: Option<&'a str>,
    pub scheduled_for: NaiveDate,
    pub phase_number: Option<u32>,
    pub regeneration_count: u32,
}

/// Validate a draft list and build `pending` quests. Any bad draft rejects the batch.
pub fn quests_from_drafts(batch: &QuestBatch<'_>, drafts: Vec<QuestDraft>) -> CoachResult<Vec<Quest>> {
    let mut violations = Vec::new();
    if drafts.is_empty() {
        violations.push("collaborator returned no quests".to_string());
    }

    let mut quests = Vec::with_capacity(drafts.len());
    for (i, d) in drafts.into_iter().enumerate() {
        let before = violations.len();
        if d.title.trim().is_empty() {
            violations.push(format!("quest {i}: empty title"));
        }
        if d.metric_key.trim().is_empty() {
            violations.push(format!("quest {i}: empty metric_key"));
        }
        if !(d.target_value.is_finite() && d.target_value > 0.0) {
            violations.push(format!("quest {i}: target_value {} must be > 0", d.target_value));
        }
        let stat_bonus = match d.stat_bonus.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => match raw.parse::<Stat>() {
                Ok(stat) => Some(stat),
                Err(_) => {
                    violations.push(format!("quest {i}: unknown stat '{raw}'"));
                    None
                }
            },
        };
        if violations.len() > before {
            continue;
        }

        quests.push(Quest {
            id: Uuid::new_v4().to_string(),
            user_id: batch.user_id.to_string(),
            goal_id: batch.goal_id.map(str::to_string),
            title: d.title.trim().to_string(),
            description: d.description,
            xp_reward: d.xp_reward.unwrap_or_else(|| d.difficulty.default_xp()),
            difficulty: d.difficulty,
            target_value: d.target_value,
            current_value: 0.0,
            metric_key: d.metric_key.trim().to_lowercase(),
            stat_bonus,
            scheduled_for: batch.scheduled_for,
            status: QuestStatus::Pending,
            completed_at: None,
            regeneration_count: batch.regeneration_count,
            phase_number: batch.phase_number,
            xp_awarded: 0,
            progress_source: ProgressSource::None,
        });
    }

    if !violations.is_empty() {
        return Err(CoachError::structural(DraftKind::Quests, violations));
    }
    Ok(quests)
}

/// Regeneration count already used for a day's set.
pub fn regenerations_used(quests: &[Quest]) -> u32 {
    quests.iter().map(|q| q.regeneration_count).max().unwrap_or(0)
}
