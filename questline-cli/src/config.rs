use anyhow::{Context, Result};
use questline_core::time::{parse_hhmm, parse_timezone};
use questline_core::{MilestonePolicy, ReviewPolicy};
use questline_engine::{CollaboratorPolicy, EngineConfig, ExponentialBackoff, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::state::ensure_questline_home;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSection,
    pub scheduler: SchedulerSection,
    pub quests: QuestSection,
    pub collaborator: CollaboratorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// "anthropic" or "openai". Empty picks whichever key is configured.
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            temperature: 0.4,
            max_tokens: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Local "HH:MM".
    pub quest_generation_time: String,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekly_review_day: u8,
    pub timezone: String,
    pub max_concurrent_users: usize,
    pub tick_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            quest_generation_time: "06:00".to_string(),
            weekly_review_day: 0,
            timezone: "America/Chicago".to_string(),
            max_concurrent_users: 8,
            tick_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestSection {
    pub regeneration_cap: u32,
    pub expected_quests_per_day: u32,
    /// Completion-rate floors for excellent, good, adequate, needs_improvement.
    pub verdict_thresholds: [f64; 4],
}

impl Default for QuestSection {
    fn default() -> Self {
        let review = ReviewPolicy::default();
        Self {
            regeneration_cap: questline_engine::config::DEFAULT_REGENERATION_CAP,
            expected_quests_per_day: MilestonePolicy::default().expected_quests_per_day,
            verdict_thresholds: [review.excellent, review.good, review.adequate, review.needs_improvement],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorSection {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CollaboratorSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let [excellent, good, adequate, needs_improvement] = self.quests.verdict_thresholds;
        Ok(EngineConfig {
            timezone: parse_timezone(&self.scheduler.timezone)?,
            regeneration_cap: self.quests.regeneration_cap,
            weekly_review_day: self.scheduler.weekly_review_day,
            milestone: MilestonePolicy {
                expected_quests_per_day: self.quests.expected_quests_per_day,
            },
            review: ReviewPolicy {
                excellent,
                good,
                adequate,
                needs_improvement,
            },
            collaborator: CollaboratorPolicy {
                timeout: Duration::from_secs(self.collaborator.timeout_secs),
                max_retries: self.collaborator.max_retries,
                backoff: ExponentialBackoff::new(
                    self.collaborator.retry_backoff_ms,
                    self.collaborator.retry_backoff_ms.saturating_mul(8),
                ),
            },
        })
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let config = SchedulerConfig {
            quest_generation_time: parse_hhmm(&self.scheduler.quest_generation_time)?,
            weekly_review_day: self.scheduler.weekly_review_day,
            timezone: parse_timezone(&self.scheduler.timezone)?,
            max_concurrent_users: self.scheduler.max_concurrent_users,
            tick_interval: Duration::from_secs(self.scheduler.tick_seconds.max(1)),
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_questline_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).context("parse config.toml")
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}
