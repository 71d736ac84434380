//! XP, stat and level policy.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::health::DailyHealthMetrics;
use crate::quest::{Difficulty, Quest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Strength,
    Endurance,
    Intelligence,
    Discipline,
    Vitality,
}

impl Stat {
    pub const ALL: [Stat; 5] = [
        Stat::Strength,
        Stat::Endurance,
        Stat::Intelligence,
        Stat::Discipline,
        Stat::Vitality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stat::Strength => "strength",
            Stat::Endurance => "endurance",
            Stat::Intelligence => "intelligence",
            Stat::Discipline => "discipline",
            Stat::Vitality => "vitality",
        }
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strength" | "str" => Ok(Stat::Strength),
            "endurance" | "end" | "stamina" => Ok(Stat::Endurance),
            "intelligence" | "int" => Ok(Stat::Intelligence),
            "discipline" | "focus" => Ok(Stat::Discipline),
            "vitality" | "health" => Ok(Stat::Vitality),
            other => Err(format!("unknown stat: {other}")),
        }
    }
}

pub type StatMap = BTreeMap<Stat, u32>;

/// Stat points granted per completed quest with a stat bonus.
pub fn stat_increment(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Easy => 1,
        Difficulty::Medium => 2,
        Difficulty::Hard => 3,
        Difficulty::Extreme => 5,
    }
}

/// Per-category breakdown of the telemetry bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelemetryBonus {
    pub steps: u32,
    pub workouts: u32,
    pub sleep: u32,
    pub calories: u32,
}

impl TelemetryBonus {
    pub fn total(&self) -> u32 {
        self.steps + self.workouts + self.sleep + self.calories
    }
}

/// Bonus XP from a day's health metrics. Categories are capped independently and summed.
pub fn telemetry_bonus(metrics: &DailyHealthMetrics) -> TelemetryBonus {
    let sleep_hours = f64::from(metrics.sleep_minutes) / 60.0;
    let sleep = if (7.0..=9.0).contains(&sleep_hours) {
        10
    } else if sleep_hours >= 6.0 {
        5
    } else {
        0
    };

    TelemetryBonus {
        steps: (metrics.steps / 1000).min(10),
        workouts: (metrics.workouts.len() as u32).saturating_mul(5).min(25),
        sleep,
        calories: (metrics.active_calories.max(0.0) / 100.0).floor().min(10.0) as u32,
    }
}

/// Cumulative XP needed to reach levels 1..=10.
const LEVEL_THRESHOLDS: [u64; 10] = [0, 100, 250, 450, 700, 1000, 1400, 1900, 2500, 3200];
/// Cost of each level past the table.
const LEVEL_STEP_AFTER_TABLE: u64 = 800;

/// Total XP required to reach `level` (1-based).
pub fn xp_for_level(level: u32) -> u64 {
    let level = level.max(1) as usize;
    if level <= LEVEL_THRESHOLDS.len() {
        return LEVEL_THRESHOLDS[level - 1];
    }
    let extra = (level - LEVEL_THRESHOLDS.len()) as u64;
    LEVEL_THRESHOLDS[LEVEL_THRESHOLDS.len() - 1] + extra * LEVEL_STEP_AFTER_TABLE
}

pub fn level_for_xp(total_xp: u64) -> u32 {
    let mut level = 1u32;
    while xp_for_level(level + 1) <= total_xp {
        level += 1;
    }
    level
}

/// Persistent per-user progression state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    pub total_xp: u64,
    pub level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(default)]
    pub stats: StatMap,
    /// Stats gained since the last level-up boundary.
    #[serde(default)]
    pub stats_since_level_up: StatMap,
    /// Last day whose quests have been folded into the streak.
    #[serde(default)]
    pub streak_evaluated_through: Option<NaiveDate>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_xp: 0,
            level: 1,
            current_streak: 0,
            longest_streak: 0,
            stats: StatMap::new(),
            stats_since_level_up: StatMap::new(),
            streak_evaluated_through: None,
        }
    }

    pub fn stat(&self, stat: Stat) -> u32 {
        self.stats.get(&stat).copied().unwrap_or(0)
    }

    pub fn xp_to_next_level(&self) -> u64 {
        xp_for_level(self.level + 1).saturating_sub(self.total_xp)
    }

    pub fn add_stat(&mut self, stat: Stat, points: u32) {
        *self.stats.entry(stat).or_insert(0) += points;
        *self.stats_since_level_up.entry(stat).or_insert(0) += points;
    }

    /// Add XP and report a level-up when one or more thresholds are crossed.
    pub fn add_xp(&mut self, xp: u32) -> Option<LevelUp> {
        self.total_xp += u64::from(xp);
        let new_level = level_for_xp(self.total_xp);
        if new_level <= self.level {
            return None;
        }
        let event = LevelUp {
            previous_level: self.level,
            new_level,
            total_xp: self.total_xp,
            stat_deltas: std::mem::take(&mut self.stats_since_level_up),
        };
        self.level = new_level;
        Some(event)
    }

    pub fn extend_streak(&mut self) {
        self.current_streak += 1;
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }

    pub fn break_streak(&mut self) {
        self.current_streak = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUp {
    pub previous_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
    pub stat_deltas: StatMap,
}

/// Effects of completing one quest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestReward {
    pub base_xp: u32,
    pub bonus: TelemetryBonus,
    pub stat: Option<(Stat, u32)>,
}

impl QuestReward {
    pub fn xp(&self) -> u32 {
        self.base_xp + self.bonus.total()
    }
}

/// Work out the reward for a quest reaching completion.
pub fn reward_for(quest: &Quest, metrics: Option<&DailyHealthMetrics>) -> QuestReward {
    QuestReward {
        base_xp: quest.xp_reward,
        bonus: metrics.map(telemetry_bonus).unwrap_or_default(),
        stat: quest
            .stat_bonus
            .map(|stat| (stat, stat_increment(quest.difficulty))),
    }
}

/// Apply a reward to progression. Stats land before XP so the level-up
/// event includes the stat this quest granted.
pub fn apply_reward(progress: &mut UserProgress, reward: &QuestReward) -> Option<LevelUp> {
    if let Some((stat, points)) = reward.stat {
        progress.add_stat(stat, points);
    }
    progress.add_xp(reward.xp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Workout;
    use crate::quest::fixtures::quest;

    fn metrics(steps: u32, workouts: &[u32], sleep_minutes: u32, calories: f64) -> DailyHealthMetrics {
        let mut m = DailyHealthMetrics::empty("u1", NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
        m.steps = steps;
        m.sleep_minutes = sleep_minutes;
        m.active_calories = calories;
        m.workouts = workouts
            .iter()
            .map(|d| Workout {
                kind: "run".into(),
                duration_minutes: *d,
                calories: None,
            })
            .collect();
        m
    }

    #[test]
    fn reference_day_yields_36_bonus_xp() {
        let bonus = telemetry_bonus(&metrics(12_000, &[30, 20], 480, 650.0));
        assert_eq!(bonus.steps, 10);
        assert_eq!(bonus.workouts, 10);
        assert_eq!(bonus.sleep, 10);
        assert_eq!(bonus.calories, 6);
        assert_eq!(bonus.total(), 36);
    }

    #[test]
    fn bonus_categories_cap_independently() {
        let bonus = telemetry_bonus(&metrics(50_000, &[10; 9], 600, 5000.0));
        assert_eq!(bonus.steps, 10);
        assert_eq!(bonus.workouts, 25);
        assert_eq!(bonus.sleep, 5);
        assert_eq!(bonus.calories, 10);

        let short = telemetry_bonus(&metrics(999, &[], 300, 99.0));
        assert_eq!(short.total(), 0);
    }

    #[test]
    fn sleep_band_edges() {
        assert_eq!(telemetry_bonus(&metrics(0, &[], 420, 0.0)).sleep, 10);
        assert_eq!(telemetry_bonus(&metrics(0, &[], 540, 0.0)).sleep, 10);
        assert_eq!(telemetry_bonus(&metrics(0, &[], 360, 0.0)).sleep, 5);
        assert_eq!(telemetry_bonus(&metrics(0, &[], 359, 0.0)).sleep, 0);
    }

    #[test]
    fn level_table_and_extension() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(3199), 9);
        assert_eq!(level_for_xp(3200), 10);
        assert_eq!(xp_for_level(11), 4000);
        assert_eq!(level_for_xp(4800), 12);
    }

    #[test]
    fn level_up_carries_stats_since_boundary() {
        let mut p = UserProgress::new("u1");
        p.add_stat(Stat::Strength, 2);
        assert!(p.add_xp(50).is_none());

        let mut q = quest("q1", "gym", 1.0, NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
        q.stat_bonus = Some(Stat::Strength);
        q.difficulty = Difficulty::Hard;
        q.xp_reward = 60;
        let reward = reward_for(&q, None);
        let up = apply_reward(&mut p, &reward).unwrap();

        assert_eq!(up.previous_level, 1);
        assert_eq!(up.new_level, 2);
        assert_eq!(up.stat_deltas.get(&Stat::Strength), Some(&5));
        assert!(p.stats_since_level_up.is_empty());
        assert_eq!(p.stat(Stat::Strength), 5);
    }

    #[test]
    fn stat_names_parse() {
        assert_eq!("Endurance".parse::<Stat>().unwrap(), Stat::Endurance);
        assert!("luck".parse::<Stat>().is_err());
    }
}
