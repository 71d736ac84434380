//! Normalized per-day health metrics and the metric -> progress channel table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub kind: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub calories: Option<f64>,
}

/// One user's health telemetry for one local day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHealthMetrics {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u32,
    pub active_calories: f64,
    pub distance_meters: f64,
    pub floors_climbed: u32,
    pub sleep_minutes: u32,
    #[serde(default)]
    pub sleep_score: Option<u32>,
    #[serde(default)]
    pub workouts: Vec<Workout>,
    /// Provider label, e.g. "terra", "csv".
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

impl DailyHealthMetrics {
    pub fn empty(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            steps: 0,
            active_calories: 0.0,
            distance_meters: 0.0,
            floors_climbed: 0,
            sleep_minutes: 0,
            sleep_score: None,
            workouts: Vec::new(),
            source: String::new(),
            received_at: None,
        }
    }

    pub fn workout_minutes(&self) -> u32 {
        self.workouts.iter().map(|w| w.duration_minutes).sum()
    }
}

/// Source metric for a progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthMetric {
    Steps,
    DistanceKm,
    ActiveCalories,
    Floors,
    SleepHours,
    WorkoutMinutes,
    WorkoutCount,
}

impl HealthMetric {
    pub fn value(&self, m: &DailyHealthMetrics) -> f64 {
        match self {
            HealthMetric::Steps => f64::from(m.steps),
            HealthMetric::DistanceKm => m.distance_meters / 1000.0,
            HealthMetric::ActiveCalories => m.active_calories,
            HealthMetric::Floors => f64::from(m.floors_climbed),
            HealthMetric::SleepHours => f64::from(m.sleep_minutes) / 60.0,
            HealthMetric::WorkoutMinutes => f64::from(m.workout_minutes()),
            HealthMetric::WorkoutCount => m.workouts.len() as f64,
        }
    }
}

/// Fixed channel table. A metric may feed several channel aliases.
pub const CHANNELS: &[(&str, HealthMetric)] = &[
    ("steps", HealthMetric::Steps),
    ("walking", HealthMetric::Steps),
    ("distance_km", HealthMetric::DistanceKm),
    ("distance", HealthMetric::DistanceKm),
    ("running", HealthMetric::DistanceKm),
    ("calories", HealthMetric::ActiveCalories),
    ("active_calories", HealthMetric::ActiveCalories),
    ("floors", HealthMetric::Floors),
    ("stairs", HealthMetric::Floors),
    ("sleep_hours", HealthMetric::SleepHours),
    ("sleep", HealthMetric::SleepHours),
    ("workout_minutes", HealthMetric::WorkoutMinutes),
    ("exercise", HealthMetric::WorkoutMinutes),
    ("gym", HealthMetric::WorkoutCount),
    ("workouts", HealthMetric::WorkoutCount),
];

pub fn channel_metric(metric_key: &str) -> Option<HealthMetric> {
    let key = metric_key.trim().to_lowercase();
    CHANNELS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, metric)| *metric)
}

/// Channel value for a quest metric key, if telemetry covers it.
pub fn channel_value(metrics: &DailyHealthMetrics, metric_key: &str) -> Option<f64> {
    channel_metric(metric_key).map(|m| m.value(metrics))
}
