use chrono::{DateTime, NaiveDate, Utc};
use questline_core::{DailyHealthMetrics, Workout};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Daily,
    Sleep,
    Activity,
}

/// Partial metrics for one user-day, as carried by a single provider payload.
///
/// Providers split a day across several deliveries (daily totals, sleep,
/// individual workouts). Each becomes a patch; patches are folded onto the
/// stored record for the day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthPatch {
    pub user_id: String,
    pub date: Option<NaiveDate>,
    pub steps: Option<u32>,
    pub active_calories: Option<f64>,
    pub distance_meters: Option<f64>,
    pub floors_climbed: Option<u32>,
    pub sleep_minutes: Option<u32>,
    pub sleep_score: Option<u32>,
    /// Workouts are appended, not replaced.
    pub workouts: Vec<Workout>,
    pub source: String,
}

impl HealthPatch {
    pub fn new(user_id: impl Into<String>, date: NaiveDate, source: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            date: Some(date),
            source: source.into(),
            ..Self::default()
        }
    }

    /// Fold this patch onto `base` (or an empty record for the day).
    ///
    /// Present scalar fields overwrite; workouts with the same kind and
    /// duration are not duplicated when a provider re-delivers.
    pub fn apply(self, base: Option<DailyHealthMetrics>, received_at: DateTime<Utc>) -> Option<DailyHealthMetrics> {
        let date = self.date?;
        let mut m = base.unwrap_or_else(|| DailyHealthMetrics::empty(&self.user_id, date));
        if let Some(v) = self.steps {
            m.steps = v;
        }
        if let Some(v) = self.active_calories {
            m.active_calories = v;
        }
        if let Some(v) = self.distance_meters {
            m.distance_meters = v;
        }
        if let Some(v) = self.floors_climbed {
            m.floors_climbed = v;
        }
        if let Some(v) = self.sleep_minutes {
            m.sleep_minutes = v;
        }
        if self.sleep_score.is_some() {
            m.sleep_score = self.sleep_score;
        }
        for w in self.workouts {
            let dup = m
                .workouts
                .iter()
                .any(|e| e.kind == w.kind && e.duration_minutes == w.duration_minutes);
            if !dup {
                m.workouts.push(w);
            }
        }
        m.source = self.source;
        m.received_at = Some(received_at);
        Some(m)
    }
}
