//! Fitness-aggregator webhook payloads (JSON).
//!
//! Expected envelope:
//!   { "type": "daily" | "sleep" | "activity",
//!     "user": { "reference_id": "<questline user id>", "provider": "FITBIT" },
//!     "data": [ { "metadata": { "start_time": RFC3339, "end_time": RFC3339, ... }, ... } ] }
//!
//! The day a record belongs to is the local date of `metadata.start_time`
//! (sleep uses `end_time`, the morning the user woke up), taken in the
//! offset the provider reports.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use questline_core::Workout;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{HealthPatch, PayloadKind};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: PayloadKind,
    user: WebhookUser,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookUser {
    reference_id: Option<String>,
    #[serde(default)]
    provider: Option<String>,
}

fn parse_ts(v: &Value, key: &str) -> Option<DateTime<FixedOffset>> {
    v.get("metadata")?
        .get(key)?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn num(v: &Value, path: &[&str]) -> Option<f64> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_f64()
}

fn record_date(v: &Value, kind: PayloadKind) -> Option<NaiveDate> {
    let key = match kind {
        PayloadKind::Sleep => "end_time",
        _ => "start_time",
    };
    parse_ts(v, key).map(|dt| dt.date_naive())
}

/// Normalize a webhook body into per-day patches.
///
/// Records without a usable timestamp are skipped; an envelope without a user
/// reference is an error since it cannot be attributed.
pub fn parse_webhook(body: &str) -> Result<Vec<HealthPatch>> {
    let env: Envelope = serde_json::from_str(body).context("parse webhook envelope")?;
    let Some(user_id) = env.user.reference_id.filter(|s| !s.trim().is_empty()) else {
        bail!("webhook payload has no user.reference_id");
    };
    let source = env
        .user
        .provider
        .map(|p| p.to_lowercase())
        .unwrap_or_else(|| "webhook".to_string());

    let mut out = Vec::new();
    for record in &env.data {
        let Some(date) = record_date(record, env.kind) else {
            continue;
        };
        let mut patch = HealthPatch::new(&user_id, date, &source);

        match env.kind {
            PayloadKind::Daily => {
                patch.steps = num(record, &["distance_data", "steps"]).map(|v| v.max(0.0) as u32);
                patch.distance_meters = num(record, &["distance_data", "distance_meters"]);
                patch.floors_climbed =
                    num(record, &["distance_data", "floors_climbed"]).map(|v| v.max(0.0) as u32);
                patch.active_calories = num(record, &["calories_data", "net_activity_calories"])
                    .or_else(|| num(record, &["calories_data", "active_calories"]));
            }
            PayloadKind::Sleep => {
                let asleep = num(
                    record,
                    &["sleep_durations_data", "asleep", "duration_asleep_state_seconds"],
                );
                patch.sleep_minutes = asleep.map(|s| (s.max(0.0) / 60.0).round() as u32);
                patch.sleep_score = num(record, &["scores", "sleep"]).map(|v| v.clamp(0.0, 100.0) as u32);
            }
            PayloadKind::Activity => {
                let seconds = num(record, &["active_durations_data", "activity_seconds"]).or_else(|| {
                    let start = parse_ts(record, "start_time")?;
                    let end = parse_ts(record, "end_time")?;
                    Some((end - start).num_seconds() as f64)
                });
                let kind = record
                    .get("metadata")
                    .and_then(|m| m.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("workout")
                    .to_lowercase();
                if let Some(seconds) = seconds.filter(|s| *s > 0.0) {
                    patch.workouts.push(Workout {
                        kind,
                        duration_minutes: (seconds / 60.0).round() as u32,
                        calories: num(record, &["calories_data", "total_burned_calories"]),
                    });
                }
            }
        }

        out.push(patch);
    }

    Ok(out)
}
