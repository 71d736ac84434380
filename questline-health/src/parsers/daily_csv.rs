//! Daily summary CSV exports (one row per day).
//!
//! Header (case-insensitive, any column order, unknown columns ignored):
//!   date,steps,active_calories,distance_km,floors,sleep,sleep_score,workouts
//!
//! - `date`: YYYY-MM-DD or MM/DD/YYYY
//! - `sleep`: minutes ("450"), or a duration ("7h 30m", "7:30")
//! - `workouts`: "run:30;strength:45" (kind:minutes, `;`-separated)

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use questline_core::Workout;
use regex::Regex;

use crate::types::HealthPatch;

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Minutes from "450", "7h 30m", "7h", "45m" or "7:30".
pub fn parse_duration_minutes(s: &str) -> Option<u32> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    if let Ok(m) = s.parse::<f64>() {
        return Some(m.max(0.0).round() as u32);
    }
    let hm = Regex::new(r"^(\d{1,2}):(\d{2})$").ok()?;
    if let Some(c) = hm.captures(&s) {
        let h: u32 = c[1].parse().ok()?;
        let m: u32 = c[2].parse().ok()?;
        return Some(h * 60 + m);
    }
    let units = Regex::new(r"^(?:(\d+)\s*h)?\s*(?:(\d+)\s*m(?:in)?)?$").ok()?;
    let c = units.captures(&s)?;
    if c.get(1).is_none() && c.get(2).is_none() {
        return None;
    }
    let h: u32 = c.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let m: u32 = c.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    Some(h * 60 + m)
}

fn parse_workouts(s: &str) -> Vec<Workout> {
    s.split(';')
        .filter_map(|item| {
            let (kind, minutes) = item.split_once(':')?;
            let kind = kind.trim().to_lowercase();
            if kind.is_empty() {
                return None;
            }
            Some(Workout {
                kind,
                duration_minutes: parse_duration_minutes(minutes)?,
                calories: None,
            })
        })
        .collect()
}

/// Parse CSV text for `user_id`. Rows with an unparseable date are skipped.
pub fn parse_daily_csv_str(text: &str, user_id: &str) -> Result<Vec<HealthPatch>> {
    let rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    parse_records(rdr, user_id)
}

pub fn parse_daily_csv(path: impl AsRef<Path>, user_id: &str) -> Result<Vec<HealthPatch>> {
    let rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path.as_ref())
        .with_context(|| format!("opening {}", path.as_ref().display()))?;
    parse_records(rdr, user_id)
}

fn parse_records<R: std::io::Read>(mut rdr: csv::Reader<R>, user_id: &str) -> Result<Vec<HealthPatch>> {
    let headers: Vec<String> = rdr
        .headers()
        .context("reading CSV header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let col = |name: &str| headers.iter().position(|h| h == name);
    let date_col = col("date").context("CSV has no 'date' column")?;
    let steps_col = col("steps");
    let cal_col = col("active_calories").or_else(|| col("calories"));
    let dist_col = col("distance_km");
    let floors_col = col("floors");
    let sleep_col = col("sleep").or_else(|| col("sleep_minutes"));
    let score_col = col("sleep_score");
    let workouts_col = col("workouts");

    let mut out = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

        let Some(date) = parse_date(field(Some(date_col))) else {
            continue;
        };

        let mut patch = HealthPatch::new(user_id, date, "csv");
        patch.steps = parse_number(field(steps_col)).map(|v| v.max(0.0) as u32);
        patch.active_calories = parse_number(field(cal_col));
        patch.distance_meters = parse_number(field(dist_col)).map(|km| km * 1000.0);
        patch.floors_climbed = parse_number(field(floors_col)).map(|v| v.max(0.0) as u32);
        patch.sleep_minutes = parse_duration_minutes(field(sleep_col));
        patch.sleep_score = parse_number(field(score_col)).map(|v| v.clamp(0.0, 100.0) as u32);
        patch.workouts = parse_workouts(field(workouts_col));
        out.push(patch);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_and_durations() {
        let csv = "Date,Steps,Active_Calories,Distance_km,Floors,Sleep,Workouts\n\
                   2026-03-01,\"12,000\",650,8.4,12,8h,run:30;strength:20\n\
                   not-a-date,1,1,1,1,1,\n\
                   03/02/2026,4000,,,,7:30,\n";
        let patches = parse_daily_csv_str(csv, "u1").unwrap();
        assert_eq!(patches.len(), 2);

        let first = &patches[0];
        assert_eq!(first.steps, Some(12_000));
        assert_eq!(first.active_calories, Some(650.0));
        assert_eq!(first.distance_meters, Some(8400.0));
        assert_eq!(first.sleep_minutes, Some(480));
        assert_eq!(first.workouts.len(), 2);
        assert_eq!(first.workouts[1].kind, "strength");

        let second = &patches[1];
        assert_eq!(second.date, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(second.active_calories, None);
        assert_eq!(second.sleep_minutes, Some(450));
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration_minutes("7h 30m"), Some(450));
        assert_eq!(parse_duration_minutes("45min"), Some(45));
        assert_eq!(parse_duration_minutes("420"), Some(420));
        assert_eq!(parse_duration_minutes("lots"), None);
        assert_eq!(parse_duration_minutes(""), None);
    }
}
