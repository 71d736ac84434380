//! questline-health: telemetry normalization (webhook JSON, daily CSV exports)
//! into per-day patches that fold onto `DailyHealthMetrics`.

pub mod parsers;
pub mod types;

use anyhow::Result;

pub use parsers::daily_csv::{parse_daily_csv, parse_daily_csv_str};
pub use parsers::webhook::parse_webhook;
pub use types::{HealthPatch, PayloadKind};

/// A raw tracker payload as received.
#[derive(Debug, Clone)]
pub enum RawHealthPayload {
    /// Aggregator webhook body; the user comes from the envelope.
    Webhook(String),
    /// Daily summary CSV export for one user.
    Csv { user_id: String, text: String },
}

/// Normalize a raw payload into per-day patches, in payload order.
pub fn normalize_payload(raw: &RawHealthPayload) -> Result<Vec<HealthPatch>> {
    match raw {
        RawHealthPayload::Webhook(body) => parse_webhook(body),
        RawHealthPayload::Csv { user_id, text } => parse_daily_csv_str(text, user_id),
    }
}
