use chrono_tz::Tz;
use questline_core::{MilestonePolicy, ReviewPolicy};

use crate::authoring::CollaboratorPolicy;

pub const DEFAULT_REGENERATION_CAP: u32 = 3;

/// Policy values for the request path. Built by the caller and passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Installation timezone; every "today" is a local date in it.
    pub timezone: Tz,
    pub regeneration_cap: u32,
    /// Review weeks end the day before this weekday (0 = Sunday .. 6 = Saturday).
    pub weekly_review_day: u8,
    pub milestone: MilestonePolicy,
    pub review: ReviewPolicy,
    pub collaborator: CollaboratorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            regeneration_cap: DEFAULT_REGENERATION_CAP,
            weekly_review_day: 0,
            milestone: MilestonePolicy::default(),
            review: ReviewPolicy::default(),
            collaborator: CollaboratorPolicy::default(),
        }
    }
}
