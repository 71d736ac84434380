//! Day-rollover maintenance: fail overdue quests and fold elapsed days into the streak.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::quest::{Quest, QuestStatus};
use crate::rewards::UserProgress;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Ids of quests moved to `failed`.
    pub expired: Vec<String>,
    /// Days folded into the streak, with whether the day kept it alive.
    pub days_evaluated: Vec<(NaiveDate, bool)>,
    pub streak_broken: bool,
}

impl SweepOutcome {
    pub fn is_noop(&self) -> bool {
        self.expired.is_empty() && self.days_evaluated.is_empty()
    }
}

/// Fail every non-terminal quest scheduled before `today`, then evaluate the
/// streak for each elapsed day not yet evaluated.
///
/// `quests` should hold the user's quests for the days being evaluated; they
/// are mutated in place. Running the sweep twice is a no-op the second time.
pub fn expire_and_score(progress: &mut UserProgress, quests: &mut [Quest], today: NaiveDate) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    for q in quests.iter_mut() {
        if q.scheduled_for < today && !q.is_terminal() && q.transition(QuestStatus::Failed).is_ok() {
            outcome.expired.push(q.id.clone());
        }
    }

    let mut days: BTreeMap<NaiveDate, bool> = BTreeMap::new();
    for q in quests.iter().filter(|q| q.scheduled_for < today) {
        if progress
            .streak_evaluated_through
            .is_some_and(|through| q.scheduled_for <= through)
        {
            continue;
        }
        let all_done = days.entry(q.scheduled_for).or_insert(true);
        *all_done &= q.status == QuestStatus::Completed;
    }

    for (day, all_done) in days {
        if all_done {
            progress.extend_streak();
        } else {
            progress.break_streak();
            outcome.streak_broken = true;
        }
        outcome.days_evaluated.push((day, all_done));
        progress.streak_evaluated_through = Some(day);
    }

    outcome
}
