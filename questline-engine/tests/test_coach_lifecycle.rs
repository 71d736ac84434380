mod common;

use chrono::Duration;
use common::{coach_with, coach_with_config, day, monday_review_config, noon, FakeAuthoring};
use questline_core::{
    CoachError, DailyHealthMetrics, DraftKind, GoalStatus, MilestoneStatus, ProgressSource, Quest,
    QuestStatus, Stat, Verdict, Workout,
};
use questline_engine::Store;
use questline_health::HealthPatch;

fn by_metric<'a>(quests: &'a [Quest], metric: &str) -> &'a Quest {
    quests.iter().find(|q| q.metric_key == metric).unwrap()
}

fn sorted_ids(quests: &[Quest]) -> Vec<String> {
    let mut ids: Vec<String> = quests.iter().map(|q| q.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_set_goal_materializes_plan_and_replaces_previous() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());

    let first = coach.set_goal("ana", "Run a half marathon", None, noon(2)).await.unwrap();
    assert_eq!(first.goal.timeline_days, 90);
    assert_eq!(first.goal.start_date, day(2));
    assert_eq!(first.goal.target_date, day(2) + Duration::days(89));
    assert_eq!(first.plan.version, 1);
    assert_eq!(first.milestones.len(), 2);
    assert!(first.milestones.iter().all(|m| m.status == MilestoneStatus::Pending));
    assert!(first.replaced_goal_id.is_none());

    let second = coach.set_goal("ana", "Learn Spanish basics", Some(60), noon(3)).await.unwrap();
    assert_eq!(second.replaced_goal_id.as_deref(), Some(first.goal.id.as_str()));
    assert_eq!(store.active_goal("ana").unwrap().unwrap().id, second.goal.id);
    assert_eq!(store.goal(&first.goal.id).unwrap().unwrap().status, GoalStatus::Abandoned);
}

#[tokio::test]
async fn test_rejected_goal_persists_nothing() {
    let (coach, store, authoring) = coach_with(FakeAuthoring::default());

    let err = coach.set_goal("ana", "be vague about it", None, noon(2)).await.unwrap_err();
    match err {
        CoachError::ValidationRejected { scores, suggestions, .. } => {
            assert_eq!(scores.unwrap().clarity, 3);
            assert!(!suggestions.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(authoring.plan_calls(), 0);
    assert!(store.active_goal("ana").unwrap().is_none());
    assert!(store.user_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_structural_plan_draft_is_not_repaired() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());

    let err = coach.set_goal("ana", "a broken plan goal", None, noon(2)).await.unwrap_err();
    match err {
        CoachError::StructuralDraft { kind, violations } => {
            assert_eq!(kind, DraftKind::Plan);
            assert!(!violations.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.active_goal("ana").unwrap().is_none());
}

#[tokio::test]
async fn test_generation_is_idempotent_per_day() {
    let (coach, _, authoring) = coach_with(FakeAuthoring::default());

    let first = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    let second = coach.generate_daily_quests("ana", day(2)).await.unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(sorted_ids(&first), sorted_ids(&second));
    assert_eq!(authoring.quest_calls(), 1);
    assert!(first.iter().all(|q| q.status == QuestStatus::Pending && q.regeneration_count == 0));
    assert_eq!(by_metric(&first, "steps").xp_reward, 25);
}

#[tokio::test]
async fn test_regeneration_cap_leaves_set_unchanged() {
    let (coach, store, authoring) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();

    let mut last_ids = Vec::new();
    for i in 1..=3u32 {
        let outcome = coach.regenerate_quests("ana", Some("too hard"), noon(2)).await.unwrap();
        assert_eq!(outcome.regenerations_used, i);
        assert_eq!(outcome.regenerations_remaining, 3 - i);
        assert_eq!(outcome.can_regenerate, i < 3);
        assert_eq!(outcome.quests.len(), 3);
        assert!(outcome.quests.iter().all(|q| q.regeneration_count == i));
        last_ids = sorted_ids(&outcome.quests);
    }

    let err = coach.regenerate_quests("ana", None, noon(2)).await.unwrap_err();
    assert!(matches!(err, CoachError::CapacityExceeded { cap: 3, used: 3 }));
    assert_eq!(sorted_ids(&store.quests_on("ana", day(2)).unwrap()), last_ids);
    assert_eq!(authoring.quest_calls(), 4);
}

#[tokio::test]
async fn test_regeneration_sees_the_set_it_replaces() {
    let (coach, _, authoring) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();
    coach.regenerate_quests("ana", Some("bored"), noon(2)).await.unwrap();

    let seen = authoring.seen_recent_types();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].is_empty());
    for metric in ["steps", "sleep_hours", "reading"] {
        assert!(seen[1].iter().any(|m| m == metric), "missing {metric}");
    }
}

#[tokio::test]
async fn test_regeneration_keeps_completed_quests() {
    let (coach, _, _) = coach_with(FakeAuthoring::default());
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    let done = by_metric(&quests, "steps").id.clone();
    coach.complete_quest("ana", &done, None, noon(2)).await.unwrap();

    let outcome = coach.regenerate_quests("ana", None, noon(2)).await.unwrap();
    assert_eq!(outcome.quests.len(), 4);
    let kept = outcome.quests.iter().find(|q| q.id == done).unwrap();
    assert_eq!(kept.status, QuestStatus::Completed);
    assert_eq!(
        outcome.quests.iter().filter(|q| q.status == QuestStatus::Pending).count(),
        3
    );
}

#[tokio::test]
async fn test_partial_completion_only_records_progress() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    let steps = by_metric(&quests, "steps").id.clone();

    let partial = coach.complete_quest("ana", &steps, Some(5_000.0), noon(2)).await.unwrap();
    assert!(!partial.completed);
    assert_eq!(partial.xp_awarded, 0);
    assert_eq!(partial.quest.status, QuestStatus::InProgress);
    assert_eq!(partial.quest.current_value, 5_000.0);
    assert_eq!(store.progress("ana").unwrap().unwrap().total_xp, 0);

    let full = coach.complete_quest("ana", &steps, None, noon(2)).await.unwrap();
    assert!(full.completed);
    assert_eq!(full.xp_awarded, 25);
    assert_eq!(full.quest.status, QuestStatus::Completed);

    let again = coach.complete_quest("ana", &steps, None, noon(2)).await.unwrap_err();
    assert!(matches!(again, CoachError::AlreadyTerminal { .. }));
    assert_eq!(store.progress("ana").unwrap().unwrap().total_xp, 25);
}

#[tokio::test]
async fn test_telemetry_completes_quests_and_wins_over_manual() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    let steps = by_metric(&quests, "steps").id.clone();
    let sleep = by_metric(&quests, "sleep_hours").id.clone();

    let mut metrics = DailyHealthMetrics::empty("ana", day(2));
    metrics.steps = 8_500;
    metrics.sleep_minutes = 450;
    metrics.active_calories = 420.0;
    metrics.workouts = vec![Workout {
        kind: "run".into(),
        duration_minutes: 30,
        calories: None,
    }];

    // bonus = 8 (steps) + 5 (one workout) + 10 (7.5h sleep) + 4 (calories) = 27
    let ingest = coach.ingest_health_data(metrics, noon(2)).await.unwrap();
    assert_eq!(ingest.updated_quests.len(), 2);
    assert_eq!(ingest.completions.len(), 1);
    assert_eq!(ingest.completions[0].quest.id, sleep);
    assert_eq!(ingest.completions[0].xp_awarded, 10 + 27);

    let stored = store.quest(&steps).unwrap().unwrap();
    assert_eq!(stored.status, QuestStatus::InProgress);
    assert_eq!(stored.current_value, 8_500.0);
    assert_eq!(stored.progress_source, ProgressSource::Telemetry);

    let manual = coach.update_quest_progress("ana", &steps, 12_000.0, noon(2)).await.unwrap();
    assert!(!manual.completed);
    assert_eq!(manual.quest.current_value, 8_500.0);

    let explicit = coach.complete_quest("ana", &steps, None, noon(2)).await.unwrap();
    assert!(explicit.completed);
    assert_eq!(explicit.xp_awarded, 25 + 27);

    let progress = store.progress("ana").unwrap().unwrap();
    assert_eq!(progress.total_xp, 37 + 52);
    assert_eq!(progress.stat(Stat::Vitality), 1);
    assert_eq!(progress.stat(Stat::Endurance), 2);
}

#[tokio::test]
async fn test_telemetry_milestone_bonus_reports_level_up() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    coach.set_goal("ana", "Run a half marathon", None, noon(2)).await.unwrap();
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    for metric in ["sleep_hours", "reading"] {
        let id = by_metric(&quests, metric).id.clone();
        let manual = coach.complete_quest("ana", &id, None, noon(2)).await.unwrap();
        assert!(manual.milestones_reached.is_empty());
    }
    assert_eq!(store.progress("ana").unwrap().unwrap().total_xp, 60);

    let mut metrics = DailyHealthMetrics::empty("ana", day(2));
    metrics.steps = 10_000;
    let ingest = coach.ingest_health_data(metrics, noon(2)).await.unwrap();

    assert_eq!(ingest.completions.len(), 1);
    assert_eq!(ingest.completions[0].xp_awarded, 25 + 10);
    // 95 XP is still level 1; the milestone bonus crosses 100
    assert!(ingest.completions[0].level_up.is_none());
    assert_eq!(ingest.milestones_reached.len(), 1);
    assert_eq!(ingest.milestones_reached[0].bonus_xp, 50);
    let up = ingest.level_up.expect("bonus level up");
    assert_eq!((up.previous_level, up.new_level), (1, 2));
    assert_eq!(up.total_xp, 145);

    let progress = store.progress("ana").unwrap().unwrap();
    assert_eq!(progress.total_xp, 145);
    assert_eq!(progress.level, 2);
}

#[tokio::test]
async fn test_ingest_patch_merges_partial_payloads() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();

    let mut steps = HealthPatch::new("ana", day(2), "fitbit");
    steps.steps = Some(10_500);
    let first = coach.ingest_patch(steps, noon(2)).await.unwrap();
    assert_eq!(first.completions.len(), 1);
    assert_eq!(first.completions[0].xp_awarded, 25 + 10);

    let mut sleep = HealthPatch::new("ana", day(2), "fitbit");
    sleep.sleep_minutes = Some(480);
    let second = coach.ingest_patch(sleep, noon(2)).await.unwrap();
    assert_eq!(second.completions.len(), 1);
    assert_eq!(second.completions[0].xp_awarded, 10 + 10 + 10);

    let merged = store.health_metrics("ana", day(2)).unwrap().unwrap();
    assert_eq!(merged.steps, 10_500);
    assert_eq!(merged.sleep_minutes, 480);
}

#[tokio::test]
async fn test_milestone_bonus_is_paid_once() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    let setup = coach.set_goal("ana", "Run a half marathon", None, noon(2)).await.unwrap();
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    assert!(quests.iter().all(|q| q.phase_number == Some(1)));

    let mut last = None;
    for metric in ["steps", "sleep_hours", "reading"] {
        let id = by_metric(&quests, metric).id.clone();
        last = Some(coach.complete_quest("ana", &id, None, noon(2)).await.unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.milestones_reached.len(), 1);
    let reached = &last.milestones_reached[0];
    assert_eq!(reached.milestone_index, 0);
    assert_eq!(reached.bonus_xp, 50);
    assert_eq!(reached.unlock.as_deref(), Some("starter badge"));
    assert_eq!(last.level_up.as_ref().map(|l| l.new_level), Some(2));

    let progress = store.progress("ana").unwrap().unwrap();
    assert_eq!(progress.total_xp, 25 + 10 + 50 + 50);
    let records = store.milestones(&setup.goal.id).unwrap();
    assert_eq!(records[0].status, MilestoneStatus::Completed);
    assert_eq!(records[0].bonus_xp_awarded, 50);

    let err = coach.update_milestone_progress("ana", 0, 100.0, noon(2)).await.unwrap_err();
    assert!(matches!(err, CoachError::AlreadyTerminal { .. }));

    let status = coach.daily_status("ana", day(2)).unwrap();
    assert_eq!(status.next_milestone.as_ref().map(|m| m.index), Some(1));
    assert_eq!(status.current_phase.as_ref().map(|p| p.number), Some(1));

    let update = coach.update_milestone_progress("ana", 1, 40.0, noon(3)).await.unwrap();
    assert!(update.reached.is_none());
    assert_eq!(update.record.status, MilestoneStatus::InProgress);
    let lower = coach.update_milestone_progress("ana", 1, 30.0, noon(3)).await.unwrap();
    assert_eq!(lower.record.completion_percentage, 40.0);
    let done = coach.update_milestone_progress("ana", 1, 100.0, noon(4)).await.unwrap();
    assert_eq!(done.reached.map(|r| r.bonus_xp), Some(200));
}

#[tokio::test]
async fn test_expiry_sweep_scores_streak_once() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());

    for q in coach.generate_daily_quests("ana", day(2)).await.unwrap() {
        coach.complete_quest("ana", &q.id, None, noon(2)).await.unwrap();
    }
    let day3 = coach.generate_daily_quests("ana", day(3)).await.unwrap();
    coach.complete_quest("ana", &day3[0].id, None, noon(3)).await.unwrap();

    let sweep = coach.expire_overdue("ana", day(4)).await.unwrap();
    assert_eq!(sweep.expired.len(), 2);
    assert_eq!(sweep.days_evaluated, vec![(day(2), true), (day(3), false)]);
    assert!(sweep.streak_broken);

    let progress = store.progress("ana").unwrap().unwrap();
    assert_eq!(progress.current_streak, 0);
    assert_eq!(progress.longest_streak, 1);
    let failed = store
        .quests_on("ana", day(3))
        .unwrap()
        .into_iter()
        .filter(|q| q.status == QuestStatus::Failed)
        .count();
    assert_eq!(failed, 2);

    assert!(coach.expire_overdue("ana", day(4)).await.unwrap().is_noop());
}

#[tokio::test]
async fn test_skip_and_ownership_guards() {
    let (coach, _, _) = coach_with(FakeAuthoring::default());
    let quests = coach.generate_daily_quests("ana", day(2)).await.unwrap();
    let id = quests[0].id.clone();

    assert!(matches!(
        coach.update_quest_progress("ben", &id, 1.0, noon(2)).await,
        Err(CoachError::NotFound { .. })
    ));

    let skipped = coach.skip_quest("ana", &id).await.unwrap();
    assert_eq!(skipped.status, QuestStatus::Skipped);
    assert!(matches!(
        coach.complete_quest("ana", &id, None, noon(2)).await,
        Err(CoachError::AlreadyTerminal { .. })
    ));
    assert!(matches!(
        coach.skip_quest("ana", &id).await,
        Err(CoachError::AlreadyTerminal { .. })
    ));
}

#[tokio::test]
async fn test_weekly_review_is_created_once() {
    let (coach, _, _) = coach_with_config(FakeAuthoring::default(), monday_review_config());
    for d in 2..=8 {
        let quests = coach.generate_daily_quests("ana", day(d)).await.unwrap();
        if d < 8 {
            for q in quests {
                coach.complete_quest("ana", &q.id, None, noon(d)).await.unwrap();
            }
        }
    }
    coach.expire_overdue("ana", day(9)).await.unwrap();
    assert!(coach.daily_status("ana", day(9)).unwrap().weekly_review_due);

    let review = coach.weekly_review("ana", day(9), noon(9)).await.unwrap().unwrap();
    assert_eq!((review.week_start, review.week_end), (day(2), day(8)));
    assert_eq!(review.total_quests, 21);
    assert_eq!(review.completed_quests, 18);
    assert_eq!(review.failed_quests, 3);
    assert_eq!(review.verdict, Verdict::Good);
    assert!(!review.streak_maintained);

    let again = coach.weekly_review("ana", day(9), noon(10)).await.unwrap().unwrap();
    assert_eq!(again.id, review.id);
    assert!(!coach.daily_status("ana", day(9)).unwrap().weekly_review_due);

    // the rest of the week still points at the reviewed week
    for d in 10..=15 {
        assert!(!coach.daily_status("ana", day(d)).unwrap().weekly_review_due);
        let later = coach.weekly_review("ana", day(d), noon(d)).await.unwrap().unwrap();
        assert_eq!(later.id, review.id);
    }

    assert!(coach.weekly_review("nobody", day(9), noon(9)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sunday_review_covers_sunday_to_saturday() {
    let (coach, _, _) = coach_with(FakeAuthoring::default());
    for d in 1..=7 {
        for q in coach.generate_daily_quests("ana", day(d)).await.unwrap() {
            coach.complete_quest("ana", &q.id, None, noon(d)).await.unwrap();
        }
    }
    // 2026-03-08 is a Sunday
    assert!(coach.daily_status("ana", day(8)).unwrap().weekly_review_due);
    let review = coach.weekly_review("ana", day(8), noon(8)).await.unwrap().unwrap();
    assert_eq!((review.week_start, review.week_end), (day(1), day(7)));
    assert_eq!(review.completed_quests, 21);
    assert_eq!(review.verdict, Verdict::Excellent);

    let monday = coach.weekly_review("ana", day(9), noon(9)).await.unwrap().unwrap();
    assert_eq!(monday.id, review.id);
    assert!(!coach.daily_status("ana", day(14)).unwrap().weekly_review_due);

    // next Sunday reviews 3/8 to 3/14, which has no quests
    assert!(coach.weekly_review("ana", day(15), noon(15)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_review_xp_includes_milestone_bonus() {
    let (coach, _, _) = coach_with_config(FakeAuthoring::default(), monday_review_config());
    coach.set_goal("ana", "Run a half marathon", None, noon(2)).await.unwrap();
    for q in coach.generate_daily_quests("ana", day(2)).await.unwrap() {
        coach.complete_quest("ana", &q.id, None, noon(2)).await.unwrap();
    }

    let review = coach.weekly_review("ana", day(9), noon(9)).await.unwrap().unwrap();
    assert_eq!(review.completed_quests, 3);
    assert_eq!(review.xp_earned, 25 + 10 + 50 + 50);
}

#[tokio::test]
async fn test_unreachable_collaborator_retries_once() {
    let (coach, store, authoring) = coach_with(FakeAuthoring {
        unreachable: true,
        ..FakeAuthoring::default()
    });

    let err = coach.generate_daily_quests("ana", day(2)).await.unwrap_err();
    assert!(matches!(err, CoachError::CollaboratorUnavailable(_)));
    assert_eq!(authoring.quest_calls(), 2);
    assert!(store.quests_on("ana", day(2)).unwrap().is_empty());
}
