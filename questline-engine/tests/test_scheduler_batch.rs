mod common;

use chrono::{NaiveTime, TimeZone, Utc};
use common::{coach_with, day, noon, FakeAuthoring};
use questline_core::{GoalStatus, MilestoneStatus};
use questline_engine::{Scheduler, SchedulerConfig, Store, TickHooks, TickReport};

/// Skips the first `skip` ticks, then lets every tick through.
#[derive(Default)]
struct CountingHooks {
    skip: u32,
    before: u32,
    after: u32,
    started: u32,
}

impl TickHooks for CountingHooks {
    fn before_tick(&mut self) -> bool {
        self.before += 1;
        self.before > self.skip
    }

    fn after_tick(&mut self, report: &TickReport) {
        self.after += 1;
        if report.started_any() {
            self.started += 1;
        }
    }
}

#[tokio::test]
async fn test_batch_isolates_failing_user() {
    let (coach, store, _) = coach_with(FakeAuthoring {
        empty_quests_for: vec!["b".to_string()],
        ..FakeAuthoring::default()
    });
    for user in ["a", "b", "c"] {
        coach.set_goal(user, "Run a half marathon", None, noon(2)).await.unwrap();
    }

    let scheduler = Scheduler::new(coach.clone(), SchedulerConfig::default()).unwrap();
    let result = scheduler.run_scheduled_generation(day(3)).await;

    assert_eq!(result.processed_users, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].user_id, "b");
    assert_eq!(result.errors[0].code, "structural_draft");
    assert_eq!(store.quests_on("a", day(3)).unwrap().len(), 3);
    assert_eq!(store.quests_on("c", day(3)).unwrap().len(), 3);
    assert!(store.quests_on("b", day(3)).unwrap().is_empty());
}

#[tokio::test]
async fn test_generation_batch_is_idempotent() {
    let (coach, store, authoring) = coach_with(FakeAuthoring::default());
    coach.set_goal("ana", "Run a half marathon", None, noon(2)).await.unwrap();
    let scheduler = Scheduler::new(coach.clone(), SchedulerConfig::default()).unwrap();

    let first = scheduler.run_scheduled_generation(day(3)).await;
    let ids: Vec<String> = store.quests_on("ana", day(3)).unwrap().into_iter().map(|q| q.id).collect();
    let second = scheduler.run_scheduled_generation(day(3)).await;

    assert_eq!(first.processed_users, 1);
    assert_eq!(second.processed_users, 1);
    assert!(second.errors.is_empty());
    assert_eq!(authoring.quest_calls(), 1);
    let again: Vec<String> = store.quests_on("ana", day(3)).unwrap().into_iter().map(|q| q.id).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(again, ids);
}

#[tokio::test]
async fn test_tick_runs_each_job_once_per_day() {
    let (coach, store, authoring) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();

    // 2026-03-08 is a Sunday
    let config = SchedulerConfig {
        quest_generation_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        weekly_review_day: 0,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(coach.clone(), config).unwrap();

    let early = scheduler.tick(Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap()).await;
    assert!(early.generation.is_none() && early.review.is_none());

    let due = scheduler.tick(Utc.with_ymd_and_hms(2026, 3, 3, 7, 0, 0).unwrap()).await;
    assert_eq!(due.generation.map(|r| r.processed_users), Some(1));
    assert!(due.review.is_none());

    let later = scheduler.tick(Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap()).await;
    assert!(later.generation.is_none());
    assert_eq!(authoring.quest_calls(), 2);

    let sunday = scheduler.tick(Utc.with_ymd_and_hms(2026, 3, 8, 7, 0, 0).unwrap()).await;
    assert!(sunday.generation.is_some());
    assert_eq!(sunday.review.map(|r| r.processed_users), Some(1));
    assert!(store.review("ana", day(1)).unwrap().is_some());
}

#[tokio::test]
async fn test_generation_closes_elapsed_goal() {
    let (coach, store, _) = coach_with(FakeAuthoring::default());
    let setup = coach.set_goal("ana", "Meditate every day", Some(7), noon(2)).await.unwrap();
    assert_eq!(setup.goal.target_date, day(8));

    let scheduler = Scheduler::new(coach.clone(), SchedulerConfig::default()).unwrap();
    let result = scheduler.run_scheduled_generation(day(9)).await;
    assert_eq!(result.processed_users, 1);

    let goal = store.goal(&setup.goal.id).unwrap().unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    let records = store.milestones(&goal.id).unwrap();
    assert!(records.iter().all(|r| r.status == MilestoneStatus::Missed));

    let quests = store.quests_on("ana", day(9)).unwrap();
    assert_eq!(quests.len(), 3);
    assert!(quests.iter().all(|q| q.goal_id.is_none()));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (coach, _, authoring) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();

    let config = SchedulerConfig {
        quest_generation_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        tick_interval: std::time::Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(coach.clone(), config).unwrap();
    let mut hooks = CountingHooks::default();
    scheduler
        .run(tokio::time::sleep(std::time::Duration::from_millis(100)), &mut hooks)
        .await;

    assert_eq!(hooks.started, 1);
    assert!(hooks.after > 1);
    assert_eq!(hooks.after, hooks.before);
    assert_eq!(authoring.quest_calls(), 2);
}

#[tokio::test]
async fn test_skipped_ticks_do_no_work() {
    let (coach, _, authoring) = coach_with(FakeAuthoring::default());
    coach.generate_daily_quests("ana", day(2)).await.unwrap();

    let config = SchedulerConfig {
        quest_generation_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        tick_interval: std::time::Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(coach.clone(), config).unwrap();
    let mut hooks = CountingHooks {
        skip: u32::MAX,
        ..CountingHooks::default()
    };
    scheduler
        .run(tokio::time::sleep(std::time::Duration::from_millis(60)), &mut hooks)
        .await;

    assert!(hooks.before > 0);
    assert_eq!(hooks.after, 0);
    assert_eq!(authoring.quest_calls(), 1);
}

#[test]
fn scheduler_rejects_review_day_the_coach_does_not_use() {
    let (coach, _, _) = coach_with(FakeAuthoring::default());
    let config = SchedulerConfig {
        weekly_review_day: 3,
        ..SchedulerConfig::default()
    };
    assert!(Scheduler::new(coach, config).is_err());
}
