use std::sync::Arc;
use std::time::Duration;

use doser_core::mocks::GateClock;
use doser_core::{
    Doser, DoserError, FileStorage, MemoryStorage, Schedule, ScheduleState, ScheduleStore,
};
use doser_hardware::SimulatedMotorDriver;
use doser_traits::Storage;
use doser_traits::clock::Clock;
use doser_traits::clock::test_clock::{TestClock, TestWallClock};

/// 2023-11-14T00:00:00Z
const DAY: u32 = 1_699_920_000;
const NOW: u32 = DAY + 3600;

struct Rig {
    doser: Doser,
    motor: Arc<SimulatedMotorDriver>,
    storage: Arc<MemoryStorage>,
}

fn rig_with_clock(clock: impl Clock + Send + Sync + 'static) -> Rig {
    let motor = Arc::new(SimulatedMotorDriver::new());
    let storage = Arc::new(MemoryStorage::new());
    let doser = Doser::builder()
        .with_motor(motor.clone())
        .with_storage(storage.clone())
        .with_clock(clock)
        .with_wall_clock(TestWallClock::at(NOW))
        .build()
        .expect("build doser");
    Rig {
        doser,
        motor,
        storage,
    }
}

fn rig() -> Rig {
    rig_with_clock(TestClock::new())
}

fn stored(storage: &MemoryStorage, head: u8) -> Option<Schedule> {
    storage
        .get(ScheduleStore::NAMESPACE, &format!("sched{head}"))
        .unwrap()
        .map(|b| toml::from_str(std::str::from_utf8(&b).unwrap()).unwrap())
}

#[test]
fn set_schedule_persists_and_stamps() {
    let r = rig();
    let saved = r
        .doser
        .set_schedule(Schedule::interval(0, 2.0, 3600).with_name("kalk"))
        .unwrap();
    assert_eq!(saved.created_at, NOW);
    assert_eq!(saved.updated_at, NOW);
    assert_eq!(r.doser.get_schedule(0).unwrap(), Some(saved.clone()));
    assert_eq!(stored(&r.storage, 0), Some(saved));
}

#[test]
fn replacing_keeps_creation_time() {
    let r = rig();
    let mgr = r.doser.schedule_manager();
    mgr.set_schedule(Schedule::interval(1, 2.0, 3600), NOW).unwrap();
    let updated = mgr
        .set_schedule(Schedule::interval(1, 3.0, 7200), NOW + 500)
        .unwrap();
    assert_eq!(updated.created_at, NOW);
    assert_eq!(updated.updated_at, NOW + 500);
}

#[test]
fn invalid_schedule_changes_nothing() {
    let r = rig();
    let err = r
        .doser
        .set_schedule(Schedule::interval(0, 2.0, 30))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DoserError>(),
        Some(DoserError::Validation(_))
    ));
    assert_eq!(r.doser.get_schedule(0).unwrap(), None);
    assert!(r.storage.is_empty());

    let err = r.doser.get_schedule(7).unwrap_err();
    assert_eq!(err.downcast_ref::<DoserError>(), Some(&DoserError::InvalidHead(7)));
}

#[test]
fn failed_write_leaves_cache_unchanged() {
    let r = rig();
    let original = r.doser.set_schedule(Schedule::interval(0, 2.0, 3600)).unwrap();
    r.storage.set_fail_writes(true);
    let err = r
        .doser
        .set_schedule(Schedule::interval(0, 9.0, 600))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DoserError>(),
        Some(DoserError::Persistence(_))
    ));
    assert_eq!(r.doser.get_schedule(0).unwrap(), Some(original.clone()));
    assert!(r.doser.delete_schedule(0).is_err());
    assert_eq!(r.doser.get_schedule(0).unwrap(), Some(original));
}

#[test]
fn delete_is_a_soft_disable() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(2, 1.0, 3600)).unwrap();
    assert!(r.doser.delete_schedule(2).unwrap());
    let s = r.doser.get_schedule(2).unwrap().expect("record kept");
    assert!(!s.enabled);
    assert!(!stored(&r.storage, 2).unwrap().enabled);
    assert!(r.doser.schedules().is_empty());
    assert!(!r.doser.delete_schedule(3).unwrap());

    let report = r.doser.run_due_schedules(NOW);
    assert!(report.is_empty());
    assert_eq!(r.motor.start_count(2), 0);
}

#[test]
fn get_all_returns_enabled_in_head_order() {
    let r = rig();
    for head in [3, 0, 1] {
        r.doser
            .set_schedule(Schedule::interval(head, 1.0, 3600))
            .unwrap();
    }
    r.doser.delete_schedule(1).unwrap();
    let heads: Vec<u8> = r.doser.schedules().iter().map(|s| s.head).collect();
    assert_eq!(heads, vec![0, 3]);
}

#[test]
fn writes_to_one_head_leave_other_heads_alone() {
    let r = rig();
    let mgr = r.doser.schedule_manager();
    let neighbour = mgr
        .set_schedule(Schedule::daily(1, 3.0, 8 * 3600).with_name("mg"), NOW)
        .unwrap();
    let raw = |head: u8| {
        r.storage
            .get(ScheduleStore::NAMESPACE, &format!("sched{head}"))
            .unwrap()
    };
    let neighbour_bytes = raw(1);

    mgr.set_schedule(Schedule::interval(0, 2.0, 3600), NOW).unwrap();
    mgr.set_schedule(Schedule::interval(0, 5.0, 7200), NOW + 60).unwrap();
    mgr.update_last_execution(0, NOW + 120).unwrap();
    assert_eq!(r.doser.run_due_schedules(NOW + 7320).executed.len(), 1);
    mgr.delete_schedule(0, NOW + 7400).unwrap();

    assert_eq!(mgr.get_schedule(1).unwrap(), Some(neighbour.clone()));
    assert_eq!(stored(&r.storage, 1), Some(neighbour));
    assert_eq!(raw(1), neighbour_bytes);
    assert_eq!(r.motor.start_count(1), 0);
    for head in [2, 3] {
        assert_eq!(mgr.get_schedule(head).unwrap(), None);
        assert_eq!(raw(head), None);
    }
}

#[test]
fn stamps_from_an_earlier_boot_restart_the_interval() {
    let r = rig();
    let mgr = r.doser.schedule_manager();
    mgr.set_schedule(Schedule::interval(0, 1.0, 3600), NOW).unwrap();
    mgr.set_schedule(Schedule::interval(1, 1.0, 3600), NOW).unwrap();
    // Head 0 ran 500 s into this boot, head 1 late in a previous one.
    mgr.update_last_execution(0, 500).unwrap();
    mgr.update_last_execution(1, 90_000).unwrap();

    assert_eq!(mgr.rebase_uptime_stamps(NOW, 2_000), 2);
    assert_eq!(mgr.get_schedule(0).unwrap().unwrap().last_execution_time, NOW - 1_500);
    assert_eq!(mgr.get_schedule(1).unwrap().unwrap().last_execution_time, NOW);
    assert_eq!(stored(&r.storage, 1).unwrap().last_execution_time, NOW);

    // Already on wall time: nothing left to move.
    assert_eq!(mgr.rebase_uptime_stamps(NOW + 10, 2_010), 0);
    // Unsynced callers never rebase.
    assert_eq!(mgr.rebase_uptime_stamps(2_020, 2_020), 0);
}

#[test]
fn due_schedule_runs_once_per_interval() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(0, 2.0, 3600)).unwrap();

    let report = r.doser.run_due_schedules(NOW);
    assert_eq!(report.executed.len(), 1);
    let dose = &report.executed[0];
    assert_eq!(dose.head, 0);
    assert_eq!(dose.runtime_ms, 2000);
    assert!(dose.logged);

    let s = r.doser.get_schedule(0).unwrap().unwrap();
    assert_eq!(s.last_execution_time, NOW);
    assert_eq!(s.execution_count, 1);
    assert_eq!(stored(&r.storage, 0).unwrap().execution_count, 1);

    assert!(r.doser.run_due_schedules(NOW + 10).is_empty());
    assert!(r.doser.run_due_schedules(NOW + 3599).is_empty());
    assert_eq!(r.doser.run_due_schedules(NOW + 3600).executed.len(), 1);
    assert_eq!(r.motor.start_count(0), 2);
}

#[test]
fn failed_dispense_stays_due() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(0, 1.0, 3600)).unwrap();
    r.motor.set_fail_start(0, true);

    let report = r.doser.run_due_schedules(NOW);
    assert!(report.executed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.contains("simulated start failure"));
    let s = r.doser.get_schedule(0).unwrap().unwrap();
    assert_eq!(s.last_execution_time, 0);
    assert_eq!(s.execution_count, 0);
    assert_eq!(
        r.doser.schedule_manager().state(0, NOW + 1).unwrap(),
        ScheduleState::Due
    );

    r.motor.set_fail_start(0, false);
    assert_eq!(r.doser.run_due_schedules(NOW + 1).executed.len(), 1);
}

#[test]
fn one_failing_head_does_not_block_others() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(0, 1.0, 3600)).unwrap();
    r.doser.set_schedule(Schedule::interval(1, 1.0, 3600)).unwrap();
    r.motor.set_fail_start(0, true);

    let report = r.doser.run_due_schedules(NOW);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].head, 0);
    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.executed[0].head, 1);
}

#[test]
fn bookkeeping_write_failure_does_not_redose() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(0, 1.0, 3600)).unwrap();
    r.storage.set_fail_writes(true);

    let report = r.doser.run_due_schedules(NOW);
    assert_eq!(report.executed.len(), 1);
    assert!(!report.executed[0].logged);
    assert_eq!(
        r.doser.get_schedule(0).unwrap().unwrap().last_execution_time,
        NOW
    );
    assert!(r.doser.run_due_schedules(NOW + 1).is_empty());
    assert_eq!(r.motor.start_count(0), 1);
}

#[test]
fn schedule_lock_is_free_while_dispensing() {
    let gate = GateClock::new();
    let r = rig_with_clock(gate.clone());
    r.doser.set_schedule(Schedule::interval(0, 2.0, 3600)).unwrap();

    std::thread::scope(|s| {
        let tick = s.spawn(|| r.doser.run_due_schedules(NOW));
        gate.wait_entered(Duration::from_secs(5))
            .expect("scheduled dispense started");

        // Readers and writers are not blocked by the running dose.
        assert!(r.doser.get_schedule(0).unwrap().is_some());
        r.doser
            .set_schedule(Schedule::once(1, 1.0, NOW + 86_400))
            .unwrap();
        assert_eq!(
            r.doser.schedule_manager().state(0, NOW).unwrap(),
            ScheduleState::Executing
        );
        // An overlapping pass skips the executing slot.
        assert!(r.doser.run_due_schedules(NOW).is_empty());

        gate.release();
        let report = tick.join().unwrap();
        assert_eq!(report.executed.len(), 1);
    });

    assert_eq!(r.motor.start_count(0), 1);
    assert_eq!(
        r.doser.get_schedule(0).unwrap().unwrap().execution_count,
        1
    );
}

#[test]
fn deleted_during_dispense_is_not_revived() {
    let gate = GateClock::new();
    let r = rig_with_clock(gate.clone());
    r.doser.set_schedule(Schedule::interval(0, 2.0, 3600)).unwrap();

    std::thread::scope(|s| {
        let tick = s.spawn(|| r.doser.run_due_schedules(NOW));
        gate.wait_entered(Duration::from_secs(5))
            .expect("scheduled dispense started");
        assert!(r.doser.delete_schedule(0).unwrap());
        gate.release();
        let report = tick.join().unwrap();
        // The dose happened and is logged, but the disabled record is untouched.
        assert_eq!(report.executed.len(), 1);
        assert!(report.executed[0].logged);
    });

    let s = r.doser.get_schedule(0).unwrap().unwrap();
    assert!(!s.enabled);
    assert_eq!(s.last_execution_time, 0);
    assert_eq!(s.execution_count, 0);
}

#[test]
fn adhoc_and_scheduled_doses_share_a_head_lock() {
    let gate = GateClock::new();
    let r = rig_with_clock(gate.clone());
    r.doser.set_schedule(Schedule::interval(0, 2.0, 3600)).unwrap();

    std::thread::scope(|s| {
        let tick = s.spawn(|| r.doser.run_due_schedules(NOW));
        gate.wait_entered(Duration::from_secs(5))
            .expect("scheduled dispense started");
        let res = r.doser.dispense(0, 1.0);
        assert!(!res.success);
        assert!(res.error_message.contains("busy"));
        gate.release();
        tick.join().unwrap();
    });
}

#[test]
fn clear_all_removes_everything() {
    let r = rig();
    r.doser.set_schedule(Schedule::interval(0, 1.0, 3600)).unwrap();
    r.doser.set_schedule(Schedule::daily(3, 1.0, 3600)).unwrap();
    r.doser.clear_schedules().unwrap();
    assert!(r.doser.get_schedule(0).unwrap().is_none());
    assert!(r.doser.get_schedule(3).unwrap().is_none());
    assert!(
        r.storage
            .keys(ScheduleStore::NAMESPACE)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn update_last_execution_requires_a_schedule() {
    let r = rig();
    let mgr = r.doser.schedule_manager();
    assert!(mgr.update_last_execution(0, NOW).is_err());
    mgr.set_schedule(Schedule::interval(0, 1.0, 3600), NOW).unwrap();
    mgr.update_last_execution(0, NOW).unwrap();
    assert_eq!(mgr.state(0, NOW + 60).unwrap(), ScheduleState::Pending);
}

#[test]
fn corrupt_records_are_skipped_at_startup() {
    let storage = Arc::new(MemoryStorage::new());
    let store = ScheduleStore::new(storage.clone());
    store.save(&Schedule::interval(0, 1.0, 3600)).unwrap();
    storage
        .put(ScheduleStore::NAMESPACE, "sched2", b"enabled = maybe")
        .unwrap();

    let doser = Doser::builder()
        .with_motor(SimulatedMotorDriver::new())
        .with_storage(storage)
        .with_clock(TestClock::new())
        .with_wall_clock(TestWallClock::at(NOW))
        .build()
        .unwrap();
    assert!(doser.get_schedule(0).unwrap().is_some());
    assert!(doser.get_schedule(2).unwrap().is_none());
}

#[test]
fn execution_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        Doser::builder()
            .with_motor(SimulatedMotorDriver::new())
            .with_storage(FileStorage::open(dir.path()).unwrap())
            .with_clock(TestClock::new())
            .with_wall_clock(TestWallClock::at(NOW))
            .build()
            .unwrap()
    };

    {
        let doser = build();
        doser
            .set_schedule(Schedule::from_daily_target(1, 24.0, 12).unwrap())
            .unwrap();
        assert_eq!(doser.run_due_schedules(NOW).executed.len(), 1);
    }

    let doser = build();
    let s = doser.get_schedule(1).unwrap().expect("reloaded");
    assert_eq!(s.last_execution_time, NOW);
    assert_eq!(s.execution_count, 1);
    assert_eq!(s.daily_target_ml, Some(24.0));
    assert!(doser.run_due_schedules(NOW + 60).is_empty());
    assert_eq!(doser.run_due_schedules(NOW + 7200).executed.len(), 1);
}

#[test]
fn daily_target_progress() {
    let r = rig();
    r.doser
        .set_schedule(Schedule::from_daily_target(0, 24.0, 12).unwrap())
        .unwrap();
    for k in 0..6 {
        let report = r.doser.run_due_schedules(NOW + k * 7200);
        assert_eq!(report.executed.len(), 1, "dose {k}");
    }
    let summary = r.doser.daily_summary(0, NOW + 5 * 7200).unwrap();
    assert!((summary.scheduled_actual_ml - 12.0).abs() < 1e-4);
    assert!((summary.percent_complete() - 50.0).abs() < 1e-3);
    assert_eq!(summary.daily_target_ml, 24.0);
    assert_eq!(summary.doses_per_day, 12);
    assert!((summary.per_dose_volume_ml - 2.0).abs() < 1e-6);
    assert_eq!(summary.adhoc_total_ml, 0.0);
}
