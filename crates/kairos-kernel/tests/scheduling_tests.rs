//! Integration tests for event ordering, suspension and cancellation.
//!
//! Every test drives a real kernel: actions run on pooled process threads and
//! report what they observe through a shared log.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use kairos_kernel::prelude::*;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default(), TraceMode::Off).unwrap()
}

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// An action that appends `label@now` to the log and returns.
fn note(log: &Log, owner: &str, label: &'static str) -> Action {
    let log = Arc::clone(log);
    Action::new(NamedOwner::shared(owner), label, move |ctx| {
        log.lock().push(format!("{label}@{}", ctx.now()));
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn equal_time_orders_by_priority_then_most_recent_first() {
    let kernel = kernel();
    let log = log();
    kernel.schedule_process(ManagerId::ROOT, 0, 5, note(&log, "x", "first5")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 0, 1, note(&log, "x", "prio1")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 0, 5, note(&log, "x", "second5")).unwrap();

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["prio1@0", "second5@0", "first5@0"]);
}

fn run_last_workload(fifo: bool) -> Vec<String> {
    let kernel = kernel();
    let log = log();
    for (priority, name) in [(1, "a"), (2, "b"), (3, "c")] {
        let log = Arc::clone(&log);
        let action = Action::new(NamedOwner::shared(name), "step", move |ctx| {
            log.lock().push(format!("before-{name}"));
            if fifo {
                ctx.schedule_last_fifo()?;
            } else {
                ctx.schedule_last_lifo()?;
            }
            log.lock().push(format!("after-{name}@{}", ctx.now()));
            Ok(())
        });
        kernel.schedule_process(ManagerId::ROOT, 4, priority, action).unwrap();
    }
    kernel.run().unwrap();
    entries(&log)
}

#[test]
fn run_last_fifo_preserves_scheduling_order() {
    assert_eq!(
        run_last_workload(true),
        vec!["before-a", "before-b", "before-c", "after-a@4", "after-b@4", "after-c@4"]
    );
}

#[test]
fn run_last_lifo_reverses_scheduling_order() {
    assert_eq!(
        run_last_workload(false),
        vec!["before-a", "before-b", "before-c", "after-c@4", "after-b@4", "after-a@4"]
    );
}

#[test]
fn fifo_run_last_goes_behind_regular_events_scheduled_later() {
    let kernel = kernel();
    let log = log();
    let inner = Arc::clone(&log);
    let late = note(&log, "x", "regular");
    let action = Action::new(NamedOwner::shared("x"), "yield", move |ctx| {
        ctx.schedule_process(0, PRIO_LOWEST, late)?;
        ctx.schedule_last_fifo()?;
        inner.lock().push(format!("yielded@{}", ctx.now()));
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 2, PRIO_DEFAULT, action).unwrap();
    kernel.run().unwrap();
    assert_eq!(entries(&log), vec!["regular@2", "yielded@2"]);
}

#[test]
fn zero_delay_wait_does_not_suspend() {
    let kernel = kernel();
    let log = log();
    let inner = Arc::clone(&log);
    let other = note(&log, "x", "other");
    let action = Action::new(NamedOwner::shared("x"), "spin", move |ctx| {
        ctx.schedule_process(0, PRIO_HIGHEST, other)?;
        ctx.wait(0, PRIO_DEFAULT)?;
        inner.lock().push("still-running".to_owned());
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    kernel.run().unwrap();
    assert_eq!(entries(&log), vec!["still-running", "other@0"]);
}

#[test]
fn single_process_scheduling_deduplicates() {
    let kernel = kernel();
    let owner = NamedOwner::shared("Door");
    let noop = |owner: &OwnerRef, name: &str| Action::new(owner.clone(), name.to_owned(), |_ctx| Ok(()));

    assert!(kernel.schedule_single_process(ManagerId::ROOT, 10, 5, noop(&owner, "open")).unwrap());
    assert!(!kernel.schedule_single_process(ManagerId::ROOT, 10, 5, noop(&owner, "open")).unwrap());
    assert_eq!(kernel.pending_events(ManagerId::ROOT).unwrap(), 1);

    // Any difference in time, priority, owner identity or action name counts.
    assert!(kernel.schedule_single_process(ManagerId::ROOT, 11, 5, noop(&owner, "open")).unwrap());
    assert!(kernel.schedule_single_process(ManagerId::ROOT, 10, 4, noop(&owner, "open")).unwrap());
    assert!(kernel.schedule_single_process(ManagerId::ROOT, 10, 5, noop(&owner, "close")).unwrap());
    let twin = NamedOwner::shared("Door");
    assert!(kernel.schedule_single_process(ManagerId::ROOT, 10, 5, noop(&twin, "open")).unwrap());
    assert_eq!(kernel.pending_events(ManagerId::ROOT).unwrap(), 5);
}

#[test]
fn single_process_from_inside_an_action() {
    let kernel = kernel();
    let runs = Arc::new(AtomicUsize::new(0));
    let owner = NamedOwner::shared("Bell");
    let counter = Arc::clone(&runs);
    let ring_owner = owner.clone();
    let action = Action::new(owner, "trigger", move |ctx| {
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            ctx.schedule_single_process(
                5,
                PRIO_DEFAULT,
                Action::new(ring_owner.clone(), "ring", move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )?;
        }
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    kernel.run().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Conditional waits
// ---------------------------------------------------------------------------

#[test]
fn wait_until_resumes_once_on_the_run_last_slot() {
    let kernel = kernel();
    let log = log();
    let flag = Arc::new(AtomicBool::new(false));

    let waiter_log = Arc::clone(&log);
    let waiter_flag = Arc::clone(&flag);
    let waiter = Action::new(NamedOwner::shared("Waiter"), "wait", move |ctx| {
        while !waiter_flag.load(Ordering::SeqCst) {
            ctx.wait_until()?;
        }
        ctx.wait_until_ended()?;
        waiter_log.lock().push(format!("resumed@{}", ctx.now()));
        Ok(())
    });

    let setter_log = Arc::clone(&log);
    let setter_flag = Arc::clone(&flag);
    let setter = Action::new(NamedOwner::shared("Setter"), "set", move |ctx| {
        setter_flag.store(true, Ordering::SeqCst);
        setter_log.lock().push(format!("set@{}", ctx.now()));
        Ok(())
    });

    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, waiter).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 10, PRIO_HIGHEST, setter).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 10, PRIO_LOWEST, note(&log, "x", "late")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 20, PRIO_DEFAULT, note(&log, "x", "next")).unwrap();

    kernel.run().unwrap();
    assert_eq!(entries(&log), vec!["set@10", "late@10", "resumed@10", "next@20"]);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 0);
}

#[test]
fn wait_until_ended_without_waiting_is_a_no_op() {
    let kernel = kernel();
    let log = log();
    let inner = Arc::clone(&log);
    let other = note(&log, "x", "other");
    let action = Action::new(NamedOwner::shared("x"), "check", move |ctx| {
        ctx.schedule_process(0, PRIO_HIGHEST, other)?;
        ctx.wait_until_ended()?;
        inner.lock().push("continued".to_owned());
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 3, PRIO_DEFAULT, action).unwrap();
    kernel.run().unwrap();
    assert_eq!(entries(&log), vec!["continued", "other@3"]);
}

#[test]
fn conditions_are_chained_in_waiting_order() {
    let kernel = kernel();
    let log = log();
    let open = Arc::new(AtomicBool::new(false));
    for name in ["w1", "w2", "w3"] {
        let log = Arc::clone(&log);
        let open = Arc::clone(&open);
        let action = Action::new(NamedOwner::shared(name), "wait", move |ctx| {
            while !open.load(Ordering::SeqCst) {
                ctx.wait_until()?;
            }
            ctx.wait_until_ended()?;
            log.lock().push(format!("{name}@{}", ctx.now()));
            Ok(())
        });
        kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    }
    let opener = Arc::clone(&open);
    kernel
        .schedule_process(
            ManagerId::ROOT,
            7,
            PRIO_DEFAULT,
            Action::new(NamedOwner::shared("gate"), "open", move |_ctx| {
                opener.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    kernel.run().unwrap();
    // Stack order at t=0 makes w3 wait first.
    assert_eq!(entries(&log), vec!["w3@7", "w2@7", "w1@7"]);
}

// ---------------------------------------------------------------------------
// Interrupt and terminate
// ---------------------------------------------------------------------------

#[test]
fn interrupted_process_runs_before_the_interrupter_continues() {
    let kernel = kernel();
    let log = log();

    let sleeper_log = Arc::clone(&log);
    let sleeper = Action::new(NamedOwner::shared("Sleeper"), "sleep", move |ctx| {
        ctx.wait(100, PRIO_DEFAULT)?;
        sleeper_log.lock().push(format!("woke@{}", ctx.now()));
        Ok(())
    });
    let sleeper_id = kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, sleeper).unwrap();

    let alarm_log = Arc::clone(&log);
    let alarm = Action::new(NamedOwner::shared("Alarm"), "ring", move |ctx| {
        ctx.interrupt(sleeper_id)?;
        alarm_log.lock().push(format!("alarm-done@{}", ctx.now()));
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 10, PRIO_DEFAULT, alarm).unwrap();

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["woke@10", "alarm-done@10"]);
    assert_eq!(kernel.current_time(), 10);
}

#[test]
fn interrupting_self_is_fatal() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("x"), "oops", |ctx| {
        ctx.interrupt(ctx.process_id())?;
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();

    let err = kernel.run().unwrap_err();
    assert!(matches!(err, SimError::RunFailed(_)));
    assert!(kernel.failure().unwrap().contains("is active"));
    assert!(matches!(kernel.resume(), Err(SimError::RunFailed(_))));
}

#[test]
fn terminated_process_unwinds_with_killed() {
    let kernel = kernel();
    let log = log();

    let victim_log = Arc::clone(&log);
    let victim = Action::new(NamedOwner::shared("Victim"), "sleep", move |ctx| match ctx.wait(100, PRIO_DEFAULT) {
        Err(e) if e.is_killed() => {
            victim_log.lock().push(format!("killed@{}", ctx.now()));
            Err(e.into())
        }
        other => {
            other?;
            victim_log.lock().push("finished".to_owned());
            Ok(())
        }
    });
    let victim_id = kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, victim).unwrap();
    let never = kernel.schedule_process(ManagerId::ROOT, 50, PRIO_DEFAULT, note(&log, "x", "never")).unwrap();

    let killer_log = Arc::clone(&log);
    let killer = Action::new(NamedOwner::shared("Killer"), "kill", move |ctx| {
        ctx.terminate(victim_id)?;
        ctx.terminate(never)?;
        killer_log.lock().push(format!("killer-done@{}", ctx.now()));
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 10, PRIO_DEFAULT, killer).unwrap();

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["killed@10", "killer-done@10"]);
    assert!(kernel.failure().is_none());
    assert_eq!(kernel.current_time(), 10);
}

#[test]
fn terminating_a_waiter_mid_evaluation_keeps_the_chain_intact() {
    let kernel = kernel();
    let log = log();
    let victim: Arc<Mutex<Option<ProcessId>>> = Arc::default();

    let first_log = Arc::clone(&log);
    let first_victim = Arc::clone(&victim);
    let first = Action::new(NamedOwner::shared("w1"), "wait", move |ctx| {
        ctx.wait_until()?;
        let target = first_victim.lock().take();
        if let Some(target) = target {
            ctx.terminate(target)?;
            first_log.lock().push(format!("terminated@{}", ctx.now()));
        }
        ctx.wait_until_ended()?;
        first_log.lock().push(format!("first@{}", ctx.now()));
        Ok(())
    });

    let second_log = Arc::clone(&log);
    let second = Action::new(NamedOwner::shared("w2"), "wait", move |ctx| match ctx.wait_until() {
        Err(e) if e.is_killed() => {
            second_log.lock().push(format!("second-killed@{}", ctx.now()));
            Err(e.into())
        }
        other => {
            other?;
            ctx.wait_until_ended()?;
            second_log.lock().push("second".to_owned());
            Ok(())
        }
    });

    let third_log = Arc::clone(&log);
    let third = Action::new(NamedOwner::shared("w3"), "wait", move |ctx| {
        ctx.wait_until()?;
        ctx.wait_until_ended()?;
        third_log.lock().push(format!("third@{}", ctx.now()));
        Ok(())
    });

    // Priorities fix the waiting order: w1, w2, w3.
    kernel.schedule_process(ManagerId::ROOT, 0, 1, first).unwrap();
    let second_id = kernel.schedule_process(ManagerId::ROOT, 0, 2, second).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 0, 3, third).unwrap();
    *victim.lock() = Some(second_id);

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["second-killed@0", "terminated@0", "first@0", "third@0"]);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 0);
    assert!(kernel.failure().is_none());
}

#[test]
fn controller_can_terminate_a_conditional_waiter() {
    let mut kernel = kernel();
    let log = log();
    let waiter_log = Arc::clone(&log);
    let waiter = Action::new(NamedOwner::shared("Waiter"), "wait", move |ctx| loop {
        // The condition never holds.
        if let Err(e) = ctx.wait_until() {
            if e.is_killed() {
                waiter_log.lock().push(format!("killed@{}", ctx.now()));
            }
            return Err(e.into());
        }
    });
    let pid = kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, waiter).unwrap();

    assert_eq!(kernel.run_until(5).unwrap(), StopReason::ReachedTime);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 1);

    kernel.terminate(pid).unwrap();
    assert_eq!(entries(&log), vec!["killed@5"]);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 0);
    assert!(kernel.process_flags(pid).is_none());
    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
}

#[test]
fn terminating_an_unknown_process_is_fatal() {
    let mut kernel = kernel();
    let pid = kernel.schedule_process(ManagerId::ROOT, 1, PRIO_DEFAULT, note(&log(), "x", "once")).unwrap();
    kernel.run().unwrap();
    // The process has finished and sits idle in the pool.
    assert!(kernel.process_flags(pid).is_none());
    assert!(matches!(kernel.terminate(pid), Err(SimError::UnknownProcess(_))));
    assert!(kernel.failure().is_some());
}

#[test]
fn start_process_returns_when_the_child_first_suspends() {
    let kernel = kernel();
    let log = log();
    let parent_log = Arc::clone(&log);
    let child_log = Arc::clone(&log);
    let parent = Action::new(NamedOwner::shared("Parent"), "spawn", move |ctx| {
        let child = Action::new(NamedOwner::shared("Child"), "work", move |ctx| {
            child_log.lock().push(format!("child-start@{}", ctx.now()));
            ctx.wait(10, PRIO_DEFAULT)?;
            child_log.lock().push(format!("child-end@{}", ctx.now()));
            Ok(())
        });
        ctx.start_process(child)?;
        parent_log.lock().push(format!("parent-resumed@{}", ctx.now()));
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, parent).unwrap();
    kernel.run().unwrap();
    assert_eq!(entries(&log), vec!["child-start@0", "parent-resumed@0", "child-end@10"]);
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[test]
fn huge_delays_saturate_at_max_tick() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("x"), "forever", |ctx| {
        ctx.wait(Tick::MAX, PRIO_DEFAULT)?;
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 5, PRIO_DEFAULT, action).unwrap();
    assert_eq!(kernel.run_until(100).unwrap(), StopReason::ReachedTime);
    kernel
        .schedule_process(ManagerId::ROOT, Tick::MAX - 1, PRIO_DEFAULT, note(&log(), "y", "far"))
        .unwrap();

    let rows = kernel.inspect(ManagerId::ROOT).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.tick == MAX_TICK));
}

#[test]
fn scheduling_in_the_past_is_time_travel() {
    let kernel = kernel();
    kernel.schedule_process(ManagerId::ROOT, 10, PRIO_DEFAULT, note(&log(), "x", "a")).unwrap();
    kernel.run().unwrap();
    assert_eq!(kernel.current_time(), 10);

    let err = kernel
        .schedule_process_at(ManagerId::ROOT, 5, PRIO_DEFAULT, note(&log(), "x", "b"))
        .unwrap_err();
    assert!(matches!(err, SimError::TimeTravel { at: 5, now: 10, .. }));
    assert!(matches!(kernel.resume(), Err(SimError::RunFailed(_))));
}

#[test]
fn negative_delay_inside_an_action_fails_the_run() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("x"), "rewind", |ctx| {
        ctx.wait(-1, PRIO_DEFAULT)?;
        Ok(())
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    assert!(kernel.run().is_err());
    assert!(kernel.failure().unwrap().contains("negative"));
}

#[test]
fn run_until_stops_before_events_at_the_target() {
    let kernel = kernel();
    let log = log();
    kernel.schedule_process(ManagerId::ROOT, 5, PRIO_DEFAULT, note(&log, "x", "a")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 20, PRIO_DEFAULT, note(&log, "x", "b")).unwrap();

    assert_eq!(kernel.run_until(20).unwrap(), StopReason::ReachedTime);
    assert_eq!(kernel.current_time(), 20);
    assert_eq!(entries(&log), vec!["a@5"]);

    assert_eq!(kernel.run_until(50).unwrap(), StopReason::ReachedTime);
    assert_eq!(kernel.current_time(), 50);
    assert_eq!(entries(&log), vec!["a@5", "b@20"]);
}

#[test]
fn step_controls_fire_one_event_or_one_time() {
    let kernel = kernel();
    let log = log();
    kernel.schedule_process(ManagerId::ROOT, 3, 1, note(&log, "x", "a")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 3, 2, note(&log, "x", "b")).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 8, 1, note(&log, "x", "c")).unwrap();

    assert_eq!(kernel.step_event().unwrap(), StopReason::StepComplete);
    assert_eq!(entries(&log), vec!["a@3"]);

    assert_eq!(kernel.step_to_next_time().unwrap(), StopReason::ReachedNextEventTime);
    assert_eq!(entries(&log), vec!["a@3", "b@3"]);
    assert_eq!(kernel.current_time(), 8);

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(kernel.events_fired(), 3);
}

// ---------------------------------------------------------------------------
// Failures, pause, initialize
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FailureSink(Mutex<Vec<ActionFailure>>);

impl SimulationListener for FailureSink {
    fn action_failed(&self, failure: &ActionFailure) {
        self.0.lock().push(failure.clone());
    }
}

#[test]
fn action_error_pauses_and_reports() {
    let kernel = kernel();
    let sink = Arc::new(FailureSink::default());
    kernel.add_listener(sink.clone());
    let log = log();

    let broken = Action::new(NamedOwner::shared("Pump"), "prime", |_ctx| Err(anyhow::anyhow!("no water")));
    kernel.schedule_process(ManagerId::ROOT, 4, PRIO_DEFAULT, broken).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 9, PRIO_DEFAULT, note(&log, "x", "after")).unwrap();

    assert_eq!(kernel.run().unwrap(), StopReason::ActionFailed);
    let failures = sink.0.lock().clone();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].tick, 4);
    assert_eq!(failures[0].owner, "Pump");
    assert_eq!(failures[0].action, "prime");
    assert!(failures[0].message.contains("no water"));
    assert!(!failures[0].fatal);

    // Not fatal: the run can continue.
    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["after@9"]);
}

/// Queues one follow-up event from inside the first stop notification.
#[derive(Default)]
struct Rescheduler {
    kernel: OnceLock<Weak<Kernel>>,
    log: Log,
    outcomes: Mutex<Vec<(StopReason, bool)>>,
}

impl SimulationListener for Rescheduler {
    fn run_stopped(&self, reason: StopReason, _tick: Tick) {
        let Some(kernel) = self.kernel.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut outcomes = self.outcomes.lock();
        if outcomes.is_empty() {
            let queued = kernel.schedule_process(ManagerId::ROOT, 5, PRIO_DEFAULT, note(&self.log, "x", "again"));
            outcomes.push((reason, queued.is_ok()));
        }
    }
}

#[test]
fn listener_can_schedule_when_the_run_stops() {
    let kernel = Arc::new(kernel());
    let listener = Arc::new(Rescheduler::default());
    listener.kernel.set(Arc::downgrade(&kernel)).unwrap();
    kernel.add_listener(listener.clone());
    kernel.schedule_process(ManagerId::ROOT, 2, PRIO_DEFAULT, note(&listener.log, "x", "first")).unwrap();

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(listener.outcomes.lock().clone(), vec![(StopReason::Idle, true)]);
    assert_eq!(kernel.pending_events(ManagerId::ROOT).unwrap(), 1);

    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&listener.log), vec!["first@2", "again@7"]);
}

#[test]
fn panicking_action_is_reported_as_failure() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("x"), "explode", |_ctx| -> ActionResult { panic!("kaboom") });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    assert_eq!(kernel.run().unwrap(), StopReason::ActionFailed);
}

#[test]
fn pause_stops_an_endless_run() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("Clock"), "tick", |ctx| loop {
        ctx.wait(1, PRIO_DEFAULT)?;
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    kernel.resume().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    kernel.pause();
    assert_eq!(kernel.wait_for_pause(), StopReason::Paused);
    assert!(kernel.current_time() > 0);
    assert!(!kernel.run_state().is_running());
}

#[test]
fn operations_requiring_pause_are_refused_while_running() {
    let kernel = kernel();
    let action = Action::new(NamedOwner::shared("Clock"), "tick", |ctx| loop {
        ctx.wait(1, PRIO_DEFAULT)?;
    });
    kernel.schedule_process(ManagerId::ROOT, 0, PRIO_DEFAULT, action).unwrap();
    kernel.resume().unwrap();
    let refused = kernel.schedule_process(ManagerId::ROOT, 1, PRIO_DEFAULT, note(&log(), "x", "late"));
    assert!(matches!(refused, Err(SimError::NotPaused)));
    kernel.pause();
    kernel.wait_for_pause();
}

#[test]
fn initialize_unwinds_waiting_processes_and_resets_clocks() {
    let mut kernel = kernel();
    let log = log();
    let killed = Arc::new(AtomicUsize::new(0));
    for delay in [0, 1] {
        let killed = Arc::clone(&killed);
        let action = Action::new(NamedOwner::shared("Worker"), "work", move |ctx| {
            let result = if delay == 0 {
                ctx.wait(1_000, PRIO_DEFAULT)
            } else {
                // The condition never holds.
                loop {
                    if let Err(e) = ctx.wait_until() {
                        break Err(e);
                    }
                }
            };
            if matches!(&result, Err(e) if e.is_killed()) {
                killed.fetch_add(1, Ordering::SeqCst);
            }
            result?;
            Ok(())
        });
        kernel.schedule_process(ManagerId::ROOT, delay, PRIO_DEFAULT, action).unwrap();
    }
    kernel.schedule_process(ManagerId::ROOT, 5_000, PRIO_DEFAULT, note(&log, "x", "unstarted")).unwrap();

    assert_eq!(kernel.run_until(500).unwrap(), StopReason::ReachedTime);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 1);
    assert_eq!(kernel.pending_events(ManagerId::ROOT).unwrap(), 2);

    kernel.initialize().unwrap();
    assert_eq!(killed.load(Ordering::SeqCst), 2);
    assert_eq!(kernel.current_time(), 0);
    assert_eq!(kernel.pending_events(ManagerId::ROOT).unwrap(), 0);
    assert_eq!(kernel.waiting_processes(ManagerId::ROOT).unwrap(), 0);
    assert!(entries(&log).is_empty());

    // The pool is reused for the next run.
    let pooled = kernel.pooled_processes();
    kernel.schedule_process(ManagerId::ROOT, 2, PRIO_DEFAULT, note(&log, "x", "again")).unwrap();
    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert_eq!(entries(&log), vec!["again@2"]);
    assert_eq!(kernel.pooled_processes(), pooled);
}

#[test]
fn real_time_pacing_holds_the_clock_back() {
    // 3600 ticks per hour at 36000x: 36000 ticks per wall-clock second, so
    // reaching tick 3600 takes at least 100 ms.
    let config = KernelConfig::default()
        .with_scale(TimeScale::new(3_600.0))
        .with_real_time(36_000.0)
        .with_pacing_interval(std::time::Duration::from_millis(2));
    let kernel = Kernel::new(config, TraceMode::Off).unwrap();
    kernel.schedule_process(ManagerId::ROOT, 3_600, PRIO_DEFAULT, note(&log(), "x", "a")).unwrap();

    let started = std::time::Instant::now();
    assert_eq!(kernel.run().unwrap(), StopReason::Idle);
    assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    assert_eq!(kernel.current_time(), 3_600);
}
