// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

// cspell:words SIGTERM

//! Timer, readiness, shutdown, and load scenarios for [`Scheduler::run`].

use crate::sched::{Priority, Reason, Scheduler, Timeout};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::cell::RefCell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn initial_task_runs_with_startup_reason() {
    let observed: Rc<RefCell<Option<Reason>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    Scheduler::run(move |_sched, ctx| {
        *observed_in.borrow_mut() = Some(ctx.reason);
    });
    assert_eq!(*observed.borrow(), Some(Reason::STARTUP));
}

#[test]
#[serial]
fn timer_fires_at_its_deadline_with_timeout_reason() {
    let observed: Rc<RefCell<Option<Reason>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    let started = Instant::now();
    Scheduler::run(move |sched, _ctx| {
        sched.add_delayed(
            Duration::from_millis(50),
            Priority::Default,
            None,
            false,
            move |_sched, ctx| {
                *observed_in.borrow_mut() = Some(ctx.reason);
            },
        );
    });
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(*observed.borrow(), Some(Reason::TIMEOUT));
}

#[test]
#[serial]
fn read_interest_fires_with_exactly_the_ready_fd() {
    let observed: Rc<RefCell<Option<(Reason, Vec<i32>, usize)>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    Scheduler::run(move |sched, _ctx| {
        let (reader, mut writer) = std::io::pipe().expect("pipe creation failed");
        writer.write_all(b"x").expect("pipe write failed");
        // The callback keeps its own clone so the fd outlives registration.
        let reader = Rc::new(reader);
        let reader_in = Rc::clone(&reader);
        sched.add_read_file(
            &*reader,
            Timeout::Never,
            Priority::Default,
            None,
            false,
            move |_sched, ctx| {
                assert!(ctx.read_ready.contains(&*reader_in));
                *observed_in.borrow_mut() = Some((
                    ctx.reason,
                    ctx.read_ready.iter().collect(),
                    ctx.write_ready.len(),
                ));
            },
        );
        // Writer stays open until registration is done; dropping it after
        // the byte is queued keeps the read end readable either way.
        drop(writer);
    });
    let (reason, read_ready, write_ready_len) =
        observed.borrow().clone().expect("read task never ran");
    assert_eq!(reason, Reason::READ_READY);
    assert_eq!(read_ready.len(), 1);
    assert_eq!(write_ready_len, 0);
}

#[test]
#[serial]
fn write_interest_fires_on_a_writable_pipe() {
    let observed: Rc<RefCell<Option<Reason>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    Scheduler::run(move |sched, _ctx| {
        let (reader, writer) = std::io::pipe().expect("pipe creation failed");
        let writer = Rc::new(writer);
        let writer_in = Rc::clone(&writer);
        let raw = writer.as_raw_fd();
        sched.add_write_file(
            &*writer,
            Timeout::Never,
            Priority::Default,
            None,
            false,
            move |_sched, ctx| {
                assert!(ctx.write_ready.contains(&*writer_in));
                assert_eq!(ctx.write_ready.iter().collect::<Vec<_>>(), vec![raw]);
                *observed_in.borrow_mut() = Some(ctx.reason);
            },
        );
        drop(reader);
    });
    assert_eq!(*observed.borrow(), Some(Reason::WRITE_READY));
}

#[test]
#[serial]
fn urgent_work_runs_before_idle_work_in_the_same_iteration() {
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let o1 = Rc::clone(&order);
    let o2 = Rc::clone(&order);
    Scheduler::run(move |sched, _ctx| {
        sched.add_delayed(Duration::ZERO, Priority::Idle, None, false, move |_s, _c| {
            o1.borrow_mut().push("idle");
        });
        sched.add_delayed(Duration::ZERO, Priority::Urgent, None, false, move |_s, _c| {
            o2.borrow_mut().push("urgent");
        });
    });
    assert_eq!(*order.borrow(), vec!["urgent", "idle"]);
}

#[test]
#[serial]
fn terminate_signal_runs_only_shutdown_eligible_tasks() {
    let log: Rc<RefCell<Vec<(&'static str, Reason)>>> = Rc::new(RefCell::new(Vec::new()));
    let log_a = Rc::clone(&log);
    let log_b = Rc::clone(&log);
    Scheduler::run(move |sched, _ctx| {
        sched.add_select(
            None,
            None,
            Timeout::Never,
            Priority::Default,
            None,
            false,
            move |_s, ctx| {
                log_a.borrow_mut().push(("not-on-shutdown", ctx.reason));
            },
        );
        sched.add_select(
            None,
            None,
            Timeout::Never,
            Priority::Default,
            None,
            true,
            move |_s, ctx| {
                log_b.borrow_mut().push(("on-shutdown", ctx.reason));
            },
        );
        sched.add_delayed(Duration::from_millis(10), Priority::Default, None, false, |_s, _c| {
            signal_hook::low_level::raise(signal_hook::consts::SIGTERM)
                .expect("failed to raise SIGTERM");
        });
    });
    assert_eq!(*log.borrow(), vec![("on-shutdown", Reason::SHUTDOWN)]);
}

#[test]
#[serial]
fn programmatic_shutdown_behaves_like_the_signal() {
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let log_a = Rc::clone(&log);
    let log_b = Rc::clone(&log);
    Scheduler::run(move |sched, _ctx| {
        sched.add_select(
            None,
            None,
            Timeout::Never,
            Priority::Default,
            None,
            false,
            move |_s, _c| {
                log_a.borrow_mut().push("not-on-shutdown");
            },
        );
        sched.add_select(
            None,
            None,
            Timeout::Never,
            Priority::Shutdown,
            None,
            true,
            move |_s, _c| {
                log_b.borrow_mut().push("cleanup");
            },
        );
        sched.add_delayed(Duration::from_millis(5), Priority::Default, None, false, |sched, _c| {
            sched.shutdown();
        });
    });
    assert_eq!(*log.borrow(), vec!["cleanup"]);
}

#[test]
#[serial]
fn get_load_counts_ready_tasks_per_band() {
    let observed: Rc<RefCell<Option<(usize, usize, usize)>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    Scheduler::run(move |sched, _ctx| {
        for _ in 0..3 {
            sched.add_delayed(Duration::ZERO, Priority::Idle, None, false, |_s, _c| {});
        }
        sched.add_delayed(Duration::ZERO, Priority::Urgent, None, false, move |sched, _c| {
            // Keep resolves to the running band (Urgent), which has drained.
            *observed_in.borrow_mut() = Some((
                sched.get_load(Priority::Idle),
                sched.get_load(Priority::Keep),
                sched.ready_total(),
            ));
        });
    });
    assert_eq!(*observed.borrow(), Some((3, 0, 3)));
}

#[test]
#[serial]
fn io_timeout_fires_when_the_fd_stays_quiet() {
    let observed: Rc<RefCell<Option<Reason>>> = Rc::new(RefCell::new(None));
    let observed_in = Rc::clone(&observed);
    let started = Instant::now();
    Scheduler::run(move |sched, _ctx| {
        let (reader, writer) = std::io::pipe().expect("pipe creation failed");
        let reader = Rc::new(reader);
        let reader_in = Rc::clone(&reader);
        sched.add_read_file(
            &*reader,
            Timeout::In(Duration::from_millis(30)),
            Priority::Default,
            None,
            false,
            move |_sched, ctx| {
                // Nothing was ever written; only the deadline can fire.
                assert!(ctx.read_ready.is_empty());
                let _keep_alive = &reader_in;
                *observed_in.borrow_mut() = Some(ctx.reason);
            },
        );
        // The write end lives inside the closure below so the read end does
        // not see EOF before the timeout.
        sched.add_delayed(Duration::from_millis(60), Priority::Default, None, false, move |_s, _c| {
            drop(writer);
        });
    });
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(*observed.borrow(), Some(Reason::TIMEOUT));
}
