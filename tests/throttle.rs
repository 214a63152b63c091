extern crate tempo;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tempo::clock;
use tempo::prelude::*;
use tempo::throttle::{Condition, Throttle};

fn kernel<F: FnOnce(ManualTimeSource)>(f: F) {
    let clock = ManualTimeSource::new();
    tempo::setup_with_time_source(Params::default(), clock.oracle());
    f(clock);
    tempo::discard();
}

#[test]
fn a_sequencer_runs_jobs_serially_in_submission_order() {
    kernel(|clock| {
        let throttle = Throttle::sequencer(true);
        let order = Rc::new(RefCell::new(Vec::new()));
        let active = Rc::new(Cell::new(0));

        let mut results = Vec::new();
        for k in 0..4u32 {
            let order = order.clone();
            let active = active.clone();
            results.push(throttle.enqueue(move || {
                active.set(active.get() + 1);
                assert_eq!(active.get(), 1, "the sequencer admits one job at a time");

                let order = order.clone();
                let active = active.clone();
                clock::after(Span::from_millis(1)).map(move |_| {
                    active.set(active.get() - 1);
                    order.borrow_mut().push(k);
                })
            }));
        }

        // Four jobs, each sleeping one tick, serialized: four ticks.
        for _ in 0..8 {
            tempo::run_cycle().unwrap();
            clock.advance(Span::from_millis(1));
        }
        tempo::run_cycle().unwrap();

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        for result in &results {
            assert!(result.peek().unwrap().is_ok());
        }
        assert_eq!(throttle.num_jobs_running(), 0);
        assert_eq!(throttle.num_jobs_waiting(), 0);
    });
}

#[test]
fn a_wider_throttle_admits_up_to_its_width() {
    kernel(|clock| {
        let throttle = Throttle::new(2, true);
        let active = Rc::new(Cell::new(0));
        let high_water = Rc::new(Cell::new(0));

        for _ in 0..6 {
            let active = active.clone();
            let high_water = high_water.clone();
            throttle.enqueue(move || {
                active.set(active.get() + 1);
                high_water.set(high_water.get().max(active.get()));

                let active = active.clone();
                clock::after(Span::from_millis(1)).map(move |_| {
                    active.set(active.get() - 1);
                })
            });
        }

        for _ in 0..8 {
            tempo::run_cycle().unwrap();
            clock.advance(Span::from_millis(1));
        }
        tempo::run_cycle().unwrap();

        assert_eq!(high_water.get(), 2);
    });
}

#[test]
fn kill_aborts_the_queue_but_not_the_running_job() {
    kernel(|_| {
        let throttle = Throttle::sequencer(true);

        let running = throttle.enqueue(|| -> Deferred<u32> { Deferred::never() });
        let queued = throttle.enqueue(|| Deferred::determined(5u32));

        tempo::run_cycle().unwrap();
        assert_eq!(throttle.num_jobs_running(), 1);
        assert_eq!(throttle.num_jobs_waiting(), 1);

        throttle.kill();
        tempo::run_cycle().unwrap();

        assert!(throttle.is_dead());
        assert!(!running.is_determined(), "the admitted job keeps running");
        assert!(queued.peek().unwrap().is_err(), "queued work aborts");

        // New work is refused outright.
        let refused = throttle.enqueue(|| Deferred::determined(6u32));
        assert!(refused.peek().unwrap().is_err());
    });
}

#[test]
fn the_first_failure_kills_an_intolerant_throttle() {
    kernel(|_| {
        let throttle = Throttle::sequencer(false);

        let exploder = throttle.enqueue(|| -> Deferred<u32> { panic!("bad job") });
        let casualty = throttle.enqueue(|| Deferred::determined(1u32));

        for _ in 0..4 {
            tempo::run_cycle().unwrap();
        }

        let fault = exploder.peek().unwrap().expect_err("the panic surfaces");
        assert!(sched::extract_exn(&fault).to_string().contains("bad job"));
        assert!(throttle.is_dead());
        assert!(casualty.peek().unwrap().is_err());
    });
}

#[test]
fn a_tolerant_throttle_keeps_going_after_failures() {
    kernel(|_| {
        let throttle = Throttle::sequencer(true);

        let exploder = throttle.enqueue(|| -> Deferred<u32> { panic!("bad job") });
        let survivor = throttle.enqueue(|| Deferred::determined(9u32));

        for _ in 0..4 {
            tempo::run_cycle().unwrap();
        }

        assert!(exploder.peek().unwrap().is_err());
        assert_eq!(survivor.peek().unwrap().unwrap(), 9);
        assert!(!throttle.is_dead());
    });
}

#[test]
fn broadcast_wakes_current_waiters_only() {
    kernel(|_| {
        let condition: Condition<u32> = Condition::new();

        let first = condition.wait();
        let second = condition.wait();
        assert_eq!(condition.num_waiting(), 2);

        condition.broadcast(7);
        assert_eq!(first.peek(), Some(7));
        assert_eq!(second.peek(), Some(7));

        // A waiter arriving after the broadcast waits for the next one.
        let late = condition.wait();
        tempo::run_cycle().unwrap();
        assert!(!late.is_determined());

        condition.broadcast(8);
        assert_eq!(late.peek(), Some(8));
    });
}

#[test]
fn signal_wakes_the_longest_waiting_waiter() {
    kernel(|_| {
        let condition: Condition<&'static str> = Condition::new();
        let first = condition.wait();
        let second = condition.wait();

        condition.signal("one");
        assert_eq!(first.peek(), Some("one"));
        assert!(!second.is_determined());

        condition.signal("two");
        assert_eq!(second.peek(), Some("two"));

        // With nobody waiting the value is dropped.
        condition.signal("three");
        assert_eq!(condition.num_waiting(), 0);
    });
}
