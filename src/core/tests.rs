use assert_call::{call, CallRecorder};

use super::*;
use crate::{effect, queue_job, Job, Ref};

#[test]
#[should_panic(expected = "Only one `Runtime` can exist in the same thread at the same time.")]
fn second_runtime_panics() {
    let _rt = Runtime::new();
    let _rt2 = Runtime::new();
}

#[test]
fn runtime_can_be_recreated_after_drop() {
    let rt = Runtime::new();
    drop(rt);
    let _rt = Runtime::new();
}

#[test]
fn is_tracking_inside_effect() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    assert!(!is_tracking());

    let _e = effect(|| {
        call!("outer {}", is_tracking());
        untrack(|| call!("untracked {}", is_tracking()));
        pause_tracking();
        enable_tracking();
        call!("enabled {}", is_tracking());
        reset_tracking();
        reset_tracking();
        call!("restored {}", is_tracking());
    });
    cr.verify([
        "outer true",
        "untracked false",
        "enabled true",
        "restored true",
    ]);
}

#[test]
fn untrack_guard_restores_on_drop() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _e = effect({
        let r = r.clone();
        move || {
            {
                let _guard = UntrackGuard::new();
                r.get();
            }
            call!("{}", is_tracking());
        }
    });
    cr.verify("true");

    r.set(2);
    cr.verify(()); // the read happened while the guard was alive
}

#[test]
fn flush_reports_whether_work_was_done() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    assert!(!rt.flush());

    queue_job(&Job::new(|| call!("job")));
    assert!(rt.is_flush_pending());
    assert!(rt.flush());
    cr.verify("job");
    assert!(!rt.flush());
}

#[test]
fn reset_keeps_runtime_alive() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    rt.set_warn_handler(|m| call!("{m}"));
    rt.reset();

    crate::error::warn("after reset");
    cr.verify(()); // handlers are discarded by reset

    queue_job(&Job::new(|| call!("job")));
    rt.flush();
    cr.verify("job");
}

#[test]
fn next_id_is_unique() {
    let a = next_id();
    let b = next_id();
    assert_ne!(a, b);
}
