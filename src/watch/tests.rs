use assert_call::{call, CallRecorder};
use rstest::rstest;

use super::*;
use crate::{
    core::Runtime, effect, queue_job, test_helpers::collect_warnings, trigger_ref, EffectScope,
    Owner, RawObject,
};

fn log_values(name: &'static str) -> impl Fn(&Value, &Value, &OnCleanup) {
    move |value, old_value, _| call!("{name} {value} {old_value}")
}

#[test]
fn ref_source_runs_before_next_flush() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch(&r, log_values("cb"), WatchOptions::new());
    cr.verify(());

    r.set(2);
    r.set(3);
    cr.verify(()); // deferred to the flush
    rt.flush();
    cr.verify("cb 3 1");

    r.set(3);
    rt.flush();
    cr.verify(());
}

#[test]
fn immediate_calls_with_undefined_old_value() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch(&r, log_values("cb"), WatchOptions::new().immediate(true));
    cr.verify("cb 1 undefined");

    r.set(2);
    rt.flush();
    cr.verify("cb 2 1");
}

#[test]
fn reactive_source_is_deep() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = Reactive::new(RawObject::record_from([(
        "nested",
        RawObject::record_from([("x", 1)]),
    )]))
    .unwrap();
    let _w = watch(
        &state,
        |value, old_value, _| call!("same {}", value == old_value),
        WatchOptions::new(),
    );

    state.get("nested").as_reactive().unwrap().set("x", 2);
    rt.flush();
    cr.verify("same true");
}

#[test]
fn getter_source_fires_on_change_only() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = Reactive::new(RawObject::record_from([("a", 1), ("b", 1)])).unwrap();
    let _w = watch(
        WatchSource::getter({
            let state = state.clone();
            move || state.get("a")
        }),
        log_values("a"),
        WatchOptions::new(),
    );

    state.set("b", 2);
    rt.flush();
    cr.verify(());

    state.set("a", 2);
    rt.flush();
    cr.verify("a 2 1");
}

#[test]
fn deep_getter() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = Reactive::new(RawObject::record_from([(
        "nested",
        RawObject::record_from([("x", 1)]),
    )]))
    .unwrap();
    let getter = {
        let state = state.clone();
        move || state.get("nested")
    };
    let _shallow = watch(
        WatchSource::getter(getter.clone()),
        |_, _, _| call!("shallow"),
        WatchOptions::new(),
    );
    let _deep = watch(
        WatchSource::getter(getter),
        |_, _, _| call!("deep"),
        WatchOptions::new().deep(true),
    );

    state.get("nested").as_reactive().unwrap().set("x", 2);
    rt.flush();
    cr.verify("deep");
}

#[test]
fn multi_source() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = Ref::new(1);
    let b = Ref::new(2);
    let _w = watch(
        vec![WatchSource::from(&a), WatchSource::from(&b)],
        |value, old_value, _| {
            call!(
                "{:?} {:?}",
                value.to_list().unwrap(),
                old_value.to_list().unwrap()
            )
        },
        WatchOptions::new(),
    );

    a.set(3);
    rt.flush();
    cr.verify("[3, 2] [1, 2]");

    b.set(4);
    rt.flush();
    cr.verify("[3, 4] [3, 2]");
}

#[test]
fn computed_source() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let c = Computed::new({
        let r = r.clone();
        move || Value::from(r.get().as_f64().unwrap() * 10.0)
    });
    let _w = watch(c, log_values("c"), WatchOptions::new());

    r.set(2);
    rt.flush();
    cr.verify("c 20 10");
}

#[test]
fn sync_flush_runs_inside_write() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch(
        &r,
        log_values("sync"),
        WatchOptions::new().flush(FlushTiming::Sync),
    );
    r.set(2);
    cr.verify("sync 2 1");
    r.set(3);
    cr.verify("sync 3 2");
}

#[test]
fn flush_timings_are_ordered() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _post = watch(
        &r,
        |_, _, _| call!("post"),
        WatchOptions::new().flush(FlushTiming::Post),
    );
    let _pre = watch(&r, |_, _, _| call!("pre"), WatchOptions::new());
    queue_job(&Job::new(|| call!("job")));

    r.set(2);
    rt.flush();
    cr.verify(["pre", "job", "post"]);
}

#[test]
fn stop_runs_pending_cleanup() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let w = watch(
        &r,
        |value, _, on_cleanup| {
            call!("cb {value}");
            let value = value.clone();
            on_cleanup.register(move || call!("cleanup {value}"));
        },
        WatchOptions::new(),
    );

    r.set(2);
    rt.flush();
    cr.verify("cb 2");

    r.set(3);
    rt.flush();
    cr.verify(["cleanup 2", "cb 3"]);

    w.stop();
    assert!(!w.is_active());
    cr.verify("cleanup 3");

    r.set(4);
    rt.flush();
    cr.verify(());
}

#[test]
fn watch_effect_reruns_and_cleans_up() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let w = watch_effect(
        {
            let r = r.clone();
            move |on_cleanup| {
                let value = r.get();
                call!("run {value}");
                on_cleanup.register(move || call!("cleanup {value}"));
            }
        },
        WatchOptions::new(),
    );
    cr.verify("run 1");

    r.set(2);
    cr.verify(());
    rt.flush();
    cr.verify(["cleanup 1", "run 2"]);

    w.stop();
    cr.verify("cleanup 2");
}

#[test]
fn watch_post_effect_waits_for_flush() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch_post_effect({
        let r = r.clone();
        move |_| call!("post {}", r.get())
    });
    cr.verify(());
    rt.flush();
    cr.verify("post 1");

    r.set(2);
    rt.flush();
    cr.verify("post 2");
}

#[test]
fn watch_sync_effect_runs_inside_write() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch_sync_effect({
        let r = r.clone();
        move |_| call!("sync {}", r.get())
    });
    cr.verify("sync 1");
    r.set(2);
    cr.verify("sync 2");
}

#[test]
fn callback_options_on_watch_effect_warn() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    let _w = watch_effect(|_| {}, WatchOptions::new().immediate(false).deep(true));
    let warnings = warnings.borrow();
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].starts_with("watch() \"immediate\" option"));
    assert!(warnings[1].starts_with("watch() \"deep\" option"));
}

#[test]
fn invalid_source_warns() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let warnings = collect_warnings(&mut rt);
    let _w = watch(Value::from(1), |_, _, _| call!("cb"), WatchOptions::new());
    assert_eq!(
        *warnings.borrow(),
        vec![
            "Invalid watch source: 1 A watch source can only be a getter/effect function, \
             a ref, a reactive object, or an array of these types."
                .to_string()
        ]
    );
    rt.flush();
    cr.verify(());
}

#[test]
fn pre_watcher_of_unmounted_owner_runs_sync() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let owner = Owner::new("App");
    let w = owner.setup(|| watch(&r, log_values("cb"), WatchOptions::new()));

    r.set(2);
    cr.verify("cb 2 1"); // not mounted yet

    owner.mount();
    r.set(3);
    cr.verify(());
    rt.flush();
    cr.verify("cb 3 2");

    owner.unmount();
    assert!(!w.is_active());
    r.set(4);
    rt.flush();
    cr.verify(());
}

#[test]
fn watch_effect_skips_unmounted_owner() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let owner = Owner::new("App");
    owner.mount();
    let w = owner.setup(|| {
        let r = r.clone();
        watch_effect(move |_| call!("run {}", r.get()), WatchOptions::new())
    });
    cr.verify("run 1");

    r.set(2);
    owner.unmount();
    rt.flush();
    cr.verify(());
    assert!(!w.is_active());
}

#[test]
fn callback_panic_is_reported() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    rt.set_error_handler(|e| call!("{}", e.code));
    let r = Ref::new(1);
    let _w = watch(
        &r,
        |_, _, _| panic!("boom"),
        WatchOptions::new().flush(FlushTiming::Sync),
    );
    r.set(2);
    cr.verify("watcher callback");
}

#[test]
fn getter_panic_is_reported() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    rt.set_error_handler(|e| call!("{}", e.code));
    let _w = watch(
        WatchSource::getter(|| panic!("boom")),
        |_, _, _| {},
        WatchOptions::new(),
    );
    cr.verify("watcher getter");
}

#[rstest]
#[case(false)]
#[case(true)]
fn compat_watch_array(#[case] compat: bool) {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(RawObject::list([1, 2]));
    let _w = watch(
        &r,
        |_, _, _| call!("cb"),
        WatchOptions::new().compat_watch_array(compat),
    );
    r.get().as_reactive().unwrap().set(0, 5);
    rt.flush();
    if compat {
        cr.verify("cb");
    } else {
        cr.verify(()); // element writes are not observed by a plain ref watcher
    }
}

#[test]
fn shallow_ref_source_fires_on_trigger() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let raw = RawObject::record_from([("x", 1)]);
    let r = Ref::shallow(raw.clone());
    let _w = watch(&r, |_, _, _| call!("cb"), WatchOptions::new());

    raw.set("x", 2);
    trigger_ref(&r);
    rt.flush();
    cr.verify("cb");
}

#[test]
fn watcher_is_stopped_with_scope() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let scope = EffectScope::new();
    scope.run(|| {
        let _ = watch(&r, log_values("cb"), WatchOptions::new());
    });
    assert_eq!(scope.effect_count(), 1);

    r.set(2);
    rt.flush();
    cr.verify("cb 2 1"); // kept alive by the scope

    scope.stop();
    r.set(3);
    rt.flush();
    cr.verify(());
}

#[test]
fn stopped_handle_leaves_scope() {
    let _rt = Runtime::new();
    let r = Ref::new(1);
    let scope = EffectScope::new();
    let w = scope
        .run(|| watch(&r, |_, _, _| {}, WatchOptions::new()))
        .unwrap();
    assert_eq!(scope.effect_count(), 1);
    w.stop();
    assert_eq!(scope.effect_count(), 0);
}

#[test]
fn debugger_hooks() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _w = watch(
        &r,
        |_, _, _| {},
        WatchOptions::new()
            .on_track(|e| call!("track {}", e.op))
            .on_trigger(|e| call!("trigger {}", e.op)),
    );
    cr.verify("track get");
    r.set(2);
    cr.verify("trigger set");
}

#[test]
fn traverse_tracks_nested_values() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let inner = RawObject::map_from([("k", RawObject::list([1]))]);
    let state = reactive_record(inner.clone());
    let _e = effect({
        let state = state.clone();
        move || {
            traverse(&state);
            call!("run");
        }
    });
    cr.verify("run");

    let list = state
        .as_reactive()
        .unwrap()
        .get("inner")
        .as_reactive()
        .unwrap()
        .get("k");
    list.as_reactive().unwrap().push([2]);
    cr.verify("run");
}

#[test]
fn traverse_stops_at_cycles_and_raw_values() {
    let _rt = Runtime::new();
    let raw = RawObject::record();
    raw.set("self", raw.clone());
    raw.set("skipped", mark_raw_record());
    let value = Value::from(raw);
    assert_eq!(traverse(&value), value);
}

#[test]
fn flush_timing_text() {
    assert_eq!(FlushTiming::Post.to_string(), "post");
    assert_eq!("sync".parse::<FlushTiming>().unwrap(), FlushTiming::Sync);
    assert_eq!(FlushTiming::default(), FlushTiming::Pre);
}

fn reactive_record(inner: RawObject) -> Value {
    crate::reactive(RawObject::record_from([("inner", inner)]))
}

fn mark_raw_record() -> Value {
    crate::mark_raw(&Value::from(RawObject::record()))
}
