use assert_call::{call, CallRecorder};

use super::*;
use crate::{
    core::Runtime,
    effect,
    reactive::{is_reactive, reactive},
    test_helpers::collect_warnings,
};

#[test]
fn get_and_set() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(1);
    let _e = effect({
        let r = r.clone();
        move || call!("{}", r.get())
    });
    cr.verify("1");

    r.set(2);
    cr.verify("2");
    assert_eq!(r.get(), Value::from(2));
}

#[test]
fn nan_is_not_a_change() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Ref::new(f64::NAN);
    let _e = effect({
        let r = r.clone();
        move || call!("{}", r.get())
    });
    cr.verify("NaN");

    r.set(f64::NAN);
    cr.verify(());
    r.set(-0.0);
    cr.verify("0");
    r.set(0.0);
    cr.verify("0"); // +0 and -0 are different values
}

#[test]
fn new_returns_existing_ref() {
    let _rt = Runtime::new();
    let r = Ref::new(1);
    assert!(Ref::new(r.clone()).ptr_eq(&r));
}

#[test]
fn object_value_is_made_reactive() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let raw = RawObject::record_from([("a", 1)]);
    let r = Ref::new(raw.clone());
    assert!(is_reactive(&r.get()));

    let _e = effect({
        let r = r.clone();
        move || call!("{}", r.get().as_reactive().unwrap().get("a"))
    });
    cr.verify("1");

    r.get().as_reactive().unwrap().set("a", 2);
    cr.verify("2");

    // setting the wrapper of the stored raw object is not a change
    r.set(reactive(raw));
    cr.verify(());
}

#[test]
fn shallow_ref_keeps_value_as_is() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let raw = RawObject::record_from([("a", 1)]);
    let r = Ref::shallow(raw.clone());
    assert!(r.is_shallow());
    assert!(!is_reactive(&r.get()));

    let _e = effect({
        let r = r.clone();
        move || call!("{}", r.get().as_raw().unwrap().get("a"))
    });
    cr.verify("1");

    raw.set("a", 2);
    cr.verify(()); // nested writes are not observed

    trigger_ref(&r);
    cr.verify("2");
}

#[test]
fn readonly_ref_rejects_writes() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    let r = Ref::new(1);
    let ro = r.readonly();
    assert!(ro.is_readonly());
    assert!(ro.readonly().ptr_eq(&ro));

    ro.set(2);
    assert_eq!(r.get(), Value::from(1));
    assert_eq!(
        *warnings.borrow(),
        vec!["Set operation on key \"value\" failed: target is readonly.".to_string()]
    );

    r.set(3);
    assert_eq!(ro.get(), Value::from(3));
}

#[test]
fn ref_in_record_is_unwrapped() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let count = Ref::new(1);
    let state = Reactive::new(RawObject::record_from([("count", count.clone())])).unwrap();
    assert_eq!(state.get("count"), Value::from(1));

    let _e = effect({
        let state = state.clone();
        move || call!("{}", state.get("count"))
    });
    cr.verify("1");

    state.set("count", 2);
    cr.verify("2");
    assert_eq!(count.get(), Value::from(2)); // written through to the ref

    count.set(3);
    cr.verify("3");
}

#[test]
fn ref_in_list_is_not_unwrapped() {
    let _rt = Runtime::new();
    let list = Reactive::new(RawObject::list([Ref::new(1)])).unwrap();
    assert!(is_ref(&list.get(0)));
}

#[test]
fn readonly_ref_in_record_rejects_plain_write() {
    let _rt = Runtime::new();
    let inner = Ref::new(1);
    let state = Reactive::new(RawObject::record_from([("r", inner.readonly())])).unwrap();
    assert!(!state.set("r", 2));
    assert_eq!(inner.get(), Value::from(1));
}

#[test]
fn from_property_reads_and_writes_through() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = Reactive::new(RawObject::record_from([("a", 1)])).unwrap();
    let a = Ref::from_property(&state, "a", None);
    let missing = Ref::from_property(&state, "b", Some(Value::from("default")));
    assert_eq!(missing.get(), Value::from("default"));

    let _e = effect({
        let a = a.clone();
        move || call!("{}", a.get())
    });
    cr.verify("1");

    state.set("a", 2);
    cr.verify("2");
    a.set(3);
    cr.verify("3");
    assert_eq!(state.get("a"), Value::from(3));
}

#[test]
fn to_refs_of_record() {
    let _rt = Runtime::new();
    let state = reactive(RawObject::record_from([("a", 1), ("b", 2)]));
    let refs = to_refs(&state);
    let refs = refs.as_raw().unwrap();
    assert_eq!(refs.keys(), vec![Value::from("a"), Value::from("b")]);

    let a = refs.get("a");
    let a = a.as_ref_value().unwrap();
    assert_eq!(a.get(), Value::from(1));
    a.set(10);
    assert_eq!(state.as_reactive().unwrap().get("a"), Value::from(10));
}

#[test]
fn to_refs_of_list() {
    let _rt = Runtime::new();
    let state = reactive(RawObject::list(["x", "y"]));
    let refs = to_refs(&state);
    let refs = refs.as_raw().unwrap();
    assert!(refs.is_list());
    assert_eq!(refs.get(1).as_ref_value().unwrap().get(), Value::from("y"));
}

#[test]
fn to_refs_of_plain_object_warns() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    to_refs(&Value::from(RawObject::record()));
    assert_eq!(
        *warnings.borrow(),
        vec!["toRefs() expects a reactive object but received a plain one.".to_string()]
    );
}

#[test]
fn unref_and_is_ref() {
    let _rt = Runtime::new();
    let r = Value::from(Ref::new(1));
    assert!(is_ref(&r));
    assert_eq!(unref(&r), Value::from(1));
    assert!(!is_ref(&Value::from(1)));
    assert_eq!(unref(&Value::from(2)), Value::from(2));
}
