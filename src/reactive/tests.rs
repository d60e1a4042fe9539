use assert_call::{call, CallRecorder};

use super::*;
use crate::{core::Runtime, effect, test_helpers::collect_warnings, Ref};

fn record<const N: usize>(entries: [(&str, i32); N]) -> Reactive {
    Reactive::new(RawObject::record_from(entries)).unwrap()
}

#[test]
fn same_raw_gives_same_wrapper() {
    let _rt = Runtime::new();
    let raw = RawObject::record_from([("a", 1)]);
    let a = reactive(raw.clone());
    let b = reactive(raw.clone());
    assert!(a.as_reactive().unwrap().ptr_eq(b.as_reactive().unwrap()));

    // wrapping a wrapper returns it unchanged
    let c = reactive(a.clone());
    assert!(a.as_reactive().unwrap().ptr_eq(c.as_reactive().unwrap()));
    assert_eq!(to_raw(&a), Value::Object(raw));
}

#[test]
fn readonly_view_of_reactive() {
    let _rt = Runtime::new();
    let state = reactive(RawObject::record_from([("a", 1)]));
    let view = readonly(state.clone());
    assert!(is_readonly(&view));
    assert!(is_reactive(&view));
    assert!(is_proxy(&view));
    assert!(!is_reactive(&readonly(RawObject::record())));

    let again = readonly(state.clone());
    assert!(view.as_reactive().unwrap().ptr_eq(again.as_reactive().unwrap()));

    // reactive() of a readonly value returns it unchanged
    let same = reactive(view.clone());
    assert!(view.as_reactive().unwrap().ptr_eq(same.as_reactive().unwrap()));
}

#[test]
fn readonly_view_tracks_through_inner_wrapper() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = record([("a", 1)]);
    let view = readonly(state.clone());
    let view = view.as_reactive().unwrap().clone();

    let _e = effect(move || call!("{}", view.get("a")));
    cr.verify("1");

    state.set("a", 2);
    cr.verify("2");
}

#[test]
fn non_object_cannot_be_made_reactive() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    assert_eq!(reactive(1), Value::from(1));
    assert!(Reactive::new("x").is_none());
    assert_eq!(
        *warnings.borrow(),
        vec![
            "value cannot be made reactive: 1".to_string(),
            "value cannot be made reactive: x".to_string(),
        ]
    );
}

#[test]
fn mark_raw_prevents_wrapping() {
    let _rt = Runtime::new();
    let raw = mark_raw(&Value::from(RawObject::record()));
    assert!(!is_proxy(&reactive(raw.clone())));

    let parent = record([]);
    parent.set("child", raw);
    assert!(!is_proxy(&parent.get("child")));
}

#[test]
fn nested_objects_are_wrapped_lazily() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let inner = RawObject::record_from([("x", 1)]);
    let state = Reactive::new(RawObject::record_from([("inner", inner.clone())])).unwrap();

    let nested = state.get("inner");
    assert!(is_reactive(&nested));
    assert_eq!(to_raw(&nested), Value::Object(inner));

    let _e = effect({
        let state = state.clone();
        move || call!("{}", state.get("inner").as_reactive().unwrap().get("x"))
    });
    cr.verify("1");

    nested.as_reactive().unwrap().set("x", 2);
    cr.verify("2");
}

#[test]
fn shallow_reactive_does_not_wrap_nested() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = shallow_reactive(RawObject::record_from([(
        "inner",
        RawObject::record_from([("x", 1)]),
    )]));
    assert!(is_shallow(&state));
    let state = state.as_reactive().unwrap().clone();
    let nested = state.get("inner");
    assert!(!is_proxy(&nested));

    let _e = effect({
        let state = state.clone();
        move || call!("{}", state.get("inner").as_raw().unwrap().get("x"))
    });
    cr.verify("1");

    nested.as_raw().unwrap().set("x", 2);
    cr.verify(());
    state.set("inner", RawObject::record_from([("x", 3)]));
    cr.verify("3");
}

#[test]
fn readonly_set_warns() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    let state = readonly(RawObject::record_from([("a", 1)]));
    let state = state.as_reactive().unwrap();

    assert!(state.set("a", 2));
    assert!(state.delete("a"));
    assert_eq!(state.get("a"), Value::from(1));
    assert_eq!(
        *warnings.borrow(),
        vec![
            "Set operation on key \"a\" failed: target is readonly.".to_string(),
            "Delete operation on key \"a\" failed: target is readonly.".to_string(),
        ]
    );
}

#[test]
fn deep_readonly_wraps_nested_as_readonly() {
    let _rt = Runtime::new();
    let state = readonly(RawObject::record_from([(
        "inner",
        RawObject::record_from([("x", 1)]),
    )]));
    let nested = state.as_reactive().unwrap().get("inner");
    assert!(is_readonly(&nested));

    let shallow = shallow_readonly(RawObject::record_from([(
        "inner",
        RawObject::record_from([("x", 1)]),
    )]));
    assert!(!is_proxy(&shallow.as_reactive().unwrap().get("inner")));
}

#[test]
fn add_triggers_iteration_but_set_does_not() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = record([("a", 1)]);
    let _e = effect({
        let state = state.clone();
        move || call!("keys {}", state.keys().len())
    });
    cr.verify("keys 1");

    state.set("a", 2);
    cr.verify(()); // existing key, iteration is unaffected

    state.set("b", 1);
    cr.verify("keys 2");

    state.delete("b");
    cr.verify("keys 1");
}

#[test]
fn has_and_delete() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = record([("a", 1)]);
    let _e = effect({
        let state = state.clone();
        move || call!("{}", state.has("a"))
    });
    cr.verify("true");

    assert!(state.delete("a"));
    cr.verify("false");
    assert!(state.delete("a"));
    cr.verify(()); // nothing was deleted

    state.set("a", 1);
    cr.verify("true");
}

#[test]
fn list_index_and_length() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let list = Reactive::new(RawObject::list([1, 2])).unwrap();
    let _e = effect({
        let list = list.clone();
        move || call!("len {}", list.len())
    });
    cr.verify("len 2");

    list.set(0, 10);
    cr.verify(()); // length is unchanged

    list.set(2, 3);
    cr.verify("len 3");
}

#[test]
fn push_does_not_track_length() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let list = Reactive::new(RawObject::list(Vec::<Value>::new())).unwrap();
    let e = effect({
        let list = list.clone();
        move || {
            list.push([1]);
        }
    });
    assert_eq!(e.dep_count(), 0);
    assert_eq!(list.to_vec().unwrap(), vec![Value::from(1)]);

    let _reader = effect({
        let list = list.clone();
        move || call!("{:?}", list.to_vec().unwrap())
    });
    cr.verify("[1]");

    list.push([2, 3]);
    cr.verify(["[1, 2]", "[1, 2, 3]"]); // each appended index notifies length readers
}

#[test]
fn list_mutation_methods() {
    let _rt = Runtime::new();
    let list = Reactive::new(RawObject::list([1, 2, 3])).unwrap();
    assert_eq!(list.pop(), Value::from(3));
    assert_eq!(list.shift(), Value::from(1));
    assert_eq!(list.unshift([0]), 2);
    assert_eq!(list.to_vec().unwrap(), vec![Value::from(0), Value::from(2)]);

    let removed = list.splice(1, Some(1), ["a", "b"]);
    assert_eq!(removed, vec![Value::from(2)]);
    assert_eq!(
        list.to_vec().unwrap(),
        vec![Value::from(0), Value::from("a"), Value::from("b")]
    );

    let removed = list.splice(-2, None, Vec::<Value>::new());
    assert_eq!(removed, vec![Value::from("a"), Value::from("b")]);
    assert_eq!(list.len(), 1);

    let empty = Reactive::new(RawObject::list(Vec::<Value>::new())).unwrap();
    assert_eq!(empty.pop(), Value::Undefined);
    assert_eq!(empty.shift(), Value::Undefined);
}

#[test]
fn search_methods_match_raw_and_wrapped() {
    let _rt = Runtime::new();
    let item = RawObject::record();
    let list = Reactive::new(RawObject::list([
        Value::from(1),
        Value::from(item.clone()),
        Value::from(f64::NAN),
        Value::from(1),
    ]))
    .unwrap();
    let wrapped = list.get(1);
    assert!(is_reactive(&wrapped));

    assert!(list.includes(wrapped.clone()));
    assert!(list.includes(item));
    assert!(list.includes(f64::NAN));
    assert_eq!(list.index_of(f64::NAN), None);
    assert_eq!(list.index_of(1), Some(0));
    assert_eq!(list.last_index_of(1), Some(3));
    assert_eq!(list.index_of(wrapped), Some(1));
}

#[test]
fn includes_tracks_every_index() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let list = Reactive::new(RawObject::list([1, 2])).unwrap();
    let _e = effect({
        let list = list.clone();
        move || call!("{}", list.includes(3))
    });
    cr.verify("false");

    list.set(1, 3);
    cr.verify("true");
}

#[test]
fn prototype_write_triggers_child_only() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let parent = reactive(RawObject::record_from([("shared", 1)]));
    let child = Reactive::new(RawObject::with_proto(parent.clone())).unwrap();
    let parent = parent.as_reactive().unwrap().clone();

    let _c = effect({
        let child = child.clone();
        move || call!("child {}", child.get("shared"))
    });
    cr.verify("child 1");

    child.set("shared", 2);
    cr.verify("child 2");
    assert_eq!(parent.get("shared"), Value::from(1));

    parent.set("shared", 3);
    cr.verify(()); // the child has its own property now
}

#[test]
fn map_keys_ignore_value_changes() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let map = Reactive::new(RawObject::map_from([("a", 1)])).unwrap();
    let _keys = effect({
        let map = map.clone();
        move || call!("keys {}", map.keys().len())
    });
    let _values = effect({
        let map = map.clone();
        move || call!("values {:?}", map.values())
    });
    cr.verify(["keys 1", "values [1]"]);

    map.set("a", 2);
    cr.verify("values [2]");

    map.set("b", 3);
    cr.verify(["values [2, 3]", "keys 2"]);

    map.delete("a");
    cr.verify(["values [3]", "keys 1"]);
}

#[test]
fn map_get_and_has() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let map = Reactive::new(RawObject::map()).unwrap();
    let _e = effect({
        let map = map.clone();
        move || call!("{} {}", map.has("k"), map.get("k"))
    });
    cr.verify("false undefined");

    map.set("k", 1);
    cr.verify("true 1");
    map.set("other", 1);
    cr.verify(());
    assert_eq!(map.len(), 2);
}

#[test]
fn map_with_object_key() {
    let _rt = Runtime::new();
    let key = RawObject::record();
    let map = Reactive::new(RawObject::map()).unwrap();
    let wrapped_key = reactive(key.clone());

    map.set(wrapped_key.clone(), "v");
    assert_eq!(map.get(key.clone()), Value::from("v"));
    assert_eq!(map.get(wrapped_key.clone()), Value::from("v"));
    assert!(map.has(wrapped_key));
    assert_eq!(map.raw().keys(), vec![Value::from(key)]);
}

#[test]
fn set_add_existing_does_not_trigger() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let set = Reactive::new(RawObject::set_from([1])).unwrap();
    let _e = effect({
        let set = set.clone();
        move || call!("{}", set.len())
    });
    cr.verify("1");

    set.add(1);
    cr.verify(());
    set.add(2);
    cr.verify("2");
    assert!(set.has(2));
    set.clear();
    cr.verify("0");
}

#[test]
fn readonly_map_warns() {
    let mut rt = Runtime::new();
    let warnings = collect_warnings(&mut rt);
    let map = readonly(RawObject::map_from([("k", 1)]));
    let map = map.as_reactive().unwrap();
    map.set("k", 2);
    map.clear();
    assert_eq!(map.get("k"), Value::from(1));
    assert_eq!(
        *warnings.borrow(),
        vec![
            "Set operation on key \"k\" failed: Map is readonly.".to_string(),
            "Clear operation failed: Map is readonly.".to_string(),
        ]
    );
}

#[test]
fn readonly_view_of_reactive_map_tracks_through_inner() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let state = reactive(RawObject::map_from([("k", 1)]));
    let view = readonly(state.clone());
    assert!(is_readonly(&view));
    let _e = effect({
        let view = view.clone();
        move || {
            let view = view.as_reactive().unwrap();
            call!("{} {}", view.get("k"), view.get("missing"));
        }
    });
    cr.verify("1 undefined");

    let state = state.as_reactive().unwrap();
    state.set("k", 2);
    cr.verify("2 undefined");
    state.set("missing", 3);
    cr.verify("2 3");
}

#[test]
fn for_each_visits_value_and_key() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let map = Reactive::new(RawObject::map_from([("a", 1), ("b", 2)])).unwrap();
    map.for_each(|value, key| call!("{key}={value}"));
    cr.verify(["a=1", "b=2"]);

    let state = record([("x", 1)]);
    state.for_each(|value, key| call!("{key}={value}"));
    cr.verify("x=1");
}

#[test]
fn ref_assigned_to_new_key_is_unwrapped() {
    let _rt = Runtime::new();
    let state = record([]);
    state.set("r", Ref::new(1));
    assert_eq!(state.get("r"), Value::from(1));
}
