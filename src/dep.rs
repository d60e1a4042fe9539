use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use indexmap::IndexMap;
use parse_display::Display;

use crate::{
    core::next_id,
    effect::{ActiveEffect, AnyEffect, EffectId},
    value::{Key, Value},
};


/// Above this nesting depth, an effect rebuilds its dependency list on every run.
pub const MAX_MARKER_BITS: u32 = 30;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("target#{0}")]
pub struct TargetId(u64);

impl TargetId {
    pub(crate) fn new() -> Self {
        Self(next_id())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(style = "lowercase")]
pub enum TargetKind {
    Record,
    List,
    Map,
    Set,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(style = "lowercase")]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(style = "lowercase")]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum DebuggerOp {
    #[display("{0}")]
    Track(TrackOp),
    #[display("{0}")]
    Trigger(TriggerOp),
}

/// Passed to `on_track` and `on_trigger` hooks.
#[derive(Clone, Debug)]
pub struct DebuggerEvent {
    pub effect: EffectId,
    pub target: TargetId,
    pub op: DebuggerOp,
    pub key: Option<Key>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

struct EventInfo {
    target: TargetId,
    op: DebuggerOp,
    key: Option<Key>,
    new_value: Option<Value>,
    old_value: Option<Value>,
}
impl EventInfo {
    fn track(target: TargetId, op: TrackOp, key: Key) -> Self {
        Self {
            target,
            op: DebuggerOp::Track(op),
            key: Some(key),
            new_value: None,
            old_value: None,
        }
    }
    fn trigger(
        target: TargetId,
        op: TriggerOp,
        key: Option<&Key>,
        new_value: Option<&Value>,
        old_value: Option<&Value>,
    ) -> Self {
        Self {
            target,
            op: DebuggerOp::Trigger(op),
            key: key.cloned(),
            new_value: new_value.cloned(),
            old_value: old_value.cloned(),
        }
    }
    fn to_event(&self, effect: EffectId) -> DebuggerEvent {
        DebuggerEvent {
            effect,
            target: self.target,
            op: self.op,
            key: self.key.clone(),
            new_value: self.new_value.clone(),
            old_value: self.old_value.clone(),
        }
    }
}

/// The set of effects that depend on one location.
///
/// `w` and `n` hold one bit per effect nesting level: "was tracked before this run"
/// and "tracked during this run".
#[derive(Clone)]
pub(crate) struct Dep(Rc<DepNode>);

struct DepNode {
    effects: RefCell<IndexMap<EffectId, Weak<dyn AnyEffect>>>,
    w: Cell<u32>,
    n: Cell<u32>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self(Rc::new(DepNode {
            effects: RefCell::new(IndexMap::new()),
            w: Cell::new(0),
            n: Cell::new(0),
        }))
    }
    pub(crate) fn was_tracked(&self, bit: u32) -> bool {
        self.0.w.get() & bit != 0
    }
    pub(crate) fn new_tracked(&self, bit: u32) -> bool {
        self.0.n.get() & bit != 0
    }
    pub(crate) fn mark_was_tracked(&self, bit: u32) {
        self.0.w.set(self.0.w.get() | bit);
    }
    fn mark_new_tracked(&self, bit: u32) {
        self.0.n.set(self.0.n.get() | bit);
    }
    pub(crate) fn clear_marks(&self, bit: u32) {
        self.0.w.set(self.0.w.get() & !bit);
        self.0.n.set(self.0.n.get() & !bit);
    }

    fn insert(&self, effect: &Rc<dyn AnyEffect>) {
        self.0
            .effects
            .borrow_mut()
            .insert(effect.state().id, Rc::downgrade(effect));
    }
    pub(crate) fn remove(&self, id: EffectId) {
        self.0.effects.borrow_mut().shift_remove(&id);
    }
    fn contains(&self, id: EffectId) -> bool {
        self.0.effects.borrow().contains_key(&id)
    }
    pub(crate) fn len(&self) -> usize {
        self.0.effects.borrow().len()
    }
    fn effects(&self) -> Vec<Rc<dyn AnyEffect>> {
        self.0
            .effects
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// The single dep of a boxed reference or a computed value, created on first read.
pub(crate) struct RefDep {
    id: TargetId,
    dep: RefCell<Option<Dep>>,
}

impl RefDep {
    pub(crate) fn new() -> Self {
        Self {
            id: TargetId::new(),
            dep: RefCell::new(None),
        }
    }
    pub(crate) fn id(&self) -> TargetId {
        self.id
    }
    pub(crate) fn subscriber_count(&self) -> usize {
        self.dep.borrow().as_ref().map_or(0, Dep::len)
    }
    pub(crate) fn track(&self) {
        let Some(active) = ActiveEffect::current() else {
            return;
        };
        let dep = self.dep.borrow_mut().get_or_insert_with(Dep::new).clone();
        track_effects(&dep, &active, || {
            EventInfo::track(self.id, TrackOp::Get, Key::from("value"))
        });
    }
    pub(crate) fn trigger(&self, new_value: Option<&Value>) {
        let dep = self.dep.borrow().clone();
        if let Some(dep) = dep {
            let info = EventInfo::trigger(
                self.id,
                TriggerOp::Set,
                Some(&Key::from("value")),
                new_value,
                None,
            );
            trigger_effects(dep.effects(), &info);
        }
    }
}

/// Per-target association from keys to deps.
///
/// Owned by the target, so it is collected together with it.
pub struct TargetDeps {
    id: TargetId,
    deps: RefCell<IndexMap<Key, Dep>>,
}

impl TargetDeps {
    pub fn new() -> Self {
        Self {
            id: TargetId::new(),
            deps: RefCell::new(IndexMap::new()),
        }
    }
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Returns `true` if any key of the target has ever been tracked.
    pub fn is_tracked(&self) -> bool {
        !self.deps.borrow().is_empty()
    }

    /// Number of effects currently depending on `key`.
    pub fn subscriber_count(&self, key: &Key) -> usize {
        self.deps.borrow().get(key).map_or(0, Dep::len)
    }

    fn dep(&self, key: &Key) -> Dep {
        self.deps
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(Dep::new)
            .clone()
    }
}
impl Default for TargetDeps {
    fn default() -> Self {
        Self::new()
    }
}

/// A container whose reads and writes can be tracked.
pub trait Target {
    fn target_deps(&self) -> &TargetDeps;
    fn target_kind(&self) -> TargetKind {
        TargetKind::Record
    }
}

/// Records that the running effect read `key` of `target`.
///
/// Does nothing while tracking is paused or when no effect is running.
pub fn track(target: &(impl Target + ?Sized), op: TrackOp, key: &Key) {
    let Some(active) = ActiveEffect::current() else {
        return;
    };
    let deps = target.target_deps();
    let dep = deps.dep(key);
    track_effects(&dep, &active, || EventInfo::track(deps.id(), op, key.clone()));
}

fn track_effects(dep: &Dep, active: &ActiveEffect, info: impl FnOnce() -> EventInfo) {
    let state = active.effect.state();
    let should_track = if active.depth <= MAX_MARKER_BITS {
        if !dep.new_tracked(active.bit) {
            dep.mark_new_tracked(active.bit);
            !dep.was_tracked(active.bit)
        } else {
            false
        }
    } else {
        !dep.contains(state.id)
    };
    if should_track {
        dep.insert(&active.effect);
        state.deps.borrow_mut().push(dep.clone());
        if let Some(on_track) = &state.on_track {
            on_track(&info().to_event(state.id));
        }
    }
}

/// Notifies the effects that depend on the mutated location.
///
/// Does nothing if the target has never been tracked.
pub fn trigger(
    target: &(impl Target + ?Sized),
    op: TriggerOp,
    key: Option<&Key>,
    new_value: Option<&Value>,
    old_value: Option<&Value>,
) {
    let target_deps = target.target_deps();
    let kind = target.target_kind();
    let deps = {
        let map = target_deps.deps.borrow();
        if map.is_empty() {
            return;
        }
        let mut deps = Vec::new();
        if op == TriggerOp::Clear {
            deps.extend(map.values().cloned());
        } else if key == Some(&Key::Length) && kind == TargetKind::List {
            let new_length = new_value.and_then(Value::as_f64).unwrap_or(0.0);
            for (key, dep) in map.iter() {
                match key {
                    Key::Length => deps.push(dep.clone()),
                    Key::Index(i) if *i as f64 >= new_length => deps.push(dep.clone()),
                    _ => {}
                }
            }
        } else {
            let mut push = |key: &Key| {
                if let Some(dep) = map.get(key) {
                    deps.push(dep.clone());
                }
            };
            if let Some(key) = key {
                push(key);
            }
            match op {
                TriggerOp::Add => {
                    if kind != TargetKind::List {
                        push(&Key::Iterate);
                        if kind == TargetKind::Map {
                            push(&Key::MapKeyIterate);
                        }
                    } else if key.and_then(Key::as_index).is_some() {
                        push(&Key::Length);
                    }
                }
                TriggerOp::Delete => {
                    if kind != TargetKind::List {
                        push(&Key::Iterate);
                        if kind == TargetKind::Map {
                            push(&Key::MapKeyIterate);
                        }
                    }
                }
                TriggerOp::Set => {
                    if kind == TargetKind::Map {
                        push(&Key::Iterate);
                    }
                }
                TriggerOp::Clear => {}
            }
        }
        deps
    };
    let info = EventInfo::trigger(target_deps.id(), op, key, new_value, old_value);
    match deps.as_slice() {
        [] => {}
        [dep] => trigger_effects(dep.effects(), &info),
        deps => {
            let mut effects = IndexMap::new();
            for dep in deps {
                for effect in dep.effects() {
                    effects.entry(effect.state().id).or_insert(effect);
                }
            }
            trigger_effects(effects.into_values().collect(), &info);
        }
    }
}

fn trigger_effects(effects: Vec<Rc<dyn AnyEffect>>, info: &EventInfo) {
    for effect in effects {
        let state = effect.state();
        if ActiveEffect::is_current(state.id) && !state.allow_recurse.get() {
            continue;
        }
        if let Some(on_trigger) = &state.on_trigger {
            on_trigger(&info.to_event(state.id));
        }
        if let Some(scheduler) = state.scheduler.clone() {
            scheduler();
        } else {
            effect.run_dyn();
        }
    }
}
