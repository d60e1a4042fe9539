use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::Rc,
};

use derive_ex::derive_ex;
use parse_display::Display;

use crate::{
    core::{next_id, Globals},
    dep::{Dep, DebuggerEvent, MAX_MARKER_BITS},
    scope::{record_effect_scope, EffectScope, ScopeEntry},
};


#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display("effect#{0}")]
pub struct EffectId(u64);

type DebuggerHook = Rc<dyn Fn(&DebuggerEvent)>;

/// Stack of running effects and the tracking switch.
pub(crate) struct EffectStack {
    stack: Vec<(Rc<dyn AnyEffect>, bool)>,
    should_track: bool,
    track_stack: Vec<bool>,
}
impl EffectStack {
    pub(crate) fn new() -> Self {
        Self {
            stack: Vec::new(),
            should_track: true,
            track_stack: Vec::new(),
        }
    }
    fn push(&mut self, effect: Rc<dyn AnyEffect>) -> Option<u32> {
        let id = effect.state().id;
        if self.stack.iter().any(|(e, _)| e.state().id == id) {
            return None;
        }
        self.stack.push((effect, self.should_track));
        self.should_track = true;
        Some(self.stack.len() as u32)
    }
    fn pop(&mut self) -> Option<Rc<dyn AnyEffect>> {
        let (effect, last_should_track) = self.stack.pop()?;
        self.should_track = last_should_track;
        Some(effect)
    }
    fn active(&self) -> Option<ActiveEffect> {
        if !self.should_track {
            return None;
        }
        let (effect, _) = self.stack.last()?;
        let depth = self.stack.len() as u32;
        Some(ActiveEffect {
            effect: effect.clone(),
            depth,
            bit: track_op_bit(depth),
        })
    }
    fn current_id(&self) -> Option<EffectId> {
        self.stack.last().map(|(e, _)| e.state().id)
    }
    pub(crate) fn pause(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = false;
    }
    pub(crate) fn enable(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = true;
    }
    pub(crate) fn reset(&mut self) {
        self.should_track = self.track_stack.pop().unwrap_or(true);
    }
    pub(crate) fn is_tracking(&self) -> bool {
        self.should_track && !self.stack.is_empty()
    }
}

fn track_op_bit(depth: u32) -> u32 {
    1u32.checked_shl(depth).unwrap_or(0)
}

/// The innermost running effect while tracking is enabled.
pub(crate) struct ActiveEffect {
    pub effect: Rc<dyn AnyEffect>,
    pub depth: u32,
    pub bit: u32,
}
impl ActiveEffect {
    pub(crate) fn current() -> Option<Self> {
        Globals::try_with(|g| g.effects.active()).ok().flatten()
    }
    pub(crate) fn is_current(id: EffectId) -> bool {
        Globals::try_with(|g| g.effects.current_id() == Some(id)).unwrap_or(false)
    }
}

pub(crate) struct EffectState {
    pub id: EffectId,
    active: Cell<bool>,
    pub deps: RefCell<Vec<Dep>>,
    pub scheduler: Option<Rc<dyn Fn()>>,
    pub allow_recurse: Cell<bool>,
    defer_stop: Cell<bool>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    pub on_track: Option<DebuggerHook>,
    pub on_trigger: Option<DebuggerHook>,
}

impl EffectState {
    fn new(config: EffectConfig) -> Self {
        Self {
            id: EffectId(next_id()),
            active: Cell::new(true),
            deps: RefCell::new(Vec::new()),
            scheduler: config.scheduler,
            allow_recurse: Cell::new(config.allow_recurse),
            defer_stop: Cell::new(false),
            on_stop: RefCell::new(config.on_stop),
            on_track: config.on_track,
            on_trigger: config.on_trigger,
        }
    }
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }
    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }
    fn cleanup(&self) {
        let deps = take(&mut *self.deps.borrow_mut());
        for dep in deps {
            dep.remove(self.id);
        }
    }
    fn init_markers(&self, bit: u32) {
        for dep in self.deps.borrow().iter() {
            dep.mark_was_tracked(bit);
        }
    }
    fn finalize_markers(&self, bit: u32) {
        self.deps.borrow_mut().retain(|dep| {
            let keep = !dep.was_tracked(bit) || dep.new_tracked(bit);
            if !keep {
                dep.remove(self.id);
            }
            dep.clear_marks(bit);
            keep
        });
    }
    pub(crate) fn stop(&self) {
        if ActiveEffect::is_current(self.id) {
            self.defer_stop.set(true);
        } else if self.active.get() {
            self.cleanup();
            let on_stop = self.on_stop.borrow_mut().take();
            if let Some(on_stop) = on_stop {
                on_stop();
            }
            self.active.set(false);
        }
    }
}
impl Drop for EffectState {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().drain(..) {
            dep.remove(self.id);
        }
    }
}

pub(crate) trait AnyEffect {
    fn state(&self) -> &EffectState;
    fn run_dyn(self: Rc<Self>);
}

#[derive(Default)]
pub(crate) struct EffectConfig {
    pub scheduler: Option<Rc<dyn Fn()>>,
    pub allow_recurse: bool,
    pub on_stop: Option<Box<dyn FnOnce()>>,
    pub on_track: Option<DebuggerHook>,
    pub on_trigger: Option<DebuggerHook>,
}

pub(crate) struct EffectNode<T> {
    state: EffectState,
    f: RefCell<Box<dyn FnMut() -> T>>,
}

impl<T: 'static> EffectNode<T> {
    pub(crate) fn new(f: impl FnMut() -> T + 'static, config: EffectConfig) -> Rc<Self> {
        Rc::new(Self {
            state: EffectState::new(config),
            f: RefCell::new(Box::new(f)),
        })
    }
    pub(crate) fn state(&self) -> &EffectState {
        &self.state
    }

    /// Runs the function while collecting its dependencies.
    ///
    /// Returns `None` if the effect is already running somewhere up the stack.
    pub(crate) fn run(self: &Rc<Self>) -> Option<T> {
        if !self.state.active.get() {
            let mut f = self.f.try_borrow_mut().ok()?;
            return Some(f());
        }
        let _guard = RunGuard::enter(self.clone())?;
        let mut f = self.f.try_borrow_mut().ok()?;
        Some(f())
    }
}
impl<T: 'static> AnyEffect for EffectNode<T> {
    fn state(&self) -> &EffectState {
        &self.state
    }
    fn run_dyn(self: Rc<Self>) {
        self.run();
    }
}
impl<T: 'static> ScopeEntry for EffectNode<T> {
    fn stop_entry(&self) {
        self.state.stop();
    }
}

struct RunGuard {
    effect: Rc<dyn AnyEffect>,
    depth: u32,
    bit: u32,
}
impl RunGuard {
    fn enter(effect: Rc<dyn AnyEffect>) -> Option<Self> {
        let depth = Globals::with(|g| g.effects.push(effect.clone()))?;
        let bit = track_op_bit(depth);
        if depth <= MAX_MARKER_BITS {
            effect.state().init_markers(bit);
        } else {
            effect.state().cleanup();
        }
        Some(Self { effect, depth, bit })
    }
}
impl Drop for RunGuard {
    fn drop(&mut self) {
        let state = self.effect.state();
        if self.depth <= MAX_MARKER_BITS {
            state.finalize_markers(self.bit);
        }
        let popped = Globals::try_with(|g| g.effects.pop()).ok().flatten();
        drop(popped);
        if state.defer_stop.replace(false) {
            state.stop();
        }
    }
}

/// Options for [`effect_with`] and [`ReactiveEffect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    lazy: bool,
    scope: Option<EffectScope>,
    config: EffectConfig,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not run the effect on creation.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Called instead of re-running the effect when a dependency changes.
    pub fn scheduler(mut self, scheduler: impl Fn() + 'static) -> Self {
        self.config.scheduler = Some(Rc::new(scheduler));
        self
    }
    pub fn allow_recurse(mut self, allow_recurse: bool) -> Self {
        self.config.allow_recurse = allow_recurse;
        self
    }
    pub fn scope(mut self, scope: &EffectScope) -> Self {
        self.scope = Some(scope.clone());
        self
    }
    pub fn on_stop(mut self, on_stop: impl FnOnce() + 'static) -> Self {
        self.config.on_stop = Some(Box::new(on_stop));
        self
    }
    pub fn on_track(mut self, on_track: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.config.on_track = Some(Rc::new(on_track));
        self
    }
    pub fn on_trigger(mut self, on_trigger: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.config.on_trigger = Some(Rc::new(on_trigger));
        self
    }
}

/// A function that re-runs when the reactive values it read change.
///
/// Dependencies hold the effect weakly.
/// It lives as long as a handle or the [`EffectScope`] it was recorded in.
#[derive_ex(Clone, bound())]
pub struct ReactiveEffect<T: 'static = ()>(Rc<EffectNode<T>>);

impl<T: 'static> ReactiveEffect<T> {
    pub fn new(f: impl FnMut() -> T + 'static) -> Self {
        Self::with_options(f, EffectOptions::new())
    }

    /// Creates an effect without running it.
    ///
    /// `lazy` is ignored.
    pub fn with_options(f: impl FnMut() -> T + 'static, options: EffectOptions) -> Self {
        let node = EffectNode::new(f, options.config);
        record_effect_scope(node.clone(), options.scope.as_ref());
        Self(node)
    }

    pub(crate) fn from_node(node: Rc<EffectNode<T>>) -> Self {
        Self(node)
    }

    pub fn run(&self) -> Option<T> {
        self.0.run()
    }
    pub fn stop(&self) {
        self.0.state.stop()
    }
    pub fn is_active(&self) -> bool {
        self.0.state.is_active()
    }
    pub fn id(&self) -> EffectId {
        self.0.state.id
    }
    pub fn allow_recurse(&self) -> bool {
        self.0.state.allow_recurse.get()
    }
    pub fn set_allow_recurse(&self, value: bool) {
        self.0.state.allow_recurse.set(value)
    }

    /// Number of dependencies collected by the last run.
    pub fn dep_count(&self) -> usize {
        self.0.state.deps.borrow().len()
    }
}

/// Creates an effect and runs it immediately unless `lazy` is set.
pub fn effect_with<T: 'static>(
    f: impl FnMut() -> T + 'static,
    options: EffectOptions,
) -> ReactiveEffect<T> {
    let lazy = options.lazy;
    let e = ReactiveEffect::with_options(f, options);
    if !lazy {
        e.run();
    }
    e
}

pub fn effect<T: 'static>(f: impl FnMut() -> T + 'static) -> ReactiveEffect<T> {
    effect_with(f, EffectOptions::new())
}

pub fn stop<T: 'static>(effect: &ReactiveEffect<T>) {
    effect.stop()
}
