use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    rc::{Rc, Weak},
};

use parse_display::{Display, FromStr};

use crate::{
    computed::Computed,
    dep::DebuggerEvent,
    effect::{EffectConfig, EffectNode, ReactiveEffect},
    error::{call_with_error_handling, warn, ErrorCode},
    reactive::Reactive,
    refs::Ref,
    scheduler::{queue_post_flush_cb, queue_pre_flush_cb, Job},
    scope::{current_owner, record_effect_scope, ScopeEntry, ScopeSlot, WeakOwner},
    value::{has_changed, Value},
};

#[cfg(test)]
mod tests;

/// When a watcher runs after one of its sources changed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Display, FromStr)]
#[display(style = "lowercase")]
pub enum FlushTiming {
    /// Before the queued jobs of the next flush.
    #[default]
    Pre,
    /// After the queued jobs of the next flush.
    Post,
    /// Synchronously, inside the write.
    Sync,
}

type Hook = Rc<dyn Fn(&DebuggerEvent)>;

#[derive(Default)]
pub struct WatchOptions {
    immediate: Option<bool>,
    deep: Option<bool>,
    flush: FlushTiming,
    on_track: Option<Hook>,
    on_trigger: Option<Hook>,
    compat_watch_array: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call the callback once on creation, with an undefined old value.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    /// Track every nested value of the source.
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }
    pub fn flush(mut self, flush: FlushTiming) -> Self {
        self.flush = flush;
        self
    }
    pub fn on_track(mut self, on_track: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.on_track = Some(Rc::new(on_track));
        self
    }
    pub fn on_trigger(mut self, on_trigger: impl Fn(&DebuggerEvent) + 'static) -> Self {
        self.on_trigger = Some(Rc::new(on_trigger));
        self
    }

    /// Treat a watched list as deep, so mutating its elements fires the callback.
    pub fn compat_watch_array(mut self, value: bool) -> Self {
        self.compat_watch_array = value;
        self
    }
}

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    Ref(Ref),
    Reactive(Reactive),
    Getter(Rc<dyn Fn() -> Value>),
    Multi(Vec<WatchSource>),
    /// Anything else. Watching it warns and observes nothing.
    Invalid(Value),
}

impl WatchSource {
    pub fn getter(f: impl Fn() -> Value + 'static) -> Self {
        Self::Getter(Rc::new(f))
    }

    fn reactive(&self) -> Option<&Reactive> {
        match self {
            Self::Reactive(r) if r.is_reactive() => Some(r),
            _ => None,
        }
    }

    /// Value of one element of a multi-source.
    fn read_element(&self) -> Value {
        match self {
            Self::Ref(r) => r.get(),
            Self::Reactive(r) if r.is_reactive() => traverse(&Value::Reactive(r.clone())),
            Self::Getter(f) => {
                call_with_error_handling(ErrorCode::WatchGetter, || f()).unwrap_or_default()
            }
            source => {
                warn_invalid_source(source);
                Value::Undefined
            }
        }
    }
}
impl fmt::Display for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ref(r) => write!(f, "{r:?}"),
            Self::Reactive(r) => write!(f, "{r:?}"),
            Self::Getter(_) => write!(f, "[getter]"),
            Self::Multi(sources) => {
                write!(f, "[")?;
                for (i, source) in sources.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{source}")?;
                }
                write!(f, "]")
            }
            Self::Invalid(value) => write!(f, "{value}"),
        }
    }
}
impl From<Ref> for WatchSource {
    fn from(value: Ref) -> Self {
        Self::Ref(value)
    }
}
impl From<&Ref> for WatchSource {
    fn from(value: &Ref) -> Self {
        Self::Ref(value.clone())
    }
}
impl From<Computed<Value>> for WatchSource {
    fn from(value: Computed<Value>) -> Self {
        Self::Ref(value.into())
    }
}
impl From<Reactive> for WatchSource {
    fn from(value: Reactive) -> Self {
        Self::Reactive(value)
    }
}
impl From<&Reactive> for WatchSource {
    fn from(value: &Reactive) -> Self {
        Self::Reactive(value.clone())
    }
}
impl From<Vec<WatchSource>> for WatchSource {
    fn from(value: Vec<WatchSource>) -> Self {
        Self::Multi(value)
    }
}
impl From<Value> for WatchSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Ref(r) => Self::Ref(r),
            Value::Reactive(r) => Self::Reactive(r),
            value => Self::Invalid(value),
        }
    }
}

fn warn_invalid_source(source: &WatchSource) {
    warn(&format!(
        "Invalid watch source: {source} A watch source can only be a getter/effect function, \
         a ref, a reactive object, or an array of these types."
    ));
}

/// Registers a function to run before the watcher runs again or stops.
pub struct OnCleanup(Weak<Watcher>);

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        if let Some(w) = self.0.upgrade() {
            *w.cleanup.borrow_mut() = Some(Box::new(f));
        }
    }
}

type Callback = Rc<dyn Fn(&Value, &Value, &OnCleanup)>;

struct Watcher {
    effect: ReactiveEffect<Value>,
    job: Job,
    cb: Option<Callback>,
    old_value: RefCell<Option<Value>>,
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    deep: bool,
    force_trigger: bool,
    is_multi: bool,
    compat_watch_array: bool,
    slot: RefCell<Option<ScopeSlot>>,
    this: Weak<Watcher>,
}

impl Watcher {
    fn run_cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            call_with_error_handling(ErrorCode::WatchCleanup, cleanup);
        }
    }

    fn run_job(&self) {
        if !self.effect.is_active() {
            return;
        }
        let Some(cb) = self.cb.clone() else {
            self.effect.run();
            return;
        };
        let Some(new_value) = self.effect.run() else {
            return;
        };
        if !self.is_changed(&new_value) {
            return;
        }
        self.run_cleanup();
        let old_value = self.old_value.borrow().clone().unwrap_or_default();
        let on_cleanup = OnCleanup(self.this.clone());
        call_with_error_handling(ErrorCode::WatchCallback, || {
            cb(&new_value, &old_value, &on_cleanup)
        });
        *self.old_value.borrow_mut() = Some(new_value);
    }

    fn is_changed(&self, new_value: &Value) -> bool {
        if self.deep || self.force_trigger {
            return true;
        }
        if self.compat_watch_array && new_value.is_list() {
            return true;
        }
        let old_value = self.old_value.borrow();
        let Some(old_value) = &*old_value else {
            return true;
        };
        if self.is_multi {
            let new_values = new_value.to_list().unwrap_or_default();
            let old_values = old_value.to_list().unwrap_or_default();
            new_values
                .iter()
                .enumerate()
                .any(|(i, v)| has_changed(v, old_values.get(i).unwrap_or(&Value::Undefined)))
        } else {
            has_changed(new_value, old_value)
        }
    }
}
impl ScopeEntry for Watcher {
    fn stop_entry(&self) {
        self.effect.stop();
    }
}

/// Handle of a watcher created by [`watch`] or [`watch_effect`].
///
/// The watcher lives as long as this handle or the scope it was created in.
#[must_use]
pub struct WatchHandle(Rc<Watcher>);

impl WatchHandle {
    /// Stops the watcher and runs its pending cleanup.
    pub fn stop(&self) {
        self.0.effect.stop();
        let slot = self.0.slot.borrow_mut().take();
        if let Some(slot) = slot {
            slot.remove();
        }
    }
    pub fn is_active(&self) -> bool {
        self.0.effect.is_active()
    }

    /// The job queued when a source changes.
    pub fn job(&self) -> &Job {
        &self.0.job
    }
}
impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.0.effect.id())
            .field("is_active", &self.is_active())
            .finish()
    }
}

/// Calls `cb` with the new and old values whenever `source` changes.
///
/// The old value is undefined on the first call.
pub fn watch(
    source: impl Into<WatchSource>,
    cb: impl Fn(&Value, &Value, &OnCleanup) + 'static,
    options: WatchOptions,
) -> WatchHandle {
    do_watch(Body::Source(source.into(), Rc::new(cb)), options)
}

/// Runs `f` now and again whenever a value it read changes.
pub fn watch_effect(f: impl Fn(&OnCleanup) + 'static, options: WatchOptions) -> WatchHandle {
    do_watch(Body::Effect(Rc::new(f)), options)
}

/// [`watch_effect`] with [`FlushTiming::Post`].
pub fn watch_post_effect(f: impl Fn(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect(f, WatchOptions::new().flush(FlushTiming::Post))
}

/// [`watch_effect`] with [`FlushTiming::Sync`].
pub fn watch_sync_effect(f: impl Fn(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect(f, WatchOptions::new().flush(FlushTiming::Sync))
}

enum Body {
    Source(WatchSource, Callback),
    Effect(Rc<dyn Fn(&OnCleanup)>),
}

type Getter = Box<dyn Fn() -> Value>;

fn do_watch(body: Body, options: WatchOptions) -> WatchHandle {
    let WatchOptions {
        immediate,
        deep,
        flush,
        on_track,
        on_trigger,
        compat_watch_array,
    } = options;
    let owner = current_owner().map(|owner| owner.downgrade());
    let has_cb = matches!(body, Body::Source(..));
    if !has_cb {
        if immediate.is_some() {
            warn(
                "watch() \"immediate\" option is only respected when using the \
                 watch(source, callback, options?) signature.",
            );
        }
        if deep.is_some() {
            warn(
                "watch() \"deep\" option is only respected when using the \
                 watch(source, callback, options?) signature.",
            );
        }
    }
    let mut deep = deep.unwrap_or(false);
    let immediate = immediate.unwrap_or(false);

    let watcher = Rc::new_cyclic(|this: &Weak<Watcher>| {
        let mut force_trigger = false;
        let mut is_multi = false;
        let (getter, cb): (Getter, Option<Callback>) = match body {
            Body::Source(source, cb) => {
                let getter: Getter = match source {
                    WatchSource::Ref(r) => {
                        force_trigger = r.is_shallow();
                        Box::new(move || r.get())
                    }
                    WatchSource::Reactive(r) if r.is_reactive() => {
                        deep = true;
                        Box::new(move || Value::Reactive(r.clone()))
                    }
                    WatchSource::Multi(sources) => {
                        is_multi = true;
                        force_trigger = sources.iter().any(|s| s.reactive().is_some());
                        Box::new(move || Value::list(sources.iter().map(|s| s.read_element())))
                    }
                    WatchSource::Getter(f) => Box::new(move || {
                        call_with_error_handling(ErrorCode::WatchGetter, || f())
                            .unwrap_or_default()
                    }),
                    source => {
                        warn_invalid_source(&source);
                        Box::new(|| Value::Undefined)
                    }
                };
                (getter, Some(cb))
            }
            Body::Effect(f) => {
                let this = this.clone();
                let owner = owner.clone();
                let getter: Getter = Box::new(move || {
                    if owner
                        .as_ref()
                        .and_then(WeakOwner::upgrade)
                        .is_some_and(|owner| owner.is_unmounted())
                    {
                        return Value::Undefined;
                    }
                    if let Some(w) = this.upgrade() {
                        w.run_cleanup();
                    }
                    let on_cleanup = OnCleanup(this.clone());
                    call_with_error_handling(ErrorCode::WatchCallback, || f(&on_cleanup));
                    Value::Undefined
                });
                (getter, None)
            }
        };
        let getter: Getter = if has_cb && compat_watch_array && !deep {
            Box::new(move || {
                let value = getter();
                if value.is_list() {
                    traverse(&value);
                }
                value
            })
        } else if has_cb && deep {
            Box::new(move || traverse(&getter()))
        } else {
            getter
        };

        let job = {
            let this = this.clone();
            Job::new(move || {
                if let Some(w) = this.upgrade() {
                    w.run_job();
                }
            })
            .allow_recurse(has_cb)
        };
        let scheduler: Rc<dyn Fn()> = {
            let job = job.clone();
            match flush {
                FlushTiming::Sync => Rc::new(move || job.run()),
                FlushTiming::Post => Rc::new(move || queue_post_flush_cb(&job)),
                FlushTiming::Pre => {
                    let owner = owner.clone();
                    Rc::new(move || {
                        let owner = owner.as_ref().and_then(WeakOwner::upgrade);
                        if owner.map_or(true, |owner| owner.is_mounted()) {
                            queue_pre_flush_cb(&job);
                        } else {
                            job.run();
                        }
                    })
                }
            }
        };
        let on_stop = {
            let this = this.clone();
            Box::new(move || {
                if let Some(w) = this.upgrade() {
                    w.run_cleanup();
                }
            })
        };
        let effect = EffectNode::new(
            move || getter(),
            EffectConfig {
                scheduler: Some(scheduler),
                on_stop: Some(on_stop),
                on_track,
                on_trigger,
                ..EffectConfig::default()
            },
        );
        Watcher {
            effect: ReactiveEffect::from_node(effect),
            job,
            cb,
            old_value: RefCell::new(is_multi.then(|| Value::list(Vec::<Value>::new()))),
            cleanup: RefCell::new(None),
            deep,
            force_trigger,
            is_multi,
            compat_watch_array,
            slot: RefCell::new(None),
            this: this.clone(),
        }
    });
    *watcher.slot.borrow_mut() = record_effect_scope(watcher.clone(), None);

    if has_cb {
        if immediate {
            watcher.job.run();
        } else {
            *watcher.old_value.borrow_mut() = watcher.effect.run();
        }
    } else if flush == FlushTiming::Post {
        let this = Rc::downgrade(&watcher);
        queue_post_flush_cb(&Job::new(move || {
            if let Some(w) = this.upgrade() {
                w.effect.run();
            }
        }));
    } else {
        watcher.effect.run();
    }
    WatchHandle(watcher)
}

/// Reads every nested value of `value` so the running effect depends on all of them.
///
/// Returns `value` unchanged. Values marked raw are not entered.
pub fn traverse(value: &Value) -> Value {
    traverse_with(value, &mut HashSet::new());
    value.clone()
}

fn traverse_with(value: &Value, seen: &mut HashSet<*const ()>) {
    let Some(id) = value.identity() else {
        return;
    };
    match value {
        Value::Ref(r) => {
            if seen.insert(id) {
                traverse_with(&r.get(), seen);
            }
        }
        Value::Reactive(r) => {
            if r.raw().is_skipped() || !seen.insert(id) {
                return;
            }
            let items = match r.to_vec() {
                Some(items) => items,
                None => r.values(),
            };
            for item in &items {
                traverse_with(item, seen);
            }
        }
        Value::Object(raw) => {
            if raw.is_skipped() || !seen.insert(id) {
                return;
            }
            let items = if let Some(items) = raw.to_vec() {
                items
            } else if raw.is_collection() {
                raw.entries().into_iter().map(|(_, v)| v).collect()
            } else {
                raw.keys().into_iter().map(|k| raw.get(k)).collect()
            };
            for item in &items {
                traverse_with(item, seen);
            }
        }
        _ => {}
    }
}
