use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::{
    dep::{DebuggerEvent, RefDep, TargetId},
    effect::{EffectConfig, EffectNode, ReactiveEffect},
    error::{warn, CyclicError},
    refs::{Ref, RefNode},
    scope::record_effect_scope,
    value::Value,
};


/// A cached value derived from reactive state.
///
/// The getter runs on the first read and again only after one of its dependencies changed.
/// A change marks the value dirty and notifies the readers of the computed value once,
/// without running the getter.
#[derive_ex(Clone, bound())]
pub struct Computed<T: 'static>(Rc<ComputedNode<T>>);

struct ComputedNode<T: 'static> {
    dep: RefDep,
    value: RefCell<Option<T>>,
    effect: ReactiveEffect<T>,
    dirty: Cell<bool>,
    cacheable: bool,
    setter: Option<Box<dyn Fn(T)>>,
}

type Hook = Rc<dyn Fn(&DebuggerEvent)>;

impl<T: Clone + 'static> Computed<T> {
    pub fn new(getter: impl FnMut() -> T + 'static) -> Self {
        Self::build(getter, None, true, None, None)
    }

    /// Creates a writable computed value. Writes are passed to `setter`.
    pub fn with_setter(getter: impl FnMut() -> T + 'static, setter: impl Fn(T) + 'static) -> Self {
        Self::build(getter, Some(Box::new(setter)), true, None, None)
    }

    /// Creates a computed value that runs `getter` on every read.
    pub fn uncached(getter: impl FnMut() -> T + 'static) -> Self {
        Self::build(getter, None, false, None, None)
    }

    /// Creates a computed value whose getter effect reports to debugger hooks.
    pub fn with_debugger(
        getter: impl FnMut() -> T + 'static,
        on_track: impl Fn(&DebuggerEvent) + 'static,
        on_trigger: impl Fn(&DebuggerEvent) + 'static,
    ) -> Self {
        Self::build(
            getter,
            None,
            true,
            Some(Rc::new(on_track)),
            Some(Rc::new(on_trigger)),
        )
    }

    fn build(
        getter: impl FnMut() -> T + 'static,
        setter: Option<Box<dyn Fn(T)>>,
        cacheable: bool,
        on_track: Option<Hook>,
        on_trigger: Option<Hook>,
    ) -> Self {
        let node = Rc::new_cyclic(|this: &Weak<ComputedNode<T>>| {
            let this = this.clone();
            let config = EffectConfig {
                scheduler: Some(Rc::new(move || {
                    if let Some(this) = this.upgrade() {
                        this.invalidate();
                    }
                })),
                on_track,
                on_trigger,
                ..EffectConfig::default()
            };
            let effect = EffectNode::new(getter, config);
            record_effect_scope(effect.clone(), None);
            if !cacheable {
                effect.state().deactivate();
            }
            ComputedNode {
                dep: RefDep::new(),
                value: RefCell::new(None),
                effect: ReactiveEffect::from_node(effect),
                dirty: Cell::new(true),
                cacheable,
                setter,
            }
        });
        Self(node)
    }

    /// Returns the value, recomputing it if it is dirty.
    ///
    /// # Panics
    ///
    /// Panics if the value is read during its own first evaluation.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
    pub fn try_get(&self) -> Result<T, CyclicError> {
        self.0.try_get()
    }

    /// Passes `value` to the setter, or warns if there is none.
    pub fn set(&self, value: T) {
        self.0.set(value)
    }
    pub fn is_readonly(&self) -> bool {
        self.0.setter.is_none()
    }
    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }
    pub fn effect(&self) -> ReactiveEffect<T> {
        self.0.effect.clone()
    }
    pub fn id(&self) -> TargetId {
        self.0.dep.id()
    }

    /// Number of effects currently reading this value.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.subscriber_count()
    }
}

impl<T: Clone + 'static> ComputedNode<T> {
    fn invalidate(&self) {
        if !self.dirty.get() {
            self.dirty.set(true);
            self.dep.trigger(None);
        }
    }
    fn try_get(&self) -> Result<T, CyclicError> {
        self.dep.track();
        if self.dirty.get() || !self.cacheable {
            self.dirty.set(false);
            if let Some(value) = self.effect.run() {
                *self.value.borrow_mut() = Some(value);
            }
        }
        self.value.borrow().clone().ok_or_else(CyclicError::new)
    }
    fn set(&self, value: T) {
        if let Some(setter) = &self.setter {
            setter(value)
        } else {
            warn("Write operation failed: computed value is readonly");
        }
    }
}

impl RefNode for ComputedNode<Value> {
    fn id(&self) -> TargetId {
        self.dep.id()
    }
    fn get(&self) -> Value {
        match self.try_get() {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
    fn set(&self, value: Value) {
        ComputedNode::set(self, value)
    }
    fn is_readonly(&self) -> bool {
        self.setter.is_none()
    }
    fn trigger(&self) {
        self.dep.trigger(None);
    }
}

impl From<Computed<Value>> for Ref {
    fn from(value: Computed<Value>) -> Self {
        Ref::from_node(value.0)
    }
}
impl From<Computed<Value>> for Value {
    fn from(value: Computed<Value>) -> Self {
        Value::Ref(value.into())
    }
}
