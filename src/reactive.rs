use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    dep::TargetKind,
    error::warn,
    raw::RawObject,
    value::{Key, ReactiveFlag, Value},
};

mod base_handlers;
mod collection_handlers;

#[cfg(test)]
mod tests;

/// Which interception behavior a wrapper applies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct Variant {
    readonly: bool,
    shallow: bool,
}

impl Variant {
    const REACTIVE: Self = Self::new(false, false);
    const SHALLOW_REACTIVE: Self = Self::new(false, true);
    const READONLY: Self = Self::new(true, false);
    const SHALLOW_READONLY: Self = Self::new(true, true);

    const fn new(readonly: bool, shallow: bool) -> Self {
        Self { readonly, shallow }
    }

    /// Slot of this variant in a raw object's wrapper cache.
    fn index(self) -> usize {
        (self.readonly as usize) * 2 + self.shallow as usize
    }
}

/// An observing wrapper around a raw container or around another wrapper.
///
/// Reads through a mutable wrapper are recorded as dependencies of the running effect,
/// writes notify the effects that read the written location.
#[derive(Clone)]
pub struct Reactive(Rc<ProxyNode>);

pub(crate) struct ProxyNode {
    target: ProxyTarget,
    variant: Variant,
    views: RefCell<[Weak<ProxyNode>; 2]>,
}

enum ProxyTarget {
    Raw(RawObject),
    Proxy(Reactive),
}

impl Reactive {
    /// Wraps `value` with the mutable deep variant.
    ///
    /// Returns `None` if `value` cannot be observed.
    pub fn new(value: impl Into<Value>) -> Option<Self> {
        match reactive(value) {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    fn create(target: ProxyTarget, variant: Variant) -> Self {
        Self(Rc::new(ProxyNode {
            target,
            variant,
            views: RefCell::new(Default::default()),
        }))
    }
    pub(crate) fn from_node(node: Rc<ProxyNode>) -> Self {
        Self(node)
    }
    pub(crate) fn downgrade(&self) -> Weak<ProxyNode> {
        Rc::downgrade(&self.0)
    }
    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The raw container at the bottom of the wrapper chain.
    pub fn raw(&self) -> RawObject {
        match &self.0.target {
            ProxyTarget::Raw(raw) => raw.clone(),
            ProxyTarget::Proxy(inner) => inner.raw(),
        }
    }

    /// The wrapped value: the raw container, or the inner wrapper of a readonly view.
    fn target_value(&self) -> Value {
        match &self.0.target {
            ProxyTarget::Raw(raw) => Value::Object(raw.clone()),
            ProxyTarget::Proxy(inner) => Value::Reactive(inner.clone()),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.raw().kind()
    }
    pub fn is_list(&self) -> bool {
        self.kind() == TargetKind::List
    }
    fn is_collection(&self) -> bool {
        matches!(self.kind(), TargetKind::Map | TargetKind::Set)
    }

    pub fn is_readonly(&self) -> bool {
        self.0.variant.readonly
    }
    pub fn is_shallow(&self) -> bool {
        self.0.variant.shallow
    }

    /// Returns `true` for mutable wrappers and readonly views over them.
    pub fn is_reactive(&self) -> bool {
        match &self.0.target {
            ProxyTarget::Proxy(inner) if self.is_readonly() => inner.is_reactive(),
            _ => !self.is_readonly(),
        }
    }

    fn flag(&self, flag: ReactiveFlag) -> Value {
        match flag {
            ReactiveFlag::IsReactive => Value::Bool(!self.is_readonly()),
            ReactiveFlag::IsReadonly => Value::Bool(self.is_readonly()),
            ReactiveFlag::IsShallow => Value::Bool(self.is_shallow()),
            ReactiveFlag::Raw => self.target_value(),
            ReactiveFlag::Skip => Value::Bool(self.raw().is_skipped()),
        }
    }

    /// Wraps a value read through this wrapper.
    fn wrap(&self, value: Value) -> Value {
        if self.is_shallow() {
            value
        } else if self.is_readonly() {
            to_readonly(&value)
        } else {
            to_reactive(&value)
        }
    }

    /// Reads a property of a record or list, or an entry of a map.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = key.into();
        match self.kind() {
            TargetKind::Map => self.collection_get(key),
            TargetKind::Set => Value::Undefined,
            TargetKind::Record | TargetKind::List => self.base_get(&Key::from(&key)),
        }
    }

    /// Writes a property of a record or list, or an entry of a map.
    ///
    /// Returns `false` if the write was rejected.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        match self.kind() {
            TargetKind::Map => self.collection_set(key, value),
            TargetKind::Set => false,
            TargetKind::Record | TargetKind::List => self.base_set(&Key::from(&key), value, self),
        }
    }
    pub fn delete(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        if self.is_collection() {
            self.collection_delete(key)
        } else {
            self.base_delete(&Key::from(&key))
        }
    }
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        if self.is_collection() {
            self.collection_has(key)
        } else {
            self.base_has(&Key::from(&key))
        }
    }

    /// Property names of a record, indices of a list, keys of a map or members of a set.
    pub fn keys(&self) -> Vec<Value> {
        if self.is_collection() {
            self.collection_keys()
        } else {
            self.base_own_keys().iter().map(Key::to_value).collect()
        }
    }
    pub fn values(&self) -> Vec<Value> {
        if self.is_collection() {
            self.collection_values()
        } else {
            self.base_own_keys().iter().map(|key| self.base_get(key)).collect()
        }
    }
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if self.is_collection() {
            self.collection_entries()
        } else {
            self.base_own_keys()
                .iter()
                .map(|key| (key.to_value(), self.base_get(key)))
                .collect()
        }
    }

    /// Calls `f` with each value and its key.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        if self.is_collection() {
            self.collection_for_each(f)
        } else {
            for (key, value) in self.entries() {
                f(value, key)
            }
        }
    }

    /// Length of a list, or number of entries of any other container.
    pub fn len(&self) -> usize {
        match self.kind() {
            TargetKind::List => self.list_len(),
            TargetKind::Record => self.base_own_keys().len(),
            TargetKind::Map | TargetKind::Set => self.size(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements of a list, read through this wrapper.
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        if !self.is_list() {
            return None;
        }
        let len = self.list_len();
        Some((0..len).map(|i| self.base_get(&Key::Index(i))).collect())
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.is_readonly(), self.is_shallow()) {
            (false, false) => "Reactive",
            (false, true) => "ShallowReactive",
            (true, false) => "Readonly",
            (true, true) => "ShallowReadonly",
        };
        write!(f, "{name}({:?})", self.raw())
    }
}

fn create_reactive_object(value: Value, variant: Variant) -> Value {
    match value {
        Value::Object(raw) => {
            if let Some(proxy) = raw.proxy(variant.index()) {
                return Value::Reactive(proxy);
            }
            if raw.is_skipped() {
                return Value::Object(raw);
            }
            let proxy = Reactive::create(ProxyTarget::Raw(raw.clone()), variant);
            raw.set_proxy(variant.index(), &proxy);
            Value::Reactive(proxy)
        }
        Value::Reactive(inner) => {
            if !(variant.readonly && !inner.is_readonly()) {
                return Value::Reactive(inner);
            }
            let index = variant.shallow as usize;
            if let Some(view) = inner.0.views.borrow()[index].upgrade() {
                return Value::Reactive(Reactive(view));
            }
            let view = Reactive::create(ProxyTarget::Proxy(inner.clone()), variant);
            inner.0.views.borrow_mut()[index] = view.downgrade();
            Value::Reactive(view)
        }
        Value::Ref(r) => Value::Ref(r),
        value => {
            warn(&format!("value cannot be made reactive: {value}"));
            value
        }
    }
}

/// Returns a deep mutable wrapper for `value`.
///
/// The same raw object always yields the same wrapper. Readonly wrappers are returned unchanged.
pub fn reactive(value: impl Into<Value>) -> Value {
    let value = value.into();
    if is_readonly(&value) {
        return value;
    }
    create_reactive_object(value, Variant::REACTIVE)
}

/// Returns a wrapper that only observes the top level of `value`.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), Variant::SHALLOW_REACTIVE)
}

/// Returns a deep wrapper that rejects writes.
///
/// Wrapping a mutable wrapper gives a view whose reads are still tracked through it.
pub fn readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), Variant::READONLY)
}

pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), Variant::SHALLOW_READONLY)
}

pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Reactive(r) if r.is_reactive())
}

/// Returns `true` for readonly wrappers, readonly refs and computed values without a setter.
pub fn is_readonly(value: &Value) -> bool {
    match value {
        Value::Reactive(r) => r.is_readonly(),
        Value::Ref(r) => r.is_readonly(),
        _ => false,
    }
}
pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::Reactive(r) => r.is_shallow(),
        Value::Ref(r) => r.is_shallow(),
        _ => false,
    }
}
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Returns the raw container behind any number of wrappers.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Reactive(r) => Value::Object(r.raw()),
        v => v.clone(),
    }
}

/// Prevents `value` from ever being wrapped or traversed.
pub fn mark_raw(value: &Value) -> Value {
    match value {
        Value::Object(raw) => raw.set_skip(),
        Value::Reactive(r) => r.raw().set_skip(),
        _ => {}
    }
    value.clone()
}

pub(crate) fn to_reactive(value: &Value) -> Value {
    if value.is_object() {
        reactive(value.clone())
    } else {
        value.clone()
    }
}
pub(crate) fn to_readonly(value: &Value) -> Value {
    if value.is_object() {
        readonly(value.clone())
    } else {
        value.clone()
    }
}
