use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    core::untrack,
    dep::{RefDep, TargetId},
    error::warn,
    raw::RawObject,
    reactive::{is_proxy, to_raw, to_reactive, to_readonly, Reactive},
    value::{has_changed, Value},
};

#[cfg(test)]
mod tests;

pub(crate) trait RefNode {
    fn id(&self) -> TargetId;
    fn get(&self) -> Value;
    fn set(&self, value: Value);
    fn is_readonly(&self) -> bool {
        false
    }
    fn is_shallow(&self) -> bool {
        false
    }
    fn trigger(&self);
}

/// A boxed reference to a single value.
///
/// Reading the value records a dependency. Writing a changed value notifies dependents.
#[derive(Clone)]
pub struct Ref(Rc<dyn RefNode>);

impl Ref {
    /// Creates a ref whose object values are exposed through a reactive wrapper.
    ///
    /// A ref passed in is returned as is.
    pub fn new(value: impl Into<Value>) -> Self {
        Self::create(value.into(), false)
    }

    /// Creates a ref that stores its value as is.
    pub fn shallow(value: impl Into<Value>) -> Self {
        Self::create(value.into(), true)
    }

    fn create(value: Value, shallow: bool) -> Self {
        if let Value::Ref(r) = value {
            return r;
        }
        let (raw_value, value) = if shallow {
            (value.clone(), value)
        } else {
            (to_raw(&value), to_reactive(&value))
        };
        Self(Rc::new(RefImpl {
            dep: RefDep::new(),
            raw_value: RefCell::new(raw_value),
            value: RefCell::new(value),
            shallow,
        }))
    }

    /// A ref that reads and writes one property of a reactive object.
    ///
    /// Returns the stored ref if the property already holds one.
    pub fn from_property(object: &Reactive, key: impl Into<Value>, default: Option<Value>) -> Self {
        let key = key.into();
        if let Value::Ref(r) = untrack(|| object.get(key.clone())) {
            return r;
        }
        Self(Rc::new(PropertyRef {
            id: TargetId::new(),
            object: object.clone(),
            key,
            default,
        }))
    }

    pub(crate) fn from_node(node: Rc<dyn RefNode>) -> Self {
        Self(node)
    }

    /// A view of this ref whose writes are rejected.
    pub fn readonly(&self) -> Self {
        if self.is_readonly() {
            return self.clone();
        }
        Self(Rc::new(ReadonlyRef(self.clone())))
    }

    pub fn get(&self) -> Value {
        self.0.get()
    }
    pub fn set(&self, value: impl Into<Value>) {
        self.0.set(value.into())
    }

    /// Notifies dependents without changing the value.
    pub fn trigger(&self) {
        self.0.trigger()
    }

    pub fn is_readonly(&self) -> bool {
        self.0.is_readonly()
    }
    pub fn is_shallow(&self) -> bool {
        self.0.is_shallow()
    }
    pub fn id(&self) -> TargetId {
        self.0.id()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}
impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.id())
    }
}

struct RefImpl {
    dep: RefDep,
    raw_value: RefCell<Value>,
    value: RefCell<Value>,
    shallow: bool,
}

impl RefNode for RefImpl {
    fn id(&self) -> TargetId {
        self.dep.id()
    }
    fn get(&self) -> Value {
        self.dep.track();
        self.value.borrow().clone()
    }
    fn set(&self, value: Value) {
        let value = if self.shallow { value } else { to_raw(&value) };
        if !has_changed(&value, &self.raw_value.borrow()) {
            return;
        }
        *self.raw_value.borrow_mut() = value.clone();
        *self.value.borrow_mut() = if self.shallow {
            value.clone()
        } else {
            to_reactive(&value)
        };
        self.dep.trigger(Some(&value));
    }
    fn is_shallow(&self) -> bool {
        self.shallow
    }
    fn trigger(&self) {
        let value = self.value.borrow().clone();
        self.dep.trigger(Some(&value));
    }
}

struct ReadonlyRef(Ref);

impl RefNode for ReadonlyRef {
    fn id(&self) -> TargetId {
        self.0.id()
    }
    fn get(&self) -> Value {
        let value = self.0.get();
        if self.0.is_shallow() {
            value
        } else {
            to_readonly(&value)
        }
    }
    fn set(&self, _value: Value) {
        warn("Set operation on key \"value\" failed: target is readonly.");
    }
    fn is_readonly(&self) -> bool {
        true
    }
    fn is_shallow(&self) -> bool {
        self.0.is_shallow()
    }
    fn trigger(&self) {
        self.0.trigger()
    }
}

struct PropertyRef {
    id: TargetId,
    object: Reactive,
    key: Value,
    default: Option<Value>,
}

impl RefNode for PropertyRef {
    fn id(&self) -> TargetId {
        self.id
    }
    fn get(&self) -> Value {
        let value = self.object.get(self.key.clone());
        match (&value, &self.default) {
            (Value::Undefined, Some(default)) => default.clone(),
            _ => value,
        }
    }
    fn set(&self, value: Value) {
        self.object.set(self.key.clone(), value);
    }
    fn is_readonly(&self) -> bool {
        self.object.is_readonly()
    }
    fn trigger(&self) {}
}

pub fn is_ref(value: &Value) -> bool {
    value.is_ref()
}

/// Returns the inner value of a ref, or `value` itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        v => v.clone(),
    }
}

/// Notifies the dependents of `r` without changing its value.
pub fn trigger_ref(r: &Ref) {
    r.trigger()
}

/// Converts every property of a reactive object into a ref bound to that property.
///
/// Returns a raw record, or a raw list for a list.
pub fn to_refs(object: &Value) -> Value {
    if !is_proxy(object) {
        warn("toRefs() expects a reactive object but received a plain one.");
    }
    let Some(reactive) = object.as_reactive() else {
        return object.clone();
    };
    let keys = untrack(|| reactive.keys());
    if reactive.is_list() {
        let refs = keys
            .into_iter()
            .map(|key| Value::Ref(Ref::from_property(reactive, key, None)));
        Value::Object(RawObject::list(refs))
    } else {
        let refs = keys.into_iter().map(|key| {
            let r = Ref::from_property(reactive, key.clone(), None);
            (key, Value::Ref(r))
        });
        Value::Object(RawObject::record_from(refs))
    }
}
