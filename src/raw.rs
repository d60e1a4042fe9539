use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use indexmap::{IndexMap, IndexSet};

use crate::{
    dep::{Target, TargetDeps, TargetId, TargetKind},
    reactive::{ProxyNode, Reactive},
    value::{Key, Value, ValueKey},
};


/// A plain container: a record, a list, a map or a set.
///
/// Mutating a raw object never notifies anyone. Wrap it with [`reactive`](crate::reactive())
/// to observe reads and writes.
#[derive(Clone)]
pub struct RawObject(Rc<RawNode>);

struct RawNode {
    data: RefCell<Container>,
    deps: TargetDeps,
    proxies: RefCell<[Weak<ProxyNode>; 4]>,
    skip: Cell<bool>,
}

#[derive(Clone)]
pub(crate) enum Container {
    Record {
        fields: IndexMap<Key, Value>,
        proto: Option<Value>,
    },
    List(Vec<Value>),
    Map(IndexMap<ValueKey, Value>),
    Set(IndexSet<ValueKey>),
}

impl Container {
    fn kind(&self) -> TargetKind {
        match self {
            Container::Record { .. } => TargetKind::Record,
            Container::List(_) => TargetKind::List,
            Container::Map(_) => TargetKind::Map,
            Container::Set(_) => TargetKind::Set,
        }
    }
}

impl RawObject {
    fn from_container(data: Container) -> Self {
        Self(Rc::new(RawNode {
            data: RefCell::new(data),
            deps: TargetDeps::new(),
            proxies: RefCell::new(Default::default()),
            skip: Cell::new(false),
        }))
    }

    pub fn record() -> Self {
        Self::record_from::<&str, Value>([])
    }
    pub fn record_from<K: Into<Value>, V: Into<Value>>(
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (Key::from(&k.into()), v.into()))
            .collect();
        Self::from_container(Container::Record {
            fields,
            proto: None,
        })
    }

    /// Creates an empty record whose missing properties are looked up on `proto`.
    pub fn with_proto(proto: impl Into<Value>) -> Self {
        Self::from_container(Container::Record {
            fields: IndexMap::new(),
            proto: Some(proto.into()),
        })
    }
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::from_container(Container::List(items.into_iter().map(Into::into).collect()))
    }
    pub fn map() -> Self {
        Self::map_from::<Value, Value>([])
    }
    pub fn map_from<K: Into<Value>, V: Into<Value>>(
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (ValueKey::new(k.into()), v.into()))
            .collect();
        Self::from_container(Container::Map(entries))
    }
    pub fn new_set() -> Self {
        Self::set_from::<Value>([])
    }
    pub fn set_from<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        let items = items
            .into_iter()
            .map(|v| ValueKey::new(v.into()))
            .collect();
        Self::from_container(Container::Set(items))
    }

    pub fn kind(&self) -> TargetKind {
        self.0.data.borrow().kind()
    }
    pub fn is_list(&self) -> bool {
        self.kind() == TargetKind::List
    }
    pub fn is_collection(&self) -> bool {
        matches!(self.kind(), TargetKind::Map | TargetKind::Set)
    }
    pub fn id(&self) -> TargetId {
        self.0.deps.id()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    pub fn proto(&self) -> Option<Value> {
        match &*self.0.data.borrow() {
            Container::Record { proto, .. } => proto.clone(),
            _ => None,
        }
    }

    /// Returns `true` if [`mark_raw`](crate::mark_raw) was applied.
    pub fn is_skipped(&self) -> bool {
        self.0.skip.get()
    }
    pub(crate) fn set_skip(&self) {
        self.0.skip.set(true)
    }
    pub(crate) fn proxy(&self, index: usize) -> Option<Reactive> {
        self.0.proxies.borrow()[index].upgrade().map(Reactive::from_node)
    }
    pub(crate) fn set_proxy(&self, index: usize, proxy: &Reactive) {
        self.0.proxies.borrow_mut()[index] = proxy.downgrade();
    }

    /// Reads a property or an entry, following the prototype chain of records.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        let key = key.into();
        match self.kind() {
            TargetKind::Record | TargetKind::List => self.get_property(&Key::from(&key)),
            TargetKind::Map | TargetKind::Set => self.entry_get(&key).unwrap_or_default(),
        }
    }

    /// Writes a property or an entry. Writing to a set adds `key`.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        let key = key.into();
        match self.kind() {
            TargetKind::Record | TargetKind::List => self.set_own(&Key::from(&key), value.into()),
            TargetKind::Map | TargetKind::Set => {
                self.entry_insert(key, value.into());
                true
            }
        }
    }
    pub fn delete(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        match self.kind() {
            TargetKind::Record | TargetKind::List => self.delete_own(&Key::from(&key)),
            TargetKind::Map | TargetKind::Set => self.entry_remove(&key),
        }
    }
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        match self.kind() {
            TargetKind::Record | TargetKind::List => self.has_property(&Key::from(&key)),
            TargetKind::Map | TargetKind::Set => self.entry_has(&key),
        }
    }
    pub fn keys(&self) -> Vec<Value> {
        match &*self.0.data.borrow() {
            Container::Record { fields, .. } => fields.keys().map(Key::to_value).collect(),
            Container::List(items) => (0..items.len()).map(Value::from).collect(),
            Container::Map(entries) => entries.keys().map(|k| k.value().clone()).collect(),
            Container::Set(items) => items.iter().map(|k| k.value().clone()).collect(),
        }
    }

    /// Number of elements of a list, or entries of any other container.
    pub fn len(&self) -> usize {
        match &*self.0.data.borrow() {
            Container::Record { fields, .. } => fields.len(),
            Container::List(items) => items.len(),
            Container::Map(entries) => entries.len(),
            Container::Set(items) => items.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let mut data = self.0.data.borrow_mut();
        match &mut *data {
            Container::List(items) => {
                items.push(value.into());
                items.len()
            }
            _ => 0,
        }
    }
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        match &*self.0.data.borrow() {
            Container::List(items) => Some(items.clone()),
            _ => None,
        }
    }

    pub(crate) fn snapshot(&self) -> Container {
        self.0.data.borrow().clone()
    }

    pub(crate) fn get_own(&self, key: &Key) -> Option<Value> {
        match &*self.0.data.borrow() {
            Container::Record { fields, .. } => fields.get(key).cloned(),
            Container::List(items) => match key {
                Key::Length => Some(Value::from(items.len())),
                Key::Index(i) => items.get(*i).cloned(),
                _ => None,
            },
            _ => None,
        }
    }
    pub(crate) fn has_own(&self, key: &Key) -> bool {
        match &*self.0.data.borrow() {
            Container::Record { fields, .. } => fields.contains_key(key),
            Container::List(items) => match key {
                Key::Length => true,
                Key::Index(i) => *i < items.len(),
                _ => false,
            },
            _ => false,
        }
    }
    pub(crate) fn get_property(&self, key: &Key) -> Value {
        if let Some(value) = self.get_own(key) {
            return value;
        }
        match self.proto() {
            Some(Value::Object(proto)) => proto.get_property(key),
            Some(Value::Reactive(proto)) => proto.raw().get_property(key),
            _ => Value::Undefined,
        }
    }
    pub(crate) fn has_property(&self, key: &Key) -> bool {
        if self.has_own(key) {
            return true;
        }
        match self.proto() {
            Some(Value::Object(proto)) => proto.has_property(key),
            Some(Value::Reactive(proto)) => proto.raw().has_property(key),
            _ => false,
        }
    }
    pub(crate) fn set_own(&self, key: &Key, value: Value) -> bool {
        let mut data = self.0.data.borrow_mut();
        match &mut *data {
            Container::Record { fields, .. } => {
                fields.insert(key.clone(), value);
                true
            }
            Container::List(items) => match key {
                Key::Index(i) => {
                    if *i >= items.len() {
                        let Some(len) = i.checked_add(1) else {
                            return false;
                        };
                        items.resize(len, Value::Undefined);
                    }
                    items[*i] = value;
                    true
                }
                Key::Length => match value.as_f64() {
                    Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => {
                        items.resize(n as usize, Value::Undefined);
                        true
                    }
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        }
    }

    /// Removes an own property. List elements leave an `Undefined` hole.
    pub(crate) fn delete_own(&self, key: &Key) -> bool {
        match &mut *self.0.data.borrow_mut() {
            Container::Record { fields, .. } => {
                fields.shift_remove(key);
                true
            }
            Container::List(items) => match key {
                Key::Index(i) => {
                    if let Some(item) = items.get_mut(*i) {
                        *item = Value::Undefined;
                    }
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
    pub(crate) fn own_keys(&self) -> Vec<Key> {
        match &*self.0.data.borrow() {
            Container::Record { fields, .. } => fields.keys().cloned().collect(),
            Container::List(items) => (0..items.len()).map(Key::Index).collect(),
            Container::Map(entries) => entries.keys().cloned().map(Key::Entry).collect(),
            Container::Set(items) => items.iter().cloned().map(Key::Entry).collect(),
        }
    }

    pub(crate) fn entry_get(&self, key: &Value) -> Option<Value> {
        let key = ValueKey::new(key.clone());
        match &*self.0.data.borrow() {
            Container::Map(entries) => entries.get(&key).cloned(),
            Container::Set(items) => items.get(&key).map(|k| k.value().clone()),
            _ => None,
        }
    }
    pub(crate) fn entry_has(&self, key: &Value) -> bool {
        let key = ValueKey::new(key.clone());
        match &*self.0.data.borrow() {
            Container::Map(entries) => entries.contains_key(&key),
            Container::Set(items) => items.contains(&key),
            _ => false,
        }
    }
    pub(crate) fn entry_insert(&self, key: Value, value: Value) {
        match &mut *self.0.data.borrow_mut() {
            Container::Map(entries) => {
                entries.insert(ValueKey::new(key), value);
            }
            Container::Set(items) => {
                items.insert(ValueKey::new(key));
            }
            _ => {}
        }
    }
    pub(crate) fn entry_remove(&self, key: &Value) -> bool {
        let key = ValueKey::new(key.clone());
        match &mut *self.0.data.borrow_mut() {
            Container::Map(entries) => entries.shift_remove(&key).is_some(),
            Container::Set(items) => items.shift_remove(&key),
            _ => false,
        }
    }
    pub(crate) fn entries(&self) -> Vec<(Value, Value)> {
        match &*self.0.data.borrow() {
            Container::Map(entries) => entries
                .iter()
                .map(|(k, v)| (k.value().clone(), v.clone()))
                .collect(),
            Container::Set(items) => items
                .iter()
                .map(|k| (k.value().clone(), k.value().clone()))
                .collect(),
            Container::Record { fields, .. } => {
                fields.iter().map(|(k, v)| (k.to_value(), v.clone())).collect()
            }
            Container::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v.clone()))
                .collect(),
        }
    }
    pub(crate) fn clear(&self) {
        match &mut *self.0.data.borrow_mut() {
            Container::Map(entries) => entries.clear(),
            Container::Set(items) => items.clear(),
            _ => {}
        }
    }
}

impl Target for RawObject {
    fn target_deps(&self) -> &TargetDeps {
        &self.0.deps
    }
    fn target_kind(&self) -> TargetKind {
        self.kind()
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.data.try_borrow() {
            Ok(data) => write!(f, "RawObject({} {})", data.kind(), self.id()),
            Err(_) => write!(f, "RawObject(<borrowed>)"),
        }
    }
}
