use std::{
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use parse_display::{Display, FromStr};
use serde::{
    de::{MapAccess, SeqAccess, Visitor},
    ser::{Error as _, SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::{
    core::untrack,
    raw::{Container, RawObject},
    reactive::Reactive,
    refs::Ref,
};


/// A dynamically typed value stored in observed containers and boxed references.
///
/// Heap variants are reference-counted handles, so cloning a `Value` never copies a container.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Symbol(Symbol),
    Object(RawObject),
    Reactive(Reactive),
    Ref(Ref),
}

impl Value {
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::Object(RawObject::list(items))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns `true` for values that can be wrapped by the observation layer.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Reactive(_))
    }
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_raw(&self) -> Option<&RawObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Elements of a list value.
    ///
    /// Reading through a reactive list tracks its length and every index.
    pub fn to_list(&self) -> Option<Vec<Value>> {
        match self {
            Value::Object(o) => o.to_vec(),
            Value::Reactive(r) => r.to_vec(),
            _ => None,
        }
    }

    /// Returns `true` if the value is a list or a wrapper around one.
    pub fn is_list(&self) -> bool {
        match self {
            Value::Object(o) => o.is_list(),
            Value::Reactive(r) => r.is_list(),
            _ => false,
        }
    }

    pub(crate) fn identity(&self) -> Option<*const ()> {
        match self {
            Value::Object(o) => Some(o.as_ptr()),
            Value::Reactive(r) => Some(r.as_ptr()),
            Value::Ref(r) => Some(r.as_ptr()),
            _ => None,
        }
    }
}

/// `Object.is` semantics: `NaN` equals itself and `+0` differs from `-0`.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x.to_bits() == y.to_bits()
            }
        }
        _ => same_non_number(a, b),
    }
}

/// SameValueZero semantics used by map keys and `includes`.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => (x.is_nan() && y.is_nan()) || x == y,
        _ => same_non_number(a, b),
    }
}

/// `===` semantics used by `index_of` and `last_index_of`.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => same_non_number(a, b),
    }
}

/// Change detection used by every write path and by watchers.
pub fn has_changed(value: &Value, old_value: &Value) -> bool {
    !same_value(value, old_value)
}

fn same_non_number(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Object(_), Value::Object(_))
        | (Value::Reactive(_), Value::Reactive(_))
        | (Value::Ref(_), Value::Ref(_)) => a.identity() == b.identity(),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", NumberDisplay(*n)),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Object(o) => write!(f, "{o:?}"),
            Value::Reactive(r) => write!(f, "{r:?}"),
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", NumberDisplay(*n)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Object(_) | Value::Reactive(_) => write!(f, "[object Object]"),
            Value::Ref(_) => write!(f, "[object Ref]"),
        }
    }
}

struct NumberDisplay(f64);

impl fmt::Display for NumberDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0;
        if n.is_nan() {
            write!(f, "NaN")
        } else if n.is_infinite() {
            write!(f, "{}Infinity", if n < 0.0 { "-" } else { "" })
        } else if n.fract() == 0.0 && n.abs() < 1e15 {
            write!(f, "{}", n as i64)
        } else {
            write!(f, "{n}")
        }
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}
impl_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}
impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}
impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::Symbol(value)
    }
}
impl From<RawObject> for Value {
    fn from(value: RawObject) -> Self {
        Value::Object(value)
    }
}
impl From<Reactive> for Value {
    fn from(value: Reactive) -> Self {
        Value::Reactive(value)
    }
}
impl From<Ref> for Value {
    fn from(value: Ref) -> Self {
        Value::Ref(value)
    }
}
impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}
impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display(style = "camelCase")]
pub enum WellKnownSymbol {
    AsyncIterator,
    HasInstance,
    IsConcatSpreadable,
    Iterator,
    Match,
    MatchAll,
    Replace,
    Search,
    Species,
    Split,
    ToPrimitive,
    ToStringTag,
    Unscopables,
}

/// A unique property key.
///
/// Well-known symbols compare by kind, other symbols by identity.
#[derive(Clone)]
pub enum Symbol {
    WellKnown(WellKnownSymbol),
    Local(Rc<str>),
}

impl Symbol {
    pub fn new(description: &str) -> Self {
        Symbol::Local(description.into())
    }
    pub fn is_well_known(&self) -> bool {
        matches!(self, Symbol::WellKnown(_))
    }
}
impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Symbol::WellKnown(a), Symbol::WellKnown(b)) => a == b,
            (Symbol::Local(a), Symbol::Local(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
impl Eq for Symbol {}
impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Symbol::WellKnown(s) => s.hash(state),
            Symbol::Local(s) => (Rc::as_ptr(s) as *const u8 as usize).hash(state),
        }
    }
}
impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::WellKnown(s) => write!(f, "Symbol(Symbol.{s})"),
            Symbol::Local(s) => write!(f, "Symbol({s})"),
        }
    }
}
impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
impl From<WellKnownSymbol> for Symbol {
    fn from(value: WellKnownSymbol) -> Self {
        Symbol::WellKnown(value)
    }
}

/// Introspection keys answered by wrappers without reaching the raw container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, FromStr)]
pub enum ReactiveFlag {
    #[display("__v_skip")]
    Skip,
    #[display("__v_isReactive")]
    IsReactive,
    #[display("__v_isReadonly")]
    IsReadonly,
    #[display("__v_isShallow")]
    IsShallow,
    #[display("__v_raw")]
    Raw,
}

/// A dependency key: a property of a container, an entry of a map or set, or an iteration marker.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum Key {
    #[display("{0}")]
    Name(Rc<str>),
    #[display("{0}")]
    Index(usize),
    #[display("length")]
    Length,
    #[display("{0}")]
    Symbol(Symbol),
    #[display("{0}")]
    Flag(ReactiveFlag),
    #[display("{0}")]
    Entry(ValueKey),
    #[display("iterate")]
    Iterate,
    #[display("Map key iterate")]
    MapKeyIterate,
}

const NON_TRACKABLE_NAMES: [&str; 3] = ["__proto__", "__v_isRef", "__isVue"];

impl Key {
    /// Key of an entry in a map or set.
    pub fn entry(value: &Value) -> Self {
        Key::Entry(ValueKey::new(value.clone()))
    }

    /// Built-in symbols and internal names are never tracked on read.
    pub fn is_trackable(&self) -> bool {
        match self {
            Key::Symbol(s) => !s.is_well_known(),
            Key::Name(name) => !NON_TRACKABLE_NAMES.contains(&&**name),
            _ => true,
        }
    }
    pub fn is_builtin_symbol(&self) -> bool {
        matches!(self, Key::Symbol(s) if s.is_well_known())
    }
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// The key as it would be observed by enumeration.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Name(name) => Value::Str(name.clone()),
            Key::Index(i) => Value::from(*i),
            Key::Length => Value::from("length"),
            Key::Symbol(s) => Value::Symbol(s.clone()),
            Key::Flag(flag) => Value::from(flag.to_string()),
            Key::Entry(key) => key.value().clone(),
            Key::Iterate | Key::MapKeyIterate => Value::Undefined,
        }
    }
}

/// List indices are canonical integers below `2^32 - 1`. Larger numbers are plain names.
const INDEX_LIMIT: u64 = u32::MAX as u64;

fn to_index(index: u64) -> Option<usize> {
    if index < INDEX_LIMIT {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn parse_index(s: &str) -> Option<usize> {
    let index: u64 = s.parse().ok()?;
    if index.to_string() != s {
        return None;
    }
    to_index(index)
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        if value == "length" {
            Key::Length
        } else if let Some(index) = parse_index(value) {
            Key::Index(index)
        } else if let Ok(flag) = value.parse::<ReactiveFlag>() {
            Key::Flag(flag)
        } else {
            Key::Name(value.into())
        }
    }
}
impl From<usize> for Key {
    fn from(value: usize) -> Self {
        match u64::try_from(value).ok().and_then(to_index) {
            Some(index) => Key::Index(index),
            None => Key::Name(value.to_string().into()),
        }
    }
}
impl From<Symbol> for Key {
    fn from(value: Symbol) -> Self {
        Key::Symbol(value)
    }
}
impl From<ReactiveFlag> for Key {
    fn from(value: ReactiveFlag) -> Self {
        Key::Flag(value)
    }
}

/// Property key conversion for records and lists.
impl From<&Value> for Key {
    fn from(value: &Value) -> Self {
        match value {
            Value::Str(s) => Key::from(&**s),
            Value::Symbol(s) => Key::Symbol(s.clone()),
            v => Key::from(&*v.to_string()),
        }
    }
}

/// A value used as a map key or set member.
///
/// Equality is SameValueZero and containers compare by identity.
#[derive(Clone, Debug)]
pub struct ValueKey(Value);

impl ValueKey {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
    pub fn value(&self) -> &Value {
        &self.0
    }
    pub fn into_value(self) -> Value {
        self.0
    }
}
impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        same_value_zero(&self.0, &other.0)
    }
}
impl Eq for ValueKey {}
impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => {
                if n.is_nan() {
                    0u8.hash(state)
                } else if *n == 0.0 {
                    0.0f64.to_bits().hash(state)
                } else {
                    n.to_bits().hash(state)
                }
            }
            Value::Str(s) => s.hash(state),
            Value::Symbol(s) => s.hash(state),
            v => (v.identity().unwrap_or(std::ptr::null()) as usize).hash(state),
        }
    }
}
impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let seen = RefCell::new(Vec::new());
        untrack(|| {
            Snapshot {
                value: self,
                seen: &seen,
            }
            .serialize(serializer)
        })
    }
}

struct Snapshot<'a> {
    value: &'a Value,
    seen: &'a RefCell<Vec<*const ()>>,
}
impl Snapshot<'_> {
    fn child<'b>(&'b self, value: &'b Value) -> Snapshot<'b> {
        Snapshot {
            value,
            seen: self.seen,
        }
    }
}

impl Serialize for Snapshot<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw = match self.value {
            Value::Undefined | Value::Null => return serializer.serialize_unit(),
            Value::Bool(b) => return serializer.serialize_bool(*b),
            Value::Number(n) => return serializer.serialize_f64(*n),
            Value::Str(s) => return serializer.serialize_str(s),
            Value::Symbol(s) => return Err(S::Error::custom(format!("cannot serialize {s}"))),
            Value::Ref(r) => return self.child(&r.get()).serialize(serializer),
            Value::Object(o) => o.clone(),
            Value::Reactive(r) => r.raw(),
        };
        if self.seen.borrow().contains(&raw.as_ptr()) {
            return Err(S::Error::custom("cannot serialize a cyclic structure"));
        }
        self.seen.borrow_mut().push(raw.as_ptr());
        let data = raw.snapshot();
        let result = match &data {
            Container::Record { fields, .. } => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(&key.to_string(), &self.child(value))?;
                }
                map.end()
            }
            Container::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Container::Map(entries) => {
                let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                for (key, value) in entries {
                    seq.serialize_element(&(self.child(key.value()), self.child(value)))?;
                }
                seq.end()
            }
            Container::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item.value()))?;
                }
                seq.end()
            }
        };
        self.seen.borrow_mut().pop();
        result
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;
        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any value")
            }
            fn visit_unit<E>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }
            fn visit_none<E>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }
            fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                Value::deserialize(deserializer)
            }
            fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }
            fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
                Ok(Value::from(v))
            }
            fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
                Ok(Value::from(v))
            }
            fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Number(v))
            }
            fn visit_str<E>(self, v: &str) -> Result<Value, E> {
                Ok(Value::from(v))
            }
            fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element::<Value>()? {
                    items.push(item);
                }
                Ok(Value::Object(RawObject::list(items)))
            }
            fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let record = RawObject::record();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    record.set(key, value);
                }
                Ok(Value::Object(record))
            }
        }
        deserializer.deserialize_any(ValueVisitor)
    }
}
