use crate::{
    dep::{track, trigger, TargetKind, TrackOp, TriggerOp},
    error::warn,
    raw::RawObject,
    value::{has_changed, Key, Value},
};

use super::{to_raw, ProxyTarget, Reactive};

impl Reactive {
    /// Looks `key` up as given and as its raw object, tracking both.
    pub(crate) fn collection_get(&self, key: Value) -> Value {
        let raw = self.raw();
        let raw_key = to_raw(&key);
        if !self.is_readonly() {
            if key != raw_key {
                track(&raw, TrackOp::Get, &Key::entry(&key));
            }
            track(&raw, TrackOp::Get, &Key::entry(&raw_key));
        }
        let found = if raw.entry_has(&key) {
            Some(key.clone())
        } else if raw.entry_has(&raw_key) {
            Some(raw_key)
        } else {
            None
        };
        match (found, &self.0.target) {
            (Some(key), ProxyTarget::Raw(raw)) => self.wrap(raw.entry_get(&key).unwrap_or_default()),
            (Some(key), ProxyTarget::Proxy(inner)) => self.wrap(inner.collection_get(key)),
            (None, ProxyTarget::Proxy(inner)) => {
                inner.collection_get(key);
                Value::Undefined
            }
            (None, ProxyTarget::Raw(_)) => Value::Undefined,
        }
    }

    pub(crate) fn collection_has(&self, key: Value) -> bool {
        let raw = self.raw();
        let raw_key = to_raw(&key);
        if !self.is_readonly() {
            if key != raw_key {
                track(&raw, TrackOp::Has, &Key::entry(&key));
            }
            track(&raw, TrackOp::Has, &Key::entry(&raw_key));
        }
        let target_has = |key: &Value| match &self.0.target {
            ProxyTarget::Raw(raw) => raw.entry_has(key),
            ProxyTarget::Proxy(inner) => inner.collection_has(key.clone()),
        };
        if key == raw_key {
            target_has(&key)
        } else {
            target_has(&key) || target_has(&raw_key)
        }
    }

    pub(crate) fn size(&self) -> usize {
        match &self.0.target {
            ProxyTarget::Raw(raw) => {
                if !self.is_readonly() {
                    track(raw, TrackOp::Iterate, &Key::Iterate);
                }
                raw.len()
            }
            ProxyTarget::Proxy(inner) => inner.size(),
        }
    }

    /// Adds a member to a set. Adding an existing member does nothing.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        if self.is_readonly() {
            self.warn_readonly("Add", Some(&value.into()));
            return true;
        }
        let raw = self.raw();
        if raw.kind() != TargetKind::Set {
            return false;
        }
        let value = to_raw(&value.into());
        if !raw.entry_has(&value) {
            raw.entry_insert(value.clone(), value.clone());
            trigger(
                &raw,
                TriggerOp::Add,
                Some(&Key::entry(&value)),
                Some(&value),
                None,
            );
        }
        true
    }

    pub(crate) fn collection_set(&self, key: Value, value: Value) -> bool {
        if self.is_readonly() {
            self.warn_readonly("Set", Some(&key));
            return true;
        }
        let raw = self.raw();
        let value = to_raw(&value);
        let (key, had_key) = lookup_key(&raw, key);
        let old_value = raw.entry_get(&key).unwrap_or_default();
        raw.entry_insert(key.clone(), value.clone());
        let entry = Key::entry(&key);
        if !had_key {
            trigger(&raw, TriggerOp::Add, Some(&entry), Some(&value), None);
        } else if has_changed(&value, &old_value) {
            trigger(
                &raw,
                TriggerOp::Set,
                Some(&entry),
                Some(&value),
                Some(&old_value),
            );
        }
        true
    }

    pub(crate) fn collection_delete(&self, key: Value) -> bool {
        if self.is_readonly() {
            self.warn_readonly("Delete", Some(&key));
            return false;
        }
        let raw = self.raw();
        let (key, had_key) = lookup_key(&raw, key);
        let old_value = if raw.kind() == TargetKind::Map {
            raw.entry_get(&key)
        } else {
            None
        };
        let result = raw.entry_remove(&key);
        if had_key {
            trigger(
                &raw,
                TriggerOp::Delete,
                Some(&Key::entry(&key)),
                None,
                old_value.as_ref(),
            );
        }
        result
    }

    /// Removes every entry of a map or set.
    pub fn clear(&self) {
        if self.is_readonly() {
            self.warn_readonly("Clear", None);
            return;
        }
        let raw = self.raw();
        if !raw.is_collection() {
            return;
        }
        let had_items = !raw.is_empty();
        raw.clear();
        if had_items {
            trigger(&raw, TriggerOp::Clear, None, None, None);
        }
    }

    pub(crate) fn collection_for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.collection_entries() {
            f(value, key);
        }
    }

    pub(crate) fn collection_keys(&self) -> Vec<Value> {
        match &self.0.target {
            ProxyTarget::Raw(raw) => {
                if !self.is_readonly() {
                    let key = if raw.kind() == TargetKind::Map {
                        Key::MapKeyIterate
                    } else {
                        Key::Iterate
                    };
                    track(raw, TrackOp::Iterate, &key);
                }
                raw.entries()
                    .into_iter()
                    .map(|(key, _)| self.wrap(key))
                    .collect()
            }
            ProxyTarget::Proxy(inner) => inner
                .collection_keys()
                .into_iter()
                .map(|key| self.wrap(key))
                .collect(),
        }
    }

    pub(crate) fn collection_values(&self) -> Vec<Value> {
        self.collection_entries()
            .into_iter()
            .map(|(_, value)| value)
            .collect()
    }

    /// Key-value pairs, or value-value pairs for a set.
    pub(crate) fn collection_entries(&self) -> Vec<(Value, Value)> {
        let entries = match &self.0.target {
            ProxyTarget::Raw(raw) => {
                if !self.is_readonly() {
                    track(raw, TrackOp::Iterate, &Key::Iterate);
                }
                raw.entries()
            }
            ProxyTarget::Proxy(inner) => inner.collection_entries(),
        };
        entries
            .into_iter()
            .map(|(key, value)| (self.wrap(key), self.wrap(value)))
            .collect()
    }

    fn warn_readonly(&self, op: &str, key: Option<&Value>) {
        let key = key.map(|key| format!("on key \"{key}\" ")).unwrap_or_default();
        let kind = match self.kind() {
            TargetKind::Map => "Map",
            TargetKind::Set => "Set",
            TargetKind::Record => "Object",
            TargetKind::List => "Array",
        };
        warn(&format!("{op} operation {key}failed: {kind} is readonly."));
    }
}

/// Finds the stored form of `key`, trying its raw object when `key` itself is absent.
fn lookup_key(raw: &RawObject, key: Value) -> (Value, bool) {
    if raw.entry_has(&key) {
        check_identity_keys(raw, &key);
        return (key, true);
    }
    let key = to_raw(&key);
    let had_key = raw.entry_has(&key);
    (key, had_key)
}

fn check_identity_keys(raw: &RawObject, key: &Value) {
    let raw_key = to_raw(key);
    if raw_key != *key && raw.entry_has(&raw_key) {
        let (kind, suffix) = if raw.kind() == TargetKind::Map {
            ("Map", " as keys")
        } else {
            ("Set", "")
        };
        warn(&format!(
            "Reactive {kind} contains both the raw and reactive versions of the same object{suffix}, \
             which can lead to inconsistencies. Avoid differentiating between the raw and reactive \
             versions of an object and only use the raw version of it when possible."
        ));
    }
}
