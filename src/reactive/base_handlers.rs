use crate::{
    core::UntrackGuard,
    dep::{track, trigger, TrackOp, TriggerOp},
    error::warn,
    raw::RawObject,
    value::{has_changed, same_value_zero, strict_equals, Key, Value},
};

use super::{is_readonly, is_shallow, to_raw, ProxyTarget, Reactive};

impl Reactive {
    pub(crate) fn base_get(&self, key: &Key) -> Value {
        if let Key::Flag(flag) = key {
            return self.flag(*flag);
        }
        let value = self.target_get(key);
        if !key.is_trackable() {
            return value;
        }
        if !self.is_readonly() {
            track(&self.raw(), TrackOp::Get, key);
        }
        if self.is_shallow() {
            return value;
        }
        match value {
            Value::Ref(r) => {
                if self.is_list() && key.as_index().is_some() {
                    Value::Ref(r)
                } else {
                    r.get()
                }
            }
            value => self.wrap(value),
        }
    }

    fn target_get(&self, key: &Key) -> Value {
        match &self.0.target {
            ProxyTarget::Raw(raw) => {
                if let Some(value) = raw.get_own(key) {
                    return value;
                }
                match raw.proto() {
                    Some(Value::Reactive(proto)) => proto.base_get(key),
                    Some(Value::Object(proto)) => proto.get_property(key),
                    _ => Value::Undefined,
                }
            }
            ProxyTarget::Proxy(inner) => inner.base_get(key),
        }
    }

    /// Writes `key` onto the raw object of `receiver`.
    ///
    /// Only the write whose receiver is this wrapper notifies, so a write forwarded
    /// from a child record to its prototype triggers on the child only.
    pub(crate) fn base_set(&self, key: &Key, value: Value, receiver: &Reactive) -> bool {
        if self.is_readonly() {
            warn(&format!(
                "Set operation on key \"{key}\" failed: target is readonly."
            ));
            return true;
        }
        let ProxyTarget::Raw(target) = &self.0.target else {
            return false;
        };
        let mut value = value;
        let mut old_value = target.get_property(key);
        if is_readonly(&old_value) && old_value.is_ref() && !value.is_ref() {
            return false;
        }
        if !self.is_shallow() && !is_readonly(&value) {
            if !is_shallow(&value) {
                value = to_raw(&value);
                old_value = to_raw(&old_value);
            }
            if !target.is_list() && !value.is_ref() {
                if let Value::Ref(r) = &old_value {
                    r.set(value);
                    return true;
                }
            }
        }
        let had_key = match key {
            Key::Index(i) if target.is_list() => *i < target.len(),
            _ => target.has_own(key),
        };
        let result = reflect_set(target, key, value.clone(), receiver);
        if result && target.ptr_eq(&receiver.raw()) {
            if !had_key {
                trigger(target, TriggerOp::Add, Some(key), Some(&value), None);
            } else if has_changed(&value, &old_value) {
                trigger(
                    target,
                    TriggerOp::Set,
                    Some(key),
                    Some(&value),
                    Some(&old_value),
                );
            }
        }
        result
    }

    pub(crate) fn base_delete(&self, key: &Key) -> bool {
        if self.is_readonly() {
            warn(&format!(
                "Delete operation on key \"{key}\" failed: target is readonly."
            ));
            return true;
        }
        let ProxyTarget::Raw(target) = &self.0.target else {
            return false;
        };
        let had_key = target.has_own(key);
        let old_value = target.get_own(key).unwrap_or_default();
        let result = target.delete_own(key);
        if result && had_key {
            trigger(target, TriggerOp::Delete, Some(key), None, Some(&old_value));
        }
        result
    }

    pub(crate) fn base_has(&self, key: &Key) -> bool {
        match &self.0.target {
            ProxyTarget::Raw(raw) => {
                let result = raw_has(raw, key);
                if !self.is_readonly() && !key.is_builtin_symbol() {
                    track(raw, TrackOp::Has, key);
                }
                result
            }
            ProxyTarget::Proxy(inner) => inner.base_has(key),
        }
    }

    pub(crate) fn base_own_keys(&self) -> Vec<Key> {
        match &self.0.target {
            ProxyTarget::Raw(raw) => {
                if !self.is_readonly() {
                    let key = if raw.is_list() {
                        Key::Length
                    } else {
                        Key::Iterate
                    };
                    track(raw, TrackOp::Iterate, &key);
                }
                raw.own_keys()
            }
            ProxyTarget::Proxy(inner) => inner.base_own_keys(),
        }
    }

    pub(crate) fn list_len(&self) -> usize {
        self.base_get(&Key::Length)
            .as_f64()
            .map_or(0, |n| n as usize)
    }

    /// Returns `true` if the list contains `value`, using SameValueZero.
    ///
    /// Every index is tracked. A wrapped argument also matches its raw object.
    pub fn includes(&self, value: impl Into<Value>) -> bool {
        self.search(&value.into(), false, same_value_zero).is_some()
    }

    /// First index of `value` in the list, using strict equality.
    pub fn index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), false, strict_equals)
    }
    pub fn last_index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), true, strict_equals)
    }

    fn search(
        &self,
        value: &Value,
        reverse: bool,
        eq: fn(&Value, &Value) -> bool,
    ) -> Option<usize> {
        if !self.is_list() {
            return None;
        }
        let find = |items: &[Value], value: &Value| {
            if reverse {
                items.iter().rposition(|item| eq(item, value))
            } else {
                items.iter().position(|item| eq(item, value))
            }
        };
        if self.is_readonly() {
            let items = self.to_vec().unwrap_or_default();
            return find(&items, value);
        }
        let raw = self.raw();
        let len = self.list_len();
        for i in 0..len {
            track(&raw, TrackOp::Get, &Key::Index(i));
        }
        let items = raw.to_vec().unwrap_or_default();
        find(&items, value).or_else(|| find(&items, &to_raw(value)))
    }

    /// Appends values to the list and returns the new length.
    pub fn push<T: Into<Value>>(&self, values: impl IntoIterator<Item = T>) -> usize {
        let _guard = UntrackGuard::new();
        let mut len = self.list_len();
        for value in values {
            self.base_set(&Key::Index(len), value.into(), self);
            len += 1;
        }
        self.set_len(len);
        len
    }

    /// Removes and returns the last element of the list.
    pub fn pop(&self) -> Value {
        let _guard = UntrackGuard::new();
        let len = self.list_len();
        if len == 0 {
            self.set_len(0);
            return Value::Undefined;
        }
        let index = len - 1;
        let value = self.base_get(&Key::Index(index));
        self.base_delete(&Key::Index(index));
        self.set_len(index);
        value
    }

    /// Removes and returns the first element of the list.
    pub fn shift(&self) -> Value {
        let _guard = UntrackGuard::new();
        let len = self.list_len();
        if len == 0 {
            self.set_len(0);
            return Value::Undefined;
        }
        let first = self.base_get(&Key::Index(0));
        for k in 1..len {
            self.move_element(k, k - 1);
        }
        self.base_delete(&Key::Index(len - 1));
        self.set_len(len - 1);
        first
    }

    /// Inserts values at the front of the list and returns the new length.
    pub fn unshift<T: Into<Value>>(&self, values: impl IntoIterator<Item = T>) -> usize {
        let _guard = UntrackGuard::new();
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let len = self.list_len();
        let count = values.len();
        if count > 0 {
            for k in (0..len).rev() {
                self.move_element(k, k + count);
            }
            for (j, value) in values.into_iter().enumerate() {
                self.base_set(&Key::Index(j), value, self);
            }
        }
        self.set_len(len + count);
        len + count
    }

    /// Removes `delete_count` elements at `start`, inserts `items` there and returns the removed elements.
    ///
    /// A negative `start` counts from the end. `None` removes everything from `start`.
    pub fn splice<T: Into<Value>>(
        &self,
        start: isize,
        delete_count: Option<usize>,
        items: impl IntoIterator<Item = T>,
    ) -> Vec<Value> {
        let _guard = UntrackGuard::new();
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        let len = self.list_len();
        let start = if start < 0 {
            len.saturating_sub(start.unsigned_abs())
        } else {
            (start as usize).min(len)
        };
        let delete_count = delete_count.unwrap_or(len - start).min(len - start);
        let removed = (0..delete_count)
            .map(|k| self.base_get(&Key::Index(start + k)))
            .collect();
        let item_count = items.len();
        if item_count < delete_count {
            for k in start..len - delete_count {
                self.move_element(k + delete_count, k + item_count);
            }
            for k in (len - delete_count + item_count..len).rev() {
                self.base_delete(&Key::Index(k));
            }
        } else if item_count > delete_count {
            for k in (start..len - delete_count).rev() {
                self.move_element(k + delete_count, k + item_count);
            }
        }
        for (j, item) in items.into_iter().enumerate() {
            self.base_set(&Key::Index(start + j), item, self);
        }
        self.set_len(len - delete_count + item_count);
        removed
    }

    fn move_element(&self, from: usize, to: usize) {
        if self.base_has(&Key::Index(from)) {
            let value = self.base_get(&Key::Index(from));
            self.base_set(&Key::Index(to), value, self);
        } else {
            self.base_delete(&Key::Index(to));
        }
    }
    fn set_len(&self, len: usize) {
        self.base_set(&Key::Length, Value::from(len), self);
    }
}

fn raw_has(raw: &RawObject, key: &Key) -> bool {
    if raw.has_own(key) {
        return true;
    }
    match raw.proto() {
        Some(Value::Reactive(proto)) => proto.base_has(key),
        Some(Value::Object(proto)) => raw_has(&proto, key),
        _ => false,
    }
}

/// Assigns `key` following the prototype chain of `target`, writing onto `receiver`.
fn reflect_set(target: &RawObject, key: &Key, value: Value, receiver: &Reactive) -> bool {
    if target.has_own(key) {
        return receiver.raw().set_own(key, value);
    }
    match target.proto() {
        Some(Value::Reactive(proto)) => proto.base_set(key, value, receiver),
        Some(Value::Object(proto)) => reflect_set(&proto, key, value, receiver),
        _ => receiver.raw().set_own(key, value),
    }
}
