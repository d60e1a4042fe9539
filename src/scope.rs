use std::{
    cell::{Cell, RefCell},
    fmt,
    mem::{replace, take},
    rc::{Rc, Weak},
};

use slabmap::SlabMap;

use crate::{core::Globals, error::warn};


/// Something an [`EffectScope`] stops together with itself.
pub(crate) trait ScopeEntry {
    fn stop_entry(&self);
}

/// A group of effects and watchers that are stopped together.
///
/// Effects created while the scope is running are recorded into it.
/// Scopes created while another scope is running become its children.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeNode>);

struct ScopeNode {
    active: Cell<bool>,
    effects: RefCell<SlabMap<Rc<dyn ScopeEntry>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    scopes: RefCell<SlabMap<EffectScope>>,
    parent: RefCell<Option<(Weak<ScopeNode>, usize)>>,
}

impl EffectScope {
    /// Creates a scope nested in the current scope, if any.
    pub fn new() -> Self {
        let this = Self::detached();
        if let Some(parent) = current_scope() {
            let key = parent.0.scopes.borrow_mut().insert(this.clone());
            *this.0.parent.borrow_mut() = Some((Rc::downgrade(&parent.0), key));
        }
        this
    }

    /// Creates a scope that is not collected by the current scope.
    pub fn detached() -> Self {
        Self(Rc::new(ScopeNode {
            active: Cell::new(true),
            effects: RefCell::new(SlabMap::new()),
            cleanups: RefCell::new(Vec::new()),
            scopes: RefCell::new(SlabMap::new()),
            parent: RefCell::new(None),
        }))
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Runs `f` with this scope as the current scope.
    ///
    /// Returns `None` and warns if the scope has been stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.is_active() {
            warn("cannot run an inactive effect scope.");
            return None;
        }
        let _guard = ScopeGuard::new(self);
        Some(f())
    }

    /// Stops every recorded effect and child scope, then runs the dispose callbacks.
    pub fn stop(&self) {
        self.stop_with(false)
    }
    fn stop_with(&self, from_parent: bool) {
        if !self.is_active() {
            return;
        }
        let effects = take(&mut *self.0.effects.borrow_mut());
        for effect in effects.values() {
            effect.stop_entry();
        }
        let cleanups = take(&mut *self.0.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
        let scopes = take(&mut *self.0.scopes.borrow_mut());
        for scope in scopes.values() {
            scope.stop_with(true);
        }
        if !from_parent {
            let parent = self.0.parent.borrow_mut().take();
            if let Some((parent, key)) = parent {
                if let Some(parent) = parent.upgrade() {
                    let removed = parent.scopes.borrow_mut().remove(key);
                    drop(removed);
                }
            }
        }
        self.0.active.set(false);
    }

    /// Number of effects and watchers currently recorded.
    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }
    pub fn scope_count(&self) -> usize {
        self.0.scopes.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn record(&self, entry: Rc<dyn ScopeEntry>) -> Option<ScopeSlot> {
        if !self.is_active() {
            return None;
        }
        let key = self.0.effects.borrow_mut().insert(entry);
        Some(ScopeSlot {
            scope: Rc::downgrade(&self.0),
            key,
        })
    }
}
impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .field("scopes", &self.scope_count())
            .finish()
    }
}

/// Position of an entry inside the scope it was recorded in.
pub(crate) struct ScopeSlot {
    scope: Weak<ScopeNode>,
    key: usize,
}
impl ScopeSlot {
    pub(crate) fn remove(self) {
        if let Some(scope) = self.scope.upgrade() {
            let removed = scope.effects.borrow_mut().remove(self.key);
            drop(removed);
        }
    }
}

/// Records `entry` into `scope`, or into the current scope when `scope` is `None`.
pub(crate) fn record_effect_scope(
    entry: Rc<dyn ScopeEntry>,
    scope: Option<&EffectScope>,
) -> Option<ScopeSlot> {
    match scope {
        Some(scope) => scope.record(entry),
        None => current_scope()?.record(entry),
    }
}

pub fn current_scope() -> Option<EffectScope> {
    Globals::try_with(|g| g.scopes.last().cloned()).ok().flatten()
}

/// Registers `f` to run when the current scope stops.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    if let Some(scope) = current_scope() {
        scope.0.cleanups.borrow_mut().push(Box::new(f));
    } else {
        warn(
            "onScopeDispose() is called when there is no active effect scope to be associated with.",
        );
    }
}

struct ScopeGuard;

impl ScopeGuard {
    fn new(scope: &EffectScope) -> Self {
        Globals::with(|g| g.scopes.push(scope.clone()));
        Self
    }
}
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let scope = Globals::try_with(|g| g.scopes.pop()).ok().flatten();
        drop(scope);
    }
}

/// The entity a watcher belongs to, such as a component of a rendering layer.
///
/// Pre-flush watchers of an owner that is not mounted yet run synchronously,
/// and `watch_effect` stops running once its owner is unmounted.
#[derive(Clone)]
pub struct Owner(Rc<OwnerNode>);

struct OwnerNode {
    name: Option<Rc<str>>,
    scope: EffectScope,
    is_mounted: Cell<bool>,
    is_unmounted: Cell<bool>,
}

impl Owner {
    pub fn new(name: &str) -> Self {
        Self::with_name(Some(name.into()))
    }
    pub fn anonymous() -> Self {
        Self::with_name(None)
    }
    fn with_name(name: Option<Rc<str>>) -> Self {
        Self(Rc::new(OwnerNode {
            name,
            scope: EffectScope::detached(),
            is_mounted: Cell::new(false),
            is_unmounted: Cell::new(false),
        }))
    }

    pub fn name(&self) -> Option<Rc<str>> {
        self.0.name.clone()
    }
    pub fn scope(&self) -> &EffectScope {
        &self.0.scope
    }
    pub fn is_mounted(&self) -> bool {
        self.0.is_mounted.get()
    }
    pub fn is_unmounted(&self) -> bool {
        self.0.is_unmounted.get()
    }

    /// Runs `f` with this owner as the current owner and its scope as the current scope.
    pub fn setup<T>(&self, f: impl FnOnce() -> T) -> T {
        let _owner = OwnerGuard::new(self);
        let _scope = ScopeGuard::new(&self.0.scope);
        f()
    }

    pub fn mount(&self) {
        self.0.is_mounted.set(true);
    }

    /// Stops everything created during [`Owner::setup`].
    pub fn unmount(&self) {
        self.0.scope.stop();
        self.0.is_unmounted.set(true);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
    pub(crate) fn downgrade(&self) -> WeakOwner {
        WeakOwner(Rc::downgrade(&self.0))
    }
}
impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.0.name)
            .field("is_mounted", &self.is_mounted())
            .field("is_unmounted", &self.is_unmounted())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakOwner(Weak<OwnerNode>);

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(Owner)
    }
}

pub fn current_owner() -> Option<Owner> {
    Globals::try_with(|g| g.owner.clone()).ok().flatten()
}

struct OwnerGuard(Option<Owner>);

impl OwnerGuard {
    fn new(owner: &Owner) -> Self {
        Self(Globals::with(|g| replace(&mut g.owner, Some(owner.clone()))))
    }
}
impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let last = self.0.take();
        let current = Globals::try_with(|g| replace(&mut g.owner, last));
        drop(current);
    }
}
