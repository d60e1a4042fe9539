use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    future::Future,
    hash::{Hash, Hasher},
    mem::take,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use futures::future::FusedFuture;
use indexmap::IndexSet;

use crate::{
    core::Globals,
    error::{call_with_error_handling, warn, ErrorCode},
    scope::Owner,
};


/// Maximum number of times one job may re-run within a single flush.
pub const RECURSION_LIMIT: u32 = 100;

pub(crate) type CountMap = HashMap<Job, u32>;

/// A unit of work run during a flush.
///
/// Jobs compare by identity. Queuing the same job twice before it runs queues it once.
#[derive(Clone)]
pub struct Job(Rc<JobNode>);

struct JobNode {
    id: Cell<Option<u32>>,
    active: Cell<bool>,
    allow_recurse: Cell<bool>,
    owner: RefCell<Option<Rc<str>>>,
    f: Box<dyn Fn()>,
}

impl Job {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(JobNode {
            id: Cell::new(None),
            active: Cell::new(true),
            allow_recurse: Cell::new(false),
            owner: RefCell::new(None),
            f: Box::new(f),
        }))
    }

    /// Sets the ordering id. Jobs with smaller ids run first, jobs without an id run last.
    pub fn with_id(self, id: u32) -> Self {
        self.0.id.set(Some(id));
        self
    }

    /// Names the owner in the recursion warning.
    pub fn with_owner(self, owner: &Owner) -> Self {
        *self.0.owner.borrow_mut() = owner.name();
        self
    }

    /// Lets the job queue itself again while it is running.
    pub fn allow_recurse(self, value: bool) -> Self {
        self.set_allow_recurse(value);
        self
    }

    pub fn id(&self) -> Option<u32> {
        self.0.id.get()
    }
    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Inactive jobs stay in the queue but are skipped by the flush.
    pub fn set_active(&self, value: bool) {
        self.0.active.set(value)
    }
    pub fn allows_recurse(&self) -> bool {
        self.0.allow_recurse.get()
    }
    pub fn set_allow_recurse(&self, value: bool) {
        self.0.allow_recurse.set(value)
    }
    pub fn owner_name(&self) -> Option<Rc<str>> {
        self.0.owner.borrow().clone()
    }

    pub fn run(&self) {
        (self.0.f)()
    }

    fn sort_key(&self) -> u64 {
        self.id().map_or(u64::MAX, u64::from)
    }
}
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Job {}
impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state)
    }
}
impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("allow_recurse", &self.allows_recurse())
            .finish()
    }
}

/// The three queues and their cursors.
///
/// Every method is plain data manipulation; jobs are run by the free functions of this module.
#[derive(Default)]
pub(crate) struct SchedulerState {
    is_flushing: bool,
    is_flush_pending: bool,
    queue: Vec<Job>,
    flush_index: usize,
    pending_pre: Vec<Job>,
    active_pre: Option<Vec<Job>>,
    pre_flush_index: usize,
    pending_post: Vec<Job>,
    active_post: Option<Vec<Job>>,
    post_flush_index: usize,
    current_pre_flush_parent: Option<Job>,
    epoch: u64,
    tick_wakers: Vec<Waker>,
    host_waker: Option<Waker>,
}

impl SchedulerState {
    pub(crate) fn is_flush_pending(&self) -> bool {
        self.is_flush_pending
    }
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
    pub(crate) fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }
    pub(crate) fn take_tick_wakers(&mut self) -> Vec<Waker> {
        take(&mut self.tick_wakers)
    }

    /// First index in the unprocessed part of the queue whose job id is not less than `id`.
    fn find_insertion_index(&self, id: u64) -> usize {
        let mut start = (self.flush_index + 1).min(self.queue.len());
        let mut end = self.queue.len();
        while start < end {
            let middle = (start + end) / 2;
            if self.queue[middle].sort_key() < id {
                start = middle + 1;
            } else {
                end = middle;
            }
        }
        start
    }

    fn queue_job(&mut self, job: &Job) -> bool {
        let start = if self.is_flushing && job.allows_recurse() {
            self.flush_index + 1
        } else {
            self.flush_index
        };
        let queued = self.queue.get(start..).is_some_and(|q| q.contains(job));
        if queued || self.current_pre_flush_parent.as_ref() == Some(job) {
            return false;
        }
        if job.id().is_none() {
            self.queue.push(job.clone());
        } else {
            let index = self.find_insertion_index(job.sort_key());
            self.queue.insert(index, job.clone());
        }
        true
    }

    fn queue_pre_cb(&mut self, job: &Job) {
        queue_cb(job, &self.active_pre, &mut self.pending_pre, self.pre_flush_index)
    }
    fn queue_post_cb(&mut self, job: &Job) {
        queue_cb(
            job,
            &self.active_post,
            &mut self.pending_post,
            self.post_flush_index,
        )
    }

    /// Returns the host waker to wake once the borrow is released.
    fn queue_flush(&mut self) -> Option<Waker> {
        if !self.is_flushing && !self.is_flush_pending {
            self.is_flush_pending = true;
            self.host_waker.take()
        } else {
            None
        }
    }

    fn invalidate_job(&mut self, job: &Job) -> Option<Job> {
        let index = self.queue.iter().position(|j| j == job)?;
        if index > self.flush_index {
            Some(self.queue.remove(index))
        } else {
            None
        }
    }

    pub(crate) fn poll_ready(&mut self, cx: &Context) -> Poll<()> {
        if self.is_flush_pending {
            return Poll::Ready(());
        }
        self.host_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    pub(crate) fn begin_flush(&self) -> bool {
        self.is_flush_pending && !self.is_flushing
    }
    pub(crate) fn finish_tick(&mut self) -> Vec<Waker> {
        self.epoch += 1;
        take(&mut self.tick_wakers)
    }
    fn has_pending(&self) -> bool {
        !self.queue.is_empty() || !self.pending_pre.is_empty() || !self.pending_post.is_empty()
    }
}

fn queue_cb(job: &Job, active: &Option<Vec<Job>>, pending: &mut Vec<Job>, index: usize) {
    let start = if job.allows_recurse() { index + 1 } else { index };
    let queued = active
        .as_ref()
        .is_some_and(|a| a.get(start..).is_some_and(|a| a.contains(job)));
    if !queued {
        pending.push(job.clone());
    }
}

fn wake(waker: Option<Waker>) {
    if let Some(waker) = waker {
        waker.wake();
    }
}

/// Queues `job` into the main queue, ordered by id.
///
/// # Panics
///
/// Panics if no [`Runtime`](crate::core::Runtime) exists in the current thread.
pub fn queue_job(job: &Job) {
    let waker = Globals::with(|g| {
        g.assert_exists();
        if g.scheduler.queue_job(job) {
            g.scheduler.queue_flush()
        } else {
            None
        }
    });
    wake(waker);
}

/// Removes `job` from the main queue if it has not run yet in this flush.
pub fn invalidate_job(job: &Job) {
    let removed = Globals::with(|g| g.scheduler.invalidate_job(job));
    drop(removed);
}

/// Queues `job` to run before the main queue.
pub fn queue_pre_flush_cb(job: &Job) {
    let waker = Globals::with(|g| {
        g.assert_exists();
        g.scheduler.queue_pre_cb(job);
        g.scheduler.queue_flush()
    });
    wake(waker);
}

/// Queues `job` to run after the main queue.
pub fn queue_post_flush_cb(job: &Job) {
    let waker = Globals::with(|g| {
        g.assert_exists();
        g.scheduler.queue_post_cb(job);
        g.scheduler.queue_flush()
    });
    wake(waker);
}

/// Queues already deduplicated jobs to run after the main queue.
pub fn queue_post_flush_cbs(jobs: impl IntoIterator<Item = Job>) {
    let waker = Globals::with(|g| {
        g.assert_exists();
        g.scheduler.pending_post.extend(jobs);
        g.scheduler.queue_flush()
    });
    wake(waker);
}

/// Runs the pending pre-flush callbacks until none are left.
///
/// While they run, `parent` cannot be queued into the main queue.
pub fn flush_pre_flush_cbs(parent: Option<&Job>) {
    flush_pre_flush_cbs_with(&mut CountMap::new(), parent)
}

/// Runs the pending post-flush callbacks in id order.
///
/// When called while post-flush callbacks are already running, the pending ones are
/// appended to the running batch instead.
pub fn flush_post_flush_cbs() {
    flush_post_flush_cbs_with(&mut CountMap::new())
}

/// Returns a future that completes after the pending flush has finished.
///
/// Completes immediately when no flush is pending or running.
pub fn next_tick() -> NextTick {
    let epoch = Globals::try_with(|g| {
        let s = &g.scheduler;
        (s.is_flush_pending || s.is_flushing).then_some(s.epoch)
    })
    .ok()
    .flatten();
    NextTick { epoch, done: false }
}

#[derive(Debug)]
#[must_use]
pub struct NextTick {
    epoch: Option<u64>,
    done: bool,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(epoch) = self.epoch {
            let flushed = Globals::with(|g| {
                if g.scheduler.epoch > epoch {
                    true
                } else {
                    g.scheduler.tick_wakers.push(cx.waker().clone());
                    false
                }
            });
            if !flushed {
                return Poll::Pending;
            }
        }
        self.done = true;
        Poll::Ready(())
    }
}
impl FusedFuture for NextTick {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

fn run_job(job: &Job) {
    call_with_error_handling(ErrorCode::Scheduler, || job.run());
}

/// Returns `true` if `job` exceeded the recursion limit and must be skipped.
fn check_recursive_updates(seen: &mut CountMap, job: &Job) -> bool {
    let Some(count) = seen.get_mut(job) else {
        seen.insert(job.clone(), 1);
        return false;
    };
    if *count > RECURSION_LIMIT {
        let owner = job
            .owner_name()
            .map(|name| format!(" in component <{name}>"))
            .unwrap_or_default();
        warn(&format!(
            "Maximum recursive updates exceeded{owner}. \
             This means you have a reactive effect that is mutating its own \
             dependencies and thus recursively triggering itself. Possible sources \
             include component template, render function, updated hook or \
             watcher source function."
        ));
        true
    } else {
        *count += 1;
        false
    }
}

pub(crate) fn flush_pre_flush_cbs_with(seen: &mut CountMap, parent: Option<&Job>) {
    loop {
        let started = Globals::with(|g| {
            let s = &mut g.scheduler;
            if s.pending_pre.is_empty() {
                return false;
            }
            s.current_pre_flush_parent = parent.cloned();
            let deduped: IndexSet<Job> = s.pending_pre.drain(..).collect();
            s.active_pre = Some(deduped.into_iter().collect());
            s.pre_flush_index = 0;
            true
        });
        if !started {
            return;
        }
        while let Some(job) = Globals::with(|g| {
            let s = &g.scheduler;
            s.active_pre.as_ref()?.get(s.pre_flush_index).cloned()
        }) {
            if !check_recursive_updates(seen, &job) {
                run_job(&job);
            }
            Globals::with(|g| g.scheduler.pre_flush_index += 1);
        }
        let finished = Globals::with(|g| {
            let s = &mut g.scheduler;
            s.pre_flush_index = 0;
            (s.active_pre.take(), s.current_pre_flush_parent.take())
        });
        drop(finished);
    }
}

pub(crate) fn flush_post_flush_cbs_with(seen: &mut CountMap) {
    let started = Globals::with(|g| {
        let s = &mut g.scheduler;
        if s.pending_post.is_empty() {
            return false;
        }
        let deduped: IndexSet<Job> = s.pending_post.drain(..).collect();
        if let Some(active) = &mut s.active_post {
            active.extend(deduped);
            return false;
        }
        let mut deduped: Vec<Job> = deduped.into_iter().collect();
        deduped.sort_by_key(Job::sort_key);
        s.active_post = Some(deduped);
        s.post_flush_index = 0;
        true
    });
    if !started {
        return;
    }
    while let Some(job) = Globals::with(|g| {
        let s = &g.scheduler;
        s.active_post.as_ref()?.get(s.post_flush_index).cloned()
    }) {
        if !check_recursive_updates(seen, &job) {
            run_job(&job);
        }
        Globals::with(|g| g.scheduler.post_flush_index += 1);
    }
    let finished = Globals::with(|g| {
        let s = &mut g.scheduler;
        s.post_flush_index = 0;
        s.active_post.take()
    });
    drop(finished);
}

/// Runs pre-flush callbacks, the main queue and post-flush callbacks until all three are empty.
pub(crate) fn flush_jobs(seen: &mut CountMap) {
    loop {
        let queued = Globals::with(|g| {
            let s = &mut g.scheduler;
            s.is_flush_pending = false;
            s.is_flushing = true;
            s.queue.len()
        });
        tracing::trace!(queued, "flush jobs");
        flush_pre_flush_cbs_with(seen, None);
        Globals::with(|g| g.scheduler.queue.sort_by_key(Job::sort_key));
        while let Some(job) = Globals::with(|g| {
            let s = &g.scheduler;
            s.queue.get(s.flush_index).cloned()
        }) {
            if job.is_active() && !check_recursive_updates(seen, &job) {
                run_job(&job);
            }
            Globals::with(|g| g.scheduler.flush_index += 1);
        }
        let queue = Globals::with(|g| {
            let s = &mut g.scheduler;
            s.flush_index = 0;
            take(&mut s.queue)
        });
        drop(queue);
        flush_post_flush_cbs_with(seen);
        let more = Globals::with(|g| {
            g.scheduler.is_flushing = false;
            g.scheduler.has_pending()
        });
        if !more {
            break;
        }
    }
}
