//! The cooperative cycle-driven scheduler.
//!
//! A single global cycle counter advances only when the scheduler has driven
//! every runnable task to its next suspension point (`wait(k)`, a blocking
//! FIFO read/write, or an event wait) — the "quiescent step". Tasks that unblock each other (by writing to a FIFO a peer is blocked
//! reading, or vice versa) become runnable again within the same step, so a
//! chain of dependent forwards can complete without consuming extra cycles.
//!
//! Internally this is a tiny single-threaded `async` executor: tasks are
//! boxed `Future<Output = ()>` trait objects, woken through a hand-rolled
//! [`std::task::Waker`] that just pushes the task's index back onto the
//! kernel's ready queue. No OS threads, no atomics — `Rc`/`RefCell` are
//! enough because only one task is ever polled at a time.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use fabric_common::FabricError;
use tracing::{trace, warn};

/// Opaque handle to a task registered with a [`Kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) usize);

/// Summary of a completed (bounded) kernel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// The cycle counter's value when the run stopped.
    pub cycles: u64,
}

/// A snapshot of one still-alive task, as reported by [`Kernel::blocked_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTask {
    /// The task's registered name.
    pub name: String,
    /// The name of the FIFO/event endpoint it is currently suspended on, if
    /// its last suspension point was one of those (as opposed to a `wait(k)`
    /// countdown, which has no endpoint to name).
    pub endpoint: Option<String>,
}

enum TaskState {
    Alive,
    Done,
}

struct TaskSlot {
    name: String,
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
    state: TaskState,
    /// Endpoint name reported by [`note_blocked`] during this task's last
    /// `Poll::Pending` return, if any. Cleared before every poll.
    blocked_on: Option<String>,
}

pub(crate) struct KernelInner {
    cycle: u64,
    tasks: Vec<TaskSlot>,
    ready: VecDeque<usize>,
    /// Tasks parked in `wait(k)`, keyed by the cycle at which they resume.
    wake_at: BTreeMap<u64, Vec<Waker>>,
}

impl KernelInner {
    fn mark_ready(&mut self, idx: usize) {
        if matches!(self.tasks[idx].state, TaskState::Alive) && !self.ready.contains(&idx) {
            self.ready.push_back(idx);
        }
    }
}

/// The cooperative cycle-driven scheduler.
///
/// Cheaply `Clone`-able: every clone shares the same underlying task table
/// and cycle counter, which is how individual components (router ports, PE
/// stages, cluster routing threads) all register tasks against one kernel.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Rc<RefCell<KernelInner>>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Construct a fresh kernel at cycle 0 with no registered tasks.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(KernelInner {
                cycle: 0,
                tasks: Vec::new(),
                ready: VecDeque::new(),
                wake_at: BTreeMap::new(),
            })),
        }
    }

    /// The current cycle counter.
    pub fn now(&self) -> u64 {
        self.inner.borrow().cycle
    }

    /// Register a task. The task begins executing (up to its first
    /// suspension point) the first time [`Kernel::run`] drains the ready
    /// queue; it is not run synchronously here.
    pub fn spawn(&self, name: impl Into<String>, fut: impl Future<Output = ()> + 'static) -> TaskId {
        let mut inner = self.inner.borrow_mut();
        let idx = inner.tasks.len();
        inner.tasks.push(TaskSlot {
            name: name.into(),
            future: Some(Box::pin(fut)),
            state: TaskState::Alive,
            blocked_on: None,
        });
        inner.ready.push_back(idx);
        TaskId(idx)
    }

    /// A future that suspends the calling task for exactly `cycles` rising
    /// edges from the cycle at which it is first polled.
    pub fn wait(&self, cycles: u64) -> WaitFuture {
        WaitFuture {
            kernel: Rc::clone(&self.inner),
            cycles,
            target: None,
        }
    }

    /// A snapshot of every task that is currently alive (not yet finished),
    /// with the endpoint it last suspended on, if any. Intended for
    /// diagnostics: a testbench stuck waiting for expected output can call
    /// this to see exactly what every task is parked on.
    pub fn blocked_tasks(&self) -> Vec<BlockedTask> {
        self.inner
            .borrow()
            .tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Alive))
            .map(|t| BlockedTask {
                name: t.name.clone(),
                endpoint: t.blocked_on.clone(),
            })
            .collect()
    }

    /// Drive the kernel forward. With `max_cycles = Some(n)`, stops once the
    /// cycle counter reaches `n` (used by bounded test runs). With `None`,
    /// runs until every task has completed or a deadlock is detected —
    /// note that most fabric tasks loop forever, so an unbounded run only
    /// terminates via deadlock in practice.
    pub fn run(&self, max_cycles: Option<u64>) -> Result<RunReport, FabricError> {
        loop {
            self.drain_ready();

            if let Some(max) = max_cycles {
                if self.now() >= max {
                    break;
                }
            }

            let next_wake_cycle = self.inner.borrow().wake_at.keys().next().copied();

            match (next_wake_cycle, max_cycles) {
                (Some(next), Some(max)) if next > max => {
                    self.inner.borrow_mut().cycle = max;
                    break;
                }
                (Some(next), _) => {
                    self.fire_wake_at(next);
                }
                (None, Some(max)) => {
                    // Nothing scheduled to ever happen again; jump straight
                    // to the bound rather than spin.
                    self.inner.borrow_mut().cycle = max;
                    break;
                }
                (None, None) => {
                    if self.has_live_tasks() {
                        return Err(self.deadlock_error());
                    }
                    break;
                }
            }
        }
        Ok(RunReport { cycles: self.now() })
    }

    /// Like [`Kernel::run`], but treats permanent backpressure the same as
    /// an unbounded run would: it returns `Err(FabricError::Deadlock)` the
    /// moment the kernel reaches quiescence with live tasks remaining and no
    /// future cycle scheduled to wake anyone — even if `max_cycles` has not
    /// been reached yet. `Kernel::run` deliberately does *not* do this (a
    /// bounded run that happens to end mid-backpressure, with some tasks
    /// permanently stalled on a sink nobody ever drains, is not itself a
    /// failure); this method is the opt-in diagnostic surface for callers
    /// that do want that eager check.
    pub fn run_to_quiescence(&self, max_cycles: u64) -> Result<u64, FabricError> {
        loop {
            self.drain_ready();

            if self.now() >= max_cycles {
                return Ok(self.now());
            }

            let next_wake_cycle = self.inner.borrow().wake_at.keys().next().copied();
            match next_wake_cycle {
                Some(next) if next > max_cycles => {
                    self.inner.borrow_mut().cycle = max_cycles;
                    return Ok(self.now());
                }
                Some(next) => self.fire_wake_at(next),
                None => {
                    if self.has_live_tasks() {
                        return Err(self.deadlock_error());
                    }
                    return Ok(self.now());
                }
            }
        }
    }

    /// Poll every ready task until none remain runnable (the "quiescent
    /// step").
    fn drain_ready(&self) {
        loop {
            let idx = match self.inner.borrow_mut().ready.pop_front() {
                Some(idx) => idx,
                None => break,
            };
            self.poll_task(idx);
        }
    }

    fn poll_task(&self, idx: usize) {
        let taken = self.inner.borrow_mut().tasks[idx].future.take();
        let mut fut = match taken {
            Some(fut) => fut,
            None => return, // already done, or spuriously re-queued
        };

        let waker = make_waker(&self.inner, idx);
        let mut cx = Context::from_waker(&waker);

        self.inner.borrow_mut().tasks[idx].blocked_on = None;
        CURRENT_TASK.with(|c| *c.borrow_mut() = Some((Rc::downgrade(&self.inner), idx)));
        let poll_result = fut.as_mut().poll(&mut cx);
        CURRENT_TASK.with(|c| *c.borrow_mut() = None);

        let mut inner = self.inner.borrow_mut();
        match poll_result {
            Poll::Ready(()) => {
                trace!(task = inner.tasks[idx].name.as_str(), "task completed");
                inner.tasks[idx].state = TaskState::Done;
                inner.tasks[idx].blocked_on = None;
            }
            Poll::Pending => {
                inner.tasks[idx].future = Some(fut);
            }
        }
    }

    fn fire_wake_at(&self, cycle: u64) {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            inner.cycle = cycle;
            inner.wake_at.remove(&cycle).unwrap_or_default()
        };
        for w in wakers {
            w.wake();
        }
    }

    fn has_live_tasks(&self) -> bool {
        self.inner
            .borrow()
            .tasks
            .iter()
            .any(|t| matches!(t.state, TaskState::Alive))
    }

    fn deadlock_error(&self) -> FabricError {
        let inner = self.inner.borrow();
        let blocked: Vec<String> = inner
            .tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Alive))
            .map(|t| t.name.clone())
            .collect();
        let cycle = inner.cycle;
        warn!(cycle, blocked = ?blocked, "kernel deadlock detected");
        FabricError::Deadlock { cycle, blocked }
    }

}

thread_local! {
    /// The kernel + task index currently being polled, so that
    /// [`note_blocked`] (called from inside `Fifo`/`Event` futures, which
    /// have no handle to the `Kernel` itself) can record which endpoint a
    /// task suspended on without threading a `Kernel` reference through
    /// every FIFO call site.
    static CURRENT_TASK: RefCell<Option<(Weak<RefCell<KernelInner>>, usize)>> =
        const { RefCell::new(None) };
}

/// Called by [`crate::Fifo`]/[`crate::Event`] futures when they return
/// `Poll::Pending`, to record the endpoint name against whichever task is
/// currently being polled (a no-op if nothing is being polled right now,
/// which only happens if this is called outside of `Kernel::poll_task`).
pub(crate) fn note_blocked(endpoint: &str) {
    CURRENT_TASK.with(|c| {
        if let Some((weak, idx)) = c.borrow().as_ref() {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().tasks[*idx].blocked_on = Some(endpoint.to_string());
            }
        }
    });
}

/// Future returned by [`Kernel::wait`].
pub struct WaitFuture {
    kernel: Rc<RefCell<KernelInner>>,
    cycles: u64,
    target: Option<u64>,
}

// No field is self-referential; this future is safe to move freely.
impl Unpin for WaitFuture {}

impl Future for WaitFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let target = *this
            .target
            .get_or_insert_with(|| this.kernel.borrow().cycle + this.cycles);
        if this.kernel.borrow().cycle >= target {
            Poll::Ready(())
        } else {
            this.kernel
                .borrow_mut()
                .wake_at
                .entry(target)
                .or_default()
                .push(cx.waker().clone());
            Poll::Pending
        }
    }
}

// ─── Waker plumbing ─────────────────────────────────────────────────
//
// A minimal single-threaded waker: the data pointer is an `Rc<WakeHandle>`
// borrowed/owned across the RawWaker vtable calls exactly as `Rc::into_raw`/
// `Rc::from_raw` require. Waking just re-enqueues the task index; there is
// no cross-thread signaling to do.

struct WakeHandle {
    kernel: Weak<RefCell<KernelInner>>,
    task_idx: usize,
}

fn make_waker(kernel: &Rc<RefCell<KernelInner>>, task_idx: usize) -> Waker {
    let handle = Rc::new(WakeHandle {
        kernel: Rc::downgrade(kernel),
        task_idx,
    });
    unsafe { Waker::from_raw(raw_waker(handle)) }
}

fn raw_waker(handle: Rc<WakeHandle>) -> RawWaker {
    RawWaker::new(Rc::into_raw(handle) as *const (), &VTABLE)
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

unsafe fn clone_raw(ptr: *const ()) -> RawWaker {
    let handle = unsafe { Rc::from_raw(ptr as *const WakeHandle) };
    let cloned = Rc::clone(&handle);
    std::mem::forget(handle);
    raw_waker(cloned)
}

unsafe fn wake_raw(ptr: *const ()) {
    let handle = unsafe { Rc::from_raw(ptr as *const WakeHandle) };
    wake_via_handle(&handle);
    // handle drops here, releasing the refcount `wake` consumes.
}

unsafe fn wake_by_ref_raw(ptr: *const ()) {
    let handle = unsafe { Rc::from_raw(ptr as *const WakeHandle) };
    wake_via_handle(&handle);
    std::mem::forget(handle);
}

unsafe fn drop_raw(ptr: *const ()) {
    drop(unsafe { Rc::from_raw(ptr as *const WakeHandle) });
}

fn wake_via_handle(handle: &Rc<WakeHandle>) {
    if let Some(kernel) = handle.kernel.upgrade() {
        kernel.borrow_mut().mark_ready(handle.task_idx);
    }
}
