//! Notify/wait event.
//!
//! `notify()` wakes every task currently parked in `wait()` on this event —
//! a one-shot broadcast pulse, not a sticky flag. A task that calls
//! `event.wait()` *after* a `notify()` has already fired does not see that
//! past notification; it joins the next one.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct EventInner {
    name: String,
    parked: Vec<(Rc<Cell<bool>>, Waker)>,
}

/// A broadcast notify/wait event, scoped to one simulation.
#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<EventInner>>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Construct a fresh, anonymously-named event with nobody waiting on it.
    pub fn new() -> Self {
        Self::named("event")
    }

    /// Construct a fresh event whose name appears in [`Kernel::blocked_tasks`](crate::Kernel::blocked_tasks)
    /// diagnostics for any task parked on it.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EventInner {
                name: name.into(),
                parked: Vec::new(),
            })),
        }
    }

    /// Wake every task currently blocked in [`Event::wait`].
    pub fn notify(&self) {
        let parked = std::mem::take(&mut self.inner.borrow_mut().parked);
        for (fired, waker) in parked {
            fired.set(true);
            waker.wake();
        }
    }

    /// A future that resolves the next time [`Event::notify`] is called.
    pub fn wait(&self) -> EventWait {
        EventWait {
            inner: Rc::clone(&self.inner),
            fired: Rc::new(Cell::new(false)),
            registered: false,
        }
    }
}

/// Future returned by [`Event::wait`].
pub struct EventWait {
    inner: Rc<RefCell<EventInner>>,
    fired: Rc<Cell<bool>>,
    registered: bool,
}

impl Unpin for EventWait {}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.fired.get() {
            return Poll::Ready(());
        }
        if !this.registered {
            let mut inner = this.inner.borrow_mut();
            let name = inner.name.clone();
            inner.parked.push((Rc::clone(&this.fired), cx.waker().clone()));
            drop(inner);
            crate::kernel::note_blocked(&name);
            this.registered = true;
        }
        Poll::Pending
    }
}
