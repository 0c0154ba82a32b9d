//! Bounded, single-producer/single-consumer FIFO.
//!
//! `read()` on an empty FIFO and `write()` on a full FIFO both suspend the
//! calling task until the peer operation frees them up — since there is
//! exactly one producer and one consumer per FIFO, each side only ever
//! needs to remember a single pending [`Waker`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use fabric_common::MAX_FIFO_DEPTH;

struct FifoInner<T> {
    name: String,
    capacity: usize,
    buf: VecDeque<T>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

/// A bounded FIFO of capacity `N >= 1`, shared between exactly one producer
/// task and one consumer task.
///
/// `Clone` is cheap (an `Rc` bump) — the producer keeps one clone, the
/// consumer another, and both bind to the same underlying channel.
pub struct Fifo<T> {
    inner: Rc<RefCell<FifoInner<T>>>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Fifo<T> {
    /// Construct a FIFO of the given capacity (clamped-checked against
    /// [`MAX_FIFO_DEPTH`] via [`debug_assert!`] — the backing store is a
    /// plain `VecDeque`, so capacities above the bound still work, they are
    /// simply outside what the rest of the fabric is meant to request).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity >= 1, "FIFO capacity must be at least 1");
        debug_assert!(
            capacity <= MAX_FIFO_DEPTH,
            "FIFO capacity {capacity} exceeds MAX_FIFO_DEPTH ({MAX_FIFO_DEPTH})"
        );
        Self {
            inner: Rc::new(RefCell::new(FifoInner {
                name: name.into(),
                capacity,
                buf: VecDeque::with_capacity(capacity),
                read_waker: None,
                write_waker: None,
            })),
        }
    }

    /// Name given at construction, used only in diagnostics.
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Non-blocking count of free slots.
    pub fn num_free(&self) -> usize {
        let inner = self.inner.borrow();
        inner.capacity - inner.buf.len()
    }

    /// Non-blocking count of occupied slots.
    pub fn len(&self) -> usize {
        self.inner.borrow().buf.len()
    }

    /// `true` if the FIFO currently holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().buf.is_empty()
    }

    /// A future that blocking-reads one token, suspending while empty.
    pub fn read(&self) -> FifoRead<T> {
        FifoRead {
            inner: Rc::clone(&self.inner),
        }
    }

    /// A future that blocking-writes one token, suspending while full.
    pub fn write(&self, value: T) -> FifoWrite<T> {
        FifoWrite {
            inner: Rc::clone(&self.inner),
            value: Some(value),
        }
    }
}

/// Future returned by [`Fifo::read`].
pub struct FifoRead<T> {
    inner: Rc<RefCell<FifoInner<T>>>,
}

impl<T> Unpin for FifoRead<T> {}

impl<T> Future for FifoRead<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.borrow_mut();
        match inner.buf.pop_front() {
            Some(value) => {
                if let Some(w) = inner.write_waker.take() {
                    drop(inner);
                    w.wake();
                }
                Poll::Ready(value)
            }
            None => {
                let name = inner.name.clone();
                inner.read_waker = Some(cx.waker().clone());
                drop(inner);
                crate::kernel::note_blocked(&name);
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`Fifo::write`].
pub struct FifoWrite<T> {
    inner: Rc<RefCell<FifoInner<T>>>,
    value: Option<T>,
}

impl<T> Unpin for FifoWrite<T> {}

impl<T> Future for FifoWrite<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut inner = this.inner.borrow_mut();
        if inner.buf.len() < inner.capacity {
            let value = this
                .value
                .take()
                .expect("FifoWrite polled again after completion");
            inner.buf.push_back(value);
            if let Some(w) = inner.read_waker.take() {
                drop(inner);
                w.wake();
            }
            Poll::Ready(())
        } else {
            let name = inner.name.clone();
            inner.write_waker = Some(cx.waker().clone());
            drop(inner);
            crate::kernel::note_blocked(&name);
            Poll::Pending
        }
    }
}
