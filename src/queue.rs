//! Unbounded FIFO of values with asynchronous, cancellable consumers.
//!
//! `put` completes the oldest live waiter or appends the value; `get`
//! returns a future that is parked until a value arrives. Dropping a
//! parked future removes it from consideration; later `put`s go to the
//! next live waiter. Dropping the queue itself leaves parked futures
//! permanently pending (they hold no queue reference), so their drop is
//! a no-op.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct WaiterState<T> {
    value: Option<T>,
    waker: Option<Waker>,
    cancelled: bool,
}

struct Waiter<T> {
    state: Mutex<WaiterState<T>>,
}

impl<T> Waiter<T> {
    fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Waiter {
            state: Mutex::new(WaiterState {
                value,
                waker: None,
                cancelled: false,
            }),
        })
    }

    /// Attempts to hand `value` to this waiter. Returns the value back
    /// if the waiter was already cancelled.
    fn offer(&self, value: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Some(value);
        }
        state.value = Some(value);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        None
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<Arc<Waiter<T>>>,
}

/// A shared handle to the queue. Clones observe the same FIFO.
pub struct Queue<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Completes the oldest live waiter with `value`, or appends it.
    pub fn put(&self, value: T) {
        let mut inner = self.inner.lock();
        let mut value = value;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.offer(value) {
                None => return,
                Some(returned) => value = returned,
            }
        }
        inner.items.push_back(value);
    }

    /// Returns a future resolving to the next value in FIFO order.
    pub fn get(&self) -> Get<T> {
        let mut inner = self.inner.lock();
        if let Some(value) = inner.items.pop_front() {
            return Get {
                waiter: Waiter::new(Some(value)),
            };
        }
        let waiter = Waiter::new(None);
        inner.waiters.push_back(waiter.clone());
        Get { waiter }
    }
}

/// A pending `get`. Dropping it cancels the wait.
pub struct Get<T> {
    waiter: Arc<Waiter<T>>,
}

impl<T> Future for Get<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.waiter.state.lock();
        match state.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Get<T> {
    fn drop(&mut self) {
        self.waiter.state.lock().cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{RawWaker, RawWakerVTable};

    fn noop_waker() -> Waker {
        const VTABLE: RawWakerVTable =
            RawWakerVTable::new(|_| RawWaker::new(std::ptr::null(), &VTABLE), |_| {}, |_| {}, |_| {});
        // SAFETY: the vtable functions never dereference the data pointer.
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    fn poll_once<T>(get: &mut Get<T>) -> Poll<T> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(get).poll(&mut cx)
    }

    #[test]
    fn block() {
        let q = Queue::new();
        let mut get = q.get();
        assert!(poll_once(&mut get).is_pending());

        q.put("hello world");
        assert_eq!(Poll::Ready("hello world"), poll_once(&mut get));
    }

    #[test]
    fn block_and_discard() {
        let q = Queue::new();
        let get1 = q.get();
        let mut get2 = q.get();
        assert!(poll_once(&mut get2).is_pending());

        // Dropping the first waiter pops it off the queue; the value
        // goes to the next live waiter.
        drop(get1);
        q.put("hello world");
        assert_eq!(Poll::Ready("hello world"), poll_once(&mut get2));
    }

    #[test]
    fn block_and_deallocate() {
        let mut get = {
            let q = Queue::<&str>::new();
            q.get()
        };
        // The queue that would satisfy this future is gone; the future
        // stays pending and dropping it is a no-op.
        assert!(poll_once(&mut get).is_pending());
        drop(get);
    }

    #[test]
    fn noblock() {
        let q = Queue::new();
        q.put("world hello");
        let mut get = q.get();
        assert_eq!(Poll::Ready("world hello"), poll_once(&mut get));
    }

    #[test]
    fn fifo_order() {
        let q = Queue::new();
        let mut get1 = q.get();
        let mut get2 = q.get();
        let mut get3 = q.get();

        q.put("hello");
        assert_eq!(Poll::Ready("hello"), poll_once(&mut get1));
        assert!(poll_once(&mut get2).is_pending());

        q.put("pretty");
        q.put("world");
        assert_eq!(Poll::Ready("pretty"), poll_once(&mut get2));
        assert_eq!(Poll::Ready("world"), poll_once(&mut get3));
    }

    #[tokio::test]
    async fn awaited_get() {
        let q = Queue::new();
        let get = q.get();
        q.put(42u32);
        assert_eq!(42, get.await);
    }
}
