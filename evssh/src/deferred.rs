//! Single-assignment results that any number of tasks can wait on.

use crate::{error::Error, reactor::Reactor, Result};
use core::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use futures::future::try_join_all;
use std::rc::Rc;

type Continuation<T> = Box<dyn FnOnce(&Result<T>)>;

struct Inner<T> {
    outcome: Option<Rc<Result<T>>>,
    wakers: Vec<Option<Waker>>,
    continuations: Vec<Continuation<T>>,
    flush_scheduled: bool,
    /// Live [`Value`]s.
    watchers: usize,
    /// Every [`Value`] was dropped before the outcome was known.
    abandoned: bool,
}

/// A value that is settled exactly once.
///
/// Settling a second time is a no-op and leaves the first outcome in place.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
    reactor: Reactor,
}

impl<T: 'static> Deferred<T> {
    pub fn new(reactor: &Reactor) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                wakers: Vec::new(),
                continuations: Vec::new(),
                flush_scheduled: false,
                watchers: 0,
                abandoned: false,
            })),
            reactor: reactor.clone(),
        }
    }

    pub fn resolved(reactor: &Reactor, value: T) -> Self {
        let d = Self::new(reactor);
        d.resolve(value);
        d
    }

    /// Returns `false` if this was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Returns `false` if this was already settled.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    /// Run `f` with the outcome once settled.
    ///
    /// Continuations run in registration order on a later executor turn, also when this
    /// is already settled.
    pub fn then(&self, f: impl FnOnce(&Result<T>) + 'static) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            inner.continuations.push(Box::new(f));
            inner.outcome.is_some()
        };
        if settled {
            self.schedule_flush();
        }
    }

    pub fn finally(&self, f: impl FnOnce() + 'static) {
        self.then(move |_| f())
    }

    /// Whether everyone who waited for the outcome gave up before it was known.
    ///
    /// A deferred nobody has called [`value`](Self::value) on is never abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.inner.borrow().abandoned
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let wakers = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(Rc::new(outcome));
            core::mem::take(&mut inner.wakers)
        };
        wakers.into_iter().flatten().for_each(Waker::wake);
        self.schedule_flush();
        true
    }

    fn schedule_flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.flush_scheduled || inner.continuations.is_empty() {
                return;
            }
            inner.flush_scheduled = true;
        }
        let inner = self.inner.clone();
        self.reactor.next_tick(move || {
            let (outcome, continuations) = {
                let mut inner = inner.borrow_mut();
                inner.flush_scheduled = false;
                (inner.outcome.clone(), core::mem::take(&mut inner.continuations))
            };
            if let Some(outcome) = outcome {
                continuations.into_iter().for_each(|f| f(&outcome));
            }
        });
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Wait for the outcome.
    pub fn value(&self) -> Value<T> {
        self.inner.borrow_mut().watchers += 1;
        Value { inner: self.inner.clone(), slot: None }
    }

    /// The outcome, if already settled.
    pub fn try_value(&self) -> Option<Result<T>> {
        self.inner.borrow().outcome.as_deref().cloned()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), reactor: self.reactor.clone() }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self.inner.borrow().outcome.is_some();
        f.debug_struct("Deferred").field("settled", &settled).finish()
    }
}

/// Future returned by [`Deferred::value`].
pub struct Value<T> {
    inner: Rc<RefCell<Inner<T>>>,
    slot: Option<usize>,
}

impl<T: Clone> Future for Value<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        if let Some(outcome) = inner.outcome.as_deref() {
            return Poll::Ready(outcome.clone());
        }
        let waker = Some(cx.waker().clone());
        let slot = self.slot;
        match slot {
            Some(i) => inner.wakers[i] = waker,
            None => {
                inner.wakers.push(waker);
                let i = inner.wakers.len() - 1;
                drop(inner);
                self.slot = Some(i);
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for Value<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(i) = self.slot {
            if let Some(w) = inner.wakers.get_mut(i) {
                *w = None;
            }
        }
        inner.watchers -= 1;
        if inner.watchers == 0 && inner.outcome.is_none() {
            inner.abandoned = true;
        }
    }
}

/// Wait for every deferred, failing with the first rejection.
pub async fn all<T, I>(deferreds: I) -> Result<Vec<T>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Deferred<T>>,
{
    try_join_all(deferreds.into_iter().map(|d| d.value())).await
}
