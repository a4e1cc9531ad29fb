use core::{
	cell::{RefCell, RefMut},
	future::Future,
	ops::{Deref, DerefMut},
	pin::Pin,
	task::{Context, Poll, Waker},
};

/// Mutex for tasks sharing one thread.
///
/// The lock may be held across `.await`.
pub struct LocalMutex<T> {
	inner: RefCell<T>,
	waiters: RefCell<Vec<Waker>>,
}

impl<T> LocalMutex<T> {
	pub fn new(value: T) -> Self {
		Self { inner: RefCell::new(value), waiters: RefCell::new(Vec::new()) }
	}

	pub fn lock(&self) -> LocalMutexGuardFuture<'_, T> {
		LocalMutexGuardFuture { inner: self }
	}

	pub fn try_lock(&self) -> Option<LocalMutexGuard<'_, T>> {
		self.inner
			.try_borrow_mut()
			.ok()
			.map(|lock| LocalMutexGuard { inner: self, lock })
	}

	fn wait(&self, waker: &Waker) {
		let mut q = self.waiters.borrow_mut();
		if !q.iter().any(|w| w.will_wake(waker)) {
			q.push(waker.clone());
		}
	}
}

pub struct LocalMutexGuardFuture<'a, T> {
	inner: &'a LocalMutex<T>,
}

impl<'a, T> Future for LocalMutexGuardFuture<'a, T> {
	type Output = LocalMutexGuard<'a, T>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match self.inner.try_lock() {
			Some(guard) => Poll::Ready(guard),
			None => {
				self.inner.wait(cx.waker());
				Poll::Pending
			}
		}
	}
}

pub struct LocalMutexGuard<'a, T> {
	inner: &'a LocalMutex<T>,
	lock: RefMut<'a, T>,
}

impl<'a, T> Deref for LocalMutexGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		self.lock.deref()
	}
}

impl<'a, T> DerefMut for LocalMutexGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		self.lock.deref_mut()
	}
}

impl<'a, T> Drop for LocalMutexGuard<'a, T> {
	fn drop(&mut self) {
		// Whoever is polled first takes the lock, the rest register again.
		let q = core::mem::take(&mut *self.inner.waiters.borrow_mut());
		q.into_iter().for_each(Waker::wake);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use futures::{executor::LocalPool, task::LocalSpawnExt};
	use std::rc::Rc;

	#[test]
	fn exclusive() {
		let m = LocalMutex::new(0);
		let g = m.try_lock().unwrap();
		assert!(m.try_lock().is_none());
		drop(g);
		assert!(m.try_lock().is_some());
	}

	#[test]
	fn held_across_await() {
		let mut pool = LocalPool::new();
		let spawner = pool.spawner();
		let m = Rc::new(LocalMutex::new(Vec::new()));
		let (tx, rx) = futures::channel::oneshot::channel::<()>();

		let m2 = m.clone();
		spawner
			.spawn_local(async move {
				let mut g = m2.lock().await;
				g.push(1);
				rx.await.unwrap();
				g.push(2);
			})
			.unwrap();
		for i in 3..5 {
			let m2 = m.clone();
			spawner
				.spawn_local(async move { m2.lock().await.push(i) })
				.unwrap();
		}
		pool.run_until_stalled();
		assert!(m.try_lock().is_none());
		tx.send(()).unwrap();
		pool.run_until_stalled();
		let v = m.try_lock().unwrap().clone();
		assert_eq!(&v[..2], &[1, 2]);
		assert_eq!(v.len(), 4);
	}
}
