use futures::task::{LocalSpawn, LocalSpawnExt};
use std::{future::Future, rc::Rc};
use tracing::warn;

/// Handle to the single-threaded executor every task of a session runs on.
#[derive(Clone)]
pub struct Reactor {
    spawner: Rc<dyn LocalSpawn>,
}

impl Reactor {
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        Self { spawner: Rc::new(spawner) }
    }

    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        if let Err(e) = self.spawner.spawn_local(task) {
            warn!("failed to spawn task: {}", e);
        }
    }

    /// Run `f` on a later turn of the executor, never from the caller's stack.
    pub fn next_tick(&self, f: impl FnOnce() + 'static) {
        self.spawn(async move { f() })
    }
}
