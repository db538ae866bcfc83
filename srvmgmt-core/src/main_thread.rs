//! Hand-off of work from the I/O workers to the host's single main (simulation) thread.
//!
//! Some management methods mutate state that the host only ever touches from its main loop.  A
//! connection handling such a method submits a task through a [`MainThreadHandle`] and waits for
//! its completion before replying; the host drains the matching [`MainThreadQueue`] from its main
//! loop.  The queue is unbounded so submission never blocks, and each task carries a one-shot
//! channel for its result.
//!
//! The main thread must never wait on the network layer.  A task that blocks on a connection
//! while that connection is waiting for the task deadlocks both.  [`MainThreadHandle::submit`]
//! debug-asserts that it is not called from the main thread.
use std::cell::Cell;
use std::panic::AssertUnwindSafe;

use tokio::sync::{mpsc, oneshot};

use crate::{HandOffError, panic_message};

type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_MAIN_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Create the two halves of the main thread hand-off.
pub fn main_thread() -> (MainThreadHandle, MainThreadQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainThreadHandle { tasks: tx }, MainThreadQueue { tasks: rx })
}

/// True when called from inside a task (or queue drain) on the main thread.
pub fn is_main_thread() -> bool {
    ON_MAIN_THREAD.with(|flag| flag.get())
}

/// Cheaply-clonable submitter of tasks to the main thread.
#[derive(Clone, Debug)]
pub struct MainThreadHandle {
    tasks: mpsc::UnboundedSender<Task>,
}

impl MainThreadHandle {
    /// Run `task` on the main thread and wait for its result.
    ///
    /// Fails with [`HandOffError::Stopped`] if the queue has been dropped, and with
    /// [`HandOffError::Abandoned`] if the task was dropped without running to completion (which
    /// is what happens when it panics).
    pub async fn submit<F, T>(&self, task: F) -> Result<T, HandOffError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        debug_assert!(
            !is_main_thread(),
            "BUG: main thread waiting on its own task queue; this deadlocks"
        );

        let (result_tx, result_rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            // The submitter may have given up waiting; nobody to tell in that case
            let _ = result_tx.send(task());
        });

        self.tasks.send(task).map_err(|_| HandOffError::Stopped)?;

        result_rx.await.map_err(|_| HandOffError::Abandoned)
    }

    /// True once the queue side has been dropped; submissions will fail.
    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }
}

/// The receiving end of the hand-off, owned by the host's main loop.
pub struct MainThreadQueue {
    tasks: mpsc::UnboundedReceiver<Task>,
}

impl MainThreadQueue {
    /// Run every task that is queued right now and return how many ran.
    ///
    /// Meant to be called once per iteration of the host's simulation loop.  Never blocks.
    pub fn run_pending(&mut self) -> usize {
        let _guard = MainThreadGuard::enter();

        let mut count = 0;
        while let Ok(task) = self.tasks.try_recv() {
            run_task(task);
            count += 1;
        }
        count
    }

    /// Run tasks as they arrive until every [`MainThreadHandle`] has been dropped.
    ///
    /// Blocks the calling thread, so this is for hosts (and tests) that dedicate a plain OS thread
    /// to the main loop.  Panics if called from inside an async runtime.
    pub fn run(mut self) {
        let _guard = MainThreadGuard::enter();

        while let Some(task) = self.tasks.blocking_recv() {
            run_task(task);
        }

        tracing::debug!("All main thread handles dropped; main thread queue exiting");
    }
}

fn run_task(task: Task) {
    // A panicking task must not take the host's main loop down with it.  Its result sender is
    // dropped during unwinding so the submitter sees `Abandoned`.
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(panic = %panic_message(panic.as_ref()), "Main thread task panicked");
    }
}

struct MainThreadGuard {
    was_main_thread: bool,
}

impl MainThreadGuard {
    fn enter() -> Self {
        let was_main_thread = ON_MAIN_THREAD.with(|flag| flag.replace(true));
        Self { was_main_thread }
    }
}

impl Drop for MainThreadGuard {
    fn drop(&mut self) {
        ON_MAIN_THREAD.with(|flag| flag.set(self.was_main_thread));
    }
}
