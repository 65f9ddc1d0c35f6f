//! A handle for running work on the thread that owns the rendering context.
//!
//! Bitmaps handed to the renderer are materialized on that thread. Callers on other threads
//! go through [`UiHandle::invoke`], which blocks until the work has run there.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::ThreadId,
};

type UiTask = Box<dyn FnOnce() + Send>;

/// Cloneable handle to the UI-bound thread.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiTask>,
    thread_id: ThreadId,
}
impl UiHandle {
    /// Creates a handle for the calling thread. The caller must pump the returned queue
    /// (typically once per frame) for work sent from other threads to make progress.
    pub fn for_current_thread() -> (Self, UiQueue) {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = Self {
            tx,
            thread_id: std::thread::current().id(),
        };
        (handle, UiQueue(rx))
    }

    pub fn is_ui_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Runs `f` on the UI thread and waits for its result. Runs inline when already there.
    ///
    /// Returns `None` only if the UI thread has gone away.
    pub fn invoke<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> Option<R> {
        if self.is_ui_thread() {
            return Some(f());
        }

        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        let task: UiTask = Box::new(move || {
            let _ = reply_tx.send(f());
        });
        if self.tx.send(task).is_err() {
            tracing::warn!("UI thread is gone; dropping work");
            return None;
        }
        reply_rx.recv().ok()
    }
}

/// Work queued for a [`UiHandle::for_current_thread`] thread.
pub struct UiQueue(Receiver<UiTask>);
impl UiQueue {
    /// Runs everything queued so far without blocking. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            match self.0.try_recv() {
                Ok(task) => {
                    task();
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return count,
            }
        }
    }

    /// Runs tasks until every [`UiHandle`] has been dropped.
    pub fn run(self) {
        for task in self.0 {
            task();
        }
    }
}

/// A dedicated UI-bound thread, for hosts that don't have one of their own (tools, tests).
pub struct UiThread {
    handle: UiHandle,
    _thread_handle: std::thread::JoinHandle<()>,
}
impl UiThread {
    pub fn spawn() -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread_handle = std::thread::Builder::new()
            .name("starling-ui".to_string())
            .spawn(move || {
                let (handle, queue) = UiHandle::for_current_thread();
                let _ = ready_tx.send(handle);
                queue.run();
            })
            .expect("failed to spawn UI thread");
        let handle = ready_rx.recv().expect("UI thread exited during startup");

        Self {
            handle,
            _thread_handle: thread_handle,
        }
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }
}
