use std::{
    pin::Pin,
    sync::{Arc, Condvar, Mutex},
};

use tokio::sync::Semaphore;

type WorkerTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Background pool for extraction, decode preparation and disk I/O.
///
/// A multi-threaded tokio runtime lives on its own thread; submitted jobs wait for one of
/// `max_concurrent` permits and then run on the runtime's blocking pool.
pub struct WorkerPool {
    tokio: TokioHandle,
    semaphore: Arc<Semaphore>,
    outstanding: Arc<Outstanding>,
    _tokio_thread_handle: std::thread::JoinHandle<()>,
}
#[derive(Clone)]
struct TokioHandle(tokio::sync::mpsc::UnboundedSender<WorkerTask>);
impl TokioHandle {
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> bool {
        self.0.send(Box::pin(task)).is_ok()
    }
}

/// Count of jobs submitted but not yet finished.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    changed: Condvar,
}
impl Outstanding {
    fn increment(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("starling-worker")
            .enable_all()
            .build()
            .unwrap();
        let (tokio_tx, mut tokio_rx) = tokio::sync::mpsc::unbounded_channel::<WorkerTask>();

        let tokio_thread_handle = std::thread::spawn(move || {
            runtime.block_on(async {
                while let Some(task) = tokio_rx.recv().await {
                    tokio::spawn(task);
                }
            });
        });

        Self {
            tokio: TokioHandle(tokio_tx),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            outstanding: Arc::new(Outstanding::default()),
            _tokio_thread_handle: tokio_thread_handle,
        }
    }

    /// Queue a blocking job. Jobs start in no particular order once a permit is free.
    pub fn spawn_blocking(&self, job: impl FnOnce() + Send + 'static) {
        let semaphore = self.semaphore.clone();
        let outstanding = self.outstanding.clone();
        outstanding.increment();

        let submitted = self.tokio.spawn({
            let outstanding = outstanding.clone();
            async move {
                if let Ok(_permit) = semaphore.acquire_owned().await
                    && let Err(e) = tokio::task::spawn_blocking(job).await
                {
                    tracing::warn!("Worker job failed: {e}");
                }
                outstanding.decrement();
            }
        });
        if !submitted {
            tracing::warn!("Worker pool is shut down; dropping job");
            outstanding.decrement();
        }
    }

    /// Number of jobs queued or running.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock().unwrap()
    }

    /// Blocks until every submitted job has finished.
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock().unwrap();
        while *count > 0 {
            count = self.outstanding.changed.wait(count).unwrap();
        }
    }
}
