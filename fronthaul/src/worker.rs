//! Codec Worker Pool
//! 
//! Dedicated threads that encode planned jobs. Each worker owns one bounded queue,
//! and a channel is always served by the same worker so its packets keep their
//! order. Workers poll their queue without blocking and observe the stop flag on
//! every pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};

use crate::scheduler::{JobExecutor, TxJob};
use crate::FronthaulError;

pub struct WorkerPool {
    queues: Vec<mpsc::Sender<TxJob>>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Start `count` workers sharing one executor
    pub fn spawn(
        count: usize,
        queue_capacity: usize,
        executor: Arc<JobExecutor>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, FronthaulError> {
        let mut queues = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let (tx, mut rx) = mpsc::channel::<TxJob>(queue_capacity.max(1));
            let executor = executor.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("fh-worker-{}", id))
                .spawn(move || {
                    debug!("Codec worker {} started", id);
                    while !stop.load(Ordering::Acquire) {
                        match rx.try_recv() {
                            Ok(job) => executor.dispatch(&job),
                            Err(TryRecvError::Empty) => std::hint::spin_loop(),
                            Err(TryRecvError::Disconnected) => break,
                        }
                    }
                    debug!("Codec worker {} stopped", id);
                })
                .map_err(|e| FronthaulError::InvalidState(format!("failed to spawn worker {}: {}", id, e)))?;
            queues.push(tx);
            handles.push(handle);
        }
        info!("Started {} codec workers", count);
        Ok(Self { queues, handles, stop })
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Hand a job to the worker owning its channel
    pub fn submit(&self, job: TxJob) -> Result<(), FronthaulError> {
        if self.queues.is_empty() {
            return Err(FronthaulError::NotInitialized);
        }
        let queue = &self.queues[job.channel % self.queues.len()];
        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(FronthaulError::CapacityExceeded("worker queue")),
            Err(TrySendError::Closed(_)) => Err(FronthaulError::InvalidState("worker stopped".into())),
        }
    }

    /// Raise the stop flag and join every worker
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        self.queues.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Codec worker panicked");
            }
        }
    }
}
