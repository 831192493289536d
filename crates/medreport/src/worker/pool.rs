use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::pipeline::{ItemTracker, Pipeline, StopSignal};
use crate::worker::job::{Job, WorkerMessage};

/// Bounded pool of async workers sharing one job queue. Each worker processes
/// one item at a time and reports to the controller over `WorkerMessage`s.
pub struct WorkerPool {
    job_sender: Option<UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stop: StopSignal,
}

impl WorkerPool {
    /// Spawns `worker_count` workers on the current runtime.
    pub fn start(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        messages: UnboundedSender<WorkerMessage>,
        stop: StopSignal,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }

        let (job_sender, job_receiver) = mpsc::unbounded_channel::<Job>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let jobs = Arc::clone(&job_receiver);
            let message_tx = messages.clone();
            let worker_stop = stop.clone();
            let worker_pipeline = Arc::clone(&pipeline);

            let handle = tokio::spawn(async move {
                run_worker(worker_id, jobs, message_tx, worker_stop, worker_pipeline).await;
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender: Some(job_sender),
            workers,
            stop,
        })
    }

    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        if self.stop.should_stop() {
            return Err(WorkerError::ChannelClosed);
        }

        match self.job_sender {
            Some(ref sender) => sender.send(job).map_err(|_| WorkerError::ChannelClosed),
            None => Err(WorkerError::ChannelClosed),
        }
    }

    /// No more jobs will be submitted; workers exit once the queue drains.
    pub fn close(&mut self) {
        self.job_sender = None;
    }

    /// Workers stop taking new items and stop in-flight items at the next stage boundary.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.stop.halt();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.should_stop()
    }

    pub async fn wait(mut self) {
        // Drop sender to signal workers to exit
        self.close();

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    jobs: Arc<Mutex<UnboundedReceiver<Job>>>,
    messages: UnboundedSender<WorkerMessage>,
    stop: StopSignal,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if stop.should_stop() {
            debug!("Worker {} received stop signal", worker_id);
            break;
        }

        let next = {
            let mut receiver = jobs.lock().await;
            receiver.recv().await
        };

        let Some(job) = next else {
            debug!("Worker {} job queue closed", worker_id);
            break;
        };

        // Items not started before a stop keep their pending status.
        if stop.should_stop() {
            debug!("Worker {} received stop signal", worker_id);
            break;
        }

        debug!("Worker {} processing patient {}", worker_id, job.patient_id());

        let mut tracker = ItemTracker::new(job.patient_id(), messages.clone());
        let outcome = pipeline.run_item(&job.patient, &mut tracker, &stop).await;

        let finished = WorkerMessage::Finished {
            patient_id: job.patient.id.clone(),
            outcome,
        };
        if messages.send(finished).is_err() {
            error!("Worker {} failed to report result: controller gone", worker_id);
            break;
        }

        // Let the controller settle the outcome (and halt) before the next job.
        tokio::task::yield_now().await;
    }

    debug!("Worker {} stopped", worker_id);
}
