use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ShakeError};
use crate::scheduler::job::{Job, JobParams};
use crate::scheduler::store::JobStore;
use crate::worker::launcher::{supervise, WorkerExit, WorkerLauncher};

const MESSAGE_CAPACITY: usize = 256;

/// Result of registering a job and starting its worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(u64),
    /// The job was recorded but its worker could not be started; the record
    /// is marked failed.
    SpawnFailed { id: u64, reason: String },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> u64 {
        match self {
            SubmitOutcome::Accepted(id) => *id,
            SubmitOutcome::SpawnFailed { id, .. } => *id,
        }
    }
}

/// Requests handled by the registry task
#[derive(Debug)]
pub enum RegistryMessage {
    Submit {
        params: JobParams,
        response_tx: oneshot::Sender<Result<SubmitOutcome>>,
    },
    List {
        response_tx: oneshot::Sender<Result<Vec<Job>>>,
    },
    Info {
        id: u64,
        response_tx: oneshot::Sender<Result<Option<Job>>>,
    },
    Complete {
        id: u64,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    Delete {
        id: u64,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    Reset {
        response_tx: oneshot::Sender<Result<()>>,
    },
    /// Mark a still-pending job as failed. With a `generation`, jobs
    /// created after a later reset are left alone.
    Expire {
        id: u64,
        reason: String,
        generation: Option<u64>,
        response_tx: oneshot::Sender<Result<bool>>,
    },
}

/// Handle to the job registry.
///
/// All operations are forwarded to a single [`RegistryActor`] task, which
/// runs them one at a time. That task is the only code touching the job
/// table file, so each load-modify-save cycle is isolated from every other.
///
/// The ID counter lives in memory. After a restart numbering resumes above
/// the highest ID still in the table, so an ID deleted from the top of the
/// table before the restart can be handed out again.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    message_tx: mpsc::Sender<RegistryMessage>,
}

impl JobRegistry {
    pub fn new(store: JobStore, launcher: WorkerLauncher) -> (Self, RegistryActor) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CAPACITY);

        let actor = RegistryActor {
            store,
            launcher,
            next_id: 1,
            generation: 0,
            workers: CancellationToken::new(),
            message_rx,
            self_tx: message_tx.downgrade(),
        };

        (Self { message_tx }, actor)
    }

    /// Create the registry and run its task on the current runtime.
    pub fn spawn(store: JobStore, launcher: WorkerLauncher) -> Self {
        let (registry, actor) = Self::new(store, launcher);
        tokio::spawn(actor.run());
        registry
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> RegistryMessage,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .send(message(response_tx))
            .await
            .map_err(|_| ShakeError::RegistryClosed)?;
        response_rx.await.map_err(|_| ShakeError::RegistryClosed)?
    }

    /// Register a job and start its worker.
    pub async fn submit(&self, params: JobParams) -> Result<SubmitOutcome> {
        self.request(|response_tx| RegistryMessage::Submit {
            params,
            response_tx,
        })
        .await
    }

    /// All jobs in table order
    pub async fn list(&self) -> Result<Vec<Job>> {
        self.request(|response_tx| RegistryMessage::List { response_tx })
            .await
    }

    pub async fn info(&self, id: u64) -> Result<Option<Job>> {
        self.request(|response_tx| RegistryMessage::Info { id, response_tx })
            .await
    }

    /// Mark a job completed. Returns false if no such job exists.
    pub async fn complete(&self, id: u64) -> Result<bool> {
        self.request(|response_tx| RegistryMessage::Complete { id, response_tx })
            .await
    }

    /// Remove a job. Returns false if no such job exists.
    pub async fn delete(&self, id: u64) -> Result<bool> {
        self.request(|response_tx| RegistryMessage::Delete { id, response_tx })
            .await
    }

    /// Drop every job and restart ID allocation at 1.
    pub async fn reset(&self) -> Result<()> {
        self.request(|response_tx| RegistryMessage::Reset { response_tx })
            .await
    }

    /// Mark a pending job failed. Returns false if the job is missing or no
    /// longer pending.
    pub async fn expire(&self, id: u64, reason: impl Into<String>) -> Result<bool> {
        let reason = reason.into();
        self.request(|response_tx| RegistryMessage::Expire {
            id,
            reason,
            generation: None,
            response_tx,
        })
        .await
    }
}

/// Owner of the job table. Runs until every [`JobRegistry`] handle is gone.
pub struct RegistryActor {
    store: JobStore,
    launcher: WorkerLauncher,
    /// Lower bound for the next ID; never moves backwards except on reset
    next_id: u64,
    /// Bumped on every reset; IDs are only unique within one generation
    generation: u64,
    /// Cancels the supervisors of every worker started in this generation
    workers: CancellationToken,
    message_rx: mpsc::Receiver<RegistryMessage>,
    self_tx: mpsc::WeakSender<RegistryMessage>,
}

impl RegistryActor {
    pub async fn run(mut self) {
        tracing::info!(path = %self.store.path().display(), "Job registry started");

        while let Some(msg) = self.message_rx.recv().await {
            match msg {
                RegistryMessage::Submit {
                    params,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.submit(params).await);
                }
                RegistryMessage::List { response_tx } => {
                    let _ = response_tx.send(self.store.load().await);
                }
                RegistryMessage::Info { id, response_tx } => {
                    let _ = response_tx.send(self.info(id).await);
                }
                RegistryMessage::Complete { id, response_tx } => {
                    let _ = response_tx.send(self.complete(id).await);
                }
                RegistryMessage::Delete { id, response_tx } => {
                    let _ = response_tx.send(self.delete(id).await);
                }
                RegistryMessage::Reset { response_tx } => {
                    let _ = response_tx.send(self.reset().await);
                }
                RegistryMessage::Expire {
                    id,
                    reason,
                    generation,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.expire(id, reason, generation).await);
                }
            }
        }

        tracing::info!("Job registry stopped");
    }

    async fn submit(&mut self, params: JobParams) -> Result<SubmitOutcome> {
        let mut jobs = self.store.load().await?;
        let max_id = jobs.iter().map(|j| j.id).max().unwrap_or(0);
        let id = self.next_id.max(max_id + 1);

        let job = Job::new(id, params);
        jobs.push(job.clone());
        self.store.save(&jobs).await?;
        self.next_id = id + 1;
        tracing::info!(job_id = id, magnitude = job.params.magnitude, "Job registered");

        match self.launcher.launch(&job) {
            Ok(child) => {
                self.watch(id, child);
                Ok(SubmitOutcome::Accepted(id))
            }
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "Failed to launch worker");
                let reason = e.to_string();
                if let Some(entry) = jobs.iter_mut().find(|j| j.id == id) {
                    entry.mark_failed(format!("worker could not be started: {}", reason));
                }
                self.store.save(&jobs).await?;
                Ok(SubmitOutcome::SpawnFailed { id, reason })
            }
        }
    }

    /// Reap the worker in the background and expire its job on timeout.
    fn watch(&self, id: u64, child: Child) {
        let timeout = self.launcher.timeout();
        let cancel = self.workers.clone();
        let generation = self.generation;
        let registry_tx = self.self_tx.clone();

        tokio::spawn(async move {
            let WorkerExit::TimedOut(limit) = supervise(id, child, timeout, cancel).await else {
                return;
            };
            // The registry may already be gone during shutdown
            let Some(tx) = registry_tx.upgrade() else {
                return;
            };
            let (response_tx, response_rx) = oneshot::channel();
            let message = RegistryMessage::Expire {
                id,
                reason: format!("worker timed out after {}s", limit.as_secs_f64()),
                generation: Some(generation),
                response_tx,
            };
            let sent = tx.send(message).await;
            drop(tx);
            if sent.is_err() {
                tracing::warn!(job_id = id, "Job registry closed before the timeout was recorded");
                return;
            }

            match response_rx.await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tracing::debug!(job_id = id, "Timed out job was no longer pending");
                }
                Ok(Err(e)) => {
                    tracing::error!(job_id = id, error = %e, "Failed to mark timed out job failed");
                }
                Err(_) => {
                    tracing::warn!(
                        job_id = id,
                        "Job registry closed before the timeout was recorded"
                    );
                }
            }
        });
    }

    async fn info(&self, id: u64) -> Result<Option<Job>> {
        let jobs = self.store.load().await?;
        Ok(jobs.into_iter().find(|j| j.id == id))
    }

    async fn complete(&mut self, id: u64) -> Result<bool> {
        let mut jobs = self.store.load().await?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            tracing::warn!(job_id = id, "Completion reported for unknown job");
            return Ok(false);
        };

        if job.mark_completed() {
            self.store.save(&jobs).await?;
            tracing::info!(job_id = id, "Job completed");
        } else {
            tracing::debug!(job_id = id, "Job already completed");
        }
        Ok(true)
    }

    async fn delete(&mut self, id: u64) -> Result<bool> {
        let mut jobs = self.store.load().await?;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Ok(false);
        }

        self.store.save(&jobs).await?;
        tracing::info!(job_id = id, "Job deleted");
        Ok(true)
    }

    async fn reset(&mut self) -> Result<()> {
        self.store.save(&[]).await?;
        self.next_id = 1;
        // Workers of the removed jobs must not report against reused IDs
        self.workers.cancel();
        self.workers = CancellationToken::new();
        self.generation += 1;
        tracing::info!("All jobs deleted");
        Ok(())
    }

    async fn expire(
        &mut self,
        id: u64,
        reason: String,
        generation: Option<u64>,
    ) -> Result<bool> {
        if generation.is_some_and(|g| g != self.generation) {
            tracing::debug!(job_id = id, "Ignoring expiry from before the last reset");
            return Ok(false);
        }
        let mut jobs = self.store.load().await?;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(false);
        };
        if !job.mark_failed(reason.as_str()) {
            return Ok(false);
        }

        self.store.save(&jobs).await?;
        tracing::warn!(job_id = id, reason = %reason, "Job marked failed");
        Ok(true)
    }
}
