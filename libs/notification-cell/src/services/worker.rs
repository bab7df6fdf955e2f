// libs/notification-cell/src/services/worker.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use scheduling_cell::store::AppointmentStore;

use crate::error::NotificationError;
use crate::models::{Channel, JobStatus, NotificationJob, WorkerConfig};
use crate::services::dispatch::ChannelDispatcher;
use crate::services::retry::{RetryEngine, RetryVerdict};
use crate::services::template;
use crate::store::{NotificationJobStore, RecipientDirectory};

/// Stateless delivery workers. Each worker polls one partition of the job
/// table, so any number of instances can run side by side without stepping
/// on each other's jobs.
pub struct NotificationWorkerService {
    worker_id: String,
    config: WorkerConfig,
    jobs: Arc<dyn NotificationJobStore>,
    directory: Arc<dyn RecipientDirectory>,
    appointments: Arc<dyn AppointmentStore>,
    dispatchers: HashMap<Channel, Arc<dyn ChannelDispatcher>>,
    retry: Arc<RetryEngine>,
    is_shutdown: Arc<tokio::sync::RwLock<bool>>,
}

impl NotificationWorkerService {
    pub fn new(
        config: WorkerConfig,
        jobs: Arc<dyn NotificationJobStore>,
        directory: Arc<dyn RecipientDirectory>,
        appointments: Arc<dyn AppointmentStore>,
        dispatchers: Vec<Arc<dyn ChannelDispatcher>>,
        retry: Arc<RetryEngine>,
    ) -> Self {
        let dispatchers = dispatchers
            .into_iter()
            .map(|dispatcher| (dispatcher.channel(), dispatcher))
            .collect();

        Self {
            worker_id: config.worker_id.clone(),
            config,
            jobs,
            directory,
            appointments,
            dispatchers,
            retry,
            is_shutdown: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), NotificationError> {
        info!(
            "Starting notification worker {} with {} partitions",
            self.worker_id, self.config.worker_count
        );

        let mut handles = Vec::new();

        // One loop per partition
        for partition in 0..self.config.worker_count {
            let worker_clone = self.clone_for_worker();
            let worker_name = format!("{}-{}", self.worker_id, partition);

            let handle =
                tokio::spawn(async move { worker_clone.worker_loop(worker_name, partition).await });

            handles.push(handle);
        }

        // Health check process
        let health_worker = self.clone_for_worker();
        let health_handle = tokio::spawn(async move { health_worker.health_check_loop().await });
        handles.push(health_handle);

        // Wait for shutdown signal or worker completion
        let shutdown_signal = self.wait_for_shutdown();

        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received, stopping worker {}", self.worker_id);
            }
            _ = futures::future::try_join_all(handles) => {
                warn!("All worker processes completed unexpectedly");
            }
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), NotificationError> {
        info!("Initiating graceful shutdown for worker {}", self.worker_id);

        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
        drop(is_shutdown);

        // Let in-flight jobs settle
        let shutdown_timeout = Duration::from_secs(self.config.graceful_shutdown_timeout_seconds);
        tokio::time::sleep(shutdown_timeout).await;

        info!("Worker {} shutdown complete", self.worker_id);
        Ok(())
    }

    async fn worker_loop(
        &self,
        worker_name: String,
        partition: u32,
    ) -> Result<(), NotificationError> {
        debug!("Worker loop started: {} (partition {})", worker_name, partition);

        loop {
            if *self.is_shutdown.read().await {
                debug!("Worker {} received shutdown signal", worker_name);
                break;
            }

            match self
                .jobs
                .claim_due(
                    Utc::now(),
                    partition,
                    self.config.worker_count,
                    self.config.batch_size,
                )
                .await
            {
                Ok(batch) if batch.is_empty() => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Ok(batch) => {
                    for job in batch {
                        if let Err(e) = self.process_job(job, &worker_name).await {
                            error!("Worker {} failed to process job: {}", worker_name, e);
                        }
                    }
                }
                Err(e) => {
                    error!("Worker {} failed to claim jobs: {}", worker_name, e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }

        debug!("Worker loop ended: {}", worker_name);
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, channel = %job.channel))]
    async fn process_job(
        &self,
        job: NotificationJob,
        worker_name: &str,
    ) -> Result<(), NotificationError> {
        // The claim is advisory; re-read so a job skipped between claim and
        // processing is left alone.
        let job = match self.jobs.get(job.id).await? {
            Some(current) if current.status == JobStatus::Pending => current,
            Some(current) => {
                debug!("Job already {} when picked up, nothing to do", current.status);
                return Ok(());
            }
            None => return Ok(()),
        };

        info!("Processing {} job with worker {}", job.template_kind, worker_name);

        let dispatcher = match self.dispatchers.get(&job.channel) {
            Some(dispatcher) => Arc::clone(dispatcher),
            None => {
                let error = NotificationError::UnknownChannel(job.channel.to_string());
                warn!("{}", error);
                self.jobs
                    .mark(job.id, JobStatus::Failed, job.attempts, Some(error.to_string()))
                    .await?;
                return Ok(());
            }
        };

        let appointment = match self
            .appointments
            .get(job.organization_id, job.appointment_id)
            .await
        {
            Ok(Some(appointment)) => appointment,
            Ok(None) => {
                self.jobs
                    .mark(
                        job.id,
                        JobStatus::Failed,
                        job.attempts,
                        Some("appointment no longer exists".to_string()),
                    )
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(NotificationError::Storage(e.to_string())),
        };

        // A reminder that fires after the appointment was cancelled or
        // already held must not go out.
        if job.template_kind.is_reminder() && appointment.status.is_terminal() {
            info!(
                "Appointment is {} at dispatch time, skipping reminder",
                appointment.status
            );
            self.jobs
                .mark(
                    job.id,
                    JobStatus::Skipped,
                    job.attempts,
                    Some(format!("appointment {} at dispatch time", appointment.status)),
                )
                .await?;
            return Ok(());
        }

        let contact = match self
            .directory
            .contact(job.organization_id, job.patient_id)
            .await?
        {
            Some(contact) => contact,
            None => {
                self.jobs
                    .mark(
                        job.id,
                        JobStatus::Failed,
                        job.attempts,
                        Some("no contact on file for patient".to_string()),
                    )
                    .await?;
                return Ok(());
            }
        };

        let message = template::render(&appointment, &contact, job.template_kind);

        match self
            .retry
            .execute(self.jobs.as_ref(), dispatcher.as_ref(), &job, &message)
            .await?
        {
            RetryVerdict::Delivered { attempts, .. } => {
                self.jobs
                    .mark(job.id, JobStatus::Sent, attempts, None)
                    .await?;
                info!("Job delivered after {} attempt(s)", attempts);
            }
            RetryVerdict::Failed { attempts, detail } => {
                self.jobs
                    .mark(job.id, JobStatus::Failed, attempts, Some(detail.clone()))
                    .await?;
                warn!("Job failed after {} attempt(s): {}", attempts, detail);
            }
            RetryVerdict::Superseded => {
                debug!("Job was skipped mid-delivery, leaving as-is");
            }
        }

        Ok(())
    }

    async fn health_check_loop(&self) -> Result<(), NotificationError> {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.health_check_interval_seconds,
        ));

        loop {
            interval.tick().await;

            if *self.is_shutdown.read().await {
                break;
            }

            match self.jobs.stats().await {
                Ok(stats) => {
                    debug!(
                        "Queue stats: pending={}, sent={}, failed={}, skipped={}",
                        stats.pending, stats.sent, stats.failed, stats.skipped
                    );
                }
                Err(e) => warn!("Failed to read queue stats: {}", e),
            }
        }

        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        loop {
            if *self.is_shutdown.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn clone_for_worker(&self) -> Self {
        Self {
            worker_id: self.worker_id.clone(),
            config: self.config.clone(),
            jobs: Arc::clone(&self.jobs),
            directory: Arc::clone(&self.directory),
            appointments: Arc::clone(&self.appointments),
            dispatchers: self.dispatchers.clone(),
            retry: Arc::clone(&self.retry),
            // Shared on purpose: shutdown() must reach every spawned loop.
            is_shutdown: Arc::clone(&self.is_shutdown),
        }
    }
}
