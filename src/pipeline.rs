//! Worker pool that drives jobs through the shrink client.
//!
//! A fixed number of workers pull job ids from one shared FIFO queue. Each
//! worker downloads the compressed result into a private temp file and only
//! touches the destination with a final rename (or a staged copy), so a failed
//! job never leaves a damaged original or a partial output behind.
//!
//! Job state lives in a single table behind a lock. Workers edit a private copy
//! of the job they own and commit it back whole; readers and the update stream
//! only ever receive copies.

use crate::client::{cancellable, ShrinkClient, Shrinker};
use crate::constants::{
    DEFAULT_WORKERS, MAX_PENDING_JOBS, MAX_WORKERS, MIN_WORKERS, TEMP_FILE_PREFIX,
    UPDATE_CHANNEL_CAPACITY,
};
use crate::error::Result;
use crate::gate::PauseGate;
use crate::job::{Job, JobId, JobStatus};
use crate::output::{generate_output_path, place_file, OutputPolicy, Placement};
use crate::utils::normalize_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of an [`Pipeline::add_files`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: Vec<JobId>,
    /// Paths skipped because a job for them is still pending or processing.
    pub duplicates: Vec<PathBuf>,
    /// Paths refused because the pipeline is stopped or the in-flight ceiling was reached.
    pub rejected: Vec<PathBuf>,
}

/// Aggregate view over all jobs of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Original bytes of the jobs that finished.
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub bytes_saved: i64,
}

impl RunSummary {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut summary = RunSummary::default();
        for job in jobs {
            summary.total += 1;
            match job.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Processing => summary.processing += 1,
                JobStatus::Done => {
                    summary.done += 1;
                    summary.bytes_before += job.original_size;
                    summary.bytes_after += job.compressed_size;
                    summary.bytes_saved += job.saved_bytes;
                }
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn saved_percent(&self) -> f64 {
        if self.bytes_before == 0 {
            return 0.0;
        }
        self.bytes_saved as f64 / self.bytes_before as f64 * 100.0
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}

#[derive(Default)]
struct JobTable {
    jobs: Vec<Job>,
    /// Latest job id per path.
    by_path: HashMap<PathBuf, JobId>,
    in_flight: usize,
}

impl JobTable {
    fn has_in_flight(&self, path: &Path) -> bool {
        self.by_path
            .get(path)
            .map(|&id| !self.jobs[id].is_terminal())
            .unwrap_or(false)
    }
}

enum RunState {
    Idle,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

struct Shared {
    shrinker: Arc<dyn Shrinker>,
    table: RwLock<JobTable>,
    queue_tx: async_channel::Sender<JobId>,
    queue_rx: async_channel::Receiver<JobId>,
    policy: RwLock<OutputPolicy>,
    staging_dir: Option<PathBuf>,
    gate: PauseGate,
    cancel: CancellationToken,
    updates: RwLock<Option<broadcast::Sender<Job>>>,
    settled: Notify,
}

/// Completed placement of one job's result.
struct Completed {
    original_size: u64,
    compressed_size: u64,
    destination: PathBuf,
}

pub struct Pipeline {
    shared: Arc<Shared>,
    worker_count: AtomicUsize,
    /// Ceiling on pending plus processing jobs.
    job_limit: usize,
    state: Mutex<RunState>,
}

impl Pipeline {
    pub fn new(shrinker: Arc<dyn Shrinker>, policy: OutputPolicy) -> Self {
        let (queue_tx, queue_rx) = async_channel::unbounded();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                shrinker,
                table: RwLock::new(JobTable::default()),
                queue_tx,
                queue_rx,
                policy: RwLock::new(policy),
                staging_dir: None,
                gate: PauseGate::new(),
                cancel: CancellationToken::new(),
                updates: RwLock::new(Some(updates)),
                settled: Notify::new(),
            }),
            worker_count: AtomicUsize::new(DEFAULT_WORKERS),
            job_limit: MAX_PENDING_JOBS,
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Pipeline backed by the real shrink API.
    pub fn with_api_key(api_key: impl Into<String>, policy: OutputPolicy) -> Result<Self> {
        let client = ShrinkClient::new(api_key)?;
        Ok(Self::new(Arc::new(client), policy))
    }

    /// Stage downloads in `dir` instead of the system temp directory.
    ///
    /// Must be called before [`Pipeline::start`].
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.staging_dir = Some(dir.into());
        } else {
            warn!("Staging directory ignored: pipeline already shared with workers");
        }
        self
    }

    /// Refuse new paths once `limit` jobs are pending or processing.
    pub fn with_job_limit(mut self, limit: usize) -> Self {
        self.job_limit = limit;
        self
    }

    /// Sets the number of workers the next [`Pipeline::start`] launches,
    /// clamped to 1..=4. Returns the value actually used.
    pub fn configure(&self, concurrency: usize) -> usize {
        let clamped = concurrency.clamp(MIN_WORKERS, MAX_WORKERS);
        if clamped != concurrency {
            debug!(requested = concurrency, clamped, "Clamped worker count");
        }
        self.worker_count.store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Relaxed)
    }

    /// Applies to jobs that start processing after the call.
    pub fn set_output_policy(&self, policy: OutputPolicy) {
        *write(&self.shared.policy) = policy;
    }

    pub fn output_policy(&self) -> OutputPolicy {
        read(&self.shared.policy).clone()
    }

    /// Launches the worker loops. Must be called from within a tokio runtime.
    ///
    /// Calling it again while running, or after [`Pipeline::stop`], does nothing.
    pub fn start(&self) {
        let mut state = guard(&self.state);
        match &*state {
            RunState::Running(_) => {
                warn!("Pipeline already started");
                return;
            }
            RunState::Stopped => {
                warn!("Pipeline was stopped and cannot be restarted");
                return;
            }
            RunState::Idle => {}
        }

        let count = self.worker_count();
        let handles = (0..count)
            .map(|worker_id| {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.run_worker(worker_id).await })
            })
            .collect();
        info!(workers = count, "Pipeline started");
        *state = RunState::Running(handles);
    }

    /// Cancels everything, waits for every worker to exit, marks jobs that
    /// never started as cancelled, then closes the update stream.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();

        let handles = match std::mem::replace(&mut *guard(&self.state), RunState::Stopped) {
            RunState::Running(handles) => handles,
            RunState::Idle | RunState::Stopped => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker ended abnormally");
            }
        }

        let cancelled = self.shared.cancel_pending();
        if cancelled > 0 {
            info!(cancelled, "Cancelled jobs that never started");
        }
        self.shared.queue_rx.close();
        write(&self.shared.updates).take();
        self.shared.settled.notify_waiters();
        info!("Pipeline stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Creates a pending job per path and queues it. Never blocks.
    ///
    /// Paths are normalized first (see [`normalize_path`]), so two spellings
    /// of the same file share one job.
    pub fn add_files<I, P>(&self, paths: I) -> AddOutcome
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut outcome = AddOutcome::default();
        if self.is_stopped() {
            outcome.rejected = paths.into_iter().map(Into::into).collect();
            return outcome;
        }

        // Filesystem calls happen before the table lock is taken.
        let candidates: Vec<(PathBuf, u64)> = paths
            .into_iter()
            .map(|path| {
                let path = normalize_path(&path.into());
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                (path, size)
            })
            .collect();

        let mut table = write(&self.shared.table);
        for (path, original_size) in candidates {
            if self.is_stopped() {
                outcome.rejected.push(path);
                continue;
            }
            if table.has_in_flight(&path) {
                debug!(path = %path.display(), "Skipping path with a job in flight");
                outcome.duplicates.push(path);
                continue;
            }
            if table.in_flight >= self.job_limit {
                warn!(
                    path = %path.display(),
                    limit = self.job_limit,
                    "Job limit reached, rejecting path"
                );
                outcome.rejected.push(path);
                continue;
            }

            let id = table.jobs.len();
            let job = Job::new(id, path.clone(), original_size);

            if self.shared.queue_tx.try_send(id).is_err() {
                outcome.rejected.push(path);
                continue;
            }
            table.jobs.push(job.clone());
            table.by_path.insert(path, id);
            table.in_flight += 1;
            outcome.added.push(id);
            self.shared.publish(job);
        }

        outcome
    }

    /// Marks every job that has not started yet as cancelled.
    pub fn cancel_pending(&self) -> usize {
        self.shared.cancel_pending()
    }

    pub fn pause(&self) {
        self.shared.gate.pause();
        info!("Pipeline paused");
    }

    pub fn resume(&self) {
        self.shared.gate.resume();
        info!("Pipeline resumed");
    }

    /// Returns whether the pipeline is paused after the toggle.
    pub fn toggle_pause(&self) -> bool {
        self.shared.gate.toggle()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    /// Snapshot of every job, in submission order.
    pub fn jobs(&self) -> Vec<Job> {
        read(&self.shared.table).jobs.clone()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        read(&self.shared.table).jobs.get(id).cloned()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_jobs(read(&self.shared.table).jobs.iter())
    }

    /// New receiver for job updates.
    ///
    /// The stream is lossy: a receiver that falls behind skips the oldest
    /// updates rather than slowing the workers down. [`Pipeline::jobs`] is the
    /// source of truth. After [`Pipeline::stop`] the receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        match &*read(&self.shared.updates) {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Waits until no job is pending or processing, or the pipeline stops.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.shared.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.is_stopped() || read(&self.shared.table).in_flight == 0 {
                return;
            }
            settled.await;
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn publish(&self, job: Job) {
        if let Some(tx) = &*read(&self.updates) {
            // No receivers is fine; the job table still has the state.
            let _ = tx.send(job);
        }
    }

    /// Writes back a job a worker finished with.
    fn commit(&self, job: Job) {
        {
            let mut table = write(&self.table);
            if job.is_terminal() && !table.jobs[job.id].is_terminal() {
                table.in_flight -= 1;
            }
            table.jobs[job.id] = job.clone();
        }
        if job.is_terminal() {
            self.settled.notify_waiters();
        }
        self.publish(job);
    }

    /// Claims a queued job for processing. `None` if it was cancelled meanwhile.
    fn claim(&self, id: JobId) -> Option<Job> {
        let mut table = write(&self.table);
        let job = table.jobs.get_mut(id)?;
        if !job.transition(JobStatus::Processing) {
            debug!(job = id, status = %job.status, "Skipping job that is no longer pending");
            return None;
        }
        let job = job.clone();
        drop(table);
        self.publish(job.clone());
        Some(job)
    }

    fn cancel_pending(&self) -> usize {
        let cancelled: Vec<Job> = {
            let mut table = write(&self.table);
            let cancelled: Vec<Job> = table
                .jobs
                .iter_mut()
                .filter_map(|job| job.transition(JobStatus::Cancelled).then(|| job.clone()))
                .collect();
            table.in_flight -= cancelled.len();
            cancelled
        };

        let count = cancelled.len();
        for job in cancelled {
            self.publish(job);
        }
        if count > 0 {
            self.settled.notify_waiters();
        }
        count
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Worker started");
        loop {
            if self.gate.wait_while_paused(&self.cancel).await.is_err() {
                break;
            }

            let id = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.queue_rx.recv() => match next {
                    Ok(id) => id,
                    Err(_) => break,
                },
            };

            // A pause that lands while this worker waited on the queue still
            // holds the job back.
            if self.gate.wait_while_paused(&self.cancel).await.is_err() {
                break;
            }

            let Some(job) = self.claim(id) else {
                continue;
            };
            self.process(job).await;
        }
        debug!(worker_id, "Worker exiting");
    }

    async fn process(&self, mut job: Job) {
        debug!(job = job.id, path = %job.path.display(), "Processing");

        match self.compress_job(&job).await {
            Ok(done) => {
                job.record_success(done.original_size, done.compressed_size, done.destination);
                info!(
                    job = job.id,
                    path = %job.path.display(),
                    saved_bytes = job.saved_bytes,
                    saved_percent = format!("{:.1}", job.saved_percent),
                    "Compressed"
                );
            }
            Err(err) => {
                if err.is_cancelled() {
                    debug!(job = job.id, "Job interrupted by shutdown");
                } else {
                    warn!(job = job.id, path = %job.path.display(), error = %err, "Job failed");
                }
                job.record_failure(&err);
            }
        }

        self.commit(job);
    }

    fn staging_file(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_FILE_PREFIX).suffix(".tmp");
        match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    async fn compress_job(&self, job: &Job) -> Result<Completed> {
        let mut source = tokio::fs::File::open(&job.path).await?;

        // The temp path removes its file on drop unless it is kept below.
        let (staged_file, staged_path) = self.staging_file()?.into_parts();

        let display_name = job
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut compressed = self
            .shrinker
            .compress(&self.cancel, &mut source, &display_name)
            .await?;
        drop(source);

        let mut writer = tokio::fs::File::from_std(staged_file);
        cancellable(&self.cancel, tokio::io::copy(&mut compressed.body, &mut writer)).await??;
        writer.flush().await?;
        writer.sync_all().await?;
        drop(writer);
        drop(compressed.body);

        let policy = read(&self.policy).clone();
        let destination = generate_output_path(&job.path, &policy)?;

        if let Ok(metadata) = tokio::fs::metadata(&job.path).await {
            let _ = tokio::fs::set_permissions(&staged_path, metadata.permissions()).await;
        }

        match place_file(&staged_path, &destination).await? {
            Placement::Renamed => {
                // Nothing left to clean up.
                let _ = staged_path.keep();
            }
            Placement::Copied => drop(staged_path),
        }

        Ok(Completed {
            original_size: compressed.original_size,
            compressed_size: compressed.compressed_size,
            destination,
        })
    }
}
