use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use batchwave_core::config::RunnerSettings;
use batchwave_core::paths::validate_run_name;
use batchwave_core::{
    BatchError, CheckpointStore, Progress, ResultRecord, ResultStatus, RunSummary, WorkItem,
};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;

use crate::outcome::InvocationOutcome;
use crate::{AgentError, Result};

// ─── Seams ────────────────────────────────────────────────────────────────

/// The external compute step: take a prompt, produce an outcome.
///
/// Implementations must never panic on a failed invocation; every failure
/// is an [`InvocationOutcome`]. Deadlines are enforced by the runner, which
/// drops the returned future when it expires.
pub trait Invoker: Send + Sync + 'static {
    fn invoke(
        &self,
        prompt: String,
        cwd: PathBuf,
    ) -> impl Future<Output = InvocationOutcome> + Send;
}

/// What a batch does: where its items come from, how each becomes a prompt,
/// and how an outcome becomes a result.
pub trait BatchJob: Send + Sync + 'static {
    fn scan(&self, cwd: &Path) -> batchwave_core::Result<Vec<WorkItem>>;

    fn build_prompt(&self, item: &WorkItem) -> String;

    fn handle_result(&self, item: &WorkItem, outcome: InvocationOutcome) -> ResultRecord;

    /// Record `item` without invoking anything. Checked just before the item
    /// would start.
    fn skip(&self, _item: &WorkItem) -> Option<ResultRecord> {
        None
    }
}

// ─── RunnerConfig / RunOptions ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum invocations in flight at once.
    pub concurrency: usize,
    /// Hard per-item deadline.
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig::from(&RunnerSettings::default())
    }
}

impl From<&RunnerSettings> for RunnerConfig {
    fn from(settings: &RunnerSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            timeout: settings.timeout(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Continue an interrupted checkpoint instead of scanning afresh.
    pub resume: bool,
    /// Working directory for `scan` and for every invocation.
    pub cwd: PathBuf,
}

// ─── BatchRunner ──────────────────────────────────────────────────────────

/// Executes a [`BatchJob`] against an [`Invoker`] with bounded concurrency and
/// a checkpoint written after every finished item.
///
/// ```text
/// feeder task ── acquire permit (list order) ── spawn worker ─┐
///                                                             │ (item result)
/// controller  ◄──────────── mpsc ◄────────────────────────────┘
///     │ Progress::record + save_progress, one at a time
///     ▼
/// summary written, then checkpoint cleared
/// ```
pub struct BatchRunner<J, I> {
    name: String,
    job: Arc<J>,
    invoker: Arc<I>,
    store: CheckpointStore,
    config: RunnerConfig,
}

impl<J: BatchJob, I: Invoker> BatchRunner<J, I> {
    pub fn new(
        name: impl Into<String>,
        job: J,
        invoker: I,
        store: CheckpointStore,
        config: RunnerConfig,
    ) -> Result<Self> {
        Self::with_shared(name, Arc::new(job), Arc::new(invoker), store, config)
    }

    /// Like [`BatchRunner::new`] for a job or invoker that is shared with
    /// other runners.
    pub fn with_shared(
        name: impl Into<String>,
        job: Arc<J>,
        invoker: Arc<I>,
        store: CheckpointStore,
        config: RunnerConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate_run_name(&name)?;
        if config.concurrency == 0 {
            return Err(BatchError::InvalidConfig("concurrency must be at least 1".into()).into());
        }
        if config.timeout.is_zero() {
            return Err(BatchError::InvalidConfig("timeout must be non-zero".into()).into());
        }
        Ok(Self {
            name,
            job,
            invoker,
            store,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the batch to completion and return its summary.
    ///
    /// Per-item failures are recorded and never abort the run. Errors are
    /// reserved for lock conflicts, a failed scan, and checkpoint writes that
    /// do not reach disk; in the last case the previous checkpoint is intact
    /// and the run can be resumed.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let _lock = self.store.acquire_lock(&self.name)?;

        let mut progress = self.open_progress(&options)?;
        self.persist(&progress).await?;

        let remaining = progress.remaining();
        tracing::info!(
            run = %self.name,
            total = progress.items.len(),
            remaining = remaining.len(),
            concurrency = self.config.concurrency,
            "starting batch"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ResultRecord>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let feeder = tokio::spawn(feed(
            remaining,
            Arc::clone(&self.job),
            Arc::clone(&self.invoker),
            Arc::new(Semaphore::new(self.config.concurrency)),
            self.config.timeout,
            options.cwd.clone(),
            tx,
            stop_rx,
        ));

        let recorded = self.record_results(&mut progress, &mut rx).await;
        if recorded.is_err() {
            // No invocation may outlive a failed run: the feeder tears its
            // workers down before the lock is released.
            let _ = stop_tx.send(());
        }
        let fed = feeder.await;
        recorded?;
        fed.map_err(|e| AgentError::Join(e.to_string()))?;

        if !progress.is_complete() {
            let missing = progress.items.len() - progress.completed.len();
            return Err(AgentError::Process(format!(
                "run '{}' ended with {missing} item(s) unrecorded; resume to retry them",
                self.name
            )));
        }

        let summary = progress.summarize();
        let store = self.store.clone();
        let finished = summary.clone();
        blocking(move || store.finish(&finished)).await?;
        tracing::info!(run = %self.name, "{}", summary.headline());
        Ok(summary)
    }

    /// Single writer: records land in completion order and each one is on
    /// disk before the next is taken.
    async fn record_results(
        &self,
        progress: &mut Progress,
        rx: &mut mpsc::UnboundedReceiver<ResultRecord>,
    ) -> Result<()> {
        while let Some(record) = rx.recv().await {
            progress.record(record)?;
            self.persist(progress).await?;
            tracing::debug!(
                run = %self.name,
                done = progress.completed.len(),
                total = progress.items.len(),
                "checkpoint saved"
            );
        }
        Ok(())
    }

    async fn persist(&self, progress: &Progress) -> Result<()> {
        let store = self.store.clone();
        let snapshot = progress.clone();
        blocking(move || store.save_progress(&snapshot)).await
    }

    fn open_progress(&self, options: &RunOptions) -> Result<Progress> {
        let existing = self.store.load_progress(&self.name)?;

        if options.resume {
            let mut progress =
                existing.ok_or_else(|| BatchError::NoCheckpoint(self.name.clone()))?;
            progress.resume()?;
            tracing::info!(
                run = %self.name,
                completed = progress.completed.len(),
                total = progress.items.len(),
                "resuming from checkpoint"
            );
            return Ok(progress);
        }

        if let Some(old) = existing {
            tracing::warn!(
                run = %self.name,
                completed = old.completed.len(),
                total = old.items.len(),
                "discarding existing checkpoint; pass resume to continue it instead"
            );
        }

        let items = self.job.scan(&options.cwd)?;
        Ok(Progress::start(self.name.clone(), items)?)
    }
}

// ─── Internal ─────────────────────────────────────────────────────────────

/// Start items in list order, each once a permit is free. The permit moves
/// into the worker and is released when its result has been handed off.
///
/// Returns only once every worker has finished, or, after `stop` fires, once
/// every worker has been aborted and dropped (which kills its child process).
#[allow(clippy::too_many_arguments)]
async fn feed<J: BatchJob, I: Invoker>(
    items: Vec<WorkItem>,
    job: Arc<J>,
    invoker: Arc<I>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    cwd: PathBuf,
    tx: mpsc::UnboundedSender<ResultRecord>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut workers: JoinSet<()> = JoinSet::new();

    let start_all = async {
        for item in items {
            match guarded(&item.id, || job.skip(&item)) {
                Ok(None) => {}
                Ok(Some(record)) => {
                    tracing::debug!(item = %item.id, "skipped before invocation");
                    if tx.send(fixup_id(&item, record)).is_err() {
                        return;
                    }
                    continue;
                }
                Err(record) => {
                    if tx.send(record).is_err() {
                        return;
                    }
                    continue;
                }
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                return;
            };

            let job = Arc::clone(&job);
            let invoker = Arc::clone(&invoker);
            let cwd = cwd.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let record = process_item(job, invoker, item, cwd, timeout).await;
                let _ = tx.send(record);
                drop(permit);
            });
        }
    };

    // A dropped sender counts as a stop too: the run itself went away.
    let stopped = tokio::select! {
        _ = start_all => false,
        _ = &mut stop => true,
    };
    if !stopped {
        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("worker failed: {e}");
                }
            }
        };
        tokio::select! {
            _ = drain => {}
            _ = &mut stop => {}
        }
    }

    if !workers.is_empty() {
        tracing::warn!(workers = workers.len(), "stopping in-flight items");
    }
    workers.shutdown().await;
}

async fn process_item<J: BatchJob, I: Invoker>(
    job: Arc<J>,
    invoker: Arc<I>,
    item: WorkItem,
    cwd: PathBuf,
    timeout: Duration,
) -> ResultRecord {
    let prompt = match guarded(&item.id, || job.build_prompt(&item)) {
        Ok(prompt) => prompt,
        Err(record) => return record,
    };
    tracing::debug!(item = %item.id, prompt_len = prompt.len(), "invoking");

    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, invoker.invoke(prompt, cwd)).await {
        Ok(outcome) => outcome,
        Err(_) => InvocationOutcome::TimedOut { timeout },
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let record = match guarded(&item.id, || job.handle_result(&item, outcome)) {
        Ok(record) => fixup_id(&item, record).with_detail("elapsed_ms", elapsed_ms),
        Err(record) => record,
    };
    if record.status.is_failure() {
        tracing::warn!(
            item = %record.id,
            status = %record.status,
            reason = record.reason().unwrap_or(""),
            "item failed"
        );
    } else {
        tracing::debug!(item = %record.id, status = %record.status, elapsed_ms, "item done");
    }
    record
}

/// Results are matched to items by id; a job that reports under another id
/// is corrected rather than allowed to corrupt the checkpoint.
fn fixup_id(item: &WorkItem, mut record: ResultRecord) -> ResultRecord {
    if record.id != item.id {
        tracing::warn!(item = %item.id, reported = %record.id, "job reported a mismatched id");
        record.id = item.id.clone();
    }
    record
}

/// Run one of the job's own hooks; a panic becomes an `error` record for the
/// item instead of taking the worker down.
fn guarded<T>(id: &str, hook: impl FnOnce() -> T) -> std::result::Result<T, ResultRecord> {
    std::panic::catch_unwind(AssertUnwindSafe(hook)).map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        tracing::error!(item = id, "job panicked: {message}");
        ResultRecord::new(id, ResultStatus::Error)
            .with_detail("error", format!("worker failed: {message}"))
    })
}

/// Checkpoint I/O runs on the blocking pool; callers await it, so writes stay
/// one at a time.
async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> batchwave_core::Result<T> + Send + 'static,
{
    let value = tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AgentError::Join(e.to_string()))??;
    Ok(value)
}

// ─── Tests ────────────────────────────────────────────────────────────────
