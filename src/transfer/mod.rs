pub mod progress;

pub use progress::ProgressRegistry;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{SourceId, TransferJob};
use crate::registry::RegistryClient;
use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const STAGING_SUFFIX: &str = ".tmp";

/// Waits out a retry delay. Swappable so retry timing can be tested
/// without real sleeps.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delay before zero-indexed attempt `attempt`: 2s, 4s, 6s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt) * 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// What to do after zero-indexed attempt `failed_attempt` failed with `err`,
/// given at most `limit` attempts in total.
pub fn next_step(failed_attempt: u32, limit: u32, err: &Error) -> NextStep {
    let attempt = failed_attempt + 1;
    if err.is_terminal() || attempt >= limit {
        NextStep::GiveUp
    } else {
        NextStep::Retry {
            attempt,
            delay: backoff_delay(attempt),
        }
    }
}

/// `<final path>.tmp`, next to the final file.
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub workers: usize,
    pub retry_attempts: u32,
}

impl TransferOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.max_workers,
            retry_attempts: config.retry_attempts,
        }
    }
}

#[derive(Debug)]
pub struct JobFailure {
    pub name: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub completed: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Downloads jobs through a fixed pool of workers.
///
/// Jobs are independent: one job giving up never cancels another, and the
/// report lists every job that gave up.
pub struct TransferEngine {
    clients: HashMap<SourceId, Arc<dyn RegistryClient>>,
    progress: Arc<ProgressRegistry>,
    sleeper: Arc<dyn Sleeper>,
    bars: MultiProgress,
    options: TransferOptions,
}

impl TransferEngine {
    pub fn new(
        clients: Vec<Arc<dyn RegistryClient>>,
        progress: Arc<ProgressRegistry>,
        options: TransferOptions,
    ) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.source(), c)).collect(),
            progress,
            sleeper: Arc::new(TokioSleeper),
            bars: MultiProgress::new(),
            options,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_progress_bars(mut self, bars: MultiProgress) -> Self {
        self.bars = bars;
        self
    }

    pub async fn run(&self, jobs: Vec<TransferJob>) -> TransferReport {
        let mut report = TransferReport::default();
        if jobs.is_empty() {
            return report;
        }

        let worker = Arc::new(Worker {
            clients: self.clients.clone(),
            progress: self.progress.clone(),
            sleeper: self.sleeper.clone(),
            bars: self.bars.clone(),
            retry_attempts: self.options.retry_attempts.max(1),
        });

        let submitted: Vec<String> = jobs.iter().map(|job| job.name().to_string()).collect();

        let (job_tx, job_rx) = mpsc::channel(jobs.len());
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        for job in jobs {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let workers = self.options.workers.max(1);
        tracing::info!("Starting {} download worker(s)", workers);

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = worker.clone();
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = job_rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        let name = job.name().to_string();
                        let outcome = worker.process(job).await;
                        if result_tx.send((name, outcome)).is_err() {
                            break;
                        }
                    }
                    tracing::debug!("Download worker {} finished", id);
                })
            })
            .collect();
        drop(result_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Download worker panicked: {}", e);
            }
        }

        let mut reported = HashSet::new();
        while let Some((name, outcome)) = result_rx.recv().await {
            reported.insert(name.clone());
            match outcome {
                Ok(()) => report.completed.push(name),
                Err(error) => report.failures.push(JobFailure { name, error }),
            }
        }

        // A worker that panicked takes its job's outcome down with it
        for name in submitted {
            if !reported.contains(&name) {
                self.progress.fail(&name, "transfer ended without a result");
                report.failures.push(JobFailure {
                    error: Error::DownloadFailed(format!("{} ended without a result", name)),
                    name,
                });
            }
        }

        report
    }
}

struct Worker {
    clients: HashMap<SourceId, Arc<dyn RegistryClient>>,
    progress: Arc<ProgressRegistry>,
    sleeper: Arc<dyn Sleeper>,
    bars: MultiProgress,
    retry_attempts: u32,
}

impl Worker {
    /// Runs one job through attempt / retry-wait until it succeeds or gives up.
    async fn process(&self, job: TransferJob) -> Result<()> {
        let name = job.name().to_string();
        self.progress.begin(&name, job.candidate.source);

        let Some(client) = self.clients.get(&job.candidate.source).cloned() else {
            let err = Error::ConfigError(format!(
                "No client configured for source {}",
                job.candidate.source
            ));
            self.progress.fail(&name, err.to_string());
            return Err(err);
        };

        let bar = self.bar_for(&job);

        if let Err(err) = ensure_parent_dir(&job.destination).await {
            self.progress.fail(&name, err.to_string());
            bar.abandon_with_message(format!("{} failed", name));
            return Err(err);
        }

        let mut attempt = 0;
        loop {
            self.progress.record_attempt(&name, attempt + 1);

            let err = match self.attempt(client.as_ref(), &job, &bar).await {
                Ok(()) => {
                    self.progress.finish(&name);
                    bar.finish_with_message(format!("{} done", name));
                    tracing::info!("Downloaded {} to {:?}", name, job.destination);
                    return Ok(());
                }
                Err(err) => err,
            };

            match next_step(attempt, self.retry_attempts, &err) {
                NextStep::Retry {
                    attempt: next,
                    delay,
                } => {
                    tracing::warn!(
                        "Download of {} failed: {}. Retrying in {:?} (attempt {}/{})",
                        name,
                        err,
                        delay,
                        next + 1,
                        self.retry_attempts
                    );
                    self.sleeper.sleep(delay).await;
                    attempt = next;
                }
                NextStep::GiveUp => {
                    tracing::error!("Giving up on {}: {}", name, err);
                    self.progress.fail(&name, err.to_string());
                    bar.abandon_with_message(format!("{} failed", name));
                    return Err(err);
                }
            }
        }
    }

    /// One try: resume into the staging file, then publish it.
    async fn attempt(
        &self,
        client: &dyn RegistryClient,
        job: &TransferJob,
        bar: &ProgressBar,
    ) -> Result<()> {
        let name = job.name();
        let staging = staging_path(&job.destination);

        let resume_offset = match tokio::fs::metadata(&staging).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if resume_offset > 0 {
            tracing::info!("Resuming {} from byte {}", name, resume_offset);
        }

        let progress = self.progress.as_ref();
        progress.update(name, resume_offset, job.candidate.declared_size);
        bar.set_position(resume_offset);

        let on_progress = |downloaded: u64, total: u64| {
            progress.update(name, downloaded, total);
            if total > 0 && bar.length() != Some(total) {
                bar.set_length(total);
                bar.set_style(byte_style());
            }
            bar.set_position(downloaded);
        };

        client
            .fetch(&job.candidate.locator, &staging, resume_offset, &on_progress)
            .await?;

        tokio::fs::rename(&staging, &job.destination)
            .await
            .map_err(|source| Error::PublishFailed {
                path: job.destination.clone(),
                source,
            })
    }

    fn bar_for(&self, job: &TransferJob) -> ProgressBar {
        let declared = job.candidate.declared_size;
        let bar = if declared > 0 {
            ProgressBar::new(declared).with_style(byte_style())
        } else {
            ProgressBar::new_spinner().with_style(spinner_style())
        };
        let bar = self.bars.add(bar);
        bar.set_message(job.name().to_string());
        bar
    }
}

fn byte_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:30.cyan/dim}] {percent:>3}% {bytes}/{total_bytes} ({binary_bytes_per_sec})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg} {bytes} ({binary_bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(parent).await?;
    Ok(())
}
