use crate::constants::{ERROR_PREFIX, PROGRESS_BAR_TEMPLATE, WARNING_PREFIX};
use crate::error::{CompressionError, Result};
use crate::history::{HistoryManager, HistoryRecord};
use crate::job::{Job, JobId, JobStatus};
use crate::pipeline::{Pipeline, RunSummary};
use crate::utils::{format_file_size, is_image_file, shorten_path};
use crate::{detail, say};
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Files found by [`collect_image_files`], plus the inputs that could not be
/// read. Scan errors never abort the scan.
#[derive(Debug, Default)]
pub struct ScanResults {
    /// Absolute, de-duplicated, sorted.
    pub images: Vec<PathBuf>,
    pub errors: Vec<CompressionError>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path.canonicalize()?)
}

fn looks_like_glob(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

fn scan_directory(dir: &Path, recursive: bool, results: &mut ScanResults) {
    let mut walker = WalkDir::new(dir);
    if !recursive {
        walker = walker.max_depth(1);
    }

    for entry in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                results.errors.push(err.into());
                continue;
            }
        };
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            match absolute(entry.path()) {
                Ok(path) => results.images.push(path),
                Err(err) => results.errors.push(err),
            }
        }
    }
}

fn scan_path(path: &Path, recursive: bool, results: &mut ScanResults) {
    if path.is_dir() {
        scan_directory(path, recursive, results);
    } else if path.is_file() {
        // Explicitly named files are taken regardless of extension.
        match absolute(path) {
            Ok(path) => results.images.push(path),
            Err(err) => results.errors.push(err),
        }
    } else {
        results
            .errors
            .push(CompressionError::FileNotFound(path.to_path_buf()));
    }
}

/// Expands inputs (files, directories, glob patterns) into image paths.
///
/// Glob patterns are expanded first; a pattern matching nothing is retried as
/// a literal path. Directories contribute files with a supported extension,
/// skipping hidden entries, and are only descended into when `recursive` is set.
pub fn collect_image_files<S: AsRef<str>>(inputs: &[S], recursive: bool) -> ScanResults {
    let mut results = ScanResults::default();

    for input in inputs {
        let input = input.as_ref().trim();
        if input.is_empty() {
            continue;
        }

        if looks_like_glob(input) {
            match glob(input) {
                Ok(paths) => {
                    let mut matched = false;
                    for entry in paths {
                        match entry {
                            Ok(path) => {
                                matched = true;
                                scan_path(&path, recursive, &mut results);
                            }
                            Err(err) => results.errors.push(CompressionError::Io(err.into_error())),
                        }
                    }
                    if matched {
                        continue;
                    }
                    debug!(pattern = input, "Glob matched nothing, trying as a literal path");
                }
                Err(err) => {
                    if !Path::new(input).exists() {
                        results
                            .errors
                            .push(CompressionError::GlobPattern(input.to_string(), err.to_string()));
                        continue;
                    }
                }
            }
        }

        scan_path(Path::new(input), recursive, &mut results);
    }

    results.images.sort();
    results.images.dedup();
    results
}

/// Final state of a CLI batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub summary: RunSummary,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

struct Progress<'a> {
    bar: ProgressBar,
    history: Option<&'a HistoryManager>,
    watched: HashSet<JobId>,
    finished: HashSet<JobId>,
}

impl Progress<'_> {
    fn is_complete(&self) -> bool {
        self.finished.len() >= self.watched.len()
    }

    fn observe(&mut self, job: &Job) {
        if !self.watched.contains(&job.id) {
            return;
        }
        match job.status {
            JobStatus::Processing => {
                self.bar.set_message(shorten_path(&job.path, 40));
            }
            _ if job.is_terminal() => {
                if !self.finished.insert(job.id) {
                    return;
                }
                self.report(job);
                self.bar.inc(1);
            }
            _ => {}
        }
    }

    fn report(&self, job: &Job) {
        match (job.status, &job.error) {
            (JobStatus::Done, _) => {
                if crate::logger::is_verbose() && !crate::logger::is_quiet() {
                    self.bar.println(format!(
                        "🔍 {} {} -> {} ({:.1}%)",
                        job.path.display(),
                        format_file_size(job.original_size),
                        format_file_size(job.compressed_size),
                        job.saved_percent
                    ));
                }
            }
            (JobStatus::Failed, Some(failure)) => {
                self.bar.println(format!(
                    "{} Failed to compress {}: {}",
                    ERROR_PREFIX,
                    job.path.display(),
                    failure
                ));
            }
            _ => {}
        }

        if let Some(history) = self.history {
            if let Some(record) = HistoryRecord::from_job(job) {
                history.add(record);
            }
        }
    }

    /// Catches up from the job table after the update stream dropped events.
    fn reconcile(&mut self, pipeline: &Pipeline) {
        for job in pipeline.jobs() {
            if job.is_terminal() {
                self.observe(&job);
            }
        }
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    if crate::logger::is_quiet() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::with_template(PROGRESS_BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

/// Runs `images` through `pipeline` with a progress bar until every job
/// finishes or Ctrl-C is pressed, then stops the pipeline.
///
/// Finished jobs are appended to `history` when given.
pub async fn run_batch(
    pipeline: &Pipeline,
    images: Vec<PathBuf>,
    history: Option<&HistoryManager>,
) -> Result<BatchReport> {
    let start_time = Instant::now();
    let mut updates = pipeline.subscribe();
    pipeline.start();

    let outcome = pipeline.add_files(images);
    for path in &outcome.duplicates {
        detail!("Skipping duplicate {}", path.display());
    }
    for path in &outcome.rejected {
        warn!(path = %path.display(), "Job rejected");
        say!("{} Skipped {} (queue full)", WARNING_PREFIX, path.display());
    }

    let mut progress = Progress {
        bar: progress_bar(outcome.added.len() as u64),
        history,
        watched: outcome.added.iter().copied().collect(),
        finished: HashSet::new(),
    };
    // Jobs can finish before their updates are read; start from the table.
    progress.reconcile(pipeline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while !progress.is_complete() {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(job) => progress.observe(&job),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Progress fell behind, reconciling");
                    progress.reconcile(pipeline);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                progress.bar.println(format!("{} Interrupted, stopping workers...", WARNING_PREFIX));
                interrupted = true;
                break;
            }
        }
    }

    pipeline.stop().await;
    progress.reconcile(pipeline);
    progress.bar.finish_and_clear();

    if let Some(history) = history {
        if let Err(err) = history.flush().await {
            warn!(error = %err, "Failed to save history");
        }
    }

    let summary = pipeline.summary();
    print_summary(&summary, start_time);
    Ok(BatchReport {
        summary,
        interrupted,
    })
}

fn print_summary(summary: &RunSummary, start_time: Instant) {
    say!("\n📊 Compression Summary:");
    say!("  ✅ Compressed: {}/{}", summary.done, summary.total);
    if summary.failed > 0 {
        say!("  ❌ Failed: {}", summary.failed);
    }
    if summary.cancelled > 0 {
        say!("  ⏹️  Cancelled: {}", summary.cancelled);
    }
    say!("  📦 Before: {}", format_file_size(summary.bytes_before));
    say!("  📦 After: {}", format_file_size(summary.bytes_after));
    say!(
        "  🎯 Saved: {} ({:.1}%)",
        format_file_size(summary.bytes_saved.max(0) as u64),
        summary.saved_percent()
    );
    say!("  ⏱️  Total time: {:.1?}", start_time.elapsed());
}
