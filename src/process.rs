//! Batch watermarking pipeline
//!
//! Each pending photo runs decode -> date resolution -> composition ->
//! encode on a bounded rayon pool. Workers never touch [`Photo`] state: they
//! report [`PipelineEvent`]s over a channel and the thread that called
//! [`PipelineCoordinator::run`] applies every transition.

use crate::codec;
use crate::config::{Config, WatermarkConfig};
use crate::error::{Error, Result};
use crate::naming::{self, OutputNamer};
use crate::photo::{Outcome, Photo, PhotoId, PhotoStatus, ProcessingResult, SkipReason};
use crate::render::WatermarkRenderer;
use crate::time::{DateResolver, MetadataDateResolver, ResolvedDate};
use chrono::Local;
use rayon::prelude::*;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use tracing::{Level, debug, info, span, warn};

/// Progress reported when decoding starts
pub const PROGRESS_DECODE_START: f32 = 0.1;
/// Progress once the source is decoded
pub const PROGRESS_DECODED: f32 = 0.3;
/// Progress once the capture date is known (or known to be missing)
pub const PROGRESS_DATE_RESOLVED: f32 = 0.5;
/// Progress once the watermark is drawn
pub const PROGRESS_COMPOSED: f32 = 0.8;
/// Progress once the output is written
pub const PROGRESS_ENCODED: f32 = 1.0;

/// Run options that stay fixed for the coordinator's lifetime
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Worker threads (0 = number of CPUs)
    pub threads: usize,
    pub jpeg_quality: u8,
    pub unique_names: bool,
    pub preserve_mtime: bool,
    /// Fall back to the file creation time when EXIF has no date
    pub file_time_fallback: bool,
    pub font_dirs: Vec<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            threads: config.threads,
            jpeg_quality: config.jpeg_quality,
            unique_names: config.unique_names,
            preserve_mtime: config.preserve_mtime,
            file_time_fallback: config.file_time_fallback,
            font_dirs: config.font_dirs.clone(),
        }
    }
}

/// Cooperative cancellation flag shared with workers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the coordinator can run again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives run notifications on the thread that called `run`
pub trait ProgressObserver {
    /// Fractions for one photo arrive in non-decreasing order, before its
    /// final `on_status`
    fn on_progress(&self, photo: PhotoId, fraction: f32);

    /// A photo changed status
    fn on_status(&self, _photo: &Photo) {}

    /// Sent once per run, after the last photo
    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(PhotoId, f32),
{
    fn on_progress(&self, photo: PhotoId, fraction: f32) {
        self(photo, fraction)
    }
}

/// Live counters for the current run.
///
/// `completed` includes photos passed through without a date, which are also
/// counted in `skipped_no_date`. `cancelled` covers both photos that never
/// started and photos stopped mid-flight; the latter are not in `failed`.
#[derive(Debug, Default)]
pub struct BatchStats {
    pub total: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
    pub skipped_no_date: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped_no_date.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
    }

    /// Photos that reached a final state (or were skipped by cancellation)
    pub fn finished(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BatchSummary {
        let completed = self.completed.load(Ordering::Relaxed);
        let skipped_no_date = self.skipped_no_date.load(Ordering::Relaxed);
        BatchSummary {
            total: self.total.load(Ordering::Relaxed),
            completed,
            watermarked: completed.saturating_sub(skipped_no_date),
            skipped_no_date,
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> String {
        self.snapshot().to_string()
    }
}

/// Final counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub watermarked: usize,
    pub skipped_no_date: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total: {}, Watermarked: {}, No date: {}, Failed: {}, Cancelled: {}",
            self.total, self.watermarked, self.skipped_no_date, self.failed, self.cancelled
        )
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<ProcessingResult>,
    pub summary: BatchSummary,
}

/// Messages from workers to the coordinator; indices refer to the run's photo slice
#[derive(Debug)]
pub enum PipelineEvent {
    Started(usize),
    Progress(usize, f32),
    Finished(usize, WorkOutcome),
}

/// How a worker left a photo
#[derive(Debug)]
pub enum WorkOutcome {
    /// Output committed; `date` is `None` for a pass-through
    Written {
        output: PathBuf,
        date: Option<ResolvedDate>,
    },
    Failed(Error),
    /// Cancelled before the photo was picked up
    NotStarted,
}

/// Drives batches of photos through the pipeline
pub struct PipelineCoordinator {
    options: PipelineOptions,
    pool: rayon::ThreadPool,
    resolver: Arc<dyn DateResolver>,
    cancel: CancellationToken,
    stats: Arc<BatchStats>,
}

impl PipelineCoordinator {
    pub fn new(options: PipelineOptions) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .thread_name(|i| format!("photomark-worker-{}", i))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        debug!(threads = pool.current_num_threads(), "Worker pool ready");

        let resolver = Arc::new(MetadataDateResolver::with_file_time_fallback(
            options.file_time_fallback,
        ));

        Ok(Self {
            options,
            pool,
            resolver,
            cancel: CancellationToken::new(),
            stats: Arc::new(BatchStats::new()),
        })
    }

    /// Replace the date source used by later runs
    pub fn with_date_resolver(mut self, resolver: impl DateResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Token that stops the current (or next) run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Shared counters for readers on other threads
    pub fn stats_arc(&self) -> Arc<BatchStats> {
        Arc::clone(&self.stats)
    }

    /// Process every `Pending` photo in `photos`.
    ///
    /// Photos in any other status are left as they are. A failing photo never
    /// stops the others; only an unusable output directory aborts the run,
    /// before any photo is touched.
    pub fn run<O>(
        &self,
        photos: &mut [Photo],
        config: &WatermarkConfig,
        observer: &O,
    ) -> Result<BatchReport>
    where
        O: ProgressObserver + ?Sized,
    {
        self.run_where(photos, config, observer, |_| true)
    }

    /// Like [`run`](Self::run), restricted to the photos whose id is in `ids`.
    ///
    /// Selected photos that are not `Pending` and ids not in `photos` are
    /// ignored; unselected photos keep their status.
    pub fn run_selected<O>(
        &self,
        photos: &mut [Photo],
        ids: &[PhotoId],
        config: &WatermarkConfig,
        observer: &O,
    ) -> Result<BatchReport>
    where
        O: ProgressObserver + ?Sized,
    {
        let selected: HashSet<PhotoId> = ids.iter().copied().collect();
        self.run_where(photos, config, observer, |photo| selected.contains(&photo.id()))
    }

    fn run_where<O, P>(
        &self,
        photos: &mut [Photo],
        config: &WatermarkConfig,
        observer: &O,
        selected: P,
    ) -> Result<BatchReport>
    where
        O: ProgressObserver + ?Sized,
        P: Fn(&Photo) -> bool,
    {
        let _span = span!(Level::INFO, "pipeline_run").entered();

        let jobs: Vec<(usize, PathBuf)> = photos
            .iter()
            .enumerate()
            .filter(|(_, p)| p.status() == PhotoStatus::Pending && selected(p))
            .map(|(i, p)| (i, p.source_location().to_path_buf()))
            .collect();
        self.stats.reset(jobs.len());

        let namer = OutputNamer::new(&config.output_directory, self.options.unique_names);
        namer.ensure_directory()?;

        info!(
            count = jobs.len(),
            output = %config.output_directory.display(),
            "Starting batch"
        );

        let renderer = WatermarkRenderer::new(config, &self.options.font_dirs);
        let worker = Worker {
            config,
            renderer: &renderer,
            namer: &namer,
            resolver: self.resolver.as_ref(),
            cancel: &self.cancel,
            jpeg_quality: self.options.jpeg_quality,
            preserve_mtime: self.options.preserve_mtime,
        };

        let (tx, rx) = mpsc::channel::<PipelineEvent>();
        let mut results = Vec::with_capacity(jobs.len());

        std::thread::scope(|scope| {
            let jobs = &jobs;
            let worker = &worker;
            let pool = &self.pool;
            scope.spawn(move || {
                pool.install(|| {
                    jobs.par_iter().for_each_with(tx, |tx, (index, source)| {
                        worker.run(*index, source, tx);
                    });
                });
            });

            // Ends once every worker's sender is dropped
            for event in rx {
                if let Some(result) = self.apply(photos, event, observer) {
                    results.push(result);
                }
            }
        });

        let summary = self.stats.snapshot();
        info!(%summary, "Batch complete");
        observer.on_batch_complete(&summary);

        Ok(BatchReport { results, summary })
    }

    /// Apply one worker event to the photo it concerns
    fn apply<O>(
        &self,
        photos: &mut [Photo],
        event: PipelineEvent,
        observer: &O,
    ) -> Option<ProcessingResult>
    where
        O: ProgressObserver + ?Sized,
    {
        match event {
            PipelineEvent::Started(index) => {
                let photo = &mut photos[index];
                if let Err(e) = photo.start_processing() {
                    warn!(id = %photo.id(), error = %e, "Unexpected start");
                }
                observer.on_status(photo);
                None
            }
            PipelineEvent::Progress(index, fraction) => {
                let photo = &mut photos[index];
                if photo.set_progress(fraction).is_ok() {
                    observer.on_progress(photo.id(), photo.progress());
                }
                None
            }
            PipelineEvent::Finished(index, outcome) => {
                let photo = &mut photos[index];
                let outcome = match outcome {
                    WorkOutcome::Written { output, date } => {
                        if let Err(e) = photo.complete(output.clone()) {
                            warn!(id = %photo.id(), error = %e, "Unexpected completion");
                        }
                        self.stats.completed.fetch_add(1, Ordering::Relaxed);
                        match date {
                            Some(date) => {
                                info!(
                                    source = %photo.source_location().display(),
                                    output = %output.display(),
                                    date = %date.timestamp,
                                    "Watermarked"
                                );
                                Outcome::Success(output)
                            }
                            None => {
                                info!(
                                    source = %photo.source_location().display(),
                                    output = %output.display(),
                                    "No capture date, passed through"
                                );
                                self.stats.skipped_no_date.fetch_add(1, Ordering::Relaxed);
                                Outcome::Skipped(SkipReason::NoDate)
                            }
                        }
                    }
                    WorkOutcome::Failed(error) => {
                        let kind = error.kind();
                        if let Err(e) = photo.fail(error.classified_message()) {
                            warn!(id = %photo.id(), error = %e, "Unexpected failure transition");
                        }
                        if matches!(error, Error::Cancelled) {
                            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                        } else {
                            self.stats.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                source = %photo.source_location().display(),
                                error = %error,
                                "Failed to process photo"
                            );
                        }
                        Outcome::Failure(kind)
                    }
                    WorkOutcome::NotStarted => {
                        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                        Outcome::Skipped(SkipReason::Cancelled)
                    }
                };
                observer.on_status(photo);
                Some(ProcessingResult {
                    photo_id: photo.id(),
                    outcome,
                })
            }
        }
    }
}

/// Per-run state shared by all workers
struct Worker<'a> {
    config: &'a WatermarkConfig,
    renderer: &'a WatermarkRenderer,
    namer: &'a OutputNamer,
    resolver: &'a dyn DateResolver,
    cancel: &'a CancellationToken,
    jpeg_quality: u8,
    preserve_mtime: bool,
}

/// What a successful pass through the pipeline wrote
struct Written {
    output: PathBuf,
    date: Option<ResolvedDate>,
}

impl Worker<'_> {
    fn run(&self, index: usize, source: &Path, tx: &mpsc::Sender<PipelineEvent>) {
        // Receiver only goes away if the coordinator panicked
        if self.cancel.is_cancelled() {
            let _ = tx.send(PipelineEvent::Finished(index, WorkOutcome::NotStarted));
            return;
        }
        let _ = tx.send(PipelineEvent::Started(index));

        let mut progress = |fraction| {
            let _ = tx.send(PipelineEvent::Progress(index, fraction));
        };
        let outcome = match self.process(source, &mut progress) {
            Ok(written) => WorkOutcome::Written {
                output: written.output,
                date: written.date,
            },
            Err(e) => WorkOutcome::Failed(e),
        };
        let _ = tx.send(PipelineEvent::Finished(index, outcome));
    }

    fn process(&self, source: &Path, progress: &mut dyn FnMut(f32)) -> Result<Written> {
        progress(PROGRESS_DECODE_START);
        self.cancel.check()?;
        let decoded = codec::decode_file(source)?;
        progress(PROGRESS_DECODED);

        self.cancel.check()?;
        let date = match self.resolver.resolve(source) {
            Ok(date) => date,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Cannot read capture date, passing through");
                None
            }
        };
        progress(PROGRESS_DATE_RESOLVED);

        let raster = match &date {
            Some(date) => Cow::Owned(self.renderer.compose(&decoded.raster, &date.timestamp, self.config)?),
            None => Cow::Borrowed(&decoded.raster),
        };
        progress(PROGRESS_COMPOSED);

        self.cancel.check()?;
        let bytes = codec::encode(&raster, &decoded.envelope, decoded.format, self.jpeg_quality)?;
        let output = self
            .namer
            .output_path(source, &Local::now().naive_local())?;
        let staged = self.namer.stage(&bytes)?;

        self.cancel.check()?;
        staged.commit(&output)?;
        if self.preserve_mtime {
            naming::preserve_mtime(source, &output);
        }
        progress(PROGRESS_ENCODED);

        debug!(source = %source.display(), output = %output.display(), "Photo written");
        Ok(Written { output, date })
    }
}
