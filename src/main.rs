//! photomark - stamp photos with their capture date
//!
//! A CLI tool that reads each photo's capture date, draws it onto the image
//! and writes a copy with the original metadata carried over.

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use photomark::{
    Batch, BatchSummary, Cli, Config, Photo, PhotoId, PhotoStatus, PipelineCoordinator,
    PipelineOptions, ProgressObserver,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter::LevelFilter, fmt, prelude::*};
use walkdir::WalkDir;

/// Folder inside the output directory that holds run logs
const LOG_DIR_NAME: &str = ".photomark-logs";

/// Styled summary lines on stdout
mod term {
    use crossterm::queue;
    use crossterm::style::{Color, Print, PrintStyledContent, Stylize};
    use std::io::{self, StdoutLock, Write};

    pub const GOOD: Color = Color::Green;
    pub const WARN: Color = Color::Yellow;
    pub const BAD: Color = Color::Red;
    pub const MUTED: Color = Color::DarkGrey;
    pub const INFO: Color = Color::Cyan;

    const WIDTH: usize = 60;

    /// Write one line; a closed stdout is not worth failing the run over
    fn line(build: impl FnOnce(&mut StdoutLock<'static>) -> io::Result<()>) {
        let mut out = io::stdout().lock();
        let _ = build(&mut out)
            .and_then(|()| writeln!(out))
            .and_then(|()| out.flush());
    }

    pub fn rule() {
        line(|out| queue!(out, PrintStyledContent("─".repeat(WIDTH).with(MUTED))));
    }

    pub fn heading(title: &str) {
        let pad = WIDTH.saturating_sub(title.chars().count()) / 2;
        line(|out| queue!(out, Print(" ".repeat(pad)), PrintStyledContent(title.bold())));
    }

    pub fn blank() {
        line(|_| Ok(()));
    }

    pub fn stat(label: &str, value: usize, color: Color) {
        line(|out| {
            queue!(
                out,
                Print("  "),
                PrintStyledContent(label.with(MUTED)),
                Print(": "),
                PrintStyledContent(value.to_string().with(color).bold())
            )
        });
    }

    /// `icon text detail`, with the icon colored
    pub fn item(icon: &str, color: Color, text: &str, detail: &str) {
        line(|out| {
            queue!(
                out,
                Print("  "),
                PrintStyledContent(icon.with(color).bold()),
                Print(" "),
                Print(text),
                Print(" "),
                PrintStyledContent(detail.with(MUTED))
            )
        });
    }

    pub fn notice(icon: &str, color: Color, msg: &str) {
        line(|out| queue!(out, PrintStyledContent(icon.with(color).bold()), Print(" "), Print(msg)));
    }
}

/// Drives the progress bar from coordinator notifications
struct BarObserver {
    bar: ProgressBar,
}

impl ProgressObserver for BarObserver {
    fn on_progress(&self, _photo: PhotoId, _fraction: f32) {
        self.bar.tick();
    }

    fn on_status(&self, photo: &Photo) {
        match photo.status() {
            PhotoStatus::Processing => {
                let name = photo
                    .source_location()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.bar.set_message(name);
            }
            PhotoStatus::Completed | PhotoStatus::Failed => self.bar.inc(1),
            PhotoStatus::Pending => {}
        }
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

/// Machine-readable run output for `--json`
#[derive(Serialize)]
struct JsonReport<'a> {
    summary: BatchSummary,
    photos: &'a [Photo],
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_sample_config {
        print!("{}", Config::sample_config());
        return Ok(());
    }

    let config = load_config(&cli)?;
    if let Err(msg) = config.watermark.validate() {
        anyhow::bail!("Invalid watermark settings: {}", msg);
    }

    let log_path = get_log_path(&config.watermark.output_directory);
    let _guard = setup_logging(&cli, &log_path)?;

    info!(version = env!("CARGO_PKG_VERSION"), "photomark starting");
    if cli.verbose {
        info!(?config, "Configuration loaded");
    }

    let inputs = collect_inputs(&cli.inputs, &config);
    let mut batch = Batch::new();
    let accepted = batch.accept(&inputs, config.deduplicate);
    info!(found = inputs.len(), accepted, "Collected input photos");

    if batch.is_empty() {
        term::notice("⚠", term::WARN, "No jpg, jpeg, png or heic files found in the given inputs");
        return Ok(());
    }

    let coordinator = PipelineCoordinator::new(PipelineOptions::from(&config))?;

    let bar = if cli.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(batch.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")?
                .progress_chars("█▓▒░  "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };
    let observer = BarObserver { bar };

    match coordinator.run(batch.photos_mut(), &config.watermark, &observer) {
        Ok(report) => {
            if cli.json {
                let json = JsonReport {
                    summary: report.summary,
                    photos: batch.photos(),
                };
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                print_summary(&cli, &batch, &report.summary, &log_path);
            }
            info!(log_file = %log_path.display(), "Processing complete. Log saved to");
            Ok(())
        }
        Err(e) => {
            observer.bar.abandon();
            error!(error = %e, "Batch aborted");
            term::notice("✗", term::BAD, &format!("Batch aborted: {}", e));
            std::process::exit(1);
        }
    }
}

fn print_summary(cli: &Cli, batch: &Batch, summary: &BatchSummary, log_path: &Path) {
    term::rule();
    term::heading("Watermarking complete");
    term::rule();
    term::stat("Watermarked", summary.watermarked, term::GOOD);
    term::stat("No date (copied unmarked)", summary.skipped_no_date, term::WARN);
    term::stat("Failed", summary.failed, term::BAD);
    if summary.cancelled > 0 {
        term::stat("Cancelled", summary.cancelled, term::INFO);
    }

    let failed = batch.count(PhotoStatus::Failed);
    if cli.verbose || failed > 0 {
        term::blank();
        for photo in batch.photos() {
            let source = photo.source_location().display().to_string();
            match (photo.status(), photo.output_location()) {
                (PhotoStatus::Failed, _) => {
                    term::item("✗", term::BAD, &source, photo.error().unwrap_or("unknown error"))
                }
                // Successes and leftovers only in verbose mode
                _ if !cli.verbose => {}
                (PhotoStatus::Completed, Some(output)) => {
                    term::item("✓", term::GOOD, &source, &format!("→ {}", output.display()))
                }
                _ => term::item("○", term::INFO, &source, "not processed"),
            }
        }
    }

    term::rule();
    term::item("📁", term::INFO, "Log file:", &log_path.display().to_string());
}

/// Log file for this run, inside the output directory
fn get_log_path(output_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    output_dir
        .join(LOG_DIR_NAME)
        .join(format!("run_{}.log", timestamp))
}

/// Resolve config path - `-C name` also finds `name.toml`
fn resolve_config_path(config_path: &Path) -> PathBuf {
    if config_path.exists() || config_path.extension().is_some() {
        return config_path.to_path_buf();
    }

    let with_extension = config_path.with_extension("toml");
    if with_extension.exists() {
        return with_extension;
    }

    config_path.to_path_buf()
}

/// Load configuration from file or CLI arguments
fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(ref config_path) = cli.config {
        let resolved_path = resolve_config_path(config_path);
        let file_config = Config::load_from_file(&resolved_path)?;
        cli.merge_with_config(file_config)
    } else {
        cli.to_config()
    };

    Ok(config)
}

/// Expand folder inputs into the files they contain.
///
/// The output directory is never scanned, so re-running on a folder that
/// contains it doesn't pick up earlier results.
fn collect_inputs(inputs: &[PathBuf], config: &Config) -> Vec<PathBuf> {
    let output_dir = &config.watermark.output_directory;
    let canonical_output = std::fs::canonicalize(output_dir).ok();
    let is_output = |path: &Path| {
        path == output_dir
            || canonical_output
                .as_deref()
                .is_some_and(|out| std::fs::canonicalize(path).is_ok_and(|p| p == out))
    };

    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            warn!(path = %input.display(), "Input does not exist");
            continue;
        }
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut walker = WalkDir::new(input).follow_links(true).sort_by_file_name();
        if !config.recursive {
            walker = walker.max_depth(1);
        }
        let entries = walker
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && is_output(e.path())))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());
        files.extend(entries.map(|e| e.into_path()));
    }
    files
}

/// Setup logging (file + console)
fn setup_logging(cli: &Cli, log_path: &Path) -> Result<Option<WorkerGuard>> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let file = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(log_path)
        });

    let file = match file {
        Ok(file) => file,
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer(cli.verbose))
                .init();
            warn!(path = %log_path.display(), error = %e, "Cannot open log file, logging to console only");
            return Ok(None);
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if cli.json_log {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .with(console_layer(cli.verbose))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .with(console_layer(cli.verbose))
            .init();
    }

    Ok(Some(guard))
}

/// Console output; the progress bar owns stderr, so only warnings go there unless verbose
fn console_layer<S>(verbose: bool) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    fmt::layer().with_writer(std::io::stderr).with_filter(level)
}
