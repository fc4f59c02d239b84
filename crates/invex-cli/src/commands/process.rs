//! Process command - run invoice files through the worker pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use invex_core::{
    FileLoader, InvexConfig, Pipeline, PoolStats, QualitySnapshot, TaskOutcome, TaskReport, WorkerPool,
};

use super::config::{default_config_path, load_or_default};
use super::replay::{load_ground_truth, ReplayEngine};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Priority level for every submitted file (default: normal)
    #[arg(short, long)]
    priority: Option<u8>,

    /// Number of workers (overrides workers.count)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Directory for per-file `<file name>.record.json` output
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write a summary CSV to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Write the pending-queue snapshot here when interrupted
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Outcome of one file.
struct FileResult {
    path: PathBuf,
    report: TaskReport,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = match config_path {
        Some(path) => InvexConfig::from_file(Path::new(path))?,
        None => load_or_default(&default_config_path())?,
    };
    if let Some(jobs) = args.jobs {
        config.workers.count = jobs;
    }
    config.validate()?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| FileLoader::is_supported(p))
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!("{} Found {} files to process", style("ℹ").blue(), files.len());

    if let Some(output_dir) = &args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let engine = Arc::new(ReplayEngine::new());
    let pipeline = Pipeline::new(&config, engine.clone(), engine.clone()).with_loader(engine);
    let mut pool = WorkerPool::new(Arc::new(config), pipeline);
    let mut reports = pool
        .take_results()
        .ok_or_else(|| anyhow::anyhow!("worker pool result stream unavailable"))?;

    let mut submitted = 0usize;
    let mut rejected = Vec::new();
    for path in &files {
        let truth = load_ground_truth(path)?;
        match pool.submit(path.as_path().into(), args.priority, truth) {
            Ok(ticket) => {
                debug!(task_id = %ticket.id, file = %path.display(), "submitted");
                submitted += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "submission rejected");
                rejected.push((path.clone(), e.to_string()));
            }
        }
    }

    let pb = ProgressBar::new(submitted as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("=>-"),
    );

    let (mut results, interrupted) = collect(&mut reports, submitted, &pb, &args).await?;

    if interrupted {
        pb.abandon_with_message("interrupted");
    } else {
        pb.finish_with_message("complete");
    }

    // Workers finish their current task before exiting; only then are the
    // pending queue and the last reports final.
    let queue = Arc::clone(pool.queue());
    let monitor = Arc::clone(pool.monitor());
    pool.shutdown();
    let stats = pool.join().await;

    while let Ok(report) = reports.try_recv() {
        accept_report(report, &args, &pb, &mut results)?;
    }

    if let Some(snapshot_path) = &args.snapshot {
        if interrupted || !queue.is_empty() {
            let snapshot = queue.snapshot();
            fs::write(snapshot_path, serde_json::to_string_pretty(&snapshot)?)?;
            println!(
                "{} Queue snapshot ({} pending) written to {}",
                style("✓").green(),
                snapshot.entries.len(),
                snapshot_path.display()
            );
        }
    }

    let quality = monitor.snapshot();

    if let Some(summary_path) = &args.summary {
        write_summary(summary_path, &results)?;
        println!("{} Summary written to {}", style("✓").green(), summary_path.display());
    }

    print_summary(&results, &rejected, &stats, &quality, start);

    Ok(())
}

/// Receive reports until every submitted task resolved or Ctrl-C arrives.
async fn collect(
    reports: &mut mpsc::UnboundedReceiver<TaskReport>,
    expected: usize,
    pb: &ProgressBar,
    args: &ProcessArgs,
) -> anyhow::Result<(Vec<FileResult>, bool)> {
    let mut results = Vec::with_capacity(expected);

    while results.len() < expected {
        tokio::select! {
            report = reports.recv() => {
                let Some(report) = report else { break };
                accept_report(report, args, pb, &mut results)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!(resolved = results.len(), expected, "interrupted");
                return Ok((results, true));
            }
        }
    }

    Ok((results, false))
}

fn accept_report(
    report: TaskReport,
    args: &ProcessArgs,
    pb: &ProgressBar,
    results: &mut Vec<FileResult>,
) -> anyhow::Result<()> {
    let path = report.task.source.as_path().to_path_buf();
    if let Some(output_dir) = &args.output_dir {
        write_record(output_dir, &path, &report)?;
    }
    pb.set_message(format!("{}", style(file_name(&path)).dim()));
    pb.inc(1);
    results.push(FileResult { path, report });
    Ok(())
}

fn write_record(output_dir: &Path, source: &Path, report: &TaskReport) -> anyhow::Result<()> {
    let Some(record) = &report.record else {
        return Ok(());
    };

    let output_path = output_dir.join(record_file_name(source));
    fs::write(&output_path, serde_json::to_string_pretty(record)?)?;
    debug!("Wrote record to {}", output_path.display());
    Ok(())
}

fn write_summary(path: &Path, results: &[FileResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "task_id",
        "outcome",
        "status",
        "accepted_fields",
        "missing",
        "attempts",
        "retries",
        "reason",
    ])?;

    for result in results {
        let report = &result.report;
        let (status, accepted, missing) = match &report.record {
            Some(record) => (
                serde_json::to_value(record.status)?
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                record.accepted_count().to_string(),
                record.missing.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" "),
            ),
            None => (String::new(), String::new(), String::new()),
        };

        wtr.write_record([
            file_name(&result.path),
            report.task_id(),
            outcome_label(report.outcome),
            &status,
            &accepted,
            &missing,
            &report.task.attempts.to_string(),
            &report.task.retry_count.to_string(),
            report.reason.as_deref().unwrap_or(""),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

fn print_summary(
    results: &[FileResult],
    rejected: &[(PathBuf, String)],
    stats: &PoolStats,
    quality: &QualitySnapshot,
    start: Instant,
) {
    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} succeeded, {} failed, {} dead, {} retries",
        style(stats.succeeded).green(),
        style(stats.failed).red(),
        style(stats.dead).red(),
        stats.retries
    );

    if quality.samples > 0 {
        let pct = |v: Option<f64>| v.map(|v| format!("{:.1}%", v * 100.0)).unwrap_or_else(|| "n/a".to_string());
        println!(
            "{} Quality over {} samples: precision {}, recall {}, F1 {}",
            style("ℹ").blue(),
            quality.samples,
            pct(quality.precision),
            pct(quality.recall),
            pct(quality.f1)
        );
        if quality.alerting {
            for breach in &quality.breaches {
                println!(
                    "   {} {} {:.3} below minimum {:.3}",
                    style("⚠").yellow(),
                    breach.metric,
                    breach.value,
                    breach.minimum
                );
            }
        }
    }

    let unsuccessful: Vec<_> = results
        .iter()
        .filter(|r| r.report.outcome != TaskOutcome::Succeeded)
        .collect();
    if !unsuccessful.is_empty() || !rejected.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in unsuccessful {
            println!(
                "  - {} ({}): {}",
                result.path.display(),
                outcome_label(result.report.outcome),
                result.report.reason.as_deref().unwrap_or("unknown error")
            );
        }
        for (path, reason) in rejected {
            println!("  - {} (rejected): {}", path.display(), reason);
        }
    }
}

/// `a.png` → `a.png.record.json`, so sources differing only by extension stay apart.
fn record_file_name(source: &Path) -> String {
    let name = source.file_name().and_then(|s| s.to_str()).unwrap_or("invoice");
    format!("{}.record.json", name)
}

fn outcome_label(outcome: TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Succeeded => "succeeded",
        TaskOutcome::Failed => "failed",
        TaskOutcome::Dead => "dead",
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or("")
}
