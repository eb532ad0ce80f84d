use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use vidcull::core::cursor::{MatchingPairs, PairCursor, Step};
use vidcull::core::policy::{ComparisonMode, MatchThresholds, MatchVerdict, matches};
use vidcull::core::report::{
    DuplicateReport, readable_bitrate, readable_duration, readable_file_size, report_duplicates,
};
use vidcull::core::scanner::{Rejection, ScanOutcome, ScanProgress, ScannerService};
use vidcull::core::similarity::{SsimBlockSize, display_similarity};
use vidcull::core::thumbnail::ThumbnailMode;
use vidcull::core::video::VideoRecord;
use vidcull::services::{FfmpegProvider, SledCache};
use vidcull::ScanConfig;

#[derive(Parser, Debug)]
#[command(name = "vidcull", version, about = "Find near-duplicate videos")]
struct Cli {
    /// Config file (default: `<config dir>/vidcull/config.json`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fingerprint videos and list every matching pair
    Scan {
        #[command(flatten)]
        scan: ScanArgs,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Fingerprint videos and print only the duplicate summary
    Report {
        #[command(flatten)]
        scan: ScanArgs,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Step through matching pairs one at a time
    Compare {
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Directories or video files to scan
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Scorer that decides a match
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Frames sampled per video: 1, 2, 3, 4, 6, 8, 9, 12, 16 or cut-ends
    #[arg(long, value_parser = parse_sampling)]
    sampling: Option<ThumbnailMode>,

    /// Lower similarity bound in percent, applied to both scorers
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    lower: Option<u32>,

    /// Upper similarity bound in percent, applied to both scorers
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    upper: Option<u32>,

    /// Minimum matching bits of 64
    #[arg(long, value_parser = clap::value_parser!(i32).range(0..=64))]
    phash_min: Option<i32>,

    /// Maximum matching bits of 64
    #[arg(long, value_parser = clap::value_parser!(i32).range(0..=64))]
    phash_max: Option<i32>,

    /// SSIM window size in pixels: 4, 8, 16 or 32
    #[arg(long, value_parser = parse_block_size)]
    ssim_block: Option<SsimBlockSize>,

    /// Worker threads for fingerprinting
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Do not read or write the fingerprint cache
    #[arg(long)]
    no_cache: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Phash,
    Ssim,
}

impl From<ModeArg> for ComparisonMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Phash => ComparisonMode::Phash,
            ModeArg::Ssim => ComparisonMode::Ssim,
        }
    }
}

fn parse_sampling(value: &str) -> Result<ThumbnailMode, String> {
    ThumbnailMode::ALL
        .into_iter()
        .find(|mode| {
            mode.name() == value || (*mode != ThumbnailMode::CutEnds && mode.frame_count().to_string() == value)
        })
        .ok_or_else(|| format!("unknown sampling `{value}`"))
}

fn parse_block_size(value: &str) -> Result<SsimBlockSize, String> {
    value
        .parse::<usize>()
        .ok()
        .and_then(SsimBlockSize::from_pixels)
        .ok_or_else(|| format!("block size must be 4, 8, 16 or 32, got `{value}`"))
}

impl ScanArgs {
    /// Layer command line overrides on top of the loaded config.
    fn apply(&self, config: &mut ScanConfig) {
        let thresholds = &mut config.thresholds;
        if let Some(mode) = self.mode {
            thresholds.mode = mode.into();
        }
        if let Some(percent) = self.lower {
            thresholds.set_lower_percent(percent);
        }
        if let Some(percent) = self.upper {
            thresholds.set_upper_percent(percent);
        }
        if let Some(bits) = self.phash_min {
            thresholds.set_phash_min(bits);
        }
        if let Some(bits) = self.phash_max {
            thresholds.set_phash_max(bits);
        }
        if let Some(block) = self.ssim_block {
            thresholds.ssim_block_size = block;
        }
        if let Some(mode) = self.sampling {
            config.thumbnail_mode = mode;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
    }
}

#[derive(Serialize)]
struct PairJson<'a> {
    left: &'a Path,
    right: &'a Path,
    #[serde(flatten)]
    verdict: MatchVerdict,
}

#[derive(Serialize)]
struct ScanJson<'a> {
    videos: usize,
    rejected: &'a [Rejection],
    pairs: Vec<PairJson<'a>>,
    report: DuplicateReport,
    cancelled: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => ScanConfig::default_path()?,
    };

    match cli.command {
        Commands::Scan { scan, json } => {
            let config = load_config(&config_path, &scan)?;
            let outcome = fingerprint(&config, &scan)?;
            let pairs = matching_pairs(&outcome.accepted, &config.thresholds);
            let report = benchmark("duplicate report", || {
                report_duplicates(&outcome.accepted, &config.thresholds)
            });

            if json {
                let body = ScanJson {
                    videos: outcome.accepted.len(),
                    rejected: &outcome.rejected,
                    pairs: pairs
                        .iter()
                        .map(|(l, r, verdict)| PairJson {
                            left: &outcome.accepted[*l].path,
                            right: &outcome.accepted[*r].path,
                            verdict: *verdict,
                        })
                        .collect(),
                    report,
                    cancelled: outcome.cancelled,
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }

            print_rejections(&outcome.rejected);
            if pairs.is_empty() {
                println!("No matching videos found.");
            } else {
                println!("Found {} matching pair(s):", pairs.len());
                let mode = config.thresholds.mode;
                for (l, r, verdict) in &pairs {
                    println!("\n ✨ {}", similarity_label(verdict, mode));
                    println!("   ▶ {}", outcome.accepted[*l].path.display());
                    println!("   ▶ {}", outcome.accepted[*r].path.display());
                }
            }
            print_report(&report);
        }

        Commands::Report { scan, json } => {
            let config = load_config(&config_path, &scan)?;
            let outcome = fingerprint(&config, &scan)?;
            let report = benchmark("duplicate report", || {
                report_duplicates(&outcome.accepted, &config.thresholds)
            });

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_rejections(&outcome.rejected);
                print_report(&report);
            }
        }

        Commands::Compare { scan } => {
            let config = load_config(&config_path, &scan)?;
            let outcome = fingerprint(&config, &scan)?;
            print_rejections(&outcome.rejected);
            compare(&outcome.accepted, &config.thresholds)?;
        }

        Commands::Config { command } => match command {
            ConfigCmd::Show => {
                let config = ScanConfig::load_or_default(&config_path).with_context(|| {
                    format!("Failed to load config {}", config_path.display())
                })?;
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCmd::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists; use --force to overwrite",
                        config_path.display()
                    );
                }
                ScanConfig::default()
                    .save(&config_path)
                    .with_context(|| format!("Failed to write {}", config_path.display()))?;
                println!("✅ Wrote default config to {}", config_path.display());
            }
            ConfigCmd::Path => println!("{}", config_path.display()),
        },
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: &Path, scan: &ScanArgs) -> Result<ScanConfig> {
    let mut config = ScanConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    scan.apply(&mut config);
    log::debug!("Effective config: {:?}", config);
    Ok(config)
}

/// Discover and fingerprint the videos under the scan paths.
fn fingerprint(config: &ScanConfig, scan: &ScanArgs) -> Result<ScanOutcome> {
    let provider = FfmpegProvider::locate().context("ffmpeg and ffprobe must be on PATH")?;
    log::info!("Using {}", provider.ffmpeg_path().display());

    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
    let mut service =
        ScannerService::new(config.clone(), Box::new(provider)).with_progress_sender(progress_tx);

    if !scan.no_cache {
        let cache_dir = config.cache_dir()?;
        let cache = SledCache::open(&cache_dir)
            .with_context(|| format!("Failed to open cache {}", cache_dir.display()))?;
        service = service.with_cache(Box::new(cache));
    }

    for path in &scan.paths {
        println!("▶ Scanning for videos in: {}", path.display());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for videos…");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let files = service.discover_files(&scan.paths)?;
    spinner.finish_with_message(format!("Found {} video(s)", files.len()));

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );
    let watcher = spawn_progress(bar.clone(), progress_rx);

    let token = service.get_cancellation_token();
    install_interrupt_handler(token.clone())?;

    let outcome = benchmark("fingerprinting all videos", || service.fingerprint_all(files))?;

    // from here on a Ctrl-C quits right away
    token.store(true, Ordering::Relaxed);

    // closing the channel ends the watcher
    drop(service);
    let _ = watcher.join();
    bar.finish_and_clear();

    println!(
        "▶ {} video(s) fingerprinted, {} from cache, {} rejected",
        outcome.accepted.len(),
        outcome.accepted.iter().filter(|r| r.from_cache).count(),
        outcome.rejected.len()
    );
    if outcome.cancelled && !scan.no_cache {
        println!("⚠️  Scan interrupted; finished fingerprints are cached for the next run");
    } else if outcome.cancelled {
        println!("⚠️  Scan interrupted");
    }
    Ok(outcome)
}

/// First Ctrl-C stops the pass between videos, a second one exits.
fn install_interrupt_handler(token: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler")?;

    thread::spawn(move || {
        runtime.block_on(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                if token.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
                eprintln!("\n⚠️  Stopping after the videos in progress, press Ctrl-C again to quit");
            }
        });
    });
    Ok(())
}

fn spawn_progress(
    bar: ProgressBar,
    mut progress_rx: mpsc::UnboundedReceiver<ScanProgress>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Some(progress) = progress_rx.blocking_recv() {
            bar.set_length(progress.total_files as u64);
            bar.set_position(progress.files_processed as u64);
            let file = Path::new(&progress.current_file)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or(progress.current_file);
            match progress.estimated_time_remaining {
                Some(eta) if eta > 0 => bar.set_message(format!("{file} (~{eta}s left)")),
                _ => bar.set_message(file),
            }
        }
    })
}

/// Every pair the cursor stops on, in triangular order.
fn matching_pairs(
    records: &[VideoRecord],
    thresholds: &MatchThresholds,
) -> Vec<(usize, usize, MatchVerdict)> {
    let mut filter = MatchingPairs::new(records, thresholds);
    let (mut cursor, mut step) = PairCursor::start(&mut filter);
    let mut pairs = Vec::new();
    while let Step::Match { left, right } = step {
        pairs.push((left, right, filter.last_verdict()));
        step = cursor.advance(&mut filter);
    }
    pairs
}

fn compare(records: &[VideoRecord], thresholds: &MatchThresholds) -> Result<()> {
    let mut filter = MatchingPairs::new(records, thresholds);
    let (mut cursor, first) = PairCursor::start(&mut filter);
    if first == Step::Exhausted {
        println!("No matching videos found (a lower threshold may help to find more matches).");
        return Ok(());
    }

    let choices = ["Next", "Previous", "Quit"];
    loop {
        if let Some((left, right)) = cursor.pair() {
            let verdict = matches(
                &records[left].fingerprint,
                &records[right].fingerprint,
                thresholds,
            );
            println!(
                "\n[{}/{}] {}",
                cursor.comparisons_so_far(),
                cursor.total_comparisons(),
                similarity_label(&verdict, thresholds.mode)
            );
            print_video("left ", &records[left]);
            print_video("right", &records[right]);
        }

        let choice = Select::new()
            .with_prompt("Compare")
            .items(&choices)
            .default(0)
            .interact()?;

        let step = match choice {
            0 => cursor.advance(&mut filter),
            1 => cursor.retreat(&mut filter),
            _ => break,
        };

        if step == Step::Exhausted {
            let close = Confirm::new()
                .with_prompt("Out of videos to compare. Close?")
                .default(false)
                .interact()?;
            if close {
                break;
            }
        }
    }

    Ok(())
}

fn print_video(side: &str, video: &VideoRecord) {
    let media = &video.media;
    println!("  {side} ▶ {}", video.path.display());
    println!(
        "          {} | {} | {} | {} | {} | {}",
        readable_file_size(video.size),
        readable_duration(media.duration_ms),
        media.resolution(),
        if media.framerate > 0.0 {
            format!("{} FPS", media.framerate)
        } else {
            String::new()
        },
        readable_bitrate(media.bitrate),
        media.codec,
    );
    if !media.audio.is_empty() {
        println!("          {}", media.audio);
    }
    println!(
        "          modified {}",
        video.modified.format("%Y-%m-%d %H:%M:%S")
    );
}

fn similarity_label(verdict: &MatchVerdict, mode: ComparisonMode) -> String {
    match mode {
        ComparisonMode::Phash => format!("{}/64 same bits", verdict.best_phash),
        ComparisonMode::Ssim => format!(
            "{:.3} SSIM index",
            display_similarity(verdict.best_similarity(mode))
        ),
    }
}

fn print_rejections(rejected: &[Rejection]) {
    for rejection in rejected {
        eprintln!(
            "⚠️  Skipped {}: {}",
            rejection.path.display(),
            rejection.reason
        );
    }
}

fn print_report(report: &DuplicateReport) {
    if report.match_count == 0 {
        return;
    }
    println!(
        "\nFound {} video(s) ({}) with one or more matches",
        report.match_count,
        readable_file_size(report.reclaimable_bytes)
    );
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sampling_accepts_counts_and_names() {
        assert_eq!(parse_sampling("8"), Ok(ThumbnailMode::Thumb8));
        assert_eq!(parse_sampling("thumb12"), Ok(ThumbnailMode::Thumb12));
        assert_eq!(parse_sampling("cut-ends"), Ok(ThumbnailMode::CutEnds));
        assert!(parse_sampling("5").is_err());
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let cli = Cli::parse_from([
            "vidcull", "scan", "/videos", "--mode", "ssim", "--lower", "80", "--phash-min",
            "60", "--ssim-block", "8", "--sampling", "cut-ends", "-j", "3",
        ]);
        let Commands::Scan { scan, json } = cli.command else {
            panic!("expected scan");
        };
        assert!(!json);

        let mut config = ScanConfig::default();
        scan.apply(&mut config);

        assert_eq!(config.thresholds.mode, ComparisonMode::Ssim);
        assert!((config.thresholds.ssim_min() - 0.8).abs() < 1e-9);
        assert_eq!(config.thresholds.phash_min(), 60);
        assert_eq!(config.thresholds.ssim_block_size, SsimBlockSize::B8);
        assert_eq!(config.thumbnail_mode, ThumbnailMode::CutEnds);
        assert_eq!(config.jobs, 3);
    }

    #[test]
    fn test_invalid_block_size_is_rejected() {
        let result = Cli::try_parse_from(["vidcull", "report", "/videos", "--ssim-block", "12"]);
        assert!(result.is_err());
    }
}
