use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use sonoprint::decode::{decode_audio, is_supported, SUPPORTED_EXTENSIONS};
use sonoprint::report::{self, ScanEntry, Summary};
use sonoprint::{
    device_info, AudioBuffer, BatchExtractor, Comparator, Config, DispatchMode, ExtractionParams,
    ExtractorKind, FingerprintCatalog, FingerprintRecord, MultiResolutionFingerprinter,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Files decoded and fingerprinted per round, to bound memory use.
const CHUNK_SIZE: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "sonoprint")]
#[command(author, version, about = "Fingerprint audio files and find near-duplicate recordings")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Batch dispatch mode: thread or isolated
    #[arg(long, global = true)]
    mode: Option<DispatchMode>,

    /// Extractor implementation: reference or optimized
    #[arg(long, global = true)]
    extractor: Option<ExtractorKind>,

    /// STFT window size (power of two, >= 256)
    #[arg(long, global = true)]
    n_fft: Option<usize>,

    /// STFT hop length in samples
    #[arg(long, global = true)]
    hop_length: Option<usize>,

    /// Only decode the first N seconds of each file
    #[arg(long, global = true)]
    max_seconds: Option<f64>,

    /// Debug logging and per-file details
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only show summary
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fingerprint every audio file under a path
    Scan {
        /// File or directory to scan
        path: PathBuf,

        /// Output report file (.csv, .json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for auto-generated reports
        #[arg(long, default_value = "sonoprint-reports")]
        report_dir: PathBuf,

        /// Don't auto-generate a report
        #[arg(long)]
        no_report: bool,
    },

    /// Score the similarity of two files
    Compare {
        a: PathBuf,
        b: PathBuf,

        /// Also report the multi-resolution score
        #[arg(long)]
        multi: bool,
    },

    /// Find files in a library that match a query file
    Match {
        /// Query audio file
        query: PathBuf,

        /// File or directory to search
        library: PathBuf,

        /// Compare against every library file instead of an LSH shortlist
        #[arg(long)]
        exhaustive: bool,

        /// Maximum LSH candidates to score
        #[arg(long, default_value = "100")]
        max_candidates: usize,

        /// Maximum matches to print
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Override the minimum combined score
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Show available compute as JSON
    Info,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31merror:\x1b[0m {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "sonoprint=debug"
    } else if quiet {
        "sonoprint=warn"
    } else {
        "sonoprint=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: Args) -> Result<ExitCode> {
    let config = resolve_config(&args)?;
    debug!(?config, "resolved configuration");

    match &args.command {
        Command::Scan {
            path,
            output,
            report_dir,
            no_report,
        } => scan(&args, &config, path, output.as_deref(), report_dir, *no_report),
        Command::Compare { a, b, multi } => compare(&args, &config, a, b, *multi),
        Command::Match {
            query,
            library,
            exhaustive,
            max_candidates,
            limit,
            min_score,
        } => {
            let mut config = config;
            if let Some(min) = min_score {
                config.thresholds.min_score = *min;
            }
            find_matches(&args, &config, query, library, *exhaustive, *max_candidates, *limit)
        }
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&device_info())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config file first, then command-line overrides.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(kind) = args.extractor {
        config.extractor = kind;
    }
    if let Some(mode) = args.mode {
        config.batch.mode = mode;
    }
    if args.jobs.is_some() {
        config.batch.max_workers = args.jobs;
    }
    if args.n_fft.is_some() || args.hop_length.is_some() {
        config.extraction = ExtractionParams::new(
            args.n_fft.unwrap_or(config.extraction.n_fft()),
            args.hop_length.unwrap_or(config.extraction.hop_length()),
        )?;
    }

    config.validate()?;
    Ok(config)
}

// ============================================================================
// scan
// ============================================================================

fn scan(
    args: &Args,
    config: &Config,
    path: &Path,
    output: Option<&Path>,
    report_dir: &Path,
    no_report: bool,
) -> Result<ExitCode> {
    let files = collect_files(path)?;

    if !args.quiet {
        eprintln!("\x1b[1mSonoprint - Audio Fingerprinting\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Found {} audio file(s)\n", files.len());
    }

    let results = fingerprint_files(args, config, &files)?;
    let entries: Vec<ScanEntry> = results
        .iter()
        .map(|(path, result)| match result {
            Ok(record) => ScanEntry::from_record(path, record),
            Err(e) => ScanEntry::from_error(path, format!("{:#}", e)),
        })
        .collect();

    if !args.quiet {
        for e in &entries {
            print_entry(e, args.verbose);
        }
    }

    let summary = Summary::from_entries(&entries);
    if !args.quiet {
        eprintln!("\n{}", "─".repeat(70));
        eprintln!("\x1b[1mSummary:\x1b[0m");
        eprintln!("  \x1b[32m✓ Fingerprinted:\x1b[0m {}", summary.fingerprinted);
        eprintln!("  \x1b[33m~ Silent:\x1b[0m        {}", summary.silent);
        if summary.errors > 0 {
            eprintln!("  \x1b[90mErrors:\x1b[0m          {}", summary.errors);
        }
    }

    let report_path = if let Some(output) = output {
        Some(output.to_path_buf())
    } else if !no_report {
        std::fs::create_dir_all(report_dir)
            .with_context(|| format!("creating {}", report_dir.display()))?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        Some(report_dir.join(format!("sonoprint_report_{}.csv", timestamp)))
    } else {
        None
    };

    if let Some(report_path) = report_path {
        report::generate(&report_path, &entries)
            .with_context(|| format!("writing report {}", report_path.display()))?;
        if !args.quiet {
            eprintln!("\n\x1b[32mReport saved: {}\x1b[0m", report_path.display());
        }
    }

    Ok(if summary.errors > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_entry(e: &ScanEntry, verbose: bool) {
    let reset = "\x1b[0m";
    if let Some(err) = &e.error {
        println!("\x1b[90m{:<10}{} {}  {}", "[ERROR]", reset, &e.file_name, err);
        return;
    }

    let (color, label) = if e.silent {
        ("\x1b[33m", "[SILENT]")
    } else {
        ("\x1b[32m", "[OK]")
    };
    println!(
        "{}{:<10}{} {}  {:>7.1}s  {:>7} peaks  {:>8.2}  {}",
        color,
        label,
        reset,
        &e.hash[..12.min(e.hash.len())],
        e.duration_secs,
        e.peak_count,
        e.confidence,
        &e.file_name
    );
    if verbose {
        eprintln!(
            "    {} Hz, {} time bins, hash {}",
            e.sample_rate, e.time_bins, e.hash
        );
    }
}

// ============================================================================
// compare
// ============================================================================

fn compare(args: &Args, config: &Config, a: &Path, b: &Path, multi: bool) -> Result<ExitCode> {
    let buffer_a = load_audio(a, args.max_seconds)?;
    let buffer_b = load_audio(b, args.max_seconds)?;

    let extractor = config.extractor.build();
    let record_a = extractor.extract(&buffer_a, &config.extraction)?;
    let record_b = extractor.extract(&buffer_b, &config.extraction)?;
    if !record_a.is_compatible_with(&record_b) {
        warn!(
            a = record_a.sample_rate(),
            b = record_b.sample_rate(),
            "sample rates differ; scores are not meaningful across rates"
        );
    }

    let comparator = Comparator::new(config.weights);
    let c = comparator.components(record_a.compact().values(), record_b.compact().values());

    println!("correlation:    {:.4}", c.correlation);
    println!("l2_similarity:  {:.4}", c.l2_similarity);
    println!("combined:       {:.4}", c.combined);

    if multi {
        let fingerprinter = MultiResolutionFingerprinter::new(config.extractor, comparator);
        let set_a = fingerprinter.extract_multi(&buffer_a)?;
        let set_b = fingerprinter.extract_multi(&buffer_b)?;
        println!("multi_resolution: {:.4}", fingerprinter.compare_multi(&set_a, &set_b));
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// match
// ============================================================================

fn find_matches(
    args: &Args,
    config: &Config,
    query: &Path,
    library: &Path,
    exhaustive: bool,
    max_candidates: usize,
    limit: usize,
) -> Result<ExitCode> {
    let query_buffer = load_audio(query, args.max_seconds)?;
    let query_record = config
        .extractor
        .build()
        .extract(&query_buffer, &config.extraction)?;
    if query_record.compact().is_empty() {
        bail!("{} produced an empty fingerprint", query.display());
    }

    let files = collect_files(library)?;
    let results = fingerprint_files(args, config, &files)?;

    let mut catalog = FingerprintCatalog::new(
        query_record.compact().len(),
        config.lsh,
        Comparator::new(config.weights),
        config.thresholds,
    )?;
    let mut errors = 0usize;
    for (path, result) in &results {
        match result {
            Ok(record) if record.is_compatible_with(&query_record) => {
                catalog.insert(path.display().to_string(), record);
            }
            Ok(_) => debug!(path = %path.display(), "skipping record with different sample rate or STFT parameters"),
            Err(e) => {
                errors += 1;
                warn!(path = %path.display(), error = %format!("{:#}", e), "skipping library file");
            }
        }
    }

    let matches = if exhaustive {
        catalog.exhaustive_search(&query_record)
    } else {
        catalog.search(&query_record, max_candidates)
    };

    if !args.quiet {
        eprintln!(
            "Searched {} file(s) ({}), {} match(es)\n",
            catalog.len(),
            if exhaustive { "exhaustive" } else { "lsh" },
            matches.len()
        );
    }

    if matches.is_empty() {
        println!("No matches above min_score {:.2}", config.thresholds.min_score);
    }
    for m in matches.iter().take(limit) {
        println!(
            "{:.4}  corr={:.4}  l2={:.4}  {:>7.1}s  {}",
            m.score, m.correlation, m.l2_similarity, m.duration, m.id
        );
    }

    Ok(if errors > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

// ============================================================================
// shared helpers
// ============================================================================

fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }

    let mut files: Vec<PathBuf> = if path.is_dir() {
        WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect()
    } else {
        vec![path.to_path_buf()]
    };
    files.sort();

    if files.is_empty() {
        bail!(
            "no audio files found under {} (supported: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }
    Ok(files)
}

fn load_audio(path: &Path, max_seconds: Option<f64>) -> Result<AudioBuffer> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_audio(&data, max_seconds).with_context(|| format!("decoding {}", path.display()))
}

/// Decode and fingerprint `files` in chunks, keeping one result per file
/// in input order.
fn fingerprint_files(
    args: &Args,
    config: &Config,
    files: &[PathBuf],
) -> Result<Vec<(PathBuf, Result<FingerprintRecord>)>> {
    let batch = BatchExtractor::from_config(config.extractor, config.extraction, &config.batch)?;

    let pb = if !args.quiet && files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut results = Vec::with_capacity(files.len());
    for chunk in files.chunks(CHUNK_SIZE) {
        let decoded: Vec<Result<AudioBuffer>> = chunk
            .par_iter()
            .map(|path| load_audio(path, args.max_seconds))
            .collect();

        let mut buffers = Vec::with_capacity(decoded.len());
        let mut failures = Vec::with_capacity(decoded.len());
        for d in decoded {
            match d {
                Ok(buffer) => {
                    buffers.push(buffer);
                    failures.push(None);
                }
                Err(e) => failures.push(Some(e)),
            }
        }
        let mut records = batch.batch_extract_each(&buffers).into_iter();

        for (path, failure) in chunk.iter().zip(failures) {
            let result = match failure {
                Some(e) => Err(e),
                None => match records.next() {
                    Some(r) => r
                        .map(FingerprintRecord::without_frames)
                        .map_err(anyhow::Error::from),
                    None => Err(anyhow::anyhow!("missing extraction result")),
                },
            };
            if let Some(ref pb) = pb {
                pb.inc(1);
                if let Some(name) = path.file_name() {
                    pb.set_message(name.to_string_lossy().into_owned());
                }
            }
            results.push((path.clone(), result));
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(results)
}
