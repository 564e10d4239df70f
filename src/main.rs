use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use concord::{
    export_csv, open_extractor, DiscoveryConfig, ExtractionReport, Extractor, ExtractorConfig,
    WindowConfig,
};

#[derive(Parser)]
#[command(name = "concord")]
#[command(author, version, about = "Annotator consensus for windowed physiological signals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the waveforms and annotations come from
#[derive(Args)]
struct InputArgs {
    /// Waveform source file or folder of sources
    #[arg(short, long)]
    input: PathBuf,

    /// Folder searched for annotation files (defaults to next to the input)
    #[arg(short, long)]
    annotations: Option<PathBuf>,

    /// Window duration in seconds
    #[arg(long, default_value = "10")]
    window_secs: u64,

    /// Name given to annotation runs without an annotator
    #[arg(long, default_value = "Unknown")]
    unknown_annotator: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge all annotators' labels of a signal into weighted segments
    Extract {
        #[command(flatten)]
        source: InputArgs,

        /// Signal name (case-insensitive)
        #[arg(short, long)]
        signal: String,

        /// Output file for the JSON report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail when two segments share an identity
        #[arg(long)]
        strict: bool,
    },

    /// Print pairwise annotator agreement for a signal
    Agreement {
        #[command(flatten)]
        source: InputArgs,

        /// Signal name (case-insensitive)
        #[arg(short, long)]
        signal: String,

        /// Compare anomalous windows only
        #[arg(long)]
        anomalies_only: bool,
    },

    /// Describe sources, signals and annotations
    Describe {
        #[command(flatten)]
        source: InputArgs,

        /// Also write the description to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export every annotated signal's segments as CSV files
    Export {
        #[command(flatten)]
        source: InputArgs,

        /// Directory for the CSV files
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            source,
            signal,
            output,
            strict,
        } => {
            setup_logging(source.verbose);
            let extractor = open(&source)?;
            extract_signal(extractor.as_ref(), &signal, output.as_deref(), strict)
        }
        Commands::Agreement {
            source,
            signal,
            anomalies_only,
        } => {
            setup_logging(source.verbose);
            let extractor = open(&source)?;
            print_agreement(extractor.as_ref(), &signal, !anomalies_only)
        }
        Commands::Describe { source, output } => {
            setup_logging(source.verbose);
            let extractor = open(&source)?;
            let description = extractor.describe();
            println!("{}", description);
            if let Some(path) = output {
                concord::io::write_text(&path, &description)?;
                info!("Description written to {:?}", path);
            }
            Ok(())
        }
        Commands::Export { source, output_dir } => {
            setup_logging(source.verbose);
            let extractor = open(&source)?;
            let summary = export_csv(extractor.as_ref(), &output_dir)?;
            info!(
                "Exported {} signals ({} files), skipped {} signals",
                summary.signals_exported, summary.files_written, summary.signals_skipped
            );
            if summary.sources_failed > 0 {
                warn!("{} source exports failed, see warnings above", summary.sources_failed);
            }
            Ok(())
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn open(args: &InputArgs) -> Result<Box<dyn Extractor>> {
    let extractor_config = ExtractorConfig {
        window: WindowConfig {
            window_secs: args.window_secs,
        },
        unknown_annotator: args.unknown_annotator.clone(),
    };
    info!("Loading waveforms from {:?}", args.input);
    open_extractor(
        &args.input,
        args.annotations.as_deref(),
        &extractor_config,
        &DiscoveryConfig::default(),
    )
    .context("Failed to open input")
}

fn extract_signal(
    extractor: &dyn Extractor,
    signal: &str,
    output: Option<&Path>,
    strict: bool,
) -> Result<()> {
    let extraction = extractor
        .extract(signal)
        .with_context(|| format!("Failed to extract signal {}", signal))?;

    if strict {
        extraction.ensure_unique()?;
    } else if !extraction.collisions.is_empty() {
        warn!(
            "{} identity collisions reported (use --strict to fail)",
            extraction.collisions.len()
        );
    }

    let counts = extractor.annotated_anomalies(signal)?;
    let agreement = extractor.consensus_matrix(signal, true).ok();

    info!(
        "{}: {} good segments, {} anomalous segments",
        signal,
        extraction.good.len(),
        extraction.anomalous.len()
    );
    for (annotator, count) in &counts {
        info!("  {} flagged {} windows", annotator, count);
    }

    let mut weights: Vec<f64> = extraction.anomalous.iter().map(|s| s.weight).collect();
    weights.sort_by(|a, b| b.total_cmp(a));
    if !weights.is_empty() {
        info!("Anomalous segment weights (descending): {:?}", weights);
    }

    if let Some(path) = output {
        let report = ExtractionReport::new(signal, &extraction, counts, agreement);
        report.write_json(path)?;
        info!("Report written to {:?}", path);
    }

    Ok(())
}

fn print_agreement(extractor: &dyn Extractor, signal: &str, include_good: bool) -> Result<()> {
    let matrix = extractor
        .consensus_matrix(signal, include_good)
        .with_context(|| format!("Failed to compute agreement for signal {}", signal))?;

    println!("Agreement for {}", signal);
    println!("==============={}", "=".repeat(signal.len()));
    if matrix.is_empty() {
        println!("No annotators");
        return Ok(());
    }
    print!("{}", matrix.to_table());

    let names = extractor.annotators(signal)?;
    if !names.outliers.is_empty() {
        println!();
        println!("Annotators missing from some sources");
        println!("------------------------------------");
        for (source, annotators) in &names.outliers {
            println!("{}: {}", source, annotators.join(", "));
        }
    }

    Ok(())
}
