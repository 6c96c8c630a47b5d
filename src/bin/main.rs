//! rankcv Command Line Interface
//!
//! Evaluates rank-comparison classifiers and kernel SVMs on expression data
//! stored as dense CSV files.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info, warn};
use rankcv::config::EvaluationConfig;
use rankcv::core::{BinaryLabels, KernelMatrix, RankCvError, Result};
use rankcv::cv::{ConvergencePoint, CvEngine, Dataset, ModelSpec, RunReport, Runner};
use rankcv::data::{load_partition, CsvDataset};
use rankcv::kernel::{KernelMatrixBuilder, KernelSpec};
use rankcv::pairs::{score_pairs, top_k};
use rankcv::utils::seed::derive_seed;
use rankcv::utils::stats::std_dev;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "rankcv")]
#[command(about = "Rank-comparison and Kendall kernel classifiers under cross-validation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the model battery over one or more datasets
    Evaluate(EvaluateArgs),
    /// Print the top scoring feature pairs of a dataset
    Pairs(PairsArgs),
    /// Build a kernel matrix and write it as CSV
    Kernel(KernelArgs),
    /// Monte-Carlo convergence of the stabilized Kendall kernel
    Convergence(ConvergenceArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run seed (overrides the configuration)
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (overrides the configuration)
    #[arg(long)]
    workers: Option<usize>,
}

impl ConfigArgs {
    fn load(&self) -> Result<EvaluationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from: {path:?}");
                EvaluationConfig::from_file(path)?
            }
            None => EvaluationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct EvaluateArgs {
    /// Dataset files (CSV, label in the last column)
    #[arg(long, required = true, num_args = 1..)]
    data: Vec<PathBuf>,

    /// Fixed test partition; switches a single dataset to held-out mode
    #[arg(long)]
    test: Option<PathBuf>,

    /// JSON file with the list of models (defaults to the standard battery)
    #[arg(long)]
    models: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct PairsArgs {
    /// Dataset file
    #[arg(long)]
    data: PathBuf,

    /// Number of pairs to print
    #[arg(short, long, default_value = "10")]
    k: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliKernel {
    #[value(name = "linear")]
    Linear,
    #[value(name = "poly")]
    Polynomial,
    #[value(name = "rbf")]
    Gaussian,
    #[value(name = "kendall")]
    Kendall,
    /// Kendall kernel under uniform noise
    #[value(name = "kendall-stab")]
    StabilizedKendall,
}

#[derive(Args)]
struct KernelArgs {
    /// Dataset file
    #[arg(long)]
    data: PathBuf,

    /// Kernel family
    #[arg(long, default_value = "kendall")]
    kernel: CliKernel,

    /// Gaussian bandwidth (median heuristic if omitted)
    #[arg(long)]
    sigma: Option<f64>,

    /// Noise window of the stabilized Kendall kernel
    #[arg(long, default_value = "1.0")]
    window: f64,

    /// Monte-Carlo draws of the stabilized Kendall kernel (exact if omitted)
    #[arg(long)]
    draws: Option<usize>,

    /// Seed of the Monte-Carlo noise
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Output CSV file (prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl KernelArgs {
    fn spec(&self) -> KernelSpec {
        match self.kernel {
            CliKernel::Linear => KernelSpec::Linear,
            CliKernel::Polynomial => KernelSpec::Polynomial,
            CliKernel::Gaussian => KernelSpec::Gaussian { sigma: self.sigma },
            CliKernel::Kendall => KernelSpec::Kendall,
            CliKernel::StabilizedKendall => KernelSpec::StabilizedKendall {
                window: self.window,
                draws: self.draws,
            },
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Sweep {
    /// Vary the draw count at a fixed window
    #[value(name = "draws")]
    Draws,
    /// Vary the window at a fixed draw count
    #[value(name = "window")]
    Window,
}

#[derive(Args)]
struct ConvergenceArgs {
    /// Dataset file
    #[arg(long)]
    data: PathBuf,

    /// Which parameter to sweep
    #[arg(long, default_value = "draws")]
    sweep: Sweep,

    /// Window held fixed when sweeping draws
    #[arg(long, default_value = "1.0")]
    window: f64,

    /// Draw count held fixed when sweeping windows (exact kernel if omitted)
    #[arg(long)]
    draws: Option<usize>,

    /// Write the curve as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Evaluate(args) => evaluate_command(args),
        Commands::Pairs(args) => pairs_command(args),
        Commands::Kernel(args) => kernel_command(args),
        Commands::Convergence(args) => convergence_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn evaluate_command(args: EvaluateArgs) -> Result<()> {
    let config = args.config.load()?;

    let datasets = match &args.test {
        Some(test) => {
            if args.data.len() != 1 {
                return Err(RankCvError::config(
                    "--test requires exactly one --data file",
                ));
            }
            let train = &args.data[0];
            info!("Held-out evaluation: train on {train:?}, test on {test:?}");
            vec![Dataset::held_out(
                dataset_name(train),
                load_partition(train)?,
                load_partition(test)?,
            )]
        }
        None => args
            .data
            .iter()
            .map(|path| {
                let partition = load_partition(path)?;
                Ok(Dataset::nested(
                    dataset_name(path),
                    partition.features,
                    partition.labels,
                ))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let models: Vec<ModelSpec> = match &args.models {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ModelSpec::default_battery(&config),
    };
    info!("Evaluating {} models", models.len());

    let report = Runner::new(config)?.run(&datasets, &models)?;
    print_report(&report);

    if let Some(output) = &args.output {
        fs::write(output, report.to_json()?)?;
        info!("Report saved to: {output:?}");
    }
    for failure in &report.failures {
        warn!(
            "Failed unit: dataset '{}', model {:?}, fold {:?}: {}",
            failure.dataset, failure.model, failure.fold, failure.message
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("=== Evaluation Results ===");
    println!(
        "{:<20} {:<28} {:>9} {:>8} {:>6}",
        "dataset", "model", "accuracy", "std", "folds"
    );
    for result in &report.results {
        println!(
            "{:<20} {:<28} {:>8.2}% {:>8.4} {:>6}{}",
            result.dataset,
            result.model,
            result.accuracy() * 100.0,
            std_dev(&result.fold_accuracy),
            result.fold_accuracy.len(),
            if result.inconclusive {
                "  (inconclusive)"
            } else {
                ""
            }
        );
    }
    println!("\nStatus: {:?}", report.status());
}

fn pairs_command(args: PairsArgs) -> Result<()> {
    info!("Loading dataset from: {:?}", args.data);
    let dataset = CsvDataset::from_file(&args.data)?;
    let labels = BinaryLabels::new(&dataset.labels)?;
    let ranked = score_pairs(&dataset.features, &labels)?;
    let best = top_k(&ranked, args.k)?;

    let name = |i: usize| match &dataset.feature_names {
        Some(names) => names[i].clone(),
        None => format!("f{i}"),
    };
    println!("# Top {} of {} pairs", best.len(), ranked.len());
    println!("# Format: rank first second score");
    for (rank, pair) in best.iter().enumerate() {
        println!(
            "{} {} {} {:.6}",
            rank + 1,
            name(pair.first),
            name(pair.second),
            pair.score
        );
    }
    Ok(())
}

fn kernel_command(args: KernelArgs) -> Result<()> {
    info!("Loading dataset from: {:?}", args.data);
    let dataset = CsvDataset::from_file(&args.data)?;
    let spec = args.spec();
    let kernel = KernelMatrixBuilder::new(args.seed).build(&dataset.features, &spec, None)?;
    info!("Built {spec} kernel of size {}", kernel.size());

    match &args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            write_kernel(&mut writer, &kernel)?;
            writer.flush()?;
            info!("Kernel saved to: {path:?}");
        }
        None => write_kernel(&mut std::io::stdout().lock(), &kernel)?,
    }
    Ok(())
}

fn write_kernel<W: Write>(writer: &mut W, kernel: &KernelMatrix) -> Result<()> {
    for a in 0..kernel.size() {
        let row: Vec<String> = kernel.row(a).iter().map(|v| format!("{v:.8}")).collect();
        writeln!(writer, "{}", row.join(","))?;
    }
    Ok(())
}

fn convergence_command(args: ConvergenceArgs) -> Result<()> {
    let config = args.config.load()?;
    let partition = load_partition(&args.data)?;
    let dataset = Dataset::nested(dataset_name(&args.data), partition.features, partition.labels);
    let seed = derive_seed(config.seed, &[0]);
    let engine = CvEngine::new(config)?;

    let curve = match args.sweep {
        Sweep::Draws => engine.draw_count_curve(&dataset, args.window, seed)?,
        Sweep::Window => engine.window_curve(&dataset, args.draws, seed)?,
    };
    print_curve(&curve);

    if let Some(output) = &args.output {
        fs::write(output, serde_json::to_string_pretty(&curve)?)?;
        info!("Curve saved to: {output:?}");
    }
    Ok(())
}

fn print_curve(curve: &[ConvergencePoint]) {
    println!("=== Convergence ===");
    println!("{:>8} {:>8} {:>9} {:>10}", "window", "draws", "accuracy", "deviation");
    for point in curve {
        let draws = point
            .draws
            .map_or_else(|| "exact".to_string(), |d| d.to_string());
        println!(
            "{:>8} {:>8} {:>8.2}% {:>10.6}",
            point.window,
            draws,
            point.accuracy * 100.0,
            point.deviation
        );
    }
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_name() {
        assert_eq!(dataset_name(Path::new("data/colon.csv")), "colon");
        assert_eq!(dataset_name(Path::new("leukemia")), "leukemia");
    }

    #[test]
    fn test_kernel_args_spec() {
        let args = KernelArgs {
            data: PathBuf::from("x.csv"),
            kernel: CliKernel::StabilizedKendall,
            sigma: None,
            window: 0.5,
            draws: Some(10),
            seed: 0,
            output: None,
        };
        assert_eq!(
            args.spec(),
            KernelSpec::StabilizedKendall {
                window: 0.5,
                draws: Some(10)
            }
        );
    }
}
