#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::Array1;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use slipper::config::RunConfig;
use slipper::pipeline;
use slipper::simulate;
use slipper::summary::PsdSummary;

#[derive(Args)]
pub struct FitArgs {
    /// Path to the time series: one value per line, or one value per row of a delimited file
    pub series: PathBuf,

    /// TOML run configuration; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of B-spline basis functions
    #[arg(long)]
    pub k: Option<usize>,

    /// Number of recorded MCMC iterations, including the initial state
    #[arg(long)]
    pub n_steps: Option<usize>,

    /// Sweeps per recorded iteration
    #[arg(long)]
    pub thin: Option<usize>,

    /// Leading iterations discarded before summarising
    #[arg(long)]
    pub burnin: Option<usize>,

    /// Seed of the sampler's random number generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Show a progress bar while sampling
    #[arg(long)]
    pub progress: bool,

    /// Output TSV with frequency, lower, median and upper columns
    #[arg(long, default_value = "psd.tsv")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of points to generate
    #[arg(long, default_value = "1024")]
    pub n: usize,

    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Output file, one value per line
    #[arg(long, default_value = "ar4.txt")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "slipper",
    about = "Bayesian power spectral density estimation with penalised B-spline mixtures",
    long_about = "Fits a penalised B-spline mixture to the periodogram of a time series \
                 under the Whittle likelihood with an adaptive Metropolis-within-Gibbs sampler."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Estimate the PSD of a series (outputs: psd.tsv)")]
    Fit(FitArgs),
    #[command(about = "Simulate the AR(4) benchmark series")]
    Simulate(SimulateArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Fit(args)) => run_fit(args),
        Some(Commands::Simulate(args)) => run_simulate(args),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(k) = args.k {
        config.spline.k = k;
    }
    if let Some(n_steps) = args.n_steps {
        config.sampler.n_steps = n_steps;
    }
    if let Some(thin) = args.thin {
        config.sampler.thin = thin;
    }
    if let Some(burnin) = args.burnin {
        config.sampler.burnin = burnin;
    }
    if let Some(seed) = args.seed {
        config.sampler.seed = seed;
    }
    config.sampler.show_progress |= args.progress;

    println!("Loading series from: {}", args.series.display());
    let series = load_series(&args.series)?;
    println!("Loaded {} observations", series.len());

    let fit = pipeline::fit(series.view(), &config)?;
    save_summary(&fit.summary, &args.output)?;
    println!(
        "PSD estimate saved to: {} (mean acceptance {:.3})",
        args.output.display(),
        fit.summary.mean_accept_frac
    );
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let series = simulate::ar4_series(args.n, args.seed);
    let mut file = std::io::BufWriter::new(std::fs::File::create(&args.output)?);
    for x in series.iter() {
        writeln!(file, "{x}")?;
    }
    file.flush()?;
    println!(
        "Simulated {} AR(4) values saved to: {}",
        args.n,
        args.output.display()
    );
    Ok(())
}

/// Reads the first column of a headerless whitespace-, comma- or tab-separated file.
fn load_series(path: &Path) -> Result<Array1<f64>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let delimiter = if text.contains('\t') {
        b'\t'
    } else if text.contains(',') {
        b','
    } else {
        b' '
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let Some(field) = record.iter().find(|f| !f.is_empty()) else {
            continue;
        };
        let value: f64 = field
            .parse()
            .map_err(|e| format!("line {}: cannot parse '{field}' as a number: {e}", line + 1))?;
        values.push(value);
    }
    Ok(Array1::from_vec(values))
}

fn save_summary(summary: &PsdSummary, output_path: &Path) -> Result<(), std::io::Error> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(output_path)?);
    writeln!(file, "frequency\tlower\tmedian\tupper")?;
    for i in 0..summary.frequencies.len() {
        writeln!(
            file,
            "{}\t{}\t{}\t{}",
            summary.frequencies[i], summary.lower[i], summary.median[i], summary.upper[i]
        )?;
    }
    file.flush()
}
