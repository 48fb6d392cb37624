use clap::Parser;
use clap_derive::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use benchmark_delivery::benchmark::{Benchmarker, Method};
use benchmark_delivery::config::Config;
use benchmark_delivery::error::Result;
use benchmark_delivery::experiment::Experiment;

/// Arguments
/// `EXPERIMENT` - Experiment definition (JSON)
/// `--config, -c` - Environment configuration (JSON); defaults apply when omitted
/// `--output-dir, -o` - Where `csv/` and `results/` are written
/// `--rtts` - Comma separated RTT values in ms, overrides the experiment's
/// `--rounds, -r` - Measured rounds per cell, overrides the experiment's
/// `--methods, -m` - Comma separated subset of estargz, starlight, vanilla, wget
/// `--dry-run` - Run every phase without recording events
/// `--debug, -d` - Echo child process output
/// `--verbose, -v` - Debug level logging
#[derive(Parser, Debug)]
#[clap(name = "Benchmark Delivery", version)]
struct Args {
    experiment: PathBuf,
    #[arg(short, long, env = "BENCHMARK_DELIVERY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    rtts: Option<Vec<u32>>,
    #[arg(short, long)]
    rounds: Option<usize>,
    #[arg(short, long, value_delimiter = ',')]
    methods: Option<Vec<Method>>,
    #[arg(long, default_value = "")]
    suffix: String,
    #[arg(long)]
    dry_run: bool,
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose || args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("Benchmark Delivery v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }

    info!("Loading experiment from {}", args.experiment.display());
    let mut experiment = Experiment::from_file(&args.experiment)?;
    if let Some(rtts) = args.rtts {
        experiment.rtts = rtts;
    }
    if let Some(rounds) = args.rounds {
        experiment.set_rounds(rounds);
    }

    let mut benchmarker = Benchmarker::new(&config, experiment)
        .with_dry_run(args.dry_run)
        .with_debug(args.debug)
        .with_bundle_suffix(&args.suffix);
    if let Some(methods) = args.methods {
        benchmarker = benchmarker.with_methods(methods);
    }

    if let Err(e) = benchmarker.run().await {
        error!("Sweep failed: {}", e);
        return Err(e);
    }

    let bundle = benchmarker.save_events()?;
    info!("Wrote {} events to {}", benchmarker.log().len(), bundle.display());
    for path in benchmarker.save_results()? {
        info!("Wrote {}", path.display());
    }
    Ok(())
}
