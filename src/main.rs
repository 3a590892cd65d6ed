// src/main.rs
//
// Command-line entrypoint for the RTL regression runner.
//
// - Option names follow the existing regression flow (--o, --lsf_cmd, ...).
// - Exit status: 0 when every enabled step succeeded and every compared run
//   passed, 1 otherwise.
// - Seeds: --seed (same for all), --start_seed (counting up) or a random
//   base, printed in the run header so the regression can be repeated.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};

use rtl_regress::compare::Iss;
use rtl_regress::config::{BatchQueue, Enables};
use rtl_regress::logging;
use rtl_regress::pipeline::{self, PipelineConfig, SeedChoice, Steps};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum IssArg {
    Spike,
    Ovpsim,
}

#[derive(Debug, Parser)]
#[command(
    name = "rtl_regress",
    about = "Run an RTL simulation regression and compare against an ISS",
    version
)]
struct Args {
    /// Output directory.
    #[arg(long = "o", default_value = "out")]
    o: PathBuf,

    /// RTL simulator (tool entry in the simulator setup file).
    #[arg(long, default_value = "vcs")]
    simulator: String,

    /// Simulator setup file.
    #[arg(long = "simulator_yaml", default_value = "yaml/rtl_simulation.yaml")]
    simulator_yaml: PathBuf,

    /// Verbosity: -v, -vv
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Compile options for the testbench.
    #[arg(long = "cmp_opts", default_value = "", allow_hyphen_values = true)]
    cmp_opts: String,

    /// Simulation options applied to every run.
    #[arg(long = "sim_opts", default_value = "", allow_hyphen_values = true)]
    sim_opts: String,

    /// Enable coverage collection.
    #[arg(long = "en_cov")]
    en_cov: bool,

    /// Enable waveform dumping.
    #[arg(long = "en_wave")]
    en_wave: bool,

    /// Enable co-simulation.
    #[arg(long = "en_cosim")]
    en_cosim: bool,

    /// Steps to run: all, or a comma-separated list of compile, sim, compare, cov.
    #[arg(long, default_value = "all")]
    steps: String,

    /// Batch queue submission prefix, e.g. "bsub -Is". Runs simulations in parallel.
    #[arg(long = "lsf_cmd", allow_hyphen_values = true)]
    lsf_cmd: Option<String>,

    /// Test list YAML.
    #[arg(long)]
    testlist: Option<PathBuf>,

    /// Tests to run: all, or a comma-separated list of test names.
    #[arg(long, default_value = "all")]
    test: String,

    /// Directory of generated test binaries ({test}_{iteration}.bin).
    #[arg(long = "bin_dir")]
    bin_dir: Option<PathBuf>,

    /// Reference instruction set simulator.
    #[arg(long, value_enum, default_value = "spike")]
    iss: IssArg,

    /// Use this seed for every iteration.
    #[arg(long, conflicts_with_all = ["start_seed", "seed_base"])]
    seed: Option<u32>,

    /// Seed of iteration 0; iteration i uses start_seed + i.
    #[arg(long = "start_seed", conflicts_with = "seed_base")]
    start_seed: Option<u32>,

    /// Base of the random seed sequence (chosen at random if omitted).
    #[arg(long = "seed_base")]
    seed_base: Option<u64>,

    /// Trace tool command file, needed by the compare step.
    #[arg(long = "trace_tools")]
    trace_tools: Option<PathBuf>,

    /// Testbench root, substituted for <cwd> in the sim command.
    #[arg(long = "core_dir", default_value = ".")]
    core_dir: PathBuf,
}

fn seed_choice(args: &Args) -> SeedChoice {
    match (args.seed, args.start_seed) {
        (Some(seed), _) => SeedChoice::Fixed(seed),
        (None, Some(start)) => SeedChoice::Start(start),
        (None, None) => SeedChoice::Random(args.seed_base.unwrap_or_else(rand::random)),
    }
}

fn build_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let steps = Steps::parse(&args.steps)?;
    let queue = BatchQueue::from_option(args.lsf_cmd.as_deref())?;

    let mut config = PipelineConfig::new(&args.o, &args.simulator_yaml);
    config.simulator = args.simulator.clone();
    config.cmp_opts = args.cmp_opts.clone();
    config.sim_opts = args.sim_opts.clone();
    config.enables = Enables {
        cov: args.en_cov,
        wave: args.en_wave,
        cosim: args.en_cosim,
    };
    config.queue = queue;
    config.steps = steps;
    config.testlist = args.testlist.clone();
    config.test_filter = args.test.clone();
    config.bin_dir = args.bin_dir.clone();
    config.iss = match args.iss {
        IssArg::Spike => Iss::Spike,
        IssArg::Ovpsim => Iss::Ovpsim,
    };
    config.seed = seed_choice(args);
    config.trace_tools = args.trace_tools.clone();
    config.core_dir = args.core_dir.clone();
    Ok(config)
}

fn run(args: &Args) -> anyhow::Result<bool> {
    let config = build_config(args).context("invalid configuration")?;

    println!(
        "rtl_regress | simulator={} | iss={} | steps={} | queue={} | seed={:?} | out={}",
        config.simulator,
        config.iss,
        args.steps,
        config
            .queue
            .as_ref()
            .map(|q| q.prefix().to_string())
            .unwrap_or_else(|| "none".to_string()),
        config.seed,
        config.output_root.display()
    );

    let passed = pipeline::run(&config)?;
    Ok(passed)
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::error!("Regression finished with failures");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
