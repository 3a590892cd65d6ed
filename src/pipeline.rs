// src/pipeline.rs
//
// Pipeline driver: compile, then simulate, then compare, then merge coverage.
//
// Each phase is toggled by `Steps`; the order is fixed. All inputs a phase
// needs are loaded and checked before anything runs, so configuration
// errors never leave a half-built output tree behind. Compile and sim
// failures abort the invocation; comparison failures are tallied.
//
// Output tree (under `output_root`):
//   rtl_sim/                  compile products, cmd.log of each compile step
//   rtl_sim/{test}.{i}/       one directory per run
//   regr.log                  comparison report
//   regr_summary.json         per-run verdicts

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{backend_for, ExecutionBackend, Launcher, Sequential, COMPILE_TIMEOUT};
use crate::command::{compile_commands, sim_commands, SimContext};
use crate::compare::{Iss, RunComparator};
use crate::config::{BatchQueue, Enables, SimulatorSetup};
use crate::coverage::gen_cov;
use crate::error::{ConfigError, ExecError, RegressError};
use crate::report::{compare_all, write_summary};
use crate::seed::{FixedSeed, RandomSeed, SeedGen, StartSeed};
use crate::testlist::TestList;
use crate::tools::{ScriptedTools, TraceToolsConfig};
use crate::uvm_log::UvmLogCheck;

/// Which phases to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Steps {
    pub compile: bool,
    pub sim: bool,
    pub compare: bool,
    pub cov: bool,
}

impl Steps {
    pub fn all() -> Self {
        Self {
            compile: true,
            sim: true,
            compare: true,
            cov: true,
        }
    }

    /// `all`, or a comma-separated list of `compile`, `sim`, `compare`, `cov`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        if s.trim() == "all" {
            return Ok(Self::all());
        }
        let mut steps = Self::default();
        for step in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match step {
                "compile" => steps.compile = true,
                "sim" => steps.sim = true,
                "compare" => steps.compare = true,
                "cov" => steps.cov = true,
                other => {
                    return Err(ConfigError::UnknownStep {
                        step: other.to_string(),
                    })
                }
            }
        }
        Ok(steps)
    }
}

/// Where iteration seeds come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedChoice {
    Fixed(u32),
    Start(u32),
    Random(u64),
}

impl SeedChoice {
    pub fn generator(&self) -> Box<dyn SeedGen> {
        match *self {
            SeedChoice::Fixed(seed) => Box::new(FixedSeed(seed)),
            SeedChoice::Start(seed) => Box::new(StartSeed(seed)),
            SeedChoice::Random(base) => Box::new(RandomSeed::new(base)),
        }
    }
}

/// Everything one regression invocation needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base output directory.
    pub output_root: PathBuf,
    /// Tool entry to use from the simulator setup file.
    pub simulator: String,
    pub simulator_yaml: PathBuf,
    /// Substituted for `<cmp_opts>` in compile commands.
    pub cmp_opts: String,
    /// Substituted for `<sim_opts>` in the sim command (every run).
    pub sim_opts: String,
    pub enables: Enables,
    /// `None` runs everything locally.
    pub queue: Option<BatchQueue>,
    pub steps: Steps,
    pub testlist: Option<PathBuf>,
    /// `all` or a comma-separated list of test names.
    pub test_filter: String,
    /// Directory of generated `{test}_{i}.bin` files.
    pub bin_dir: Option<PathBuf>,
    pub iss: Iss,
    pub seed: SeedChoice,
    /// Trace tool command file, needed by `compare`.
    pub trace_tools: Option<PathBuf>,
    /// Testbench root, substituted for `<cwd>`.
    pub core_dir: PathBuf,
}

impl PipelineConfig {
    pub fn new(output_root: impl Into<PathBuf>, simulator_yaml: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            simulator: "vcs".to_string(),
            simulator_yaml: simulator_yaml.into(),
            cmp_opts: String::new(),
            sim_opts: String::new(),
            enables: Enables::default(),
            queue: None,
            steps: Steps::all(),
            testlist: None,
            test_filter: "all".to_string(),
            bin_dir: None,
            iss: Iss::Spike,
            seed: SeedChoice::Start(0),
            trace_tools: None,
            core_dir: PathBuf::from("."),
        }
    }

    fn launcher(&self) -> Launcher {
        Launcher::from_queue(self.queue.clone())
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|e| ConfigError::io(Path::new("."), e))?;
    Ok(cwd.join(path))
}

fn require<'a, T>(value: Option<&'a T>, step: &str, input: &str) -> Result<&'a T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingInput {
        step: step.to_string(),
        input: input.to_string(),
    })
}

/// Run the enabled phases. Returns whether every compared run passed
/// (true when comparison is not enabled).
pub fn run(config: &PipelineConfig) -> Result<bool, RegressError> {
    let steps = config.steps;
    let output_root = absolute(&config.output_root)?;
    let rtl_sim = output_root.join("rtl_sim");

    let tests = if steps.sim || steps.compare {
        let step = if steps.sim { "sim" } else { "compare" };
        let path = require(config.testlist.as_ref(), step, "a test list (--testlist)")?;
        let tests = TestList::from_yaml_file(path)?.select(&config.test_filter)?;
        tracing::info!("{} tests, {} runs", tests.tests.len(), tests.run_count());
        Some(tests)
    } else {
        None
    };
    let bin_dir = if steps.sim {
        let dir = require(config.bin_dir.as_ref(), "sim", "a binary directory (--bin_dir)")?;
        Some(absolute(dir)?)
    } else {
        None
    };
    let tools = if steps.compare {
        let path = require(config.trace_tools.as_ref(), "compare", "a trace tools file (--trace_tools)")?;
        let tools = TraceToolsConfig::from_yaml_file(path)?;
        tools.require_iss(config.iss)?;
        Some(ScriptedTools::new(tools))
    } else {
        None
    };
    let setup = if steps.compile || steps.sim {
        Some(SimulatorSetup::resolve(
            &config.simulator_yaml,
            &config.simulator,
            &config.enables,
        )?)
    } else {
        None
    };

    fs::create_dir_all(&rtl_sim).map_err(|e| ExecError::IoError {
        path: rtl_sim.display().to_string(),
        source: e.to_string(),
    })?;

    if let (true, Some(setup)) = (steps.compile, &setup) {
        tracing::info!("Compiling TB");
        let jobs = compile_commands(&setup.compile_cmds, &rtl_sim, &config.cmp_opts);
        Sequential::new(config.launcher())
            .with_timeout(COMPILE_TIMEOUT)
            .execute(&jobs)?;
    }

    if let (true, Some(setup), Some(tests), Some(bin_dir)) = (steps.sim, &setup, &tests, &bin_dir) {
        tracing::info!("Running RTL simulation");
        let core_dir = absolute(&config.core_dir)?;
        let seed_gen = config.seed.generator();
        let ctx = SimContext {
            output_dir: &rtl_sim,
            bin_dir,
            sim_opts: &config.sim_opts,
            core_dir: &core_dir,
        };
        let jobs = sim_commands(&setup.sim_cmd, tests, seed_gen.as_ref(), &ctx)?;
        let backend = backend_for(config.queue.clone());
        tracing::info!("Executing {} runs ({})", jobs.len(), backend.name());
        backend.execute(&jobs)?;
    }

    let mut passed = true;
    if let (true, Some(tests), Some(tools)) = (steps.compare, &tests, &tools) {
        tracing::info!("Comparing simulation results");
        let comparator = RunComparator::new(tools, &UvmLogCheck, config.iss, &output_root);
        let summary = compare_all(tests, &comparator)?;
        write_summary(&summary, &output_root)?;
        passed = summary.all_passed();
    }

    if steps.cov {
        gen_cov(&output_root, &config.simulator, config.launcher())?;
    }

    Ok(passed)
}
