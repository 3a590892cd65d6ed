//! RTL regression runner library.
//!
//! Expands a YAML test matrix into simulation commands, runs them locally
//! or through a batch queue, and compares each run's DUT trace against an
//! instruction set simulator. The binary (`src/main.rs`) is just a thin
//! command-line harness around these components.

pub mod backend;
pub mod command;
pub mod compare;
pub mod config;
pub mod coverage;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod seed;
pub mod subst;
pub mod testlist;
pub mod tools;
pub mod uvm_log;

// --- Re-exports for ergonomic external use ---------------------------------

pub use backend::{backend_for, BatchParallel, ExecutionBackend, Launcher, Sequential};

pub use command::{compile_commands, sim_commands, synthesize, CommandTriple, SimContext};

pub use compare::{
    CompareOutcome, DeviceLogCheck, Iss, NormalizedTrace, RunComparator, TraceTools, WritePolicy,
};

pub use config::{BatchQueue, Enables, SimulatorSetup};

pub use error::{ConfigError, ExecError, RegressError, TraceError};

pub use pipeline::{run, PipelineConfig, SeedChoice, Steps};

pub use report::{compare_all, RegressionReport, RegressionSummary};

pub use seed::{FixedSeed, RandomSeed, SeedGen, StartSeed};

pub use subst::subst_vars;

pub use testlist::{Run, TestList, TestSpec};

pub use tools::{ScriptedTools, TraceToolsConfig};

pub use uvm_log::UvmLogCheck;
