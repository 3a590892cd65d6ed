// src/config.rs
//
// Simulator setup (YAML-parsed) and batch-queue configuration.
//
// The simulator setup file lists one entry per RTL simulator:
//
//   - tool: vcs
//     env_var: IBEX_ROOT
//     compile:
//       cmd:
//         - vcs -f <IBEX_ROOT>/files.f -o <out>/simv <cmp_opts> <cov_opts>
//       cov_opts: -cm line+tgl+branch
//     sim:
//       cmd: <out>/simv +UVM_TESTNAME=<rtl_test> +ntb_random_seed=<seed> <sim_opts>
//
// Resolving an entry yields the ordered compile commands and the base sim
// command with feature options and environment variables filled in. The
// remaining placeholders are left for the command synthesizer.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::subst::{flatten_newlines, subst_vars};

/// Feature toggles that select optional option blocks in the setup file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Enables {
    pub cov: bool,
    pub wave: bool,
    pub cosim: bool,
}

impl Enables {
    fn flags(&self) -> [(&'static str, bool); 3] {
        [
            ("cov_opts", self.cov),
            ("wave_opts", self.wave),
            ("cosim_opts", self.cosim),
        ]
    }
}

/// A command field: either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmdSpec {
    One(String),
    Many(Vec<String>),
}

impl CmdSpec {
    fn to_vec(&self) -> Vec<String> {
        match self {
            CmdSpec::One(cmd) => vec![cmd.clone()],
            CmdSpec::Many(cmds) => cmds.clone(),
        }
    }
}

/// One phase (compile or sim) of a tool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub cmd: CmdSpec,
    #[serde(default)]
    pub cov_opts: Option<String>,
    #[serde(default)]
    pub wave_opts: Option<String>,
    #[serde(default)]
    pub cosim_opts: Option<String>,
}

impl PhaseSpec {
    fn opt(&self, name: &str) -> Option<&str> {
        match name {
            "cov_opts" => self.cov_opts.as_deref(),
            "wave_opts" => self.wave_opts.as_deref(),
            "cosim_opts" => self.cosim_opts.as_deref(),
            _ => None,
        }
    }

    /// Fill `<cov_opts>`, `<wave_opts>` and `<cosim_opts>`: the phase's option
    /// string when enabled, nothing otherwise.
    fn apply_enables(&self, cmd: &str, enables: &Enables) -> String {
        let vars = enables.flags().map(|(name, on)| {
            let value = match (on, self.opt(name)) {
                (true, Some(opts)) => flatten_newlines(opts).trim().to_string(),
                _ => String::new(),
            };
            (name, value)
        });
        subst_vars(cmd, vars)
    }
}

/// One tool entry of the simulator setup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub tool: String,
    /// Comma-separated environment variables substituted as `<NAME>`.
    #[serde(default)]
    pub env_var: Option<String>,
    pub compile: PhaseSpec,
    pub sim: PhaseSpec,
}

/// Resolved commands for one simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorSetup {
    /// Compile steps; must run in this order.
    pub compile_cmds: Vec<String>,
    /// Base simulation command, still carrying per-run placeholders.
    pub sim_cmd: String,
}

impl SimulatorSetup {
    /// Load the setup file and resolve the entry for `tool`.
    pub fn resolve<P: AsRef<Path>>(
        path: P,
        tool: &str,
        enables: &Enables,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Processing simulator setup file : {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::resolve_str(&contents, tool, enables).map_err(|e| match e {
            ConfigError::ParseError { source, .. } => ConfigError::ParseError {
                path: path.display().to_string(),
                source,
            },
            ConfigError::UnknownSimulator { tool, .. } => ConfigError::UnknownSimulator {
                tool,
                path: path.display().to_string(),
            },
            other => other,
        })
    }

    /// Resolve `tool` from setup YAML held in memory.
    pub fn resolve_str(yaml: &str, tool: &str, enables: &Enables) -> Result<Self, ConfigError> {
        let entries: Vec<ToolEntry> =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
                path: "<string>".to_string(),
                source: e.to_string(),
            })?;
        let entry = entries
            .iter()
            .find(|e| e.tool == tool)
            .ok_or_else(|| ConfigError::UnknownSimulator {
                tool: tool.to_string(),
                path: "<string>".to_string(),
            })?;
        tracing::info!("Found matching simulator: {}", entry.tool);
        Self::from_entry(entry, enables)
    }

    fn from_entry(entry: &ToolEntry, enables: &Enables) -> Result<Self, ConfigError> {
        let env_vars = lookup_env_vars(entry.env_var.as_deref())?;

        let compile_cmds: Vec<String> = entry
            .compile
            .cmd
            .to_vec()
            .iter()
            .map(|cmd| {
                let cmd = entry.compile.apply_enables(cmd, enables);
                subst_vars(&cmd, env_vars.iter().map(|(k, v)| (k, v)))
            })
            .collect();
        if compile_cmds.is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("{}.compile.cmd", entry.tool),
                message: "at least one compile command is required".to_string(),
            });
        }

        let sim_cmd = match &entry.sim.cmd {
            CmdSpec::One(cmd) => cmd.clone(),
            CmdSpec::Many(cmds) if cmds.len() == 1 => cmds[0].clone(),
            CmdSpec::Many(_) => {
                return Err(ConfigError::ValidationError {
                    field: format!("{}.sim.cmd", entry.tool),
                    message: "sim.cmd must be a single command".to_string(),
                })
            }
        };
        let sim_cmd = entry.sim.apply_enables(&sim_cmd, enables);
        let sim_cmd = subst_vars(&sim_cmd, env_vars.iter().map(|(k, v)| (k, v)));

        Ok(Self {
            compile_cmds,
            sim_cmd,
        })
    }
}

fn lookup_env_vars(names: Option<&str>) -> Result<Vec<(String, String)>, ConfigError> {
    let Some(names) = names else {
        return Ok(Vec::new());
    };
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            env::var(name)
                .map(|value| (name.to_string(), value))
                .map_err(|_| ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
        })
        .collect()
}

/// Submission prefix for an external batch queue (e.g. `bsub -Is`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQueue {
    prefix: String,
}

impl BatchQueue {
    /// An empty prefix is rejected: it would silently run everything locally
    /// under batch-queue timeouts.
    pub fn new(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(ConfigError::EmptyQueuePrefix);
        }
        Ok(Self {
            prefix: prefix.trim().to_string(),
        })
    }

    /// `None` means "no queue requested"; `Some("")` is an error.
    pub fn from_option(prefix: Option<&str>) -> Result<Option<Self>, ConfigError> {
        prefix.map(Self::new).transpose()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The shell line that submits `cmd` through the queue.
    pub fn wrap(&self, cmd: &str) -> String {
        format!("{} {}", self.prefix, cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP: &str = r#"
- tool: vcs
  compile:
    cmd:
      - vcs -full64 -o <out>/simv <cmp_opts> <cov_opts> <wave_opts>
      - echo done > <out>/compile.done
    cov_opts: >
      -cm line+tgl
      -cm_dir <out>/test.vdb
    wave_opts: -debug_access+all
  sim:
    cmd: <out>/simv +UVM_TESTNAME=<rtl_test> +ntb_random_seed=<seed> <sim_opts> <cov_opts>
    cov_opts: -cm line+tgl

- tool: xlm
  compile:
    cmd: xrun -elaborate <cmp_opts>
  sim:
    cmd: [xrun -R <sim_opts>]
"#;

    #[test]
    fn resolves_with_all_features_disabled() {
        let setup = SimulatorSetup::resolve_str(SETUP, "vcs", &Enables::default()).unwrap();
        assert_eq!(setup.compile_cmds.len(), 2);
        assert_eq!(setup.compile_cmds[0], "vcs -full64 -o <out>/simv <cmp_opts>  ");
        assert_eq!(
            setup.sim_cmd,
            "<out>/simv +UVM_TESTNAME=<rtl_test> +ntb_random_seed=<seed> <sim_opts> "
        );
    }

    #[test]
    fn enabled_features_use_phase_options() {
        let enables = Enables {
            cov: true,
            wave: false,
            cosim: false,
        };
        let setup = SimulatorSetup::resolve_str(SETUP, "vcs", &enables).unwrap();
        assert_eq!(
            setup.compile_cmds[0],
            "vcs -full64 -o <out>/simv <cmp_opts> -cm line+tgl -cm_dir <out>/test.vdb "
        );
        assert!(setup.sim_cmd.ends_with("<sim_opts> -cm line+tgl"));
    }

    #[test]
    fn single_string_and_single_item_list_commands() {
        let setup = SimulatorSetup::resolve_str(SETUP, "xlm", &Enables::default()).unwrap();
        assert_eq!(setup.compile_cmds, vec!["xrun -elaborate <cmp_opts>"]);
        assert_eq!(setup.sim_cmd, "xrun -R <sim_opts>");
    }

    #[test]
    fn unknown_tool_is_config_error() {
        let err = SimulatorSetup::resolve_str(SETUP, "questa", &Enables::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSimulator { .. }));
    }

    #[test]
    fn env_vars_are_substituted() {
        let yaml = r#"
- tool: t
  env_var: RTL_REGRESS_TEST_ROOT_XYZ
  compile:
    cmd: make -C <RTL_REGRESS_TEST_ROOT_XYZ>
  sim:
    cmd: <RTL_REGRESS_TEST_ROOT_XYZ>/simv
"#;
        env::set_var("RTL_REGRESS_TEST_ROOT_XYZ", "/opt/core");
        let setup = SimulatorSetup::resolve_str(yaml, "t", &Enables::default()).unwrap();
        assert_eq!(setup.compile_cmds, vec!["make -C /opt/core"]);
        assert_eq!(setup.sim_cmd, "/opt/core/simv");
    }

    #[test]
    fn missing_env_var_is_config_error() {
        let yaml = r#"
- tool: t
  env_var: RTL_REGRESS_DEFINITELY_UNSET_VAR
  compile:
    cmd: make
  sim:
    cmd: simv
"#;
        let err = SimulatorSetup::resolve_str(yaml, "t", &Enables::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnvVar {
                name: "RTL_REGRESS_DEFINITELY_UNSET_VAR".to_string()
            }
        );
    }

    #[test]
    fn empty_queue_prefix_is_rejected_but_absence_is_fine() {
        assert_eq!(BatchQueue::from_option(None), Ok(None));
        assert_eq!(
            BatchQueue::from_option(Some("")),
            Err(ConfigError::EmptyQueuePrefix)
        );
        let q = BatchQueue::from_option(Some("bsub -Is")).unwrap().unwrap();
        assert_eq!(q.wrap("make"), "bsub -Is make");
    }
}
