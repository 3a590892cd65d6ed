// src/tools.rs
//
// Scripted trace tools (YAML-configured).
//
// The trace normalizers and the trace diff are external programs. Each is
// configured as a shell command template:
//
//   dut_log_to_csv:    python3 <cwd>/ibex_log_to_trace_csv.py --log <log> --csv <csv>
//   spike_log_to_csv:  python3 spike_log_to_trace_csv.py --log <log> --csv <csv>
//   ovpsim_log_to_csv: python3 ovpsim_log_to_trace_csv.py --log <log> --csv <csv>
//   compare_csv:       python3 instr_trace_compare.py <dut_csv> <ref_csv> <dut_name> <ref_name> <compare_opts>
//
// A normalizer succeeds when it exits 0 and the csv exists. The diff prints
// its result text on stdout; that text is appended to the report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use crate::compare::{Iss, NormalizedTrace, TraceTools};
use crate::error::{ConfigError, TraceError};
use crate::report::RegressionReport;
use crate::subst::subst_vars;

/// Command templates for the trace tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceToolsConfig {
    pub dut_log_to_csv: String,
    #[serde(default)]
    pub spike_log_to_csv: Option<String>,
    #[serde(default)]
    pub ovpsim_log_to_csv: Option<String>,
    pub compare_csv: String,
}

impl TraceToolsConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_yaml_str(&contents).map_err(|e| match e {
            ConfigError::ParseError { source, .. } => ConfigError::ParseError {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: TraceToolsConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
                path: "<string>".to_string(),
                source: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("dut_log_to_csv", &self.dut_log_to_csv),
            ("compare_csv", &self.compare_csv),
        ];
        for (field, cmd) in required {
            if cmd.trim().is_empty() {
                return Err(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: "command cannot be empty".to_string(),
                });
            }
        }
        if self.spike_log_to_csv.is_none() && self.ovpsim_log_to_csv.is_none() {
            return Err(ConfigError::ValidationError {
                field: "spike_log_to_csv".to_string(),
                message: "at least one ISS normalizer is required".to_string(),
            });
        }
        Ok(())
    }

    /// Check that the normalizer for `iss` is configured.
    pub fn require_iss(&self, iss: Iss) -> Result<(), ConfigError> {
        if self.iss_cmd(iss).is_some() {
            return Ok(());
        }
        Err(ConfigError::ValidationError {
            field: format!("{}_log_to_csv", iss),
            message: format!("no normalizer configured for {}", iss),
        })
    }

    fn iss_cmd(&self, iss: Iss) -> Option<&str> {
        match iss {
            Iss::Spike => self.spike_log_to_csv.as_deref(),
            Iss::Ovpsim => self.ovpsim_log_to_csv.as_deref(),
        }
    }
}

/// TraceTools backed by external commands.
#[derive(Debug, Clone)]
pub struct ScriptedTools {
    config: TraceToolsConfig,
}

impl ScriptedTools {
    pub fn new(config: TraceToolsConfig) -> Self {
        Self { config }
    }

    fn normalize(
        &self,
        tool: &str,
        template: &str,
        log: &Path,
        csv: &Path,
    ) -> Result<NormalizedTrace, TraceError> {
        if !log.is_file() {
            return Err(TraceError::MissingLog {
                path: log.display().to_string(),
            });
        }
        let log_str = log.display().to_string();
        let csv_str = csv.display().to_string();
        let cmd = subst_vars(
            template,
            [("log", log_str.as_str()), ("csv", csv_str.as_str())],
        );
        let output = run_tool(tool, &cmd)?;
        if !output.status.success() {
            return Err(tool_failed(tool, &output));
        }
        if !csv.is_file() {
            return Err(TraceError::MissingOutput {
                tool: tool.to_string(),
                path: csv_str,
            });
        }
        Ok(NormalizedTrace {
            csv: csv.to_path_buf(),
        })
    }
}

impl TraceTools for ScriptedTools {
    fn normalize_dut(&self, log: &Path, csv: &Path) -> Result<NormalizedTrace, TraceError> {
        self.normalize("dut_log_to_csv", &self.config.dut_log_to_csv, log, csv)
    }

    fn normalize_iss(
        &self,
        iss: Iss,
        log: &Path,
        csv: &Path,
    ) -> Result<NormalizedTrace, TraceError> {
        let tool = format!("{}_log_to_csv", iss);
        let template = self.config.iss_cmd(iss).ok_or_else(|| TraceError::ToolFailed {
            tool: tool.clone(),
            message: "not configured".to_string(),
        })?;
        self.normalize(&tool, template, log, csv)
    }

    fn diff(
        &self,
        dut: &NormalizedTrace,
        reference: &NormalizedTrace,
        names: (&str, &str),
        opts: &BTreeMap<String, serde_yaml::Value>,
        report: &RegressionReport,
    ) -> Result<String, TraceError> {
        let dut_csv = dut.csv.display().to_string();
        let ref_csv = reference.csv.display().to_string();
        let opts = render_compare_opts(opts);
        let cmd = subst_vars(
            &self.config.compare_csv,
            [
                ("dut_csv", dut_csv.as_str()),
                ("ref_csv", ref_csv.as_str()),
                ("dut_name", names.0),
                ("ref_name", names.1),
                ("compare_opts", opts.as_str()),
            ],
        );
        let output = run_tool("compare_csv", &cmd)?;
        let text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        // A mismatch may legitimately exit nonzero; only silence is an error.
        if text.is_empty() {
            if output.status.success() {
                return Err(TraceError::ToolFailed {
                    tool: "compare_csv".to_string(),
                    message: "no result on stdout".to_string(),
                });
            }
            return Err(tool_failed("compare_csv", &output));
        }
        if let Err(e) = report.append_line(&text) {
            tracing::warn!("Cannot append to {}: {}", report.path().display(), e);
        }
        Ok(text)
    }
}

/// `--name=value` pairs in key order.
pub fn render_compare_opts(opts: &BTreeMap<String, serde_yaml::Value>) -> String {
    opts.iter()
        .map(|(name, value)| format!("--{}={}", name, yaml_scalar(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn run_tool(tool: &str, cmd: &str) -> Result<Output, TraceError> {
    tracing::debug!("{}: {}", tool, cmd);
    Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| TraceError::ToolFailed {
            tool: tool.to_string(),
            message: e.to_string(),
        })
}

fn tool_failed(tool: &str, output: &Output) -> TraceError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!("{} ({})", output.status, line.trim()),
        None => output.status.to_string(),
    };
    TraceError::ToolFailed {
        tool: tool.to_string(),
        message,
    }
}
