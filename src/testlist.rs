// src/testlist.rs
//
// Test matrix definition (YAML-parsed).
//
// A test list is an ordered sequence of TestSpec entries. Each entry expands
// into `iterations` runs; a run is identified by (test name, iteration index)
// and owns a working directory and an expected binary derived from that pair.
// The same YAML also drives the instruction generator, so unknown keys are
// ignored here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// One entry of the test matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique test name.
    pub test: String,
    /// Testbench (UVM) test variant that runs this program.
    pub rtl_test: String,
    /// Number of iterations (each with its own binary and seed).
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Extra simulator options appended to the base command.
    #[serde(default)]
    pub sim_opts: Option<String>,
    /// Stop after the device log check; never diff against the ISS.
    #[serde(default)]
    pub no_post_compare: bool,
    /// Tuning knobs forwarded to the trace diff.
    /// Uses BTreeMap for stable ordering.
    #[serde(default)]
    pub compare_opts: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_iterations() -> u32 {
    1
}

impl TestSpec {
    /// Runs of this test, in iteration order.
    pub fn runs(&self) -> impl Iterator<Item = Run<'_>> {
        (0..self.iterations).map(move |index| Run { test: self, index })
    }
}

/// A single (test, iteration) unit of work.
#[derive(Debug, Clone, Copy)]
pub struct Run<'a> {
    pub test: &'a TestSpec,
    pub index: u32,
}

impl Run<'_> {
    /// `{test}.{index}`, the directory name used under every output tree.
    pub fn dir_name(&self) -> String {
        format!("{}.{}", self.test.test, self.index)
    }

    pub fn work_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.dir_name())
    }

    pub fn binary_path(&self, bin_dir: &Path) -> PathBuf {
        bin_dir.join(format!("{}_{}.bin", self.test.test, self.index))
    }
}

/// The full test matrix for one regression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestList {
    pub tests: Vec<TestSpec>,
}

impl TestList {
    /// Load a test list from a YAML file.
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

    /// Parse a test list from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let list: TestList = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            source: e.to_string(),
        })?;
        list.validate()?;
        Ok(list)
    }

    /// Validate the test list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for (i, spec) in self.tests.iter().enumerate() {
            if spec.test.is_empty() {
                return Err(ConfigError::ValidationError {
                    field: format!("[{}].test", i),
                    message: "test name cannot be empty".to_string(),
                });
            }
            if spec.rtl_test.is_empty() {
                return Err(ConfigError::ValidationError {
                    field: format!("{}.rtl_test", spec.test),
                    message: "rtl_test cannot be empty".to_string(),
                });
            }
            if spec.iterations == 0 {
                return Err(ConfigError::ValidationError {
                    field: format!("{}.iterations", spec.test),
                    message: "iterations must be >= 1".to_string(),
                });
            }
            if !seen.insert(spec.test.as_str()) {
                return Err(ConfigError::ValidationError {
                    field: format!("{}.test", spec.test),
                    message: "duplicate test name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Keep only the named tests (`all` keeps everything), preserving list order.
    pub fn select(&self, filter: &str) -> Result<Self, ConfigError> {
        let filter = filter.trim();
        if filter.is_empty() || filter == "all" {
            return Ok(self.clone());
        }
        let wanted: BTreeSet<&str> = filter
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        for name in &wanted {
            if !self.tests.iter().any(|t| t.test == *name) {
                return Err(ConfigError::UnknownTest {
                    test: name.to_string(),
                });
            }
        }
        Ok(Self {
            tests: self
                .tests
                .iter()
                .filter(|t| wanted.contains(t.test.as_str()))
                .cloned()
                .collect(),
        })
    }

    /// Every run in matrix order: list order, then iteration order.
    pub fn runs(&self) -> impl Iterator<Item = Run<'_>> {
        self.tests.iter().flat_map(|t| t.runs())
    }

    pub fn run_count(&self) -> usize {
        self.tests.iter().map(|t| t.iterations as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = r#"
- test: riscv_arithmetic_basic_test
  description: >
    Arithmetic instruction test, no load/store/branch instructions
  gen_opts: >
    +instr_cnt=10000
  iterations: 2
  rtl_test: core_ibex_base_test

- test: riscv_csr_test
  iterations: 1
  no_post_compare: true
  rtl_test: core_ibex_csr_test
  sim_opts: >
    +enable_csr_check=1
    +disable_cosim=1
  compare_opts:
    compare_final_value_only: 1
"#;

    #[test]
    fn parses_testlist_and_ignores_generator_keys() {
        let list = TestList::from_yaml_str(LIST).expect("Should parse");
        assert_eq!(list.tests.len(), 2);
        let first = &list.tests[0];
        assert_eq!(first.test, "riscv_arithmetic_basic_test");
        assert_eq!(first.iterations, 2);
        assert!(!first.no_post_compare);
        assert!(first.sim_opts.is_none());

        let csr = &list.tests[1];
        assert!(csr.no_post_compare);
        assert_eq!(
            csr.sim_opts.as_deref(),
            Some("+enable_csr_check=1 +disable_cosim=1\n")
        );
        assert_eq!(csr.compare_opts.len(), 1);
    }

    #[test]
    fn runs_follow_list_then_iteration_order() {
        let list = TestList::from_yaml_str(LIST).unwrap();
        let ids: Vec<String> = list.runs().map(|r| r.dir_name()).collect();
        assert_eq!(
            ids,
            vec![
                "riscv_arithmetic_basic_test.0",
                "riscv_arithmetic_basic_test.1",
                "riscv_csr_test.0"
            ]
        );
        assert_eq!(list.run_count(), 3);
    }

    #[test]
    fn run_paths_are_derived_from_name_and_index() {
        let list = TestList::from_yaml_str(LIST).unwrap();
        let run = list.runs().nth(1).unwrap();
        assert_eq!(
            run.work_dir(Path::new("out/rtl_sim")),
            PathBuf::from("out/rtl_sim/riscv_arithmetic_basic_test.1")
        );
        assert_eq!(
            run.binary_path(Path::new("out/bin")),
            PathBuf::from("out/bin/riscv_arithmetic_basic_test_1.bin")
        );
    }

    #[test]
    fn rejects_zero_iterations() {
        let yaml = "- {test: a, rtl_test: t, iterations: 0}\n";
        assert!(matches!(
            TestList::from_yaml_str(yaml),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let yaml = "- {test: a, rtl_test: t}\n- {test: a, rtl_test: u}\n";
        let err = TestList::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn select_filters_and_rejects_unknown() {
        let list = TestList::from_yaml_str(LIST).unwrap();
        assert_eq!(list.select("all").unwrap().tests.len(), 2);
        let only = list.select("riscv_csr_test").unwrap();
        assert_eq!(only.tests.len(), 1);
        assert_eq!(only.tests[0].test, "riscv_csr_test");
        assert_eq!(
            list.select("nope"),
            Err(ConfigError::UnknownTest {
                test: "nope".to_string()
            })
        );
    }
}
