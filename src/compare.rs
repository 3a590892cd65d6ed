// src/compare.rs
//
// Run comparator: decide pass/fail for one (test, iteration).
//
// 1. Normalize the DUT trace log into a trace csv.
// 2. Check the DUT's own execution log for fatal markers.
// 3. Unless the test disables post-run comparison, normalize the ISS log.
// 4. Diff the two normalized traces.
//
// Every failure here is confined to its run: it is annotated in the shared
// report and counted as a fail, and sibling runs carry on. Trace formats and
// the diff algorithm live behind TraceTools; the device log check behind
// DeviceLogCheck. Both are supplied by the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::TraceError;
use crate::report::RegressionReport;
use crate::testlist::TestSpec;

/// Prefix of a passing diff result.
pub const PASS_MARKER: &str = "[PASSED]";
/// Prefix of a failing diff result.
pub const FAIL_MARKER: &str = "[FAILED]";

/// Name of the device under test in reports.
pub const DUT_NAME: &str = "DUT";

const RTL_TRACE_LOG: &str = "trace_core_00000000.log";
const RTL_TRACE_CSV: &str = "trace_core_00000000.csv";
const UVM_LOG: &str = "sim.log";

/// Instruction set simulator used as the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Iss {
    Spike,
    Ovpsim,
}

impl Iss {
    pub fn as_str(&self) -> &'static str {
        match self {
            Iss::Spike => "spike",
            Iss::Ovpsim => "ovpsim",
        }
    }
}

impl std::fmt::Display for Iss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed verdict for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOutcome {
    Pass,
    Fail { reason: String },
}

impl CompareOutcome {
    pub fn fail(reason: impl Into<String>) -> Self {
        CompareOutcome::Fail {
            reason: reason.into(),
        }
    }

    /// Translate a diff tool's result text. It passed iff the text starts
    /// with `[PASSED]`.
    pub fn from_diff_output(text: &str) -> Self {
        if text.starts_with(PASS_MARKER) {
            return CompareOutcome::Pass;
        }
        let first = text.lines().next().unwrap_or("").trim();
        let reason = first.strip_prefix(FAIL_MARKER).unwrap_or(first);
        let reason = reason.trim_start_matches(':').trim();
        if reason.is_empty() {
            CompareOutcome::fail("trace comparison failed")
        } else {
            CompareOutcome::fail(reason)
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, CompareOutcome::Pass)
    }
}

/// Renders with the `[PASSED]`/`[FAILED]` prefix report readers expect.
impl std::fmt::Display for CompareOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOutcome::Pass => f.write_str(PASS_MARKER),
            CompareOutcome::Fail { reason } => write!(f, "{}: {}", FAIL_MARKER, reason),
        }
    }
}

/// A trace in the common csv form both sides are reduced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTrace {
    pub csv: PathBuf,
}

/// Trace normalizers and the trace diff.
pub trait TraceTools {
    /// DUT trace log -> csv.
    fn normalize_dut(&self, log: &Path, csv: &Path) -> Result<NormalizedTrace, TraceError>;

    /// ISS log -> csv. The log format depends on `iss`.
    fn normalize_iss(&self, iss: Iss, log: &Path, csv: &Path)
        -> Result<NormalizedTrace, TraceError>;

    /// Compare two traces and return the diff's result text, which starts
    /// with `[PASSED]` on a match. The diff may append its own diagnostics
    /// to `report`.
    fn diff(
        &self,
        dut: &NormalizedTrace,
        reference: &NormalizedTrace,
        names: (&str, &str),
        opts: &BTreeMap<String, serde_yaml::Value>,
        report: &RegressionReport,
    ) -> Result<String, TraceError>;
}

/// When the device log check writes its verdict to the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    Always,
    OnFail,
    Never,
}

impl WritePolicy {
    pub fn should_write(&self, passed: bool) -> bool {
        match self {
            WritePolicy::Always => true,
            WritePolicy::OnFail => !passed,
            WritePolicy::Never => false,
        }
    }
}

/// Inspects the DUT's execution log for fatal markers.
pub trait DeviceLogCheck {
    /// True if the log shows a clean pass. Writes to `report` per `write`.
    fn check(
        &self,
        log: &Path,
        core: &str,
        test: &str,
        report: &RegressionReport,
        write: WritePolicy,
    ) -> bool;
}

/// File locations for one run, relative to the base output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub elf: PathBuf,
    pub rtl_dir: PathBuf,
    pub rtl_log: PathBuf,
    pub rtl_csv: PathBuf,
    pub uvm_log: PathBuf,
    pub iss_log: PathBuf,
    pub iss_csv: PathBuf,
}

impl RunPaths {
    pub fn new(output_root: &Path, test: &str, index: u32, iss: Iss) -> Self {
        let run = format!("{}.{}", test, index);
        let rtl_dir = output_root.join("rtl_sim").join(&run);
        let iss_dir = output_root
            .join("instr_gen")
            .join(format!("{}_sim", iss.as_str()));
        Self {
            elf: output_root
                .join("instr_gen")
                .join("asm_tests")
                .join(format!("{}.o", run)),
            rtl_log: rtl_dir.join(RTL_TRACE_LOG),
            rtl_csv: rtl_dir.join(RTL_TRACE_CSV),
            uvm_log: rtl_dir.join(UVM_LOG),
            rtl_dir,
            iss_log: iss_dir.join(format!("{}.log", run)),
            iss_csv: iss_dir.join(format!("{}.csv", run)),
        }
    }
}

/// Compares runs against the configured ISS.
pub struct RunComparator<'a> {
    tools: &'a dyn TraceTools,
    log_check: &'a dyn DeviceLogCheck,
    iss: Iss,
    output_root: PathBuf,
    report: RegressionReport,
}

impl<'a> RunComparator<'a> {
    /// `output_root` is the base output directory (holding `rtl_sim/` and
    /// `instr_gen/`); the report goes to `{output_root}/regr.log`.
    pub fn new(
        tools: &'a dyn TraceTools,
        log_check: &'a dyn DeviceLogCheck,
        iss: Iss,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        let output_root = output_root.into();
        Self {
            tools,
            log_check,
            iss,
            report: RegressionReport::in_dir(&output_root),
            output_root,
        }
    }

    pub fn report(&self) -> &RegressionReport {
        &self.report
    }

    pub fn iss(&self) -> Iss {
        self.iss
    }

    fn note(&self, line: &str) {
        if let Err(e) = self.report.append_line(line) {
            tracing::warn!("Cannot append to {}: {}", self.report.path().display(), e);
        }
    }

    /// Compare iteration `index` of `test`.
    pub fn compare_run(&self, test: &TestSpec, index: u32) -> CompareOutcome {
        let paths = RunPaths::new(&self.output_root, &test.test, index, self.iss);

        tracing::info!(
            "Comparing {}/DUT sim result : {}",
            self.iss,
            paths.elf.display()
        );
        self.note(&format!("Test binary: {}", paths.elf.display()));

        let dut = match self.tools.normalize_dut(&paths.rtl_log, &paths.rtl_csv) {
            Ok(trace) => trace,
            Err(e) => {
                self.note(&format!("Log processing failed: {}", e));
                return CompareOutcome::fail(format!("log processing failed: {}", e));
            }
        };

        // Stopping here means the log check's verdict is the run's verdict,
        // so it is always written.
        let write = if test.no_post_compare {
            WritePolicy::Always
        } else {
            WritePolicy::OnFail
        };
        if !self
            .log_check
            .check(&paths.uvm_log, DUT_NAME, &test.test, &self.report, write)
        {
            return CompareOutcome::fail("device log shows a failure");
        }
        if test.no_post_compare {
            return CompareOutcome::Pass;
        }

        let reference = match self
            .tools
            .normalize_iss(self.iss, &paths.iss_log, &paths.iss_csv)
        {
            Ok(trace) => trace,
            Err(e) => {
                self.note(&format!("{} log processing failed: {}", self.iss, e));
                return CompareOutcome::fail(format!("{} log processing failed: {}", self.iss, e));
            }
        };

        match self.tools.diff(
            &dut,
            &reference,
            (DUT_NAME, self.iss.as_str()),
            &test.compare_opts,
            &self.report,
        ) {
            Ok(text) => CompareOutcome::from_diff_output(&text),
            Err(e) => {
                self.note(&format!("Trace comparison failed: {}", e));
                CompareOutcome::fail(format!("trace comparison failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uvm_log::UvmLogCheck;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    /// Normalizers copy the log to the csv; the diff compares file contents.
    #[derive(Default)]
    struct CopyTools {
        iss_calls: RefCell<Vec<Iss>>,
    }

    impl TraceTools for CopyTools {
        fn normalize_dut(&self, log: &Path, csv: &Path) -> Result<NormalizedTrace, TraceError> {
            let text = fs::read_to_string(log).map_err(|_| TraceError::MissingLog {
                path: log.display().to_string(),
            })?;
            fs::write(csv, text).unwrap();
            Ok(NormalizedTrace {
                csv: csv.to_path_buf(),
            })
        }

        fn normalize_iss(
            &self,
            iss: Iss,
            log: &Path,
            csv: &Path,
        ) -> Result<NormalizedTrace, TraceError> {
            self.iss_calls.borrow_mut().push(iss);
            self.normalize_dut(log, csv)
        }

        fn diff(
            &self,
            dut: &NormalizedTrace,
            reference: &NormalizedTrace,
            names: (&str, &str),
            _opts: &BTreeMap<String, serde_yaml::Value>,
            report: &RegressionReport,
        ) -> Result<String, TraceError> {
            let a = fs::read_to_string(&dut.csv).unwrap();
            let b = fs::read_to_string(&reference.csv).unwrap();
            let result = if a == b {
                format!("[PASSED]: {} matched", a.lines().count())
            } else {
                format!("[FAILED]: {} and {} traces differ", names.0, names.1)
            };
            report.append_line(&result).unwrap();
            Ok(result)
        }
    }

    fn spec(no_post_compare: bool) -> TestSpec {
        TestSpec {
            test: "riscv_arithmetic_basic_test".to_string(),
            rtl_test: "core_ibex_base_test".to_string(),
            iterations: 1,
            sim_opts: None,
            no_post_compare,
            compare_opts: BTreeMap::new(),
            description: None,
        }
    }

    fn layout(root: &Path, dut_trace: &str, iss_trace: Option<&str>, uvm: &str) -> RunPaths {
        let paths = RunPaths::new(root, "riscv_arithmetic_basic_test", 0, Iss::Spike);
        fs::create_dir_all(&paths.rtl_dir).unwrap();
        fs::write(&paths.rtl_log, dut_trace).unwrap();
        fs::write(&paths.uvm_log, uvm).unwrap();
        if let Some(iss) = iss_trace {
            fs::create_dir_all(paths.iss_log.parent().unwrap()).unwrap();
            fs::write(&paths.iss_log, iss).unwrap();
        }
        paths
    }

    const CLEAN: &str = "UVM_INFO boot\nRISC-V UVM TEST PASSED\n";
    const TRACE: &str = "0x80000000,addi\n0x80000004,add\n";

    #[test]
    fn diff_output_prefix_decides() {
        assert_eq!(
            CompareOutcome::from_diff_output("[PASSED]: 120 matched"),
            CompareOutcome::Pass
        );
        assert_eq!(
            CompareOutcome::from_diff_output("[FAILED]: 3 mismatches\nmore"),
            CompareOutcome::fail("3 mismatches")
        );
        assert!(!CompareOutcome::from_diff_output(" [PASSED]").is_pass());
        assert!(!CompareOutcome::from_diff_output("").is_pass());
        assert_eq!(CompareOutcome::fail("x").to_string(), "[FAILED]: x");
        assert!(CompareOutcome::Pass.to_string().starts_with(PASS_MARKER));
    }

    #[test]
    fn run_paths_follow_naming_convention() {
        let p = RunPaths::new(Path::new("out"), "t", 2, Iss::Ovpsim);
        assert_eq!(p.rtl_log, Path::new("out/rtl_sim/t.2/trace_core_00000000.log"));
        assert_eq!(p.uvm_log, Path::new("out/rtl_sim/t.2/sim.log"));
        assert_eq!(p.iss_log, Path::new("out/instr_gen/ovpsim_sim/t.2.log"));
        assert_eq!(p.elf, Path::new("out/instr_gen/asm_tests/t.2.o"));
    }

    #[test]
    fn matching_traces_pass_without_summary_line() {
        let tmp = tempdir().unwrap();
        layout(tmp.path(), TRACE, Some(TRACE), CLEAN);
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        let outcome = cmp.compare_run(&spec(false), 0);
        assert_eq!(outcome, CompareOutcome::Pass);

        let report = fs::read_to_string(cmp.report().path()).unwrap();
        assert!(report.starts_with("Test binary: "));
        assert!(!report.contains(": [PASSED]"));
        assert!(!report.contains("uvm log"));
        assert_eq!(tools.iss_calls.borrow().as_slice(), &[Iss::Spike]);
    }

    #[test]
    fn disabled_compare_passes_and_always_writes() {
        let tmp = tempdir().unwrap();
        layout(tmp.path(), TRACE, None, CLEAN);
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        assert!(cmp.compare_run(&spec(true), 0).is_pass());
        let report = fs::read_to_string(cmp.report().path()).unwrap();
        assert!(report.contains("riscv_arithmetic_basic_test : [PASSED]"));
        assert!(tools.iss_calls.borrow().is_empty());
    }

    #[test]
    fn fatal_marker_fails_even_when_compare_disabled() {
        let tmp = tempdir().unwrap();
        layout(
            tmp.path(),
            TRACE,
            Some(TRACE),
            "UVM_FATAL @ 10: hang\nRISC-V UVM TEST PASSED\n",
        );
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        for disabled in [false, true] {
            assert!(!cmp.compare_run(&spec(disabled), 0).is_pass());
        }
        let report = fs::read_to_string(cmp.report().path()).unwrap();
        assert_eq!(report.matches(": [FAILED]").count(), 2);
        assert!(tools.iss_calls.borrow().is_empty());
    }

    #[test]
    fn missing_dut_trace_is_annotated_failure() {
        let tmp = tempdir().unwrap();
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        let outcome = cmp.compare_run(&spec(false), 0);
        assert!(matches!(outcome, CompareOutcome::Fail { ref reason } if reason.starts_with("log processing failed")));
        let report = fs::read_to_string(cmp.report().path()).unwrap();
        assert!(report.contains("Log processing failed: log file not found"));
    }

    #[test]
    fn missing_iss_trace_is_annotated_failure() {
        let tmp = tempdir().unwrap();
        layout(tmp.path(), TRACE, None, CLEAN);
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        assert!(!cmp.compare_run(&spec(false), 0).is_pass());
        let report = fs::read_to_string(cmp.report().path()).unwrap();
        assert!(report.contains("spike log processing failed"));
    }

    #[test]
    fn trace_mismatch_fails() {
        let tmp = tempdir().unwrap();
        layout(tmp.path(), TRACE, Some("0x80000000,addi\n"), CLEAN);
        let tools = CopyTools::default();
        let cmp = RunComparator::new(&tools, &UvmLogCheck, Iss::Spike, tmp.path());

        assert_eq!(
            cmp.compare_run(&spec(false), 0),
            CompareOutcome::fail("DUT and spike traces differ")
        );
    }
}
