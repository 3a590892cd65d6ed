// src/uvm_log.rs
//
// Device execution log check (the testbench's `sim.log`).
//
// A run passes only if the log carries the testbench's pass line and no
// error marker appears before the first result line. The simulator's closing
// summary mentions UVM_ERROR counts after the result, so later lines are not
// scanned for markers. A FAILED result line ends the scan. Logs may carry
// raw bytes from memory dumps, so lines are matched after lossy decoding.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::compare::{DeviceLogCheck, WritePolicy};
use crate::report::RegressionReport;

pub const TEST_PASSED: &str = "RISC-V UVM TEST PASSED";
pub const TEST_FAILED: &str = "RISC-V UVM TEST FAILED";
const ERROR_MARKERS: [&str; 3] = ["UVM_ERROR", "UVM_FATAL", "Error"];

/// Result of scanning one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UvmLogScan {
    pub passed: bool,
    /// Offending lines, trimmed, in log order.
    pub error_lines: Vec<String>,
}

/// Scan a log for markers.
pub fn scan_uvm_log<R: BufRead>(mut reader: R) -> std::io::Result<UvmLogScan> {
    let mut passed = false;
    let mut failed = false;
    let mut result_seen = false;
    let mut error_lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if !result_seen && ERROR_MARKERS.iter().any(|m| line.contains(m)) {
            error_lines.push(line.trim().to_string());
            failed = true;
        }
        if line.contains(TEST_PASSED) {
            result_seen = true;
            passed = true;
        }
        if line.contains(TEST_FAILED) {
            failed = true;
            break;
        }
    }

    Ok(UvmLogScan {
        passed: passed && !failed,
        error_lines,
    })
}

/// Native checker for UVM testbench logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UvmLogCheck;

impl DeviceLogCheck for UvmLogCheck {
    fn check(
        &self,
        log: &Path,
        core: &str,
        test: &str,
        report: &RegressionReport,
        write: WritePolicy,
    ) -> bool {
        let scan = File::open(log).and_then(|f| scan_uvm_log(BufReader::new(f)));
        let (passed, detail) = match scan {
            Ok(scan) => (scan.passed, scan.error_lines),
            Err(e) => (false, vec![format!("Cannot read log: {}", e)]),
        };

        if write.should_write(passed) {
            let mut lines = vec![format!("{} uvm log : {}", core, log.display())];
            if passed {
                lines.push(format!("{} : [PASSED]", test));
                lines.push(String::new());
            } else {
                lines.push(format!("{} : [FAILED]", test));
                lines.extend(detail);
                lines.push(String::new());
            }
            if let Err(e) = report.append_lines(&lines) {
                tracing::warn!("Cannot append to {}: {}", report.path().display(), e);
            }
        }
        passed
    }
}
