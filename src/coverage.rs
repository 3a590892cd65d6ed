// src/coverage.rs
//
// Coverage merge: collect per-run coverage databases and merge them with
// the simulator vendor's tool.

use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{ExecutionBackend, Launcher, Sequential};
use crate::command::CommandTriple;
use crate::error::{ConfigError, RegressError};

/// Directory name of a per-run VCS coverage database.
pub const VCS_COV_DB: &str = "test.vdb";

/// Every `test.vdb` directory under `root`, sorted.
pub fn find_coverage_dbs(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found.sort();
    found
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if entry.file_name() == VCS_COV_DB {
            found.push(path);
        } else {
            walk(&path, found);
        }
    }
}

/// The merge command for `simulator`.
pub fn merge_command(
    simulator: &str,
    output_root: &Path,
    dbs: &[PathBuf],
) -> Result<CommandTriple, ConfigError> {
    match simulator {
        "vcs" => {
            let rtl_sim = output_root.join("rtl_sim");
            let dirs: Vec<String> = dbs.iter().map(|p| p.display().to_string()).collect();
            Ok(CommandTriple {
                desc: "coverage merge".to_string(),
                cmd: format!(
                    "urg -full64 -format both -dbname {} -report {} -dir {}",
                    VCS_COV_DB,
                    rtl_sim.join("urgReport").display(),
                    dirs.join(" ")
                ),
                dir: rtl_sim,
            })
        }
        other => Err(ConfigError::UnsupportedCoverageTool {
            tool: other.to_string(),
        }),
    }
}

/// Merge the coverage of a whole regression under `output_root`.
///
/// Finding nothing to merge is not an error.
pub fn gen_cov(output_root: &Path, simulator: &str, launcher: Launcher) -> Result<(), RegressError> {
    tracing::info!("Generating coverage report");
    let dbs = find_coverage_dbs(output_root);
    if dbs.is_empty() {
        tracing::info!("No coverage files found, skipping coverage merge");
        return Ok(());
    }
    tracing::info!("Found {} coverage databases", dbs.len());
    for db in &dbs {
        tracing::debug!("  {}", db.display());
    }

    let job = merge_command(simulator, output_root, &dbs)?;
    Sequential::new(launcher).execute(std::slice::from_ref(&job))?;
    tracing::info!(
        "Coverage report at {}",
        output_root.join("rtl_sim").join("urgReport").display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_nested_databases_sorted() {
        let tmp = tempdir().unwrap();
        for run in ["t.1", "t.0", "u.0"] {
            fs::create_dir_all(tmp.path().join("rtl_sim").join(run).join(VCS_COV_DB).join("snps"))
                .unwrap();
        }
        fs::write(tmp.path().join("rtl_sim").join(VCS_COV_DB), b"not a dir").unwrap();

        let dbs = find_coverage_dbs(tmp.path());
        let names: Vec<String> = dbs
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "rtl_sim/t.0/test.vdb",
                "rtl_sim/t.1/test.vdb",
                "rtl_sim/u.0/test.vdb",
            ]
        );
    }

    #[test]
    fn vcs_merge_command() {
        let dbs = vec![PathBuf::from("/o/rtl_sim/a.0/test.vdb"), PathBuf::from("/o/rtl_sim/b.0/test.vdb")];
        let job = merge_command("vcs", Path::new("/o"), &dbs).unwrap();
        assert_eq!(
            job.cmd,
            "urg -full64 -format both -dbname test.vdb -report /o/rtl_sim/urgReport \
             -dir /o/rtl_sim/a.0/test.vdb /o/rtl_sim/b.0/test.vdb"
        );
        assert_eq!(job.dir, Path::new("/o/rtl_sim"));
    }

    #[test]
    fn other_simulators_are_unsupported() {
        let err = merge_command("xlm", Path::new("/o"), &[]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedCoverageTool {
                tool: "xlm".to_string()
            }
        );
    }

    #[test]
    fn nothing_to_merge_succeeds() {
        let tmp = tempdir().unwrap();
        gen_cov(tmp.path(), "xlm", Launcher::Local).unwrap();
    }
}
