// src/command.rs
//
// Command synthesis: turn templates plus the test matrix into concrete
// (description, command, working directory) triples.
//
// Substitution happens in passes, from least to most specific:
//   1. <out>, <sim_opts>, <cwd>        once per regression
//   2. <seed>                           once per iteration
//   3. <sim_dir>, <rtl_test>, <binary>, <test_name>, <iteration>
//
// How a triple is scheduled (locally, through a batch queue) is not decided
// here; see backend.rs.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::seed::SeedGen;
use crate::subst::{flatten_newlines, subst_vars};
use crate::testlist::{Run, TestList, TestSpec};

/// One concrete command, ready for an execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTriple {
    /// Human-readable description for logs and errors.
    pub desc: String,
    /// Fully substituted shell command.
    pub cmd: String,
    /// Directory the command runs in; created before it starts.
    pub dir: PathBuf,
}

/// Build the command for iteration `index` of `test`.
///
/// Fails if the binary the iteration needs has not been generated: that means
/// an earlier phase went wrong, and the regression must stop.
pub fn synthesize(
    base_cmd: &str,
    test: &TestSpec,
    index: u32,
    output_dir: &Path,
    bin_dir: &Path,
) -> Result<CommandTriple, ConfigError> {
    let run = Run { test, index };

    let sim_cmd = match &test.sim_opts {
        Some(opts) => format!("{} {}", base_cmd, flatten_newlines(opts)),
        None => base_cmd.to_string(),
    };

    let sim_dir = run.work_dir(output_dir);
    let binary = run.binary_path(bin_dir);

    if !binary.exists() {
        return Err(ConfigError::MissingBinary {
            test: test.test.clone(),
            iteration: index,
            path: binary,
        });
    }

    let sim_dir_str = sim_dir.display().to_string();
    let binary_str = binary.display().to_string();
    let index_str = index.to_string();
    let cmd = subst_vars(
        &sim_cmd,
        [
            ("sim_dir", sim_dir_str.as_str()),
            ("rtl_test", test.rtl_test.as_str()),
            ("binary", binary_str.as_str()),
            ("test_name", test.test.as_str()),
            ("iteration", index_str.as_str()),
        ],
    );

    Ok(CommandTriple {
        desc: format!("{} with {}", test.rtl_test, binary_str),
        cmd,
        dir: sim_dir,
    })
}

/// Per-regression values substituted into the base sim command.
#[derive(Debug, Clone)]
pub struct SimContext<'a> {
    /// Simulation output directory (`<out>`), usually `{o}/rtl_sim`.
    pub output_dir: &'a Path,
    /// Directory holding `{test}_{iteration}.bin`.
    pub bin_dir: &'a Path,
    /// Extra plusargs for every run (`<sim_opts>`).
    pub sim_opts: &'a str,
    /// Testbench root (`<cwd>`).
    pub core_dir: &'a Path,
}

/// Expand the whole matrix into simulation commands, in matrix order.
pub fn sim_commands(
    sim_cmd: &str,
    tests: &TestList,
    seed_gen: &dyn SeedGen,
    ctx: &SimContext<'_>,
) -> Result<Vec<CommandTriple>, ConfigError> {
    let out = ctx.output_dir.display().to_string();
    let cwd = ctx.core_dir.display().to_string();
    let base = subst_vars(
        sim_cmd,
        [
            ("out", out.as_str()),
            ("sim_opts", ctx.sim_opts),
            ("cwd", cwd.as_str()),
        ],
    );

    let mut cmds = Vec::with_capacity(tests.run_count());
    for run in tests.runs() {
        let seed = seed_gen.gen(run.index).to_string();
        let it_cmd = subst_vars(&base, [("seed", seed.as_str())]);
        cmds.push(synthesize(
            &it_cmd,
            run.test,
            run.index,
            ctx.output_dir,
            ctx.bin_dir,
        )?);
    }
    Ok(cmds)
}

/// Compile steps as triples that all run in the output directory.
///
/// Order is preserved; later steps use earlier steps' outputs.
pub fn compile_commands(
    compile_cmds: &[String],
    output_dir: &Path,
    cmp_opts: &str,
) -> Vec<CommandTriple> {
    let out = output_dir.display().to_string();
    let total = compile_cmds.len();
    compile_cmds
        .iter()
        .enumerate()
        .map(|(i, cmd)| CommandTriple {
            desc: format!("compile step {}/{}", i + 1, total),
            cmd: subst_vars(cmd, [("out", out.as_str()), ("cmp_opts", cmp_opts)]),
            dir: output_dir.to_path_buf(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{FixedSeed, StartSeed};
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn spec(name: &str, iterations: u32, sim_opts: Option<&str>) -> TestSpec {
        TestSpec {
            test: name.to_string(),
            rtl_test: "core_ibex_base_test".to_string(),
            iterations,
            sim_opts: sim_opts.map(str::to_string),
            no_post_compare: false,
            compare_opts: Default::default(),
            description: None,
        }
    }

    fn touch_binaries(bin_dir: &Path, test: &TestSpec) {
        for i in 0..test.iterations {
            fs::write(bin_dir.join(format!("{}_{}.bin", test.test, i)), b"\x13\x00").unwrap();
        }
    }

    #[test]
    fn synthesize_substitutes_run_variables() {
        let tmp = tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let test = spec("riscv_rand_jump_test", 1, Some("+a=1\n+b=2"));
        touch_binaries(&bin_dir, &test);

        let out = tmp.path().join("rtl_sim");
        let triple = synthesize(
            "simv -l <sim_dir>/sim.log +UVM_TESTNAME=<rtl_test> +bin=<binary> +n=<test_name>.<iteration>",
            &test,
            0,
            &out,
            &bin_dir,
        )
        .unwrap();

        let sim_dir = out.join("riscv_rand_jump_test.0");
        let binary = bin_dir.join("riscv_rand_jump_test_0.bin");
        assert_eq!(triple.dir, sim_dir);
        assert_eq!(
            triple.cmd,
            format!(
                "simv -l {}/sim.log +UVM_TESTNAME=core_ibex_base_test +bin={} \
                 +n=riscv_rand_jump_test.0 +a=1 +b=2",
                sim_dir.display(),
                binary.display()
            )
        );
        assert_eq!(
            triple.desc,
            format!("core_ibex_base_test with {}", binary.display())
        );
    }

    #[test]
    fn synthesize_fails_for_every_missing_binary() {
        let tmp = tempdir().unwrap();
        for name in ["a", "riscv_mmu_stress_test"] {
            let test = spec(name, 3, None);
            for i in 0..3 {
                let err = synthesize("simv", &test, i, tmp.path(), tmp.path()).unwrap_err();
                assert_eq!(
                    err,
                    ConfigError::MissingBinary {
                        test: name.to_string(),
                        iteration: i,
                        path: tmp.path().join(format!("{}_{}.bin", name, i)),
                    }
                );
            }
        }
    }

    #[test]
    fn sim_commands_give_distinct_dirs_per_iteration() {
        let tmp = tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let test = spec("riscv_arithmetic_basic_test", 4, None);
        touch_binaries(&bin_dir, &test);
        let tests = TestList { tests: vec![test] };
        let out = tmp.path().join("rtl_sim");
        let ctx = SimContext {
            output_dir: &out,
            bin_dir: &bin_dir,
            sim_opts: "+x=1",
            core_dir: Path::new("/core"),
        };

        let cmds = sim_commands(
            "<cwd>/simv +seed=<seed> <sim_opts> +bin=<binary>",
            &tests,
            &StartSeed(10),
            &ctx,
        )
        .unwrap();

        assert_eq!(cmds.len(), 4);
        let dirs: BTreeSet<_> = cmds.iter().map(|c| c.dir.clone()).collect();
        assert_eq!(dirs.len(), 4);
        for (i, c) in cmds.iter().enumerate() {
            assert!(c.cmd.starts_with(&format!("/core/simv +seed={} +x=1", 10 + i)));
            assert!(c.cmd.ends_with(&format!("riscv_arithmetic_basic_test_{}.bin", i)));
        }

        let again = sim_commands(
            "<cwd>/simv +seed=<seed> <sim_opts> +bin=<binary>",
            &tests,
            &StartSeed(10),
            &ctx,
        )
        .unwrap();
        assert_eq!(cmds, again);
    }

    #[test]
    fn sim_commands_stop_at_first_missing_binary() {
        let tmp = tempdir().unwrap();
        let test = spec("t", 2, None);
        fs::write(tmp.path().join("t_0.bin"), b"").unwrap();
        let tests = TestList { tests: vec![test] };
        let ctx = SimContext {
            output_dir: tmp.path(),
            bin_dir: tmp.path(),
            sim_opts: "",
            core_dir: tmp.path(),
        };
        let err = sim_commands("simv", &tests, &FixedSeed(1), &ctx).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBinary { iteration: 1, .. }));
    }

    #[test]
    fn compile_commands_keep_order_and_run_in_output_dir() {
        let cmds = compile_commands(
            &["mkdir -p <out>/obj".to_string(), "vcs -o <out>/simv <cmp_opts>".to_string()],
            Path::new("/o/rtl_sim"),
            "+define+X",
        );
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].cmd, "mkdir -p /o/rtl_sim/obj");
        assert_eq!(cmds[1].cmd, "vcs -o /o/rtl_sim/simv +define+X");
        assert_eq!(cmds[1].desc, "compile step 2/2");
        assert!(cmds.iter().all(|c| c.dir == Path::new("/o/rtl_sim")));
    }
}
