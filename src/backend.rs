// src/backend.rs
//
// Execution backends: run a list of commands, each in its own directory.
//
// - Sequential:    one command at a time, in order. Each directory is created
//                  just before its command runs, so after a failure the tree
//                  shows exactly how far the regression got.
// - BatchParallel: every directory is created up front, then all commands are
//                  submitted through the batch queue at once and waited on
//                  with one shared deadline.
//
// Both fail fast: the first nonzero exit or timeout aborts the invocation.
// The queue prefix belongs to the backend (Launcher), never to the command.
//
// Each command runs under `sh -c` with its directory as cwd. stdout and
// stderr are appended to `cmd.log` in that directory. On unix every command
// gets its own process group, and killing a command kills the whole group.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::CommandTriple;
use crate::config::BatchQueue;
use crate::error::ExecError;

/// Per-command timeout for sequential execution.
pub const SEQUENTIAL_TIMEOUT: Duration = Duration::from_secs(300);
/// Shared deadline for a whole parallel batch.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(600);
/// Per-step timeout for testbench compilation.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(999);

/// Captured output of a command, inside its working directory.
pub const CMD_LOG: &str = "cmd.log";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const LOG_TAIL_LINES: usize = 20;
/// Only the end of a log is read for its tail.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// How a command line reaches the shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Launcher {
    /// Run directly on this machine.
    #[default]
    Local,
    /// Submit through a batch queue (the submission command blocks until the
    /// job finishes, e.g. `bsub -Is`).
    Queue(BatchQueue),
}

impl Launcher {
    pub fn from_queue(queue: Option<BatchQueue>) -> Self {
        queue.map(Launcher::Queue).unwrap_or_default()
    }

    pub fn shell_line(&self, cmd: &str) -> String {
        match self {
            Launcher::Local => cmd.to_string(),
            Launcher::Queue(queue) => queue.wrap(cmd),
        }
    }
}

/// Strategy for running a set of independent commands.
pub trait ExecutionBackend {
    fn name(&self) -> &'static str;

    /// Run every job; stop at the first failure.
    fn execute(&self, jobs: &[CommandTriple]) -> Result<(), ExecError>;
}

/// Pick the backend for simulation runs: parallel through the queue if one is
/// configured, local and sequential otherwise.
pub fn backend_for(queue: Option<BatchQueue>) -> Box<dyn ExecutionBackend> {
    match queue {
        Some(queue) => Box::new(BatchParallel::new(queue)),
        None => Box::new(Sequential::new(Launcher::Local)),
    }
}

/// Run-and-wait, one command at a time.
#[derive(Debug, Clone)]
pub struct Sequential {
    launcher: Launcher,
    timeout: Duration,
}

impl Sequential {
    pub fn new(launcher: Launcher) -> Self {
        Self {
            launcher,
            timeout: SEQUENTIAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ExecutionBackend for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(&self, jobs: &[CommandTriple]) -> Result<(), ExecError> {
        for job in jobs {
            ensure_dir(&job.dir)?;
            tracing::info!("Running {}", job.desc);
            let mut child = spawn(job, &self.launcher)?;
            let deadline = Instant::now() + self.timeout;
            match wait_until(&mut child, deadline, job)? {
                Some(status) => check_status(job, status)?,
                None => {
                    kill(&mut child);
                    return Err(ExecError::Timeout {
                        desc: job.desc.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Submit everything through the batch queue at once.
#[derive(Debug, Clone)]
pub struct BatchParallel {
    launcher: Launcher,
    timeout: Duration,
}

impl BatchParallel {
    pub fn new(queue: BatchQueue) -> Self {
        Self {
            launcher: Launcher::Queue(queue),
            timeout: BATCH_TIMEOUT,
        }
    }

    /// Parallel execution without a queue. Only useful for tests and for
    /// machines where local parallelism is acceptable.
    pub fn local() -> Self {
        Self {
            launcher: Launcher::Local,
            timeout: BATCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ExecutionBackend for BatchParallel {
    fn name(&self) -> &'static str {
        "batch-parallel"
    }

    fn execute(&self, jobs: &[CommandTriple]) -> Result<(), ExecError> {
        // Submission is fire-and-forget, so every directory must exist first.
        for job in jobs {
            ensure_dir(&job.dir)?;
        }

        tracing::info!("Submitting {} commands as one batch", jobs.len());
        let mut running: Vec<(usize, Child)> = Vec::with_capacity(jobs.len());
        for (idx, job) in jobs.iter().enumerate() {
            match spawn(job, &self.launcher) {
                Ok(child) => running.push((idx, child)),
                Err(e) => {
                    kill_all(&mut running);
                    return Err(e);
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        while !running.is_empty() {
            let mut i = 0;
            while i < running.len() {
                let (idx, child) = &mut running[i];
                let job = &jobs[*idx];
                match child.try_wait() {
                    Ok(Some(status)) => {
                        running.swap_remove(i);
                        if let Err(e) = check_status(job, status) {
                            kill_all(&mut running);
                            return Err(e);
                        }
                        tracing::debug!("Finished {}", job.desc);
                    }
                    Ok(None) => i += 1,
                    Err(e) => {
                        let err = ExecError::SpawnError {
                            desc: job.desc.clone(),
                            source: e.to_string(),
                        };
                        kill_all(&mut running);
                        return Err(err);
                    }
                }
            }
            if running.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let pending: Vec<&str> = running
                    .iter()
                    .map(|(idx, _)| jobs[*idx].desc.as_str())
                    .collect();
                let desc = format!("batch ({} still running: {})", pending.len(), pending.join(", "));
                kill_all(&mut running);
                return Err(ExecError::Timeout {
                    desc,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ExecError> {
    fs::create_dir_all(dir).map_err(|e| ExecError::IoError {
        path: dir.display().to_string(),
        source: e.to_string(),
    })
}

fn spawn(job: &CommandTriple, launcher: &Launcher) -> Result<Child, ExecError> {
    let line = launcher.shell_line(&job.cmd);
    tracing::debug!("Command: {}", line);

    let spawn_err = |e: std::io::Error| ExecError::SpawnError {
        desc: job.desc.clone(),
        source: e.to_string(),
    };
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(job.dir.join(CMD_LOG))
        .map_err(spawn_err)?;
    let log_err = log.try_clone().map_err(spawn_err)?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&line)
        .current_dir(&job.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn().map_err(spawn_err)
}

/// Poll until the child exits (Some) or the deadline passes (None).
fn wait_until(
    child: &mut Child,
    deadline: Instant,
    job: &CommandTriple,
) -> Result<Option<ExitStatus>, ExecError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if Instant::now() >= deadline => return Ok(None),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(child);
                return Err(ExecError::SpawnError {
                    desc: job.desc.clone(),
                    source: e.to_string(),
                });
            }
        }
    }
}

fn check_status(job: &CommandTriple, status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    let log_tail = log_tail(&job.dir.join(CMD_LOG), LOG_TAIL_LINES);
    tracing::error!("{} failed with {}", job.desc, status);
    Err(ExecError::CommandFailed {
        desc: job.desc.clone(),
        code: status.code(),
        log_tail,
    })
}

/// Kill the command and everything it started, then reap it.
fn kill(child: &mut Child) {
    // The group id is the child's pid; it stays valid until the child is reaped.
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", child.id()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn kill_all(running: &mut Vec<(usize, Child)>) {
    for (_, child) in running.iter_mut() {
        kill(child);
    }
    running.clear();
}

/// Last `n` lines of a log file (empty if it can't be read). Invalid UTF-8
/// is replaced rather than ending the tail early.
fn log_tail(path: &Path, n: usize) -> Vec<String> {
    let Ok(mut file) = File::open(path) else {
        return Vec::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    if start > 0 && file.seek(SeekFrom::Start(start)).is_err() {
        return Vec::new();
    }

    let mut reader = BufReader::new(file);
    let mut tail = VecDeque::with_capacity(n + 1);
    let mut buf = Vec::new();
    // After a seek the first line is usually partial.
    let mut skip_partial = start > 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if skip_partial {
            skip_partial = false;
            continue;
        }
        let line = String::from_utf8_lossy(&buf);
        tail.push_back(line.trim_end_matches(&['\n', '\r'][..]).to_string());
        if tail.len() > n {
            tail.pop_front();
        }
    }
    tail.into()
}
