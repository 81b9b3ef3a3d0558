/// Isolated Process Sandbox
///
/// Runs one synthesized program in a fresh interpreter process and reports how
/// it terminated. Knows nothing about test cases or scoring.
///
/// **Per-run layout** (removed when the run ends, on every path):
/// ```text
/// <work_root>/run-<uuid>/program.py
/// <work_root>/run-<uuid>/workdir/      <- cwd, declared data files only
/// ```
///
/// **Confinement:**
/// - Cleared environment, fixed PATH, HOME inside the run directory
/// - Own process group, killed as a whole once the interpreter exits or times out
/// - rlimits on address space, CPU seconds, file size and open files. The CPU
///   limit always sits above the wall-clock timeout, so a busy loop is
///   reported as a timeout rather than a kernel kill.
/// - stdout/stderr each capped at `MAX_CAPTURED_BYTES`
///
/// Network access is not restricted.
use crate::synthesizer::SynthesizedProgram;
use anyhow::{bail, Context, Result};
use pylab_common::config::{HarnessConfig, ResourceLimits};
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-stream capture limit; the rest is drained and discarded
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const PROGRAM_FILE: &str = "program.py";
const WORKDIR: &str = "workdir";

/// How the sandboxed process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutcome {
    /// None when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

impl SandboxOutcome {
    fn timed_out(execution_time_ms: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            execution_time_ms,
        }
    }
}

/// Scratch directory guard: removed on drop, even when the run fails midway
struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    async fn create(work_root: &Path, run_id: Uuid) -> Result<Self> {
        let root = work_root.join(format!("run-{}", run_id));
        tokio::fs::create_dir_all(root.join(WORKDIR))
            .await
            .with_context(|| format!("Failed to create run directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn program_path(&self) -> PathBuf {
        self.root.join(PROGRAM_FILE)
    }

    fn workdir(&self) -> PathBuf {
        self.root.join(WORKDIR)
    }
}

impl Drop for RunDirectory {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            warn!(path = %self.root.display(), error = %e, "Failed to remove run directory");
        }
    }
}

/// Data files are plain names resolved inside the data directory
fn validate_data_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!("Invalid data file name: {:?}", name),
    }
}

fn signal_note(signal: i32) -> String {
    match signal {
        libc::SIGKILL => "[process killed: likely exceeded memory limit]".to_string(),
        libc::SIGSEGV => "[process killed: segmentation fault]".to_string(),
        libc::SIGXCPU => "[process killed: CPU time limit exceeded]".to_string(),
        libc::SIGXFSZ => "[process killed: file size limit exceeded]".to_string(),
        other => format!("[process killed by signal {}]", other),
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    (&mut reader)
        .take(MAX_CAPTURED_BYTES as u64)
        .read_to_end(&mut buf)
        .await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if discarded > 0 {
        text.push_str(&format!("\n[output truncated: {} bytes discarded]", discarded));
    }
    Ok(text)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

/// Lower the soft and hard limit, never above the current hard limit.
/// Runs between fork and exec, so only async-signal-safe calls.
#[cfg(unix)]
fn lower_rlimit(resource: RlimitResource, soft: u64, hard: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let hard = (hard as libc::rlim_t).min(current.rlim_max);
    let limit = libc::rlimit {
        rlim_cur: (soft as libc::rlim_t).min(hard),
        rlim_max: hard,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// CPU seconds granted to a run: the configured floor, raised to one second
/// past the wall-clock timeout
fn cpu_limit_secs(limits: &ResourceLimits, timeout: Duration) -> u64 {
    let wall_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    limits.cpu_time_limit_secs.max(wall_secs + 1)
}

#[cfg(unix)]
fn confine(cmd: &mut Command, limits: &ResourceLimits, cpu_secs: u64) {
    let memory_bytes = limits.memory_limit_mb.saturating_mul(1024 * 1024);
    let file_bytes = limits.max_file_size_mb.saturating_mul(1024 * 1024);
    let open_files = limits.max_open_files;

    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            lower_rlimit(libc::RLIMIT_AS, memory_bytes, memory_bytes)?;
            // SIGXCPU at the soft limit, SIGKILL one second later
            lower_rlimit(libc::RLIMIT_CPU, cpu_secs, cpu_secs + 1)?;
            lower_rlimit(libc::RLIMIT_FSIZE, file_bytes, file_bytes)?;
            lower_rlimit(libc::RLIMIT_NOFILE, open_files, open_files)?;
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn confine(_cmd: &mut Command, _limits: &ResourceLimits, _cpu_secs: u64) {}

/// SIGKILL the process group led by `pid`, catching anything it forked
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            debug!(pid, error = %std::io::Error::last_os_error(), "Process group already gone");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Resolve a bare interpreter name against the server's PATH, since the
/// child only sees `SANDBOX_PATH`
fn resolve_interpreter(program: &str) -> PathBuf {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(program);
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| PathBuf::from(program))
}

pub struct ProcessSandbox {
    python: PathBuf,
    python_args: Vec<String>,
    work_root: PathBuf,
    data_dir: PathBuf,
    limits: ResourceLimits,
}

impl ProcessSandbox {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            python: resolve_interpreter(&config.python),
            python_args: config.python_args.clone(),
            work_root: config.work_root.clone(),
            data_dir: config.data_dir.clone(),
            limits: config.limits.clone(),
        }
    }

    async fn stage_data_files(&self, workdir: &Path, data_files: &[String]) -> Result<()> {
        for name in data_files {
            validate_data_file_name(name)?;
            let source = self.data_dir.join(name);
            tokio::fs::copy(&source, workdir.join(name))
                .await
                .with_context(|| format!("Failed to stage data file {}", source.display()))?;
        }
        Ok(())
    }

    fn command(&self, run_dir: &RunDirectory, timeout: Duration) -> Command {
        let workdir = run_dir.workdir();
        let mut cmd = Command::new(&self.python);
        cmd.args(&self.python_args)
            .arg(run_dir.program_path())
            .current_dir(&workdir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", &workdir)
            .env("TMPDIR", &workdir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONHASHSEED", "0")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        confine(&mut cmd, &self.limits, cpu_limit_secs(&self.limits, timeout));
        cmd
    }

    /// Run `program` with a hard wall-clock `timeout`.
    ///
    /// Errors are infrastructure failures (scratch directory, staging, spawn);
    /// anything the program itself does is reported in the outcome.
    pub async fn execute(
        &self,
        run_id: Uuid,
        program: &SynthesizedProgram,
        data_files: &[String],
        timeout: Duration,
    ) -> Result<SandboxOutcome> {
        let run_dir = RunDirectory::create(&self.work_root, run_id).await?;
        tokio::fs::write(run_dir.program_path(), &program.source)
            .await
            .context("Failed to write synthesized program")?;
        self.stage_data_files(&run_dir.workdir(), data_files).await?;

        let start_time = Instant::now();
        let mut child = self
            .command(&run_dir, timeout)
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.python.display()))?;
        let pid = child.id();
        debug!(run_id = %run_id, pid, "Interpreter spawned");

        let mut stdin = child.stdin.take().context("Interpreter stdin not captured")?;
        let stdout = child.stdout.take().context("Interpreter stdout not captured")?;
        let stderr = child.stderr.take().context("Interpreter stderr not captured")?;

        let payload = program.stdin_payload.clone();
        let writer = tokio::spawn(async move {
            // The program may exit before reading everything
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Interpreter closed stdin early");
            }
        });
        let mut stdout_reader = tokio::spawn(read_capped(stdout));
        let mut stderr_reader = tokio::spawn(read_capped(stderr));

        let completion = async {
            let status = child.wait().await.context("Failed to wait for interpreter")?;
            // Background children would otherwise outlive the run and hold the pipes open
            kill_process_group(pid);
            let stdout = (&mut stdout_reader)
                .await
                .context("stdout reader failed")?
                .context("Failed to read stdout")?;
            let stderr = (&mut stderr_reader)
                .await
                .context("stderr reader failed")?
                .context("Failed to read stderr")?;
            Ok::<_, anyhow::Error>((status, stdout, stderr))
        };

        let waited = tokio::time::timeout(timeout, completion).await;
        let (status, stdout, mut stderr) = match waited {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, killing process group"
                );
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!(run_id = %run_id, error = %e, "Interpreter already exited");
                }
                writer.abort();
                stdout_reader.abort();
                stderr_reader.abort();
                return Ok(SandboxOutcome::timed_out(start_time.elapsed().as_millis() as u64));
            }
        };
        writer.abort();

        let signal = termination_signal(&status);
        if let Some(signal) = signal {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&signal_note(signal));
        }

        let outcome = SandboxOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out: false,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };
        debug!(
            run_id = %run_id,
            exit_code = ?outcome.exit_code,
            signal = ?signal,
            execution_ms = outcome.execution_time_ms,
            stdout_bytes = outcome.stdout.len(),
            stderr_bytes = outcome.stderr.len(),
            "Interpreter finished"
        );
        Ok(outcome)
    }
}
