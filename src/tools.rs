use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ToolConfig;
use crate::model::ToolVersions;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Limit for the `--help`/`--version` calls recorded in run manifests.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// A fully-specified external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn path_arg(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path.as_os_str())
    }

    pub fn flag_if(self, enabled: bool, flag: &str) -> Self {
        if enabled { self.arg(flag) } else { self }
    }

    pub fn render(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} did not finish within {seconds}s and was killed")]
    TimedOut { program: String, seconds: u64 },
    #[error("{program} did not produce {}", path.display())]
    MissingOutput { program: String, path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes, killing any that outlive `timeout`.
#[derive(Debug, Clone)]
pub struct SystemToolRunner {
    timeout: Duration,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let program = invocation.program.clone();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let status: ExitStatus = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() >= self.timeout {
                        kill_process_group(&mut child);
                        let _ = child.wait();
                        // Readers are left detached in case a descendant left the group.
                        return Err(ToolError::TimedOut {
                            program,
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    kill_process_group(&mut child);
                    return Err(ToolError::Wait { program, source });
                }
            }
        };

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Failed {
                program,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

/// The child leads its own process group, so this also reaches the
/// processes a wrapper script started.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill has no memory-safety preconditions.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: thread::JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// First non-empty output line of `program args`. Help screens often exit
/// non-zero, so a failed run still yields its stderr; a missing or hung tool
/// yields nothing.
pub fn command_version_optional(
    runner: &dyn ToolRunner,
    program: &str,
    args: &[&str],
) -> Option<String> {
    let invocation = args
        .iter()
        .fold(ToolInvocation::new(program), |invocation, arg| invocation.arg(*arg));
    let text = match runner.run(&invocation) {
        Ok(output) if output.stdout.trim().is_empty() => output.stderr,
        Ok(output) => output.stdout,
        Err(ToolError::Failed { stderr, .. }) => stderr,
        Err(_) => return None,
    };

    text.trim()
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

pub fn collect_tool_versions(runner: &dyn ToolRunner, tools: &ToolConfig) -> ToolVersions {
    let available = |program: &str, flag: &str| {
        command_version_optional(runner, program, &[flag]).map(|_| "available".to_string())
    };
    ToolVersions {
        ants_registration: available(&tools.ants_registration, "-h"),
        ants_apply_transforms: command_version_optional(
            runner,
            &tools.ants_apply_transforms,
            &["--version"],
        ),
        synthseg: available(&tools.synthseg, "--help"),
        easyreg: available(&tools.easyreg, "--help"),
    }
}
