use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

/// A program plus arguments, built by the stage builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ServiceCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bare program name, used to tell tools apart in logs and fakes.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of one external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Shared interrupt flag checked before every launch and while waiting.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seam between the pipeline and the operating system.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output. Must honour `cancel`.
    fn run(
        &self,
        cmd: &ServiceCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ServiceError>;

    /// Resolve a configured program to an executable, if one exists.
    fn locate(&self, program: &Path) -> Option<PathBuf> {
        resolve_program(program)
    }
}

/// Runs real child processes, polling so interrupts can kill them.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(50),
        }
    }
}

impl ProcessRunner {
    pub fn with_poll_interval(poll: Duration) -> Self {
        Self { poll }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        cmd: &ServiceCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let program = cmd.program_name();
        debug!(command = %cmd, "launching");
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Drain both pipes on their own threads so a chatty tool never blocks.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if cancel.is_cancelled() => {
                    kill_quietly(&mut child);
                    let _ = stdout.join();
                    let _ = stderr.join();
                    return Err(ServiceError::Cancelled);
                }
                Ok(None) => thread::sleep(self.poll),
                Err(source) => {
                    kill_quietly(&mut child);
                    return Err(ServiceError::Wait { program, source });
                }
            }
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Resolve a program the way a shell would: paths with a separator are
/// checked directly, bare names are searched on `PATH`.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }
    if program.components().count() > 1 || program.is_absolute() {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search).find_map(|dir| {
        candidate_names(program)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|candidate| is_executable(candidate))
    })
}

fn candidate_names(program: &Path) -> Vec<OsString> {
    let mut names = vec![program.as_os_str().to_os_string()];
    if cfg!(windows) && program.extension().is_none() {
        let mut exe = program.as_os_str().to_os_string();
        exe.push(".exe");
        names.push(exe);
    }
    names
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
