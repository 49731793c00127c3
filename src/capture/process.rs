//! External process management
//!
//! `ProcessLauncher` and `ProcessHandle` are the seam between the recording
//! lifecycle and the OS. `ManagedProcess` layers the stop escalation on top.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// What a managed process is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Display,
    Encoder,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Display => write!(f, "display server"),
            ProcessRole::Encoder => write!(f, "encoder"),
        }
    }
}

/// Everything needed to launch one external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub role: ProcessRole,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Keep a stdin pipe open for in-band control
    pub stdin_channel: bool,
}

impl ProcessSpec {
    pub fn new(role: ProcessRole, program: impl Into<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin_channel: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin_channel(mut self) -> Self {
        self.stdin_channel = true;
        self
    }

    /// Shell-ish rendering for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Observed termination of a process. `code` is `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exited {
    pub code: Option<i32>,
}

impl From<std::process::ExitStatus> for Exited {
    fn from(status: std::process::ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

/// Spawns processes and runs one-shot probes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>>;

    /// Run `spec` to completion and report whether it exited successfully.
    async fn probe(&self, spec: &ProcessSpec) -> io::Result<bool>;
}

/// A running (or finished) external process.
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<Exited>>;

    /// Write an in-band quit token to the process's stdin.
    async fn send_quit(&mut self, token: &[u8]) -> io::Result<()>;

    /// Ask the process to terminate (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Force-kill the process (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for exit, giving up after `timeout`.
    async fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<Exited>>;
}

/// Launches real OS processes through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::null())
            // own process group: a terminal ^C reaches only us, stop order stays ours
            .process_group(0);

        match spec.role {
            ProcessRole::Display => command.stderr(Stdio::null()),
            // encoder errors are worth seeing on the terminal
            ProcessRole::Encoder => command.stderr(Stdio::inherit()),
        };
        command.stdin(if spec.stdin_channel {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        debug!("spawned {} (pid {:?}): {}", spec.role, child.id(), spec.command_line());

        Ok(Box::new(SystemProcess { child, stdin }))
    }

    async fn probe(&self, spec: &ProcessSpec) -> io::Result<bool> {
        let status = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .status()
            .await?;
        Ok(status.success())
    }
}

struct SystemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<Exited>> {
        Ok(self.child.try_wait()?.map(Exited::from))
    }

    async fn send_quit(&mut self, token: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdin channel"))?;
        stdin.write_all(token).await?;
        stdin.flush().await
    }

    fn terminate(&mut self) -> io::Result<()> {
        // already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: plain syscall on a pid we spawned and have not reaped yet
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<Exited>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(Some(status?.into())),
            Err(_) => Ok(None),
        }
    }
}

/// How a process ended during `ManagedProcess::shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPath {
    /// Exited before the stop sequence began
    AlreadyExited,
    /// Honoured the quit token
    Graceful,
    /// Needed a terminate request
    Terminated,
    /// Needed a force-kill
    Killed,
    /// Still not confirmed gone after the kill window
    Unconfirmed,
}

/// Bounded waits for each escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWindows {
    pub graceful: Duration,
    pub terminate: Duration,
    pub kill: Duration,
}

/// A spawned process owned by exactly one backend.
pub struct ManagedProcess {
    role: ProcessRole,
    handle: Box<dyn ProcessHandle>,
}

impl ManagedProcess {
    pub fn spawn(launcher: &dyn ProcessLauncher, spec: &ProcessSpec) -> io::Result<Self> {
        let handle = launcher.spawn(spec)?;
        Ok(Self {
            role: spec.role,
            handle,
        })
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// `Ok(Some(_))` once the process has exited.
    pub fn poll_exit(&mut self) -> io::Result<Option<Exited>> {
        self.handle.try_wait()
    }

    /// Stop the process, escalating quit token → terminate → kill.
    ///
    /// The quit step is skipped when `quit_token` is `None`. Every later step
    /// runs even if sending the previous request failed.
    pub async fn shutdown(&mut self, quit_token: Option<&[u8]>, windows: StopWindows) -> StopPath {
        match self.handle.try_wait() {
            Ok(Some(exited)) => {
                debug!("{} already exited ({:?})", self.role, exited.code);
                return StopPath::AlreadyExited;
            }
            Ok(None) => {}
            Err(e) => warn!("cannot poll {} before stop: {}", self.role, e),
        }

        if let Some(token) = quit_token {
            match self.handle.send_quit(token).await {
                Ok(()) => {
                    if self.wait_step(windows.graceful).await {
                        info!("{} stopped cleanly", self.role);
                        return StopPath::Graceful;
                    }
                    warn!("{} did not exit within {:?} of the quit request", self.role, windows.graceful);
                }
                Err(e) => warn!("cannot send quit token to {}: {}", self.role, e),
            }
        }

        if let Err(e) = self.handle.terminate() {
            warn!("terminate request to {} failed: {}", self.role, e);
        }
        if self.wait_step(windows.terminate).await {
            info!("{} stopped after terminate request", self.role);
            return StopPath::Terminated;
        }

        warn!(
            "{} (pid {:?}) still running after {:?}; force-killing",
            self.role,
            self.handle.id(),
            windows.terminate
        );
        if let Err(e) = self.handle.kill() {
            warn!("kill of {} failed: {}", self.role, e);
        }
        if self.wait_step(windows.kill).await {
            return StopPath::Killed;
        }

        warn!("{} did not confirm exit after force-kill", self.role);
        StopPath::Unconfirmed
    }

    async fn wait_step(&mut self, window: Duration) -> bool {
        match self.handle.wait_for(window).await {
            Ok(exited) => exited.is_some(),
            Err(e) => {
                warn!("waiting on {} failed: {}", self.role, e);
                false
            }
        }
    }
}
