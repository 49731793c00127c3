//! Recording test doubles for the process layer and screencast service

use super::process::{Exited, ProcessHandle, ProcessLauncher, ProcessRole, ProcessSpec};
use super::screencast::{ScreencastRecording, ScreencastRequest, ScreencastService};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One observable interaction, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Spawn(ProcessRole),
    Probe,
    Quit(ProcessRole),
    Terminate(ProcessRole),
    Kill(ProcessRole),
    ScreencastStart,
    ScreencastStop,
}

/// Which request finally makes a fake process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    ExitOnQuit,
    ExitOnTerminate,
    ExitOnKill,
    Never,
}

type CallLog = Arc<Mutex<Vec<Call>>>;
type Timeline = Arc<Mutex<Vec<(Instant, Call)>>>;

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push(call);
}

fn stamp(timeline: &Timeline, call: Call) {
    timeline.lock().unwrap().push((Instant::now(), call));
}

pub struct FakeLauncher {
    timeline: Timeline,
    display: Reaction,
    encoder: Reaction,
    display_dies_on_start: bool,
    probe_ok: bool,
    encoder_spawn_fails: bool,
    encoder_crashed: Arc<AtomicBool>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Vec::new())),
            display: Reaction::ExitOnTerminate,
            encoder: Reaction::ExitOnQuit,
            display_dies_on_start: false,
            probe_ok: true,
            encoder_spawn_fails: false,
            encoder_crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn display(mut self, reaction: Reaction) -> Self {
        self.display = reaction;
        self
    }

    pub fn encoder(mut self, reaction: Reaction) -> Self {
        self.encoder = reaction;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_ok = false;
        self
    }

    pub fn display_dies_on_start(mut self) -> Self {
        self.display_dies_on_start = true;
        self
    }

    pub fn failing_encoder_spawn(mut self) -> Self {
        self.encoder_spawn_fails = true;
        self
    }

    /// Make the encoder look as if it exited on its own.
    pub fn crash_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.encoder_crashed)
    }

    pub fn crash_encoder(&self) {
        self.encoder_crashed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.timeline.lock().unwrap().iter().map(|(_, call)| call.clone()).collect()
    }

    /// When the first `call` happened, on the tokio clock.
    pub fn time_of(&self, call: &Call) -> Option<Instant> {
        self.timeline
            .lock()
            .unwrap()
            .iter()
            .find(|(_, c)| c == call)
            .map(|(at, _)| *at)
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, spec: &ProcessSpec) -> io::Result<Box<dyn ProcessHandle>> {
        if spec.role == ProcessRole::Encoder && self.encoder_spawn_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg not found"));
        }
        stamp(&self.timeline, Call::Spawn(spec.role));

        let (reaction, exited, crashed) = match spec.role {
            ProcessRole::Display => (self.display, self.display_dies_on_start, None),
            ProcessRole::Encoder => (self.encoder, false, Some(Arc::clone(&self.encoder_crashed))),
        };
        Ok(Box::new(FakeProcess {
            role: spec.role,
            timeline: Arc::clone(&self.timeline),
            reaction,
            exited,
            crashed,
        }))
    }

    async fn probe(&self, _spec: &ProcessSpec) -> io::Result<bool> {
        stamp(&self.timeline, Call::Probe);
        Ok(self.probe_ok)
    }
}

struct FakeProcess {
    role: ProcessRole,
    timeline: Timeline,
    reaction: Reaction,
    exited: bool,
    crashed: Option<Arc<AtomicBool>>,
}

impl FakeProcess {
    fn has_exited(&self) -> bool {
        self.exited
            || self
                .crashed
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn status(&self) -> Option<Exited> {
        self.has_exited().then_some(Exited { code: Some(0) })
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        (!self.has_exited()).then_some(4242)
    }

    fn try_wait(&mut self) -> io::Result<Option<Exited>> {
        Ok(self.status())
    }

    async fn send_quit(&mut self, _token: &[u8]) -> io::Result<()> {
        stamp(&self.timeline, Call::Quit(self.role));
        if self.reaction == Reaction::ExitOnQuit {
            self.exited = true;
        }
        Ok(())
    }

    fn terminate(&mut self) -> io::Result<()> {
        stamp(&self.timeline, Call::Terminate(self.role));
        if matches!(self.reaction, Reaction::ExitOnQuit | Reaction::ExitOnTerminate) {
            self.exited = true;
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        stamp(&self.timeline, Call::Kill(self.role));
        if self.reaction != Reaction::Never {
            self.exited = true;
        }
        Ok(())
    }

    /// Returns at once if already gone, otherwise after the whole window:
    /// nothing but a signal or the crash switch ends a fake process.
    async fn wait_for(&mut self, timeout: Duration) -> io::Result<Option<Exited>> {
        if !self.has_exited() {
            tokio::time::sleep(timeout).await;
        }
        Ok(self.status())
    }
}

/// Screencast service double sharing a call log with the process double.
pub struct FakeScreencast {
    log: CallLog,
    start_error: Option<String>,
    stop_error: Option<String>,
}

impl FakeScreencast {
    pub fn new(log: Arc<Mutex<Vec<Call>>>) -> Self {
        Self {
            log,
            start_error: None,
            stop_error: None,
        }
    }

    pub fn failing_start(mut self, reason: &str) -> Self {
        self.start_error = Some(reason.to_string());
        self
    }

    pub fn failing_stop(mut self, reason: &str) -> Self {
        self.stop_error = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl ScreencastService for FakeScreencast {
    async fn start(&self, request: &ScreencastRequest) -> anyhow::Result<Box<dyn ScreencastRecording>> {
        record(&self.log, Call::ScreencastStart);
        if let Some(reason) = &self.start_error {
            anyhow::bail!("{}", reason);
        }
        Ok(Box::new(FakeRecording {
            log: Arc::clone(&self.log),
            file: request.file_template.clone(),
            stop_error: self.stop_error.clone(),
        }))
    }
}

struct FakeRecording {
    log: CallLog,
    file: PathBuf,
    stop_error: Option<String>,
}

#[async_trait]
impl ScreencastRecording for FakeRecording {
    fn output(&self) -> Option<&std::path::Path> {
        Some(&self.file)
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        record(&self.log, Call::ScreencastStop);
        match self.stop_error {
            Some(reason) => anyhow::bail!("{}", reason),
            None => Ok(()),
        }
    }
}
