//! Session supervisor
//!
//! Drives one recording from output preparation to release of every
//! resource: start the selected backend, poll the shutdown signal and the
//! capture's health, stop, and turn the result into a process exit status.

use crate::capture::{ActiveCapture, BackendKind, CaptureBackend, CaptureRequest};
use crate::config::RecorderConfig;
use crate::error::{StartError, StopError};
use crate::pipeline::health::ResourceMonitor;
use crate::pipeline::state::{RecordingSession, SessionState};
use crate::utils::path::{expand_output_template, prepare_output_dir};
use crate::utils::sos::{ShutdownCause, ShutdownSignal};
use chrono::Local;
use log::{debug, error, info, warn};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Interrupted and every resource released
    Completed,
    /// The capture died on its own; cleanup still ran
    Crashed,
    /// Nothing was recorded
    StartFailed(StartError),
    /// Release of some resource could not be confirmed
    StopIncomplete(StopError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::StartFailed(_) => 1,
            RunOutcome::StopIncomplete(_) => 2,
            RunOutcome::Crashed => 3,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Crashed => write!(f, "capture crashed"),
            RunOutcome::StartFailed(e) => write!(f, "start failed at {}: {}", e.stage(), e),
            RunOutcome::StopIncomplete(e) => write!(f, "stop incomplete: {}", e),
        }
    }
}

/// Owns the session and the backend for the length of one run.
pub struct Supervisor {
    config: RecorderConfig,
    backend: Box<dyn CaptureBackend>,
    signal: ShutdownSignal,
}

impl Supervisor {
    pub fn new(config: RecorderConfig, backend: Box<dyn CaptureBackend>, signal: ShutdownSignal) -> Self {
        Self {
            config,
            backend,
            signal,
        }
    }

    /// Record until interrupted or until the capture dies.
    pub async fn run(self) -> RunOutcome {
        let (_, outcome) = self.supervise().await;
        outcome
    }

    async fn supervise(mut self) -> (RecordingSession, RunOutcome) {
        let kind = self.backend.kind();
        let expanded = expand_output_template(&self.config.output, Local::now());
        let output = match &expanded {
            Ok(path) => path.clone(),
            Err(_) => self.config.output.clone(),
        };

        let mut session = RecordingSession::new(output, kind);
        enter(&mut session, SessionState::Starting);
        info!("starting {} capture", kind);

        let mut capture = match self.start_capture(expanded).await {
            Ok(capture) => capture,
            Err(e) => {
                error!("start failed at {}: {}", e.stage(), e);
                enter(&mut session, SessionState::Failed);
                return (session, RunOutcome::StartFailed(e));
            }
        };

        enter(&mut session, SessionState::Running);
        info!("session running, waiting for interrupt");

        let monitor = self.spawn_monitor(&session);
        let cause = self.wait_for_shutdown(capture.as_mut()).await;
        info!("shutting down: {}", cause);

        enter(&mut session, SessionState::Stopping);
        let stopped = capture.stop().await;
        let outcome = outcome_of(cause, stopped);

        match outcome {
            RunOutcome::Completed => enter(&mut session, SessionState::Stopped),
            _ => enter(&mut session, SessionState::Failed),
        }

        if let Some((cancel, task)) = monitor {
            cancel.cancel();
            if let Err(e) = task.await {
                debug!("resource monitor task ended abnormally: {}", e);
            }
        }

        if let (Some(started), Some(stopped), Some(duration)) =
            (session.started_at(), session.stopped_at(), session.duration())
        {
            info!(
                "session {} {} -> {} ({:.1}s): {}",
                session.state(),
                started.format("%H:%M:%S"),
                stopped.format("%H:%M:%S"),
                duration.num_milliseconds() as f64 / 1000.0,
                session.output_path().display()
            );
        }
        (session, outcome)
    }

    async fn start_capture(&mut self, output: anyhow::Result<PathBuf>) -> Result<Box<dyn ActiveCapture>, StartError> {
        let output = output.map_err(|e| StartError::OutputUnavailable {
            path: self.config.output.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, format!("{:#}", e)),
        })?;
        prepare_output_dir(&output).map_err(|source| StartError::OutputUnavailable {
            path: output.clone(),
            source,
        })?;

        let request = CaptureRequest {
            output,
            framerate: self.config.framerate,
            cursor_visible: self.config.cursor_visible,
        };
        self.backend.start(&request).await
    }

    /// The monitor only ever sees the output path and its token.
    fn spawn_monitor(&self, session: &RecordingSession) -> Option<(CancellationToken, JoinHandle<()>)> {
        let settings = &self.config.monitor;
        // the screencast service may pick its own file name
        if !settings.enabled || session.backend_kind() != BackendKind::LocalEncode {
            return None;
        }

        let cancel = CancellationToken::new();
        let monitor = ResourceMonitor::new(session.output_path().to_path_buf())
            .with_interval(Duration::from_millis(settings.interval_ms.max(1)))
            .with_cpu_warn_percent(settings.cpu_warn_percent);
        let task = tokio::spawn(monitor.run(cancel.clone()));
        Some((cancel, task))
    }

    async fn wait_for_shutdown(&self, capture: &mut dyn ActiveCapture) -> ShutdownCause {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Some(cause) = self.signal.cause() {
                return cause;
            }

            if !capture.is_alive() {
                if self.signal.fire(ShutdownCause::Crash) {
                    error!("capture exited unexpectedly");
                }
                // an interrupt that landed first is what gets reported
                return self.signal.cause().unwrap_or(ShutdownCause::Crash);
            }
        }
    }
}

fn outcome_of(cause: ShutdownCause, stopped: Result<(), StopError>) -> RunOutcome {
    match (cause, stopped) {
        (ShutdownCause::Crash, Err(e)) => {
            warn!("cleanup after crash was not clean: {}", e);
            RunOutcome::Crashed
        }
        (ShutdownCause::Crash, Ok(())) => RunOutcome::Crashed,
        (ShutdownCause::Interrupt, Ok(())) => RunOutcome::Completed,
        (ShutdownCause::Interrupt, Err(e)) if e.is_clean_release() => {
            warn!("{}", e);
            RunOutcome::Completed
        }
        (ShutdownCause::Interrupt, Err(e)) => {
            error!("{}", e);
            RunOutcome::StopIncomplete(e)
        }
    }
}

fn enter(session: &mut RecordingSession, state: SessionState) {
    match session.advance(state) {
        Ok(()) => debug!("session -> {}", state),
        Err(e) => error!("{}", e),
    }
}
