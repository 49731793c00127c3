//! Local encode backend: virtual framebuffer display plus encoder process

use super::process::{ManagedProcess, ProcessLauncher, ProcessRole, ProcessSpec, StopPath, StopWindows};
use super::traits::{ActiveCapture, BackendKind, CaptureBackend, CaptureRequest};
use crate::config::{DisplaySettings, EncoderSettings, StopSettings};
use crate::error::{StartError, StopError};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct LocalEncodeBackend {
    launcher: Arc<dyn ProcessLauncher>,
    display: DisplaySettings,
    encoder: EncoderSettings,
    stop: StopSettings,
}

impl LocalEncodeBackend {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        display: DisplaySettings,
        encoder: EncoderSettings,
        stop: StopSettings,
    ) -> Self {
        Self {
            launcher,
            display,
            encoder,
            stop,
        }
    }

    fn display_spec(&self) -> ProcessSpec {
        let d = &self.display;
        ProcessSpec::new(ProcessRole::Display, &d.program)
            .arg(&d.id)
            .args([
                "-screen".to_string(),
                "0".to_string(),
                format!("{}x{}", d.resolution, d.color_depth),
                "-nolisten".to_string(),
                "tcp".to_string(),
                "-noreset".to_string(),
            ])
            .args(d.extra_args.iter().cloned())
    }

    fn probe_spec(&self) -> ProcessSpec {
        ProcessSpec::new(ProcessRole::Display, &self.display.probe_program).args(["-display", self.display.id.as_str()])
    }

    fn encoder_spec(&self, request: &CaptureRequest) -> ProcessSpec {
        let e = &self.encoder;
        let (x, y) = e.offset;

        let mut spec = ProcessSpec::new(ProcessRole::Encoder, &e.program)
            .env("DISPLAY", &self.display.id)
            .with_stdin_channel()
            .args(["-y", "-loglevel", "error", "-f", "x11grab"])
            .args(["-draw_mouse", if request.cursor_visible { "1" } else { "0" }])
            .arg("-video_size")
            .arg(self.display.resolution.to_string())
            .arg("-framerate")
            .arg(request.framerate.to_string())
            .arg("-i")
            .arg(format!("{}.0+{},{}", self.display.id, x, y))
            .args(["-c:v", e.codec.as_str(), "-preset", e.preset.as_str()]);

        if let Some(tune) = &e.tune {
            spec = spec.args(["-tune", tune.as_str()]);
        }
        spec = spec.arg("-crf").arg(e.crf.to_string());
        if let Some(gop) = e.gop {
            spec = spec.arg("-g").arg(gop.to_string());
        }
        spec.args(["-pix_fmt", e.pixel_format.as_str()])
            .arg("-threads")
            .arg(e.threads.to_string())
            .arg(request.output.to_string_lossy())
    }

    fn display_windows(&self) -> StopWindows {
        StopWindows {
            graceful: Duration::ZERO,
            terminate: Duration::from_millis(self.stop.display_terminate_ms),
            kill: Duration::from_millis(self.stop.kill_ms),
        }
    }

    async fn abandon_display(&self, display: &mut ManagedProcess) {
        let path = display.shutdown(None, self.display_windows()).await;
        info!("virtual display torn down ({:?})", path);
    }

    fn unavailable(&self, reason: impl Into<String>) -> StartError {
        StartError::DisplayUnavailable {
            display: self.display.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CaptureBackend for LocalEncodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalEncode
    }

    async fn start(&mut self, request: &CaptureRequest) -> Result<Box<dyn ActiveCapture>, StartError> {
        let spec = self.display_spec();
        info!("starting virtual display: {}", spec.command_line());
        let mut display = ManagedProcess::spawn(self.launcher.as_ref(), &spec)
            .map_err(|e| self.unavailable(format!("cannot spawn {}: {}", self.display.program, e)))?;

        // exiting right away usually means the display number is taken
        tokio::time::sleep(Duration::from_millis(self.display.startup_grace_ms)).await;
        match display.poll_exit() {
            Ok(None) => {}
            Ok(Some(exited)) => {
                error!("virtual display exited during startup ({:?})", exited.code);
                return Err(self.unavailable(format!("exited during startup with code {:?}", exited.code)));
            }
            Err(e) => {
                self.abandon_display(&mut display).await;
                return Err(self.unavailable(format!("cannot poll display process: {}", e)));
            }
        }

        if self.display.verify {
            let probe = self.probe_spec();
            let healthy = match self.launcher.probe(&probe).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("liveness probe {} could not run: {}", probe.program, e);
                    false
                }
            };
            if !healthy {
                error!("virtual display {} failed its liveness probe", self.display.id);
                self.abandon_display(&mut display).await;
                return Err(self.unavailable("liveness probe failed"));
            }
        }
        info!("virtual display {} is up", self.display.id);

        let spec = self.encoder_spec(request);
        info!("starting encoder: {}", spec.command_line());
        let encoder = match ManagedProcess::spawn(self.launcher.as_ref(), &spec) {
            Ok(encoder) => encoder,
            Err(e) => {
                error!("failed to spawn encoder: {}", e);
                self.abandon_display(&mut display).await;
                return Err(StartError::EncoderSpawnFailed(e));
            }
        };

        info!("recording to {}", request.output.display());
        Ok(Box::new(LocalCapture {
            encoder,
            display,
            quit_token: self.encoder.quit_token.clone().into_bytes(),
            encoder_windows: StopWindows {
                graceful: Duration::from_millis(self.stop.graceful_ms),
                terminate: Duration::from_millis(self.stop.terminate_ms),
                kill: Duration::from_millis(self.stop.kill_ms),
            },
            display_windows: self.display_windows(),
        }))
    }
}

/// Display and encoder pair owned for the duration of one recording.
struct LocalCapture {
    encoder: ManagedProcess,
    display: ManagedProcess,
    quit_token: Vec<u8>,
    encoder_windows: StopWindows,
    display_windows: StopWindows,
}

fn still_running(process: &mut ManagedProcess) -> bool {
    match process.poll_exit() {
        Ok(None) => true,
        Ok(Some(exited)) => {
            warn!("{} exited unexpectedly with code {:?}", process.role(), exited.code);
            false
        }
        Err(e) => {
            warn!("cannot poll {}: {}", process.role(), e);
            false
        }
    }
}

#[async_trait]
impl ActiveCapture for LocalCapture {
    fn is_alive(&mut self) -> bool {
        still_running(&mut self.encoder) && still_running(&mut self.display)
    }

    async fn stop(self: Box<Self>) -> Result<(), StopError> {
        let mut this = *self;
        let encoder = this
            .encoder
            .shutdown(Some(this.quit_token.as_slice()), this.encoder_windows)
            .await;
        // the display only goes once the encoder is gone; an unconfirmed
        // encoder has had its kill window by now, so the display follows anyway
        let display = this.display.shutdown(None, this.display_windows).await;
        info!("recording stopped (encoder: {:?}, display: {:?})", encoder, display);

        for (role, path) in [(ProcessRole::Encoder, encoder), (ProcessRole::Display, display)] {
            match path {
                StopPath::Killed => return Err(StopError::ForceKillRequired { role, confirmed: true }),
                StopPath::Unconfirmed => return Err(StopError::ForceKillRequired { role, confirmed: false }),
                _ => {}
            }
        }
        if encoder == StopPath::Terminated {
            return Err(StopError::GracefulTimeout(ProcessRole::Encoder));
        }
        Ok(())
    }
}
