//! Delegated screencast backend
//!
//! Asks the GNOME Shell screencast service (`org.gnome.Shell.Screencast`)
//! to record on our behalf.
//!
//! GNOME Shell ends a screencast as soon as the bus connection that
//! requested it goes away, so a one-shot `gdbus call` is not enough. A small
//! embedded Python helper owns the connection for the whole recording:
//!
//!   python3 -c <helper> <file-template> <framerate> <cursor>
//!
//! It replies with one JSON line per request and waits on stdin for `stop`.
//! Dependencies on a GNOME desktop: python3, python3-gi.

use super::traits::{ActiveCapture, BackendKind, CaptureBackend, CaptureRequest};
use crate::error::{StartError, StopError};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const SCREENCAST_HELPER: &str = r#"
import json, sys

def emit(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

def call(bus, method, args, reply):
    from gi.repository import Gio, GLib
    return bus.call_sync(
        "org.gnome.Shell.Screencast", "/org/gnome/Shell/Screencast",
        "org.gnome.Shell.Screencast", method, args,
        GLib.VariantType(reply), Gio.DBusCallFlags.NONE, -1, None).unpack()

def main():
    try:
        from gi.repository import Gio, GLib
    except ImportError as e:
        emit({"error": "missing dependency: %s (install python3-gi)" % e})
        return 1

    template, framerate, cursor = sys.argv[1], int(sys.argv[2]), sys.argv[3] == "1"
    try:
        bus = Gio.bus_get_sync(Gio.BusType.SESSION, None)
        options = {"framerate": GLib.Variant("i", framerate),
                   "draw-cursor": GLib.Variant("b", cursor)}
        ok, filename = call(bus, "Screencast",
                            GLib.Variant("(sa{sv})", (template, options)), "(bs)")
    except Exception as e:
        emit({"error": str(e)})
        return 1
    if not ok:
        emit({"error": "screencast request refused"})
        return 1
    emit({"ok": True, "file": filename})

    sys.stdin.readline()
    try:
        (stopped,) = call(bus, "StopScreencast", None, "(b)")
    except Exception as e:
        emit({"error": str(e)})
        return 1
    emit({"ok": bool(stopped)})
    return 0 if stopped else 1

sys.exit(main())
"#;

/// Parameters of one screencast request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreencastRequest {
    pub file_template: PathBuf,
    pub framerate: u32,
    pub cursor_visible: bool,
}

/// The desktop-session service that records for us.
#[async_trait]
pub trait ScreencastService: Send + Sync {
    async fn start(&self, request: &ScreencastRequest) -> anyhow::Result<Box<dyn ScreencastRecording>>;
}

/// Opaque handle to a running screencast.
#[async_trait]
pub trait ScreencastRecording: Send {
    /// File name the service actually used, when it reported one.
    fn output(&self) -> Option<&Path>;

    async fn stop(self: Box<Self>) -> anyhow::Result<()>;
}

#[derive(Debug, Deserialize)]
struct HelperReply {
    #[serde(default)]
    ok: bool,
    file: Option<PathBuf>,
    error: Option<String>,
}

impl HelperReply {
    fn parse(line: &str) -> anyhow::Result<Self> {
        let reply: HelperReply =
            serde_json::from_str(line.trim()).with_context(|| format!("unexpected helper output: {}", line.trim()))?;
        if let Some(error) = reply.error {
            anyhow::bail!("{}", error);
        }
        if !reply.ok {
            anyhow::bail!("service reported failure");
        }
        Ok(reply)
    }
}

/// GNOME Shell screencast reached through the embedded helper.
#[derive(Debug, Clone)]
pub struct GnomeShellScreencast {
    python: String,
    reply_timeout: Duration,
}

impl Default for GnomeShellScreencast {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl ScreencastService for GnomeShellScreencast {
    async fn start(&self, request: &ScreencastRequest) -> anyhow::Result<Box<dyn ScreencastRecording>> {
        let mut child = Command::new(&self.python)
            .arg("-c")
            .arg(SCREENCAST_HELPER)
            .arg(&request.file_template)
            .arg(request.framerate.to_string())
            .arg(if request.cursor_visible { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // a terminal ^C must not end the screencast before StopScreencast
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot run {}", self.python))?;

        let stdin = child.stdin.take().context("helper stdin missing")?;
        let stdout = child.stdout.take().context("helper stdout missing")?;
        let mut replies = BufReader::new(stdout).lines();

        let reply = read_reply(&mut replies, self.reply_timeout).await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(e);
            }
        };
        debug!("screencast helper pid {:?} holds the session", child.id());

        Ok(Box::new(GnomeRecording {
            child,
            stdin,
            replies,
            file: reply.file,
            reply_timeout: self.reply_timeout,
        }))
    }
}

async fn read_reply(replies: &mut Lines<BufReader<ChildStdout>>, timeout: Duration) -> anyhow::Result<HelperReply> {
    let line = tokio::time::timeout(timeout, replies.next_line())
        .await
        .context("no reply from screencast service")??
        .context("screencast helper exited without replying")?;
    HelperReply::parse(&line)
}

struct GnomeRecording {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    file: Option<PathBuf>,
    reply_timeout: Duration,
}

#[async_trait]
impl ScreencastRecording for GnomeRecording {
    fn output(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        let GnomeRecording {
            mut child,
            mut stdin,
            mut replies,
            reply_timeout,
            ..
        } = *self;

        stdin.write_all(b"stop\n").await.context("cannot reach screencast helper")?;
        stdin.flush().await?;
        let reply = read_reply(&mut replies, reply_timeout).await;

        match tokio::time::timeout(reply_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!("screencast helper exited with {}", status),
            _ => {
                let _ = child.start_kill();
            }
        }
        reply.map(|_| ())
    }
}

pub struct ScreencastBackend {
    service: Arc<dyn ScreencastService>,
}

impl ScreencastBackend {
    pub fn new(service: Arc<dyn ScreencastService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CaptureBackend for ScreencastBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DelegatedScreencast
    }

    async fn start(&mut self, request: &CaptureRequest) -> Result<Box<dyn ActiveCapture>, StartError> {
        let screencast = ScreencastRequest {
            file_template: request.output.clone(),
            framerate: request.framerate,
            cursor_visible: request.cursor_visible,
        };
        info!("requesting screencast to {}", request.output.display());

        let recording = self
            .service
            .start(&screencast)
            .await
            .map_err(|e| StartError::ServiceUnavailable(format!("{:#}", e)))?;

        if let Some(file) = recording.output() {
            info!("screencast service recording to {}", file.display());
        }
        Ok(Box::new(DelegatedCapture { recording }))
    }
}

struct DelegatedCapture {
    recording: Box<dyn ScreencastRecording>,
}

#[async_trait]
impl ActiveCapture for DelegatedCapture {
    /// The service offers no liveness query; a failed recording only shows
    /// up when stopping it.
    fn is_alive(&mut self) -> bool {
        true
    }

    async fn stop(self: Box<Self>) -> Result<(), StopError> {
        self.recording.stop().await.map_err(|e| {
            warn!("screencast stop failed: {:#}", e);
            StopError::ServiceCallFailed(format!("{:#}", e))
        })?;
        info!("screencast stopped");
        Ok(())
    }
}
