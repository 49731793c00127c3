use crate::capture::BackendKind;
use crate::utils::path::expand_output_template;
use anyhow::Context;
use chrono::Local;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which capture backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Screencast service inside a GNOME session, virtual display otherwise
    #[default]
    Auto,
    Local,
    Screencast,
}

impl BackendChoice {
    pub fn resolve(self, env: &SessionEnv) -> BackendKind {
        match self {
            BackendChoice::Local => BackendKind::LocalEncode,
            BackendChoice::Screencast => BackendKind::DelegatedScreencast,
            BackendChoice::Auto if env.has_gnome_session() => BackendKind::DelegatedScreencast,
            BackendChoice::Auto => BackendKind::LocalEncode,
        }
    }
}

impl FromStr for BackendChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "local" | "xvfb" => Ok(BackendChoice::Local),
            "screencast" | "gnome" => Ok(BackendChoice::Screencast),
            other => anyhow::bail!("unknown backend '{}' (expected auto, local or screencast)", other),
        }
    }
}

/// The bits of the desktop environment that drive backend auto-selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnv {
    pub current_desktop: Option<String>,
    pub session_bus: bool,
}

impl SessionEnv {
    pub fn from_process() -> Self {
        Self {
            current_desktop: std::env::var("XDG_CURRENT_DESKTOP").ok(),
            session_bus: std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_some(),
        }
    }

    fn has_gnome_session(&self) -> bool {
        self.session_bus
            && self
                .current_desktop
                .as_deref()
                .is_some_and(|desktop| desktop.split(':').any(|d| d.eq_ignore_ascii_case("gnome")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution {
            width: 1280,
            height: 720,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .with_context(|| format!("resolution '{}' is not WIDTHxHEIGHT", s))?;
        let resolution = Resolution {
            width: w.trim().parse().with_context(|| format!("bad width in '{}'", s))?,
            height: h.trim().parse().with_context(|| format!("bad height in '{}'", s))?,
        };
        if resolution.width == 0 || resolution.height == 0 {
            anyhow::bail!("resolution '{}' has a zero dimension", s);
        }
        Ok(resolution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub program: String,
    /// X display name, e.g. `:99`
    pub id: String,
    pub resolution: Resolution,
    pub color_depth: u8,
    pub extra_args: Vec<String>,
    /// Query the display once before trusting it
    pub verify: bool,
    pub probe_program: String,
    pub startup_grace_ms: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            program: "Xvfb".into(),
            id: ":99".into(),
            resolution: Resolution::default(),
            color_depth: 24,
            extra_args: vec!["-ac".into(), "+extension".into(), "RANDR".into()],
            verify: true,
            probe_program: "xdpyinfo".into(),
            startup_grace_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub program: String,
    pub codec: String,
    pub preset: String,
    pub tune: Option<String>,
    pub crf: u8,
    /// Keyframe interval
    pub gop: Option<u32>,
    pub pixel_format: String,
    pub threads: u32,
    /// Pixel offset of the grabbed area inside the display
    pub offset: (i32, i32),
    pub quit_token: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            codec: "libx264".into(),
            preset: "ultrafast".into(),
            tune: None,
            crf: 28,
            gop: None,
            pixel_format: "yuv420p".into(),
            threads: 2,
            offset: (0, 0),
            quit_token: "q".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StopSettings {
    pub graceful_ms: u64,
    pub terminate_ms: u64,
    pub kill_ms: u64,
    pub display_terminate_ms: u64,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            graceful_ms: 5000,
            terminate_ms: 2000,
            kill_ms: 2000,
            display_terminate_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub cpu_warn_percent: f32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            cpu_warn_percent: 90.0,
        }
    }
}

/// Full recorder configuration. Every field has a default so a config file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Output file, may contain strftime tokens
    pub output: PathBuf,
    pub backend: BackendChoice,
    pub framerate: u32,
    pub cursor_visible: bool,
    pub poll_interval_ms: u64,
    pub display: DisplaySettings,
    pub encoder: EncoderSettings,
    pub stop: StopSettings,
    pub monitor: MonitorSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("segments/recording_%Y-%m-%d_%H-%M-%S.mp4"),
            backend: BackendChoice::Auto,
            framerate: 15,
            cursor_visible: true,
            poll_interval_ms: 200,
            display: DisplaySettings::default(),
            encoder: EncoderSettings::default(),
            stop: StopSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl RecorderConfig {
    /// Defaults, overlaid with a JSON file when one is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.framerate == 0 {
            anyhow::bail!("framerate must be positive");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll interval must be positive");
        }
        let Resolution { width, height } = self.display.resolution;
        if width == 0 || height == 0 {
            anyhow::bail!("resolution {} has a zero dimension", self.display.resolution);
        }
        if self.output.as_os_str().is_empty() {
            anyhow::bail!("output path is empty");
        }
        expand_output_template(&self.output, Local::now())?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
