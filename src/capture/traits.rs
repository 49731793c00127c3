//! Traits for capture backends

use crate::error::{StartError, StopError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Virtual display plus encoder process pair
    LocalEncode,
    /// Recording performed by the desktop-session screencast service
    DelegatedScreencast,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::LocalEncode => write!(f, "local encode"),
            BackendKind::DelegatedScreencast => write!(f, "delegated screencast"),
        }
    }
}

/// Per-run parameters shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Final output path, timestamp tokens already substituted
    pub output: PathBuf,
    pub framerate: u32,
    pub cursor_visible: bool,
}

/// Something that can begin a recording.
#[async_trait]
pub trait CaptureBackend: Send {
    fn kind(&self) -> BackendKind;

    async fn start(&mut self, request: &CaptureRequest) -> Result<Box<dyn ActiveCapture>, StartError>;
}

/// A recording in progress. Only obtainable from a successful `start`, and
/// consumed by `stop`.
#[async_trait]
pub trait ActiveCapture: Send {
    /// Non-blocking health check.
    fn is_alive(&mut self) -> bool;

    /// Release every resource in reverse acquisition order.
    async fn stop(self: Box<Self>) -> Result<(), StopError>;
}
