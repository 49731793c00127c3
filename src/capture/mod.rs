//! Capture backends
//!
//! Two interchangeable ways to produce a recording: a local virtual display
//! with an encoder process, or the desktop session's screencast service.
//! Both sit behind `CaptureBackend` / `ActiveCapture`.

#[cfg(test)]
pub(crate) mod fake;
mod local;
mod process;
mod screencast;
mod traits;

pub use local::LocalEncodeBackend;
pub use process::{ProcessRole, SystemLauncher};
pub use screencast::{GnomeShellScreencast, ScreencastBackend};
pub use traits::{ActiveCapture, BackendKind, CaptureBackend, CaptureRequest};

use crate::config::{RecorderConfig, SessionEnv};
use std::sync::Arc;

/// Build the backend the configuration asks for, using real processes and
/// the real session service.
pub fn select_backend(config: &RecorderConfig, env: &SessionEnv) -> Box<dyn CaptureBackend> {
    match config.backend.resolve(env) {
        BackendKind::LocalEncode => Box::new(LocalEncodeBackend::new(
            Arc::new(SystemLauncher),
            config.display.clone(),
            config.encoder.clone(),
            config.stop,
        )),
        BackendKind::DelegatedScreencast => {
            Box::new(ScreencastBackend::new(Arc::new(GnomeShellScreencast::default())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendChoice;

    #[test]
    fn test_selection_is_made_once_from_config() {
        let mut config = RecorderConfig::default();
        let env = SessionEnv {
            current_desktop: Some("GNOME".into()),
            session_bus: true,
        };

        assert_eq!(select_backend(&config, &env).kind(), BackendKind::DelegatedScreencast);

        config.backend = BackendChoice::Local;
        assert_eq!(select_backend(&config, &env).kind(), BackendKind::LocalEncode);
    }
}
