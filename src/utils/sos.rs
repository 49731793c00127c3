//! Shutdown signalling
//!
//! `ShutdownSignal` is the single-fire event that ends a recording session.
//! `ShutdownCoordinator` maps process-level interrupts onto it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const UNSET: u8 = 0;
const INTERRUPT: u8 = 1;
const CRASH: u8 = 2;

/// Why a session is being shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT, SIGTERM or SIGHUP delivered to the process
    Interrupt,
    /// The capture backend stopped on its own
    Crash,
}

impl ShutdownCause {
    fn encode(self) -> u8 {
        match self {
            ShutdownCause::Interrupt => INTERRUPT,
            ShutdownCause::Crash => CRASH,
        }
    }

    fn decode(raw: u8) -> Option<Self> {
        match raw {
            INTERRUPT => Some(ShutdownCause::Interrupt),
            CRASH => Some(ShutdownCause::Crash),
            _ => None,
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Interrupt => write!(f, "interrupt"),
            ShutdownCause::Crash => write!(f, "capture crash"),
        }
    }
}

/// Write-once, read-many shutdown flag shared between clones.
///
/// The first cause to fire is kept forever; later fires are ignored.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    cause: Arc<AtomicU8>,
}

impl ShutdownSignal {
    pub fn new() -> ShutdownSignal {
        ShutdownSignal {
            cause: Arc::new(AtomicU8::new(UNSET)),
        }
    }

    /// Fire the signal. Returns `true` only for the call that actually set it.
    pub fn fire(&self, cause: ShutdownCause) -> bool {
        self.cause
            .compare_exchange(UNSET, cause.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The cause recorded by the first successful `fire`.
    pub fn cause(&self) -> Option<ShutdownCause> {
        ShutdownCause::decode(self.cause.load(Ordering::Acquire))
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates interrupt delivery into the shared `ShutdownSignal`.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
}

impl ShutdownCoordinator {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Handler body for an interrupt. Never blocks; idempotent.
    pub fn on_interrupt(&self) -> bool {
        self.signal.fire(ShutdownCause::Interrupt)
    }

    /// Route SIGINT, SIGTERM and SIGHUP to `on_interrupt`.
    ///
    /// Can only succeed once per process.
    pub fn install(&self) -> anyhow::Result<()> {
        let coordinator = self.clone();
        ctrlc::set_handler(move || {
            coordinator.on_interrupt();
        })?;
        Ok(())
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_interrupt_fires_once() {
        let coordinator = ShutdownCoordinator::new(ShutdownSignal::new());

        assert_eq!(coordinator.signal().cause(), None);
        assert!(coordinator.on_interrupt());
        assert!(!coordinator.on_interrupt());
        assert!(!coordinator.on_interrupt());

        assert_eq!(coordinator.signal().cause(), Some(ShutdownCause::Interrupt));
    }

    #[test]
    fn test_first_cause_wins() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.cause(), None);

        assert!(signal.fire(ShutdownCause::Crash));
        assert!(!signal.fire(ShutdownCause::Interrupt));
        assert_eq!(signal.cause(), Some(ShutdownCause::Crash));
    }

    #[test]
    fn test_clones_share_state() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();

        let handle = std::thread::spawn(move || signal.fire(ShutdownCause::Interrupt));
        assert!(handle.join().unwrap());

        assert_eq!(observer.cause(), Some(ShutdownCause::Interrupt));
    }
}
