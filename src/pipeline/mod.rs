//! Recording session pipeline
//!
//! - `state`: the session state machine
//! - `supervisor`: start, wait, stop and outcome mapping for one session
//! - `health`: optional resource sampling while recording

pub mod health;
pub mod state;
pub mod supervisor;

pub use supervisor::Supervisor;
