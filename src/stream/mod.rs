mod controller;
mod session;

pub use controller::{RunReport, StopHandle, StreamConfig, StreamController, TickOutcome};
pub use session::{EndReason, SessionStats, StreamSession, StreamState};
