use serde::Serialize;
use std::time::{Duration, Instant};

use crate::ingest::SourceKind;

/// Controller lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Active,
}

/// Per-session bookkeeping. Created by `start`, torn down on `stop`,
/// end of stream, or a read failure.
#[derive(Clone, Debug)]
pub struct StreamSession {
    pub id: String,
    pub state: StreamState,
    pub source_kind: SourceKind,
    /// Frames read this session. Starts at 0.
    pub frame_counter: u64,
    pub last_sample_at: Option<Instant>,
    pub frames_processed: u64,
    pub inference_failures: u64,
    started_at: Instant,
}

impl StreamSession {
    pub fn new(source_kind: SourceKind, started_at: Instant) -> Self {
        Self {
            id: format!("{:016x}", rand::random::<u64>()),
            state: StreamState::Active,
            source_kind,
            frame_counter: 0,
            last_sample_at: None,
            frames_processed: 0,
            inference_failures: 0,
            started_at,
        }
    }

    /// Freeze the counters as the session ends.
    pub fn finish(mut self, reason: EndReason, now: Instant) -> SessionStats {
        self.state = StreamState::Idle;
        SessionStats {
            id: self.id,
            source_kind: self.source_kind,
            frames_read: self.frame_counter,
            frames_processed: self.frames_processed,
            inference_failures: self.inference_failures,
            duration: now.saturating_duration_since(self.started_at),
            end_reason: reason,
        }
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Stopped,
    EndOfStream,
    ReadFailed,
}

/// Counters of a finished session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStats {
    pub id: String,
    pub source_kind: SourceKind,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub inference_failures: u64,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub end_reason: EndReason,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
