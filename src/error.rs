//! Error taxonomy for the acquisition/inference loop.
//!
//! Every fallible operation returns `anyhow::Result`. Failures that callers need
//! to tell apart are raised as a `StreamError` and converted with `.into()`, so
//! they can be recovered with `StreamError::classify`.

/// Classified failure of a stream operation.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamError {
    /// The requested model variant could not be loaded. Fatal to `start()`.
    ModelLoad { variant: String, reason: String },
    /// No camera answered after the full index/backend search. Fatal to `start()`.
    DeviceUnavailable { attempts: Vec<String> },
    /// An image/video/snapshot source could not be opened. Fatal to `start()`.
    SourceUnavailable { source: String, reason: String },
    /// Mid-stream read failure. Ends the session.
    StreamRead { sequence: u64, reason: String },
    /// A single detection call failed. Reported for that tick only.
    Inference { sequence: u64, reason: String },
    /// Configuration rejected before anything was opened.
    InvalidConfig(String),
}

impl StreamError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::ModelLoad { .. } => "MODEL_LOAD",
            StreamError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            StreamError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            StreamError::StreamRead { .. } => "STREAM_READ",
            StreamError::Inference { .. } => "INFERENCE",
            StreamError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Find the `StreamError` carried by an `anyhow::Error`, if any.
    pub fn classify(err: &anyhow::Error) -> Option<&StreamError> {
        err.chain().find_map(|cause| cause.downcast_ref::<StreamError>())
    }

    /// True for errors that end (or prevent) a session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::Inference { .. })
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::ModelLoad { variant, reason } => {
                write!(f, "{}: failed to load model {}: {}", self.code(), variant, reason)
            }
            StreamError::DeviceUnavailable { attempts } => write!(
                f,
                "{}: no camera opened after trying {}",
                self.code(),
                attempts.join(", ")
            ),
            StreamError::SourceUnavailable { source, reason } => {
                write!(f, "{}: cannot open {}: {}", self.code(), source, reason)
            }
            StreamError::StreamRead { sequence, reason } => write!(
                f,
                "{}: read failed after frame {}: {}",
                self.code(),
                sequence,
                reason
            ),
            StreamError::Inference { sequence, reason } => {
                write!(f, "{}: frame {}: {}", self.code(), sequence, reason)
            }
            StreamError::InvalidConfig(message) => write!(f, "{}: {}", self.code(), message),
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classify_finds_error_under_context() {
        let err: anyhow::Error = StreamError::StreamRead {
            sequence: 4,
            reason: "device vanished".to_string(),
        }
        .into();
        let err = Err::<(), _>(err).context("tick").unwrap_err();

        let classified = StreamError::classify(&err).expect("classified");
        assert_eq!(classified.code(), "STREAM_READ");
        assert!(classified.is_fatal());
    }

    #[test]
    fn inference_errors_are_not_fatal() {
        let err = StreamError::Inference {
            sequence: 1,
            reason: "bad tensor".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "INFERENCE: frame 1: bad tensor");
    }

    #[test]
    fn plain_anyhow_errors_are_unclassified() {
        let err = anyhow::anyhow!("something else");
        assert!(StreamError::classify(&err).is_none());
    }
}
