//! Error types for the video-watermark-locator crate.

use std::path::PathBuf;

/// Errors that terminate a localization run.
///
/// Finding no watermark is not an error: that outcome resolves through the
/// fallback policy of the tracker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The video file is missing, cannot be probed, or the decoder cannot start.
    #[error("cannot open video {}: {reason}", path.display())]
    SourceUnavailable {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The container opened but decoding produced no frames.
    #[error("no frames extracted from video {}", path.display())]
    NoFramesExtracted {
        /// Path that was decoded.
        path: PathBuf,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// An I/O error occurred while reading files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The report could not be serialized.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unavailable = Error::source_unavailable("/tmp/missing.mp4", "file not found");
        let msg = unavailable.to_string();
        assert!(msg.contains("/tmp/missing.mp4"));
        assert!(msg.contains("file not found"));

        let empty = Error::NoFramesExtracted {
            path: PathBuf::from("clip.mp4"),
        };
        assert!(empty.to_string().contains("no frames"));

        let invalid = Error::InvalidConfig("persistence must be in (0, 1]".to_string());
        assert!(invalid.to_string().contains("persistence"));
    }
}
