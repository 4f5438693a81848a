// ============================================================================
// ERROR TAXONOMY — every failure degrades to "skip this item" or "cancel
// this session"; nothing here may take down the host process.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

/// Failures the projection-painting core can report.
///
/// Only [`ProjectionError::UnsupportedCalibrationFile`] is surfaced to the
/// user as a hard report; everything else is recovered where it occurs
/// (caches purge stale entries, imports skip bad rows, an unready host
/// context cancels the session and drops back to listening).
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A referenced host object no longer exists. Caches purge the entry
    /// and the operation becomes a no-op.
    #[error("referenced {kind} no longer exists")]
    StaleReference { kind: &'static str },

    /// Zero-dimension or unreadable image. Skipped, never memoized.
    #[error("invalid image '{name}': {reason}")]
    InvalidImage { name: String, reason: String },

    /// The calibration file's header row does not carry the expected
    /// columns. The whole import aborts with a user-visible count of 0.
    #[error("unsupported calibration file '{}': {reason}", path.display())]
    UnsupportedCalibrationFile { path: PathBuf, reason: String },

    /// A data row with the wrong field count. Skipped and counted.
    #[error("malformed calibration row {line}: expected {expected} fields, got {got}")]
    MalformedRow {
        line: usize,
        expected: usize,
        got: usize,
    },

    /// The host readiness predicate went false during an active session.
    /// Forces cancellation; not reported as a user-facing error.
    #[error("host context not ready for projection painting")]
    ContextNotReady,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    // These messages end up verbatim in the session log and user reports.
    #[test]
    fn messages_name_the_failing_object() {
        let stale = ProjectionError::StaleReference { kind: "image" };
        assert_eq!(stale.to_string(), "referenced image no longer exists");

        let row = ProjectionError::MalformedRow {
            line: 7,
            expected: 15,
            got: 2,
        };
        assert_eq!(
            row.to_string(),
            "malformed calibration row 7: expected 15 fields, got 2"
        );

        assert_eq!(
            ProjectionError::ContextNotReady.to_string(),
            "host context not ready for projection painting"
        );
    }
}
