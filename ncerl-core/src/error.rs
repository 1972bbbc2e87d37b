//! Errors in the library.
use thiserror::Error;

/// Errors raised by the training core.
#[derive(Debug, Error)]
pub enum NcerlError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: expected {0}")]
    RecordValueTypeError(String),

    /// More transitions were requested than the store holds.
    #[error("Requested {requested} transitions but only {available} are stored")]
    InsufficientTransitions {
        /// Requested batch size.
        requested: usize,
        /// Number of stored transitions.
        available: usize,
    },

    /// A batch or sequence does not have the expected size.
    #[error("Shape mismatch of {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// What was being checked.
        what: String,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// An episode ended without any reward-component list in its info map.
    #[error("No reward list found in the info of slot {slot}")]
    MissingRewardComponents {
        /// Environment slot.
        slot: usize,
    },

    /// An episode ended without the true terminal observation in its info map.
    #[error("No terminal observation found in the info of slot {slot}")]
    MissingTerminalObservation {
        /// Environment slot.
        slot: usize,
    },

    /// Malformed configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A loss became NaN or infinite.
    #[error("Loss {name} is not finite")]
    NonFiniteLoss {
        /// Name of the loss.
        name: String,
    },
}
