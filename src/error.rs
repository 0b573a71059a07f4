//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, MarkovError>;

/// Errors raised by model construction, queries, and decoding.
///
/// Every variant is a recoverable, reportable condition surfaced to the
/// direct caller; nothing in this crate panics on malformed input. Variants
/// carry the offending label, symbol, or index so a reporting layer can
/// render an actionable message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarkovError {
    /// The supplied model violates a structural or probability invariant
    /// (duplicate states, a distribution that does not sum to 1, a
    /// probability outside [0, 1], a label outside the declared state
    /// space). Always fatal to construction.
    #[error("invalid model: {0}")]
    Validation(String),

    /// A query referenced a state label that is not part of the state space.
    #[error("unknown state `{0}`")]
    UnknownState(String),

    /// An observation sequence contained a symbol that no hidden state's
    /// emission distribution recognizes.
    #[error("unknown observation symbol `{symbol}` at position {position}")]
    UnknownSymbol {
        /// Rendered label of the offending symbol.
        symbol: String,
        /// Zero-based position within the observation sequence.
        position: usize,
    },

    /// Every hidden state scored zero at some step of a decode, so no path
    /// explains the observation sequence under this model.
    #[error("no hidden state assigns positive probability to the observation at step {step}")]
    DegenerateSequence {
        /// Zero-based step at which the score vector collapsed to zero.
        step: usize,
    },

    /// Power iteration hit its iteration cap before the stationary
    /// distribution converged. Callers may retry with a relaxed tolerance
    /// or a higher cap.
    #[error("power iteration did not converge after {iterations} iterations (last L1 change {residual:e})")]
    NonConvergence {
        /// Number of iterations performed before giving up.
        iterations: usize,
        /// L1 distance between the final two iterates.
        residual: f64,
    },
}

impl MarkovError {
    /// Creates a new validation error with the given message.
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MarkovError::Validation(message.into())
    }

    /// Creates a new unknown-state error for the given label.
    pub(crate) fn unknown_state(label: impl ToString) -> Self {
        MarkovError::UnknownState(label.to_string())
    }
}
