use thiserror::Error;

/// Error kinds raised by the engine, roughly ordered by severity.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Configuration contradictions detected before execution.
    #[error("setup error: {0}")]
    Setup(String),

    /// Malformed file or count mismatch on import.
    #[error("import error: {0}")]
    Import(String),

    /// A collective returned a non-success status; the current iteration aborts.
    #[error("communication error: {0}")]
    Communication(String),

    /// Numerical failure (failed pseudoinverse, unbounded timestep, diverged energy).
    #[error("computation error: {0}")]
    Computation(String),

    /// Invariant violation. These are fatal and should never fire.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Non-failure result of a processing module.
///
/// A module that cannot run because a precondition is unmet (e.g. energy not
/// yet stable) returns `NotExecuted`; the engine logs a warning and carries
/// on. Hard failures are reported through `Err` and stop the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    NotExecuted,
}

impl EngineError {
    /// Whether this error should abort the whole run rather than the iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Internal(_))
    }
}
