use thiserror::Error;

/// Errors raised by the driver-facing surfaces of the crate.
///
/// The dispatch core itself (`receive`, `send`, `close`, diagnostics, status)
/// never fails; these variants only come out of definition parsing and the
/// [`UnitRegistry`](crate::UnitRegistry).
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid unit definition: {0}")]
    InvalidDefinition(String),

    #[error("Unit already registered: {0}")]
    DuplicateUnit(String),

    #[error("Timed out waiting for units to close: {}", .0.join(", "))]
    CloseTimeout(Vec<String>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
