use std::fmt;

/// Result type for navstack operations
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Main error type for the policy network
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Static dimensions of a tensor do not match what the network was built for
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Runtime batch/time geometry cannot be satisfied
    ShapeContract {
        context: String,
        detail: String,
    },

    /// Invalid configuration or constructor argument
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// A required input binding was not supplied
    MissingInput(String),

    /// Auxiliary outputs requested while `aux_estimate` is off
    AuxiliaryDisabled(String),

    /// No callback registered under this name
    UnknownCallback(String),

    /// Snapshot does not fit the network
    SnapshotMismatch(String),

    /// Numerical computation errors
    NumericalError(String),

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            PolicyError::ShapeContract { context, detail } => {
                write!(f, "Shape contract violated in {}: {}", context, detail)
            }
            PolicyError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            PolicyError::MissingInput(name) => write!(f, "Missing input: {}", name),
            PolicyError::AuxiliaryDisabled(what) => {
                write!(f, "Auxiliary estimation is disabled, '{}' is not available", what)
            }
            PolicyError::UnknownCallback(name) => write!(f, "No callback named '{}'", name),
            PolicyError::SnapshotMismatch(msg) => write!(f, "Snapshot mismatch: {}", msg),
            PolicyError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            PolicyError::IoError(msg) => write!(f, "IO error: {}", msg),
            PolicyError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<std::io::Error> for PolicyError {
    fn from(err: std::io::Error) -> Self {
        PolicyError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PolicyError {
    fn from(err: bincode::Error) -> Self {
        PolicyError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PolicyError {
    fn from(err: ndarray::ShapeError) -> Self {
        PolicyError::ShapeContract {
            context: "reshape".to_string(),
            detail: err.to_string(),
        }
    }
}

// Constructors used across the crate
impl PolicyError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        PolicyError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        PolicyError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn shape_contract<S: Into<String>>(context: S, detail: S) -> Self {
        PolicyError::ShapeContract {
            context: context.into(),
            detail: detail.into(),
        }
    }
}
