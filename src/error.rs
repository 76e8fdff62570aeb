//! Error types and handling for btlm

/// Result type alias for btlm operations
pub type Result<T> = std::result::Result<T, BtlmError>;

/// Error kinds surfaced by the telemetry core and its collaborators.
///
/// The producer path never returns an error; loss is accounted through the
/// per-consumer drop counters instead.
#[derive(Debug, thiserror::Error)]
pub enum BtlmError {
    /// Invalid parameters or configuration
    #[error("Invalid argument: {parameter} - {message}")]
    InvalidArgument { parameter: String, message: String },

    /// Schema id outside the registrable range
    #[error("Invalid schema id: {id} (max {max})")]
    InvalidSchemaId { id: u16, max: usize },

    /// Schema payload exceeds the fixed entry payload capacity
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Consumer table exhausted
    #[error("No free consumer slot")]
    NoFreeConsumerSlot,

    /// Consumer id out of range or not active
    #[error("Invalid consumer: {id}")]
    InvalidConsumer { id: usize },

    /// Output buffer smaller than the required minimum
    #[error("Buffer too small: required {required}, provided {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    /// A streaming callback requested an early stop
    #[error("Stream aborted by callback")]
    Aborted,

    /// I/O related errors (sockets, log files)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl BtlmError {
    /// Create an invalid argument error
    pub fn invalid_argument(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid schema id error
    pub fn invalid_schema_id(id: u16, max: usize) -> Self {
        Self::InvalidSchemaId { id, max }
    }

    /// Create a payload too large error
    pub fn payload_too_large(size: usize, max: usize) -> Self {
        Self::PayloadTooLarge { size, max }
    }

    /// Create an invalid consumer error
    pub fn invalid_consumer(id: usize) -> Self {
        Self::InvalidConsumer { id }
    }

    /// Create a buffer too small error
    pub fn buffer_too_small(required: usize, provided: usize) -> Self {
        Self::BufferTooSmall { required, provided }
    }

    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }
}

impl From<std::io::Error> for BtlmError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BtlmError::invalid_schema_id(99, 64);
        assert!(matches!(err, BtlmError::InvalidSchemaId { .. }));

        let err = BtlmError::buffer_too_small(16, 4);
        assert!(matches!(err, BtlmError::BufferTooSmall { .. }));

        let err = BtlmError::invalid_consumer(3);
        assert!(matches!(err, BtlmError::InvalidConsumer { id: 3 }));
    }

    #[test]
    fn test_error_display() {
        let err = BtlmError::payload_too_large(300, 232);
        let display = format!("{}", err);
        assert!(display.contains("Payload too large"));
        assert!(display.contains("300"));
    }
}
