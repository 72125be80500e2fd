//! Error types and Result alias
//!
//! Every fallible operation in the engine returns `Result<T>`. An `Error`
//! pairs a coarse `ErrorCode` with an optional human-readable message;
//! codec, storage, and index errors surface to the caller unchanged.

use std::fmt;

// ============================================================================
// Error Codes
// ============================================================================

/// Classification of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Lexical or syntactic failure; message carries line, column, token
    Parse,
    /// Unknown table, column, index, or function
    Name,
    /// Incompatible types in an expression, or arity mismatch in an insert
    Type,
    /// Division or modulo by zero
    Arithmetic,
    /// Codec input corrupted, magic mismatch, CRC mismatch
    InvalidFrame,
    /// Host I/O failure
    Io,
    /// Buffer cache full of pinned pages, or hash index full
    Capacity,
    /// Duplicate table, index, or unique key
    Conflict,
    /// Query aborted through the cancellation flag
    Interrupted,
    /// Internal invariant violation
    Internal,
}

impl ErrorCode {
    /// Short description used when no message is attached
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Parse => "parse error",
            ErrorCode::Name => "unknown name",
            ErrorCode::Type => "type mismatch",
            ErrorCode::Arithmetic => "arithmetic error",
            ErrorCode::InvalidFrame => "invalid frame",
            ErrorCode::Io => "I/O error",
            ErrorCode::Capacity => "capacity exceeded",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Interrupted => "interrupted",
            ErrorCode::Internal => "internal error",
        }
    }
}

// ============================================================================
// Error
// ============================================================================

/// Engine error: a code plus an optional detail message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl Error {
    /// Create an error carrying only a code
    pub fn new(code: ErrorCode) -> Self {
        Error {
            code,
            message: None,
        }
    }

    /// Create an error with a detail message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: Some(message.into()),
        }
    }

    /// The error classification
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.code.as_str(), msg),
            None => write!(f, "{}", self.code.as_str()),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_message(ErrorCode::Io, err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_message() {
        let err = Error::with_message(ErrorCode::Name, "no such table: users");
        assert_eq!(err.to_string(), "unknown name: no such table: users");
    }

    #[test]
    fn test_display_without_message() {
        let err = Error::new(ErrorCode::InvalidFrame);
        assert_eq!(err.to_string(), "invalid frame");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
