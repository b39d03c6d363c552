//! error types for capgrants.

use thiserror::Error;

/// errors that can occur in capgrants.
///
/// all errors are synchronous caller-input errors; there is no retry path.
/// a missing key on lookup is a normal `None`, never an error.
#[derive(Debug, Error)]
pub enum Error {
    /// capability syntax string has no extractable key, a malformed key, or
    /// an operator token outside the registry grammar.
    #[error("invalid capability syntax {input:?} (valid operations: {})", .valid.join(", "))]
    InvalidSyntax {
        /// the offending raw input.
        input: String,
        /// the operation vocabulary at the time of the parse.
        valid: Vec<String>,
    },

    /// a mutation received an operation name the registry does not know.
    #[error("invalid operation {operation:?} (valid operations: {})", .valid.join(", "))]
    InvalidOperation {
        /// the offending operation token.
        operation: String,
        /// the operation vocabulary at the time of the mutation.
        valid: Vec<String>,
    },

    /// `add` was called while the capability already allows any operation.
    ///
    /// callers must `disallow_any` first, or use `insert`.
    #[error("capability {key:?} already allows any operation")]
    AnyAlreadyAllowed {
        /// the capability's resource key.
        key: String,
    },

    /// structured or blob deserialisation received input that is not a
    /// well-formed mapping.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// an allowed-operations query was invoked with zero operation names.
    #[error("no operations given to check")]
    MissingArguments,
}

/// result type for capgrants operations.
pub type Result<T> = std::result::Result<T, Error>;
