//! Unified error types for the package core.

use core::fmt;

/// Every fallible boundary in this crate returns `Result<T, PackageError>`.
///
/// `CiphertextAuthentication` deliberately carries no message and no byte
/// offset — surfacing either would turn a failed MAC/proof check into an
/// oracle. Every other variant is allowed to carry a short diagnostic string
/// since none of them are secret-dependent.
#[derive(Debug)]
pub enum PackageError {
    InvalidConfiguration(String),
    CryptoPrimitiveMisuse(String),
    CiphertextAuthentication,
    InvalidData(String),
    InvalidState(String),
    EndOfStream,
    Io(std::io::Error),
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            PackageError::CryptoPrimitiveMisuse(msg) => write!(f, "crypto primitive misuse: {msg}"),
            PackageError::CiphertextAuthentication => write!(f, "ciphertext authentication failed"),
            PackageError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            PackageError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            PackageError::EndOfStream => write!(f, "end of stream"),
            PackageError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for PackageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PackageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PackageError {
    fn from(e: std::io::Error) -> Self {
        // An `UnexpectedEof` from a partial read is this crate's EndOfStream,
        // not a generic passthrough — callers should not need to match on
        // io::ErrorKind themselves to tell the two apart.
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PackageError::EndOfStream
        } else {
            PackageError::Io(e)
        }
    }
}

impl PackageError {
    pub(crate) fn invalid_configuration(msg: impl Into<String>) -> Self {
        PackageError::InvalidConfiguration(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        PackageError::InvalidState(msg.into())
    }

    pub(crate) fn invalid_data(msg: impl Into<String>) -> Self {
        PackageError::InvalidData(msg.into())
    }

    pub(crate) fn primitive_misuse(msg: impl Into<String>) -> Self {
        PackageError::CryptoPrimitiveMisuse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;
