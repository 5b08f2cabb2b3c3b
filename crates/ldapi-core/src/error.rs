//! Error types for directory operations.
//!
//! Every failure the client can report is one variant of [`Error`]. Variants that
//! originate in the protocol engine carry the engine's [`Diagnostic`] verbatim so
//! callers can branch on the numeric result code as well as the failure kind.

use std::fmt;
use thiserror::Error;

/// Numeric result code and message reported by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// LDAP result code (negative values are client-side library codes).
    pub code: i32,
    /// Diagnostic text as reported by the engine.
    pub message: String,
}

impl Diagnostic {
    /// Result code signalling that the last engine call succeeded.
    pub const SUCCESS: i32 = 0;

    /// Creates a diagnostic from a code and message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Diagnostic describing a successful call.
    #[must_use]
    pub fn success() -> Self {
        Self::new(Self::SUCCESS, "Success")
    }

    /// Returns true when the code reports success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The connection or bind state required by the operation is missing
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The resource the operation would create already exists
    #[error("Already available: {0}")]
    AlreadyAvailable(String),

    /// Establishing the connection failed
    #[error("Connect failure: {0}")]
    ConnectFailure(Diagnostic),

    /// Simple or SASL bind was rejected
    #[error("Bind failure: {0}")]
    BindFailure(Diagnostic),

    /// StartTLS negotiation failed
    #[error("Encryption failure: {0}")]
    EncryptionFailure(Diagnostic),

    /// A search, read, list or compare failed
    #[error("Read failure: {0}")]
    ReadFailure(Diagnostic),

    /// An add, delete, modify or rename failed
    #[error("Write failure: {0}")]
    WriteFailure(Diagnostic),

    /// Getting or setting a connection option failed
    #[error("Option failure: {0}")]
    OptionFailure(Diagnostic),

    /// Staging or reading a paged-results control failed
    #[error("Pagination failure: {0}")]
    PaginationFailure(Diagnostic),

    /// The engine could not count the entries of a result
    #[error("Entry count retrieval failure: {0}")]
    EntryCountRetrievalFailure(Diagnostic),

    /// Fetching an entry from a result failed
    #[error("Entry retrieval failure: {0}")]
    EntryRetrievalFailure(Diagnostic),

    /// Fetching a continuation reference from a result failed
    #[error("Reference retrieval failure: {0}")]
    ReferenceRetrievalFailure(Diagnostic),

    /// Extracting values, attribute names or a DN failed
    #[error("Value retrieval failure: {0}")]
    ValueRetrievalFailure(Diagnostic),

    /// Parsing the final result of an operation failed
    #[error("Information retrieval failure: {0}")]
    InformationRetrievalFailure(Diagnostic),

    /// An enumerated option was not recognised
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// A batch modification lacks a required field
    #[error("Incomplete modification: {0}")]
    IncompleteModification(String),

    /// A batch modification carries an unusable value set
    #[error("Invalid value set: {0}")]
    InvalidValueSet(String),

    /// The engine lacks an optional capability
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(String),

    /// A named property or option does not exist
    #[error("Non-existent property: {0}")]
    NonExistentProperty(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::AlreadyAvailable(_) => "ALREADY_AVAILABLE",
            Self::ConnectFailure(_) => "CONNECT_FAILURE",
            Self::BindFailure(_) => "BIND_FAILURE",
            Self::EncryptionFailure(_) => "ENCRYPTION_FAILURE",
            Self::ReadFailure(_) => "READ_FAILURE",
            Self::WriteFailure(_) => "WRITE_FAILURE",
            Self::OptionFailure(_) => "OPTION_FAILURE",
            Self::PaginationFailure(_) => "PAGINATION_FAILURE",
            Self::EntryCountRetrievalFailure(_) => "ENTRY_COUNT_RETRIEVAL_FAILURE",
            Self::EntryRetrievalFailure(_) => "ENTRY_RETRIEVAL_FAILURE",
            Self::ReferenceRetrievalFailure(_) => "REFERENCE_RETRIEVAL_FAILURE",
            Self::ValueRetrievalFailure(_) => "VALUE_RETRIEVAL_FAILURE",
            Self::InformationRetrievalFailure(_) => "INFORMATION_RETRIEVAL_FAILURE",
            Self::InvalidMode(_) => "INVALID_MODE",
            Self::IncompleteModification(_) => "INCOMPLETE_MODIFICATION",
            Self::InvalidValueSet(_) => "INVALID_VALUE_SET",
            Self::FeatureUnavailable(_) => "FEATURE_UNAVAILABLE",
            Self::NonExistentProperty(_) => "NON_EXISTENT_PROPERTY",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Returns the engine diagnostic wrapped by this error, if any.
    #[must_use]
    pub const fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::ConnectFailure(diagnostic)
            | Self::BindFailure(diagnostic)
            | Self::EncryptionFailure(diagnostic)
            | Self::ReadFailure(diagnostic)
            | Self::WriteFailure(diagnostic)
            | Self::OptionFailure(diagnostic)
            | Self::PaginationFailure(diagnostic)
            | Self::EntryCountRetrievalFailure(diagnostic)
            | Self::EntryRetrievalFailure(diagnostic)
            | Self::ReferenceRetrievalFailure(diagnostic)
            | Self::ValueRetrievalFailure(diagnostic)
            | Self::InformationRetrievalFailure(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }

    /// Returns the numeric engine result code, if the error carries one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.diagnostic().map(|diagnostic| diagnostic.code)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag() -> Diagnostic {
        Diagnostic::new(49, "Invalid credentials")
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::Unavailable("test".to_string()).error_code(),
            "UNAVAILABLE"
        );
        assert_eq!(
            Error::AlreadyAvailable("test".to_string()).error_code(),
            "ALREADY_AVAILABLE"
        );
        assert_eq!(Error::BindFailure(diag()).error_code(), "BIND_FAILURE");
        assert_eq!(
            Error::EntryCountRetrievalFailure(diag()).error_code(),
            "ENTRY_COUNT_RETRIEVAL_FAILURE"
        );
        assert_eq!(
            Error::IncompleteModification("test".to_string()).error_code(),
            "INCOMPLETE_MODIFICATION"
        );
        assert_eq!(
            Error::FeatureUnavailable("test".to_string()).error_code(),
            "FEATURE_UNAVAILABLE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::BindFailure(diag());
        assert_eq!(
            err.to_string(),
            "Bind failure: Invalid credentials (code 49)"
        );

        let err = Error::Unavailable("no connection".to_string());
        assert_eq!(err.to_string(), "Unavailable: no connection");
    }

    #[test]
    fn test_diagnostic_accessors() {
        let err = Error::ReadFailure(Diagnostic::new(32, "No such object"));
        assert_eq!(err.code(), Some(32));
        assert_eq!(err.diagnostic().map(|d| d.message.as_str()), Some("No such object"));

        let err = Error::InvalidMode("bogus".to_string());
        assert_eq!(err.code(), None);
        assert!(err.diagnostic().is_none());
    }

    #[test]
    fn test_diagnostic_success() {
        assert!(Diagnostic::success().is_success());
        assert!(!diag().is_success());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let ldap_err: Error = err.into();
        assert!(matches!(ldap_err, Error::ConfigError(_)));
    }
}
