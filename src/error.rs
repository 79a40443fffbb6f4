//! Error types for the XRef engine.
//!
//! Every failure that can occur while locating, reading or resolving the
//! cross-reference chain of a PDF is a variant of [`Error`]. Failures raised
//! by the document parser are wrapped in [`Error::Context`] so callers can
//! tell which step of the parse aborted.

use crate::object::Reference;
use std::fmt;

/// Result type alias for XRef engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of [`crate::document::PdfDocument::parse`] that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    /// `%PDF-x.y` header check
    Header,
    /// `%%EOF` marker check
    EofMarker,
    /// Locating `startxref` and reading every XRef section
    XRefChain,
    /// Trailer validation after the chain is merged
    Trailer,
    /// Encryption dictionary and password check
    Encryption,
    /// Materializing in-use objects
    Objects,
    /// Expanding object streams
    ObjectStreams,
    /// Second pass loading stream payloads
    Streams,
    /// Catalog `/Version` reconciliation
    Version,
}

impl fmt::Display for ParsePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParsePhase::Header => "header",
            ParsePhase::EofMarker => "EOF marker",
            ParsePhase::XRefChain => "xref chain",
            ParsePhase::Trailer => "trailer",
            ParsePhase::Encryption => "encryption",
            ParsePhase::Objects => "objects",
            ParsePhase::ObjectStreams => "object streams",
            ParsePhase::Streams => "streams",
            ParsePhase::Version => "version",
        };
        f.write_str(name)
    }
}

/// Error types that can occur during PDF structure parsing.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)] // "Invalid" prefix mirrors the PDF error taxonomy
pub enum Error {
    /// Missing `%PDF-` magic
    #[error("Not a PDF file: missing '%PDF-' header")]
    NoPdfFile,

    /// Header or catalog version outside the supported set
    #[error("Unsupported PDF version: {0}")]
    UnsupportedVersion(String),

    /// No `%%EOF` marker found
    #[error("No %%EOF token found")]
    NoEofToken,

    /// No cross-reference section could be located
    #[error("No cross-reference section: {0}")]
    NoXRef(String),

    /// No trailer dictionary could be read
    #[error("No trailer dictionary")]
    NoTrailer,

    /// Malformed or cyclic cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXRef(String),

    /// Malformed cross-reference stream
    #[error("Invalid cross-reference stream: {0}")]
    InvalidXRefStream(String),

    /// Unknown record type in a cross-reference stream
    #[error("Invalid cross-reference entry type: {0}")]
    InvalidXRefType(u64),

    /// `/Size` in the trailer is not a non-negative integer
    #[error("Invalid trailer /Size: {0}")]
    InvalidTrailerSize(String),

    /// Name or integer not in the allowed set
    #[error("Invalid enum value: {0}")]
    InvalidEnumValue(String),

    /// Integer outside its allowed range
    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    /// Object has the wrong kind
    #[error("Invalid data type: expected {expected}, found {found}")]
    InvalidDataType {
        /// Expected object kind
        expected: String,
        /// Actual object kind
        found: String,
    },

    /// Malformed `/Encrypt` dictionary or missing document ID
    #[error("Invalid encryption dictionary: {0}")]
    InvalidEncryptionDict(String),

    /// Password rejected by the security handler
    #[error("Invalid password")]
    InvalidPassword,

    /// Security handler revision or filter we cannot handle
    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// Expected a number token
    #[error("Expected a number at byte {offset}")]
    NoNumber {
        /// Byte offset of the token that was read instead
        offset: u64,
    },

    /// Expected an indirect object header or value
    #[error("Failed to read object at byte {offset}: {reason}")]
    NoObject {
        /// Byte offset where reading started
        offset: u64,
        /// Reason for the failure
        reason: String,
    },

    /// Parse error at specific byte offset
    #[error("Failed to parse at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where the error occurred
        offset: u64,
        /// Reason for parse failure
        reason: String,
    },

    /// Malformed stream payload or dictionary
    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// Unexpected end of file
    #[error("End of file reached unexpectedly")]
    UnexpectedEof,

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Re-entrant resolution of an object that is still loading
    #[error("Circular reference detected: {0}")]
    CircularReference(Reference),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by one step of the document parse
    #[error("PDF parse failed during {phase}: {source}")]
    Context {
        /// Step that failed
        phase: ParsePhase,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Strip every [`Error::Context`] layer and return the underlying error.
    pub fn root_cause(&self) -> &Error {
        let mut err = self;
        while let Error::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Phase the error was raised in, if it was wrapped by the document parser.
    pub fn phase(&self) -> Option<ParsePhase> {
        match self {
            Error::Context { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub(crate) fn in_phase(self, phase: ParsePhase) -> Error {
        match self {
            already @ Error::Context { .. } => already,
            other => Error::Context {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// True for failures the lenient parser may answer by rebuilding the table.
    pub(crate) fn is_recoverable_xref_failure(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::NoXRef(_)
                | Error::InvalidXRefStream(_)
                | Error::NoTrailer
                | Error::UnexpectedEof
                | Error::NoNumber { .. }
                | Error::NoObject { .. }
        )
    }
}

/// Attach a [`ParsePhase`] to the error of a fallible step.
pub(crate) trait PhaseExt<T> {
    fn phase(self, phase: ParsePhase) -> Result<T>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn phase(self, phase: ParsePhase) -> Result<T> {
        self.map_err(|e| e.in_phase(phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_error() {
        let err = Error::UnsupportedVersion("3.0".to_string());
        assert!(format!("{}", err).contains("3.0"));
    }

    #[test]
    fn test_invalid_xref_error() {
        let err = Error::InvalidXRef("cycle at offset 120".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("cross-reference"));
        assert!(msg.contains("cycle at offset 120"));
    }

    #[test]
    fn test_circular_reference_error() {
        let err = Error::CircularReference(Reference::new(12, 0));
        assert!(format!("{}", err).contains("12 0 R"));
    }

    #[test]
    fn test_phase_wrapping_and_root_cause() {
        let res: Result<()> = Err(Error::InvalidPassword);
        let err = res.phase(ParsePhase::Encryption).unwrap_err();
        assert_eq!(err.phase(), Some(ParsePhase::Encryption));
        assert!(matches!(err.root_cause(), Error::InvalidPassword));
        assert!(format!("{}", err).contains("encryption"));

        // A second wrap keeps the innermost phase.
        let rewrapped = err.in_phase(ParsePhase::Objects);
        assert_eq!(rewrapped.phase(), Some(ParsePhase::Encryption));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::NoXRef("x".into()).is_recoverable_xref_failure());
        assert!(Error::NoTrailer.is_recoverable_xref_failure());
        assert!(!Error::InvalidXRef("cycle".into()).is_recoverable_xref_failure());
        assert!(!Error::InvalidPassword.is_recoverable_xref_failure());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
