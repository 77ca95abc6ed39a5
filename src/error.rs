//! Crate-wide error type.
//!
//! Mutating operations return `Result<T>`; getters that the modelled C
//! library represented with sentinel values keep those constants around
//! (see `Pointer::ADDRESS_ERROR` and friends) only for callers that need to
//! round-trip them into a fixed-width wire format.

use core::fmt;

/// Numeric error codes, mirroring the enumeration a C caller would switch
/// on. Kept alongside [`Error`] for callers that cross an FFI-style
/// boundary and need a stable discriminant rather than a Rust enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingFile,
    MissingSection,
    MissingBinFile,
    BadSectionType,
    SectionEmpty,
    BadSectionEntrySize,
    IncorrectDataType,
    HeaderNotFound,
    HeaderAlreadyParsed,
    SectionNotFound,
    LabelMissing,
    BadRelocationAddress,
    FileNotBeingPatched,
    PatchedFileNotFinalised,
    PatchedSectionNotCreated,
    SectionAlreadyExisting,
    InsertListEmpty,
    UnableToOpenFile,
    FileStreamMissing,
    ParameterMissing,
    FileNameMissing,
    SectionDataNotLocal,
    SectionSegmentNotFound,
    FailedSavingDataToSection,
    SectionMoveImpossible,
}

/// Errors surfaced by mutating operations across the crate.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Scroll(scroll::Error),
    /// A value did not fit the requested serialised width.
    Overflow { value: u64, width: usize },
    /// Operation attempted while the patching session was in the wrong
    /// state (see the §4.G state machine).
    WrongPatchState { expected: &'static str, found: &'static str },
    /// An operation-specific failure, tagged with its stable [`ErrorCode`].
    Code(ErrorCode, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Scroll(e) => write!(f, "scroll error: {e}"),
            Error::Overflow { value, width } => {
                write!(f, "value 0x{value:x} does not fit in {width} bytes")
            }
            Error::WrongPatchState { expected, found } => write!(
                f,
                "operation requires patch state {expected}, file is {found}"
            ),
            Error::Code(code, msg) => write!(f, "{code:?}: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Scroll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        Error::Scroll(e)
    }
}

impl Error {
    pub fn code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Error::Code(code, msg.into())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
