use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

/// Error returned by [`crate::bencode_parser::parser::parse`].
///
/// Offsets are byte positions into the original input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BencodeError {
    #[error("invalid integer at byte {0}")]
    InvalidInteger(usize),

    #[error("invalid byte string length at byte {0}")]
    InvalidLength(usize),

    #[error("unexpected input at byte {offset} ({kind:?})")]
    Syntax { offset: usize, kind: ErrorKind },

    #[error("unexpected end of input")]
    Incomplete,

    #[error("trailing data at byte {0}")]
    TrailingData(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reason {
    InvalidInteger,
    InvalidLength,
    Syntax(ErrorKind),
}

/// Error threaded through the nom combinators; converted into a
/// [`BencodeError`] once the failing offset is known.
#[derive(Debug)]
pub(crate) struct RawError<'a> {
    pub input: &'a [u8],
    pub reason: Reason,
}

impl<'a> RawError<'a> {
    pub(crate) fn new(input: &'a [u8], reason: Reason) -> Self {
        Self { input, reason }
    }
}

impl<'a> ParseError<&'a [u8]> for RawError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        Self::new(input, Reason::Syntax(kind))
    }

    fn append(_: &'a [u8], _: ErrorKind, other: Self) -> Self {
        other
    }

    // Keep whichever alternative got furthest into the input.
    fn or(self, other: Self) -> Self {
        if other.input.len() < self.input.len() {
            other
        } else {
            self
        }
    }
}

impl BencodeError {
    pub(crate) fn from_nom(source: &[u8], err: nom::Err<RawError<'_>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => BencodeError::Incomplete,
            nom::Err::Error(raw) | nom::Err::Failure(raw) => {
                let offset = source.len() - raw.input.len();
                match raw.reason {
                    Reason::InvalidInteger => BencodeError::InvalidInteger(offset),
                    Reason::InvalidLength => BencodeError::InvalidLength(offset),
                    Reason::Syntax(_) if raw.input.is_empty() => BencodeError::Incomplete,
                    Reason::Syntax(kind) => BencodeError::Syntax { offset, kind },
                }
            }
        }
    }
}
