use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;

use bstr::BString;
use sepval_core::{ParseError, Position, RunError};

/// A type alias for `Result<T, sepval::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// An error that can occur while processing CSV data.
///
/// Errors raised below the recognizer (I/O, syntax) and errors raised by the
/// downstream layers (record extraction, field translation) all surface as
/// this one type, annotated with the physical position the recognizer stood
/// at where one is available.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }

    /// Return the specific type of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying type.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns true if this is an I/O error.
    pub fn is_io_error(&self) -> bool {
        match *self.0 {
            ErrorKind::Io(_) => true,
            _ => false,
        }
    }

    /// The physical position attached to this error, if any.
    pub fn position(&self) -> Option<Position> {
        match *self.0 {
            ErrorKind::Io(_) => None,
            ErrorKind::Parse(ref err) => Some(err.position()),
            ErrorKind::NoMatchingField { pos, .. }
            | ErrorKind::FieldNotFound { pos }
            | ErrorKind::FieldInvalidFormat { pos, .. }
            | ErrorKind::FieldOutOfRange { pos, .. }
            | ErrorKind::FieldEmpty { pos, .. } => pos,
        }
    }

    /// Attaches `pos` to error kinds that carry a position but do not have
    /// one yet. Used when a handler error comes back out of the recognizer,
    /// which knows where it stood.
    pub(crate) fn with_position(mut self, pos: Position) -> Error {
        match *self.0 {
            ErrorKind::NoMatchingField { pos: ref mut p, .. }
            | ErrorKind::FieldNotFound { pos: ref mut p }
            | ErrorKind::FieldInvalidFormat { pos: ref mut p, .. }
            | ErrorKind::FieldOutOfRange { pos: ref mut p, .. }
            | ErrorKind::FieldEmpty { pos: ref mut p, .. } => {
                if p.is_none() {
                    *p = Some(pos);
                }
            }
            _ => {}
        }
        self
    }
}

/// The specific type of an error.
#[derive(Debug)]
pub enum ErrorKind {
    /// An I/O error that occurred while reading CSV data.
    Io(io::Error),
    /// The input is not well-formed CSV.
    Parse(ParseError),
    /// The header name requested of a record extractor did not appear in
    /// the header record.
    NoMatchingField {
        /// The name that was looked for, when known (extractors built from
        /// an opaque predicate have none).
        name: Option<BString>,
        /// Where the header record ended.
        pos: Option<Position>,
    },
    /// A bound column did not appear in a record.
    FieldNotFound {
        /// Where the record ended.
        pos: Option<Position>,
    },
    /// A field's text does not parse as the bound target type.
    FieldInvalidFormat {
        /// The offending field bytes.
        value: BString,
        /// The name of the target type.
        target: &'static str,
        /// Where the field was finalized.
        pos: Option<Position>,
    },
    /// A field parsed but does not fit the bound target type.
    FieldOutOfRange {
        /// The offending field bytes.
        value: BString,
        /// The name of the target type.
        target: &'static str,
        /// `+1` above the upper limit, `-1` below the lower limit, `0` for
        /// a floating point underflow.
        sign: i32,
        /// Where the field was finalized.
        pos: Option<Position>,
    },
    /// A field was empty where the bound target type needs digits.
    FieldEmpty {
        /// The name of the target type.
        target: &'static str,
        /// Where the field was finalized.
        pos: Option<Position>,
    },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(ErrorKind::Io(err))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::new(ErrorKind::Parse(err))
    }
}

impl From<RunError<Error>> for Error {
    fn from(err: RunError<Error>) -> Error {
        match err {
            RunError::Io(err) => Error::new(ErrorKind::Io(err)),
            RunError::Parse(err) => Error::new(ErrorKind::Parse(err)),
            RunError::Handler { err, pos } => err.with_position(pos),
        }
    }
}

impl From<RunError<Infallible>> for Error {
    fn from(err: RunError<Infallible>) -> Error {
        match err {
            RunError::Io(err) => Error::new(ErrorKind::Io(err)),
            RunError::Parse(err) => Error::new(ErrorKind::Parse(err)),
            RunError::Handler { err, .. } => match err {},
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self.0 {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::Parse(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Parse(ref err) => write!(f, "CSV parse error: {}", err),
            ErrorKind::NoMatchingField { ref name, pos } => {
                match *name {
                    Some(ref name) => {
                        write!(f, "no field matching '{}' in the header", name)?
                    }
                    None => write!(f, "no matching field in the header")?,
                }
                fmt_pos(f, pos)
            }
            ErrorKind::FieldNotFound { pos } => {
                write!(f, "bound field did not appear in this record")?;
                fmt_pos(f, pos)
            }
            ErrorKind::FieldInvalidFormat { ref value, target, pos } => {
                write!(f, "cannot convert '{}' to {}", value, target)?;
                fmt_pos(f, pos)
            }
            ErrorKind::FieldOutOfRange { ref value, target, sign, pos } => {
                let dir = if sign > 0 {
                    "above the upper limit of"
                } else if sign < 0 {
                    "below the lower limit of"
                } else {
                    "an underflowing"
                };
                write!(f, "'{}' is {} {}", value, dir, target)?;
                fmt_pos(f, pos)
            }
            ErrorKind::FieldEmpty { target, pos } => {
                write!(f, "cannot convert an empty field to {}", target)?;
                fmt_pos(f, pos)
            }
        }
    }
}

fn fmt_pos(f: &mut fmt::Formatter, pos: Option<Position>) -> fmt::Result {
    match pos {
        Some(pos) => write!(f, "; {}", pos),
        None => Ok(()),
    }
}
