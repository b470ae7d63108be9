use std::{fmt, io};

#[derive(Debug)]
pub enum ParseError {
    /// The document cannot reasonably be processed: no `%PDF-` header, no
    /// `startxref`, no catalog, or a trailer without `/Root`
    MalformedDocument(&'static str),
    /// A stream declares a filter outside the supported set
    UnsupportedFilter { name: String },
    FieldNotFound { name: String },
    /// Page numbers are 1-indexed; `found` is what the caller passed
    InvalidPageNumber { found: usize, page_count: usize },
    /// A signature image payload could not be decoded
    AppearanceDecodeFailure(&'static str),
    MismatchedByte {
        expected: u8,
        found: Option<u8>,
    },
    UnexpectedEof,
    IoError(io::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDocument(why) => write!(f, "malformed document: {}", why),
            Self::UnsupportedFilter { name } => write!(f, "unsupported stream filter /{}", name),
            Self::FieldNotFound { name } => write!(f, "no field named {:?}", name),
            Self::InvalidPageNumber { found, page_count } => {
                write!(f, "page {} out of range (1..={})", found, page_count)
            }
            Self::AppearanceDecodeFailure(why) => {
                write!(f, "failed to decode appearance image: {}", why)
            }
            Self::MismatchedByte { expected, found } => {
                write!(
                    f,
                    "expected byte {:?}, found {:?}",
                    char::from(*expected),
                    found
                )
            }
            Self::UnexpectedEof => write!(f, "unexpected EOF"),
            Self::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

pub type PdfResult<T> = anyhow::Result<T>;
