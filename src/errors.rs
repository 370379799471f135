use std::error::Error;
use std::fmt;
use std::io::{self, ErrorKind};

use http::StatusCode;

use crate::davpath::ParseError;
use crate::fs::FsError;
use crate::ls::LockError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not under prefix
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    FsError(FsError),
    LockError(LockError),
    IoError(io::Error),
    XmlReaderError(xmltree::ParseError),
    XmlWriterError(xml::writer::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DavError::XmlReaderError(e) => write!(f, "XML parse error: {e}"),
            DavError::XmlWriterError(e) => write!(f, "XML generate error: {e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
            DavError::FsError(e) => write!(f, "storage error: {e}"),
            DavError::LockError(e) => write!(f, "lock error: {e}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<LockError> for DavError {
    fn from(e: LockError) -> Self {
        DavError::LockError(e)
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::IllegalPath => DavError::ForbiddenPath,
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(e: xmltree::ParseError) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::NotCollection => StatusCode::CONFLICT,
        FsError::ParentMissing => StatusCode::CONFLICT,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
    }
}

fn lockerror_to_status(e: &LockError) -> StatusCode {
    match e {
        LockError::Conflict(_) => StatusCode::LOCKED,
        LockError::NotFound => StatusCode::CONFLICT,
        LockError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlParseError => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::NOT_FOUND,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::FsError(e) => fserror_to_status(e),
            DavError::LockError(e) => lockerror_to_status(e),
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::XmlReaderError(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::FsError(FsError::NotFound)
                | &DavError::FsError(FsError::Exists)
                | &DavError::FsError(FsError::ParentMissing)
                | &DavError::LockError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        let cases: Vec<(DavError, StatusCode)> = vec![
            (FsError::NotFound.into(), StatusCode::NOT_FOUND),
            (FsError::ParentMissing.into(), StatusCode::CONFLICT),
            (FsError::Forbidden.into(), StatusCode::FORBIDDEN),
            (FsError::Exists.into(), StatusCode::METHOD_NOT_ALLOWED),
            (DavError::XmlParseError, StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (ParseError::IllegalPath.into(), StatusCode::FORBIDDEN),
            (LockError::NotFound.into(), StatusCode::CONFLICT),
            (
                io::Error::new(ErrorKind::Other, "disk on fire").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.statuscode(), status, "{err}");
        }
    }

    #[test]
    fn close_on_storage_failure() {
        assert!(!DavError::Status(StatusCode::LOCKED).must_close());
        assert!(DavError::IoError(io::Error::new(ErrorKind::Other, "x")).must_close());
    }
}
