use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncErrorCode {
    InvalidArgument,
    Internal,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
}

impl SyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::InvalidArgument => "docsync/invalid-argument",
            SyncErrorCode::Internal => "docsync/internal",
            SyncErrorCode::NotFound => "docsync/not-found",
            SyncErrorCode::PermissionDenied => "docsync/permission-denied",
            SyncErrorCode::Unauthenticated => "docsync/unauthenticated",
            SyncErrorCode::Unavailable => "docsync/unavailable",
            SyncErrorCode::DeadlineExceeded => "docsync/deadline-exceeded",
            SyncErrorCode::ResourceExhausted => "docsync/resource-exhausted",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncError {
    pub code: SyncErrorCode,
    message: String,
}

impl SyncError {
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for SyncError {}

pub type SyncResult<T> = Result<T, SyncError>;

pub fn invalid_argument(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::Internal, message)
}

pub fn not_found(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::NotFound, message)
}

pub fn permission_denied(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::PermissionDenied, message)
}

pub fn unauthenticated(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::Unauthenticated, message)
}

pub fn unavailable(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::DeadlineExceeded, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::ResourceExhausted, message)
}
