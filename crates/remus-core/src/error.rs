use std::fmt;

pub type MirrorResult<T> = Result<T, MirrorError>;

/// Failure categories for mirror set construction and operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorErrorKind {
    InvalidArgument,
    DeviceLookup,
    LogFailure,
    ShuttingDown,
    Io,
}

/// Error surfaced by the mirror core.
#[derive(Clone, Debug)]
pub struct MirrorError {
    kind: MirrorErrorKind,
    message: Option<String>,
}

impl MirrorError {
    pub const fn new(kind: MirrorErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: MirrorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> MirrorErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for MirrorError {}
