use std::{error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    HardwareUnavailable,
    AlreadyInProgress,
    NotFound,
    TransportRejected,
    Channel,
    Internal,
}

impl From<ErrorKind> for &'static str {
    fn from(kind: ErrorKind) -> &'static str {
        match kind {
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::HardwareUnavailable => "HardwareUnavailable",
            ErrorKind::AlreadyInProgress => "AlreadyInProgress",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::TransportRejected => "TransportRejected",
            ErrorKind::Channel => "Channel",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(self: &Self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind: &str = (*self).into();
        write!(f, "<BleGattBridge {} Error>", kind)
    }
}

impl error::Error for ErrorKind {}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: String,
}

impl Error {
    pub fn new<T: Into<String>>(kind: ErrorKind, description: T) -> Self {
        Error {
            kind,
            description: description.into(),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        let description = kind.to_string();
        Error { kind, description }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Error {
    fn fmt(self: &Self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind: &str = self.kind.into();
        write!(f, "{}: {}", kind, self.description)
    }
}

impl error::Error for Error {
    fn source(self: &Self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.kind)
    }
}
