use std::fmt;

use thiserror::Error;

/// Failure categories reported by the player subprocess or its control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LoadFailed,
    InvalidArgument,
    BinaryNotFound,
    CommandInvalid,
    BindFailed,
    Timeout,
    AlreadyRunning,
    SendFailed,
    NotRunning,
    UnsupportedProtocol,
}

/// Numeric code, kind and human-readable description for every known failure.
static ERROR_TABLE: &[(i32, ErrorKind, &str)] = &[
    (0, ErrorKind::LoadFailed, "unable to load file or stream"),
    (1, ErrorKind::InvalidArgument, "invalid argument"),
    (2, ErrorKind::BinaryNotFound, "binary not found"),
    (3, ErrorKind::CommandInvalid, "IPC command invalid"),
    (4, ErrorKind::BindFailed, "unable to bind IPC socket"),
    (5, ErrorKind::Timeout, "timeout"),
    (6, ErrorKind::AlreadyRunning, "player is already running"),
    (7, ErrorKind::SendFailed, "could not send IPC message"),
    (8, ErrorKind::NotRunning, "player is not running"),
    (9, ErrorKind::UnsupportedProtocol, "unsupported protocol"),
];

/// Error strings mpv puts in the `error` field of a reply.
static REPLY_TABLE: &[(&str, ErrorKind)] = &[
    ("invalid parameter", ErrorKind::InvalidArgument),
    ("property unavailable", ErrorKind::CommandInvalid),
    ("property not found", ErrorKind::CommandInvalid),
    ("unknown command", ErrorKind::CommandInvalid),
    ("error running command", ErrorKind::CommandInvalid),
    ("unsupported format for accessing property", ErrorKind::UnsupportedProtocol),
];

impl ErrorKind {
    pub fn from_code(code: i32) -> Option<Self> {
        ERROR_TABLE
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, kind, _)| *kind)
    }

    pub fn code(self) -> i32 {
        ERROR_TABLE
            .iter()
            .find(|(_, kind, _)| *kind == self)
            .map(|(code, _, _)| *code)
            .unwrap_or(-1)
    }

    pub fn describe(self) -> &'static str {
        ERROR_TABLE
            .iter()
            .find(|(_, kind, _)| *kind == self)
            .map(|(_, _, text)| *text)
            .unwrap_or("unknown error")
    }

    /// Map an mpv reply error string to a category.
    pub fn from_reply(message: &str) -> Self {
        REPLY_TABLE
            .iter()
            .find(|(text, _)| message.eq_ignore_ascii_case(text))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::CommandInvalid)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} (code {code}): {detail}", code = .kind.code())]
pub struct MpvError {
    kind: ErrorKind,
    detail: String,
}

impl MpvError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_running() -> Self {
        Self::new(ErrorKind::NotRunning, "no player instance")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

pub type Result<T> = std::result::Result<T, MpvError>;
