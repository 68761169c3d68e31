/// Category of a storage engine error. Lets the store and the reconciler
/// decide what to do with a failure (retry the commit, re-run the
/// read-decide-write cycle, surface to the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Backing store unreachable or overloaded. Transient.
    Unavailable,
    /// Commit was sent but its outcome could not be confirmed.
    /// The transaction may or may not have been applied.
    UnknownCommitResult,
    /// Another transaction wrote the document after this transaction's
    /// snapshot, or holds its lock.
    WriteConflict,
    /// The caller's context was cancelled or its deadline passed.
    Cancelled,
    /// Stored or inbound data could not be (de)serialized.
    Format,
    /// Invalid state or usage (not found, already aborted, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Unavailable => f.write_str("unavailable"),
            ErrorKind::UnknownCommitResult => f.write_str("unknown-commit-result"),
            ErrorKind::WriteConflict => f.write_str("write-conflict"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for storage engine and store operations.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the kind automatically so engines can use `?`.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    /// Generic logic error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unavailable, message: msg.into() }
    }

    pub fn unknown_commit_result(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::UnknownCommitResult, message: msg.into() }
    }

    pub fn write_conflict(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::WriteConflict, message: msg.into() }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Cancelled, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_unknown_commit_result(&self) -> bool {
        self.kind == ErrorKind::UnknownCommitResult
    }

    pub fn is_write_conflict(&self) -> bool {
        self.kind == ErrorKind::WriteConflict
    }

    /// Prefix the message, keeping the kind.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<String> for EngineError {
    fn from(s: String) -> Self { Self { kind: ErrorKind::Logic, message: s } }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self { Self { kind: ErrorKind::Logic, message: s.to_string() } }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Unavailable, message: e.to_string() } }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Format, message: e.to_string() } }
}
