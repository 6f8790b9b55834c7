use std::fmt;

/// Errors that can occur in the Shi interpreter at the Rust level.
///
/// Every variant except `Fatal` unwinds to the nearest `trap-error` rescue
/// frame, where the carried message becomes a user-visible string. `Fatal`
/// covers memory exhaustion, rescue-stack overflow, and collector invariant
/// violations; it is never catchable.
#[derive(Debug, Clone)]
pub enum Error {
    /// Syntax violation while reading source text.
    Read(String),

    /// Evaluation of a symbol not in scope.
    Unbound(String),

    /// Wrong kind of argument to a primitive or closure.
    Type(String),

    /// Wrong number of arguments, or a formal/actual mismatch.
    Arity(String),

    /// I/O or networking failure surfaced from the platform.
    Io(String),

    /// Raised by the `error` primitive with a custom message.
    User(String),

    /// Unrecoverable runtime error. Not catchable by `trap-error`.
    Fatal(String),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// The message `trap-error` binds for the handler.
    pub fn message(&self) -> &str {
        match self {
            Error::Read(m)
            | Error::Unbound(m)
            | Error::Type(m)
            | Error::Arity(m)
            | Error::Io(m)
            | Error::User(m)
            | Error::Fatal(m) => m,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
