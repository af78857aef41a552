use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Pattern yielded no match: {0}")]
    NotFound(String),

    #[error("Pattern is ambiguous ({matches} matches): {name}")]
    Ambiguous { name: String, matches: usize },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Offset slot is unresolved: {0}")]
    Unresolved(&'static str),

    #[error("Blocked by {0}")]
    Blocked(&'static str),

    #[error("Host is in an unsafe state")]
    UnsafeState,

    #[error("Call-site probe found no indirect call sequence")]
    ProbeFailed,

    #[error("Host rejected descriptor update: {0}")]
    HostRejected(&'static str),

    #[error("Computed automap cell coordinates out of range")]
    Bounds,

    #[error("Missing host object: {0}")]
    Missing(&'static str),

    #[error("Hash chain exceeded traversal cap")]
    Corruption,

    #[error("Access violation demoted while reading host memory")]
    AccessViolation,

    #[error("Offset cache rejected: {0}")]
    CacheRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert!(Error::Io(io_err).is_not_found());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!Error::Io(other).is_not_found());
    }
}
