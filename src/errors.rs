//! Error handling for the compaction engine.

use std::error::Error;
use std::fmt::{self, Display};

use backtrace::Backtrace;
use thiserror::Error;

use crate::store::error::StoreError;

pub type Result<T> = std::result::Result<T, CompactError>;

/// The main error wrapper. Carries the backtrace taken where the error was
/// converted into a `CompactError`.
#[derive(Debug)]
pub struct CompactError {
    pub kind: CompactErrorKind,
    pub backtrace: Backtrace,
}

impl Display for CompactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        // Go down the chain of errors
        let mut error: &dyn Error = &self.kind;
        while let Some(source) = error.source() {
            write!(f, "\n\nCaused by: {}", source)?;
            error = source;
        }

        Ok(())
    }
}

impl Error for CompactError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.kind.source()
    }
}

// Forward From impls to CompactError from CompactErrorKind. Because From is
// reflexive, this impl also takes care of From<CompactErrorKind>.
impl<T> From<T> for CompactError
where
    CompactErrorKind: From<T>,
{
    fn from(item: T) -> Self {
        CompactError {
            kind: CompactErrorKind::from(item),
            backtrace: Backtrace::new(),
        }
    }
}

impl CompactError {
    /// A corrupt row that cannot be merged. The row is reported and left
    /// for operator repair, never re-enqueued.
    pub fn malformed_row(msg: impl Into<String>) -> Self {
        CompactErrorKind::MalformedRow(msg.into()).into()
    }

    pub fn is_malformed_row(&self) -> bool {
        matches!(self.kind, CompactErrorKind::MalformedRow(_))
    }
}

#[derive(Debug, Error)]
pub enum CompactErrorKind {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] cadence::MetricError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("General error: {0}")]
    General(String),
}

impl CompactErrorKind {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Metrics(_) => "metric_error",
            Self::Config(_) => "config_error",
            Self::MalformedRow(_) => "malformed_row",
            Self::General(_) => "general_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_row_roundtrip() {
        let err = CompactError::malformed_row("duplicate offset 17");
        assert!(err.is_malformed_row());
        assert_eq!(err.kind.metric_label(), "malformed_row");
        assert!(err.to_string().contains("duplicate offset 17"));
    }

    #[test]
    fn test_store_error_conversion() {
        let err: CompactError = StoreError::Connection("refused".to_owned()).into();
        assert!(!err.is_malformed_row());
        assert_eq!(err.kind.metric_label(), "store_error");
    }
}
