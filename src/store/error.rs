use thiserror::Error;

use crate::store::RowKey;

pub type StoreResult<T> = Result<T, StoreError>;

/// The RPC the store rejected with a backpressure signal. Carried inside
/// [`StoreError::Throttle`] so the engine can put the row back on the queue
/// instead of losing it.
#[derive(Clone, Debug)]
pub enum ThrottledRpc {
    Get { row_key: RowKey },
    Put { row_key: RowKey },
    Delete { row_key: RowKey },
    /// A throttled RPC with no recoverable row key (e.g. a batched edit the
    /// client could no longer attribute). The row is lost from this pass.
    Other,
}

impl ThrottledRpc {
    pub fn row_key(&self) -> Option<&RowKey> {
        match self {
            Self::Get { row_key } | Self::Put { row_key } | Self::Delete { row_key } => {
                Some(row_key)
            }
            Self::Other => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store asked us to slow down and retry this RPC later
    #[error("Store throttled, retry later")]
    Throttle(ThrottledRpc),

    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Store integrity error: {0}")]
    Integrity(String),

    #[error("Unknown store error: {0}")]
    General(String),
}

impl StoreError {
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttle(_))
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Throttle(_) => "store.error.throttle",
            Self::Connection(_) => "store.error.connection",
            Self::Integrity(_) => "store.error.integrity",
            Self::General(_) => "store.error.general",
        }
    }
}
