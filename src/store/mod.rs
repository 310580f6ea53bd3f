/// Narrow interface to the wide-column backing store.
///
/// The engine never talks to the store directly; everything goes through the
/// [`client::StoreClient`] trait so that the store implementation (and its
/// batching, retry and connection handling) stays out of this crate. A
/// mockall mock of the trait lives in [`mock`] for the pipeline tests.
use std::fmt;

pub mod client;
pub mod error;
pub mod mock;

pub use client::StoreClient;
pub use error::{StoreError, StoreResult, ThrottledRpc};

/// A `(qualifier, value)` pair within a row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn new(qualifier: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            qualifier: qualifier.into(),
            value: value.into(),
        }
    }
}

/// An opaque store row key: `metric_id[M] || base_time_be_u32[4] || tags`.
///
/// Only the embedded base time is ever interpreted here; everything else is
/// carried as-is. Displays as hex for operator logs.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RowKey(Vec<u8>);

impl RowKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The UNIX second embedded after the metric id, or None when the key is
    /// too short to carry one.
    pub fn base_time(&self, metric_width: u16) -> Option<u32> {
        let start = metric_width as usize;
        let raw = self.0.get(start..start + 4)?;
        Some(u32::from_be_bytes(raw.try_into().ok()?))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for RowKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RowKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}
