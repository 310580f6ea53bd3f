//! Defines standard metric names used across the engine.
//!
//! This module provides a type-safe way to refer to metrics by replacing
//! string literals with enum variants, ensuring consistency and discoverability.

use strum::{AsRefStr, Display, EnumString};
use strum_macros::IntoStaticStr;

/// Represents all metric names used in the engine.
#[derive(Debug, Clone, IntoStaticStr, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricName {
    /// Rows compacted, tagged with the merge path taken (trivial/complex)
    #[strum(serialize = "compaction.count")]
    CompactionCount,

    /// Current dirty-row queue cardinality (gauge)
    #[strum(serialize = "compaction.queue.size")]
    CompactionQueueSize,

    /// Store RPC failures, tagged with the failing RPC (read/put/delete)
    #[strum(serialize = "compaction.errors")]
    CompactionErrors,

    /// Canonical cells written back to the store
    #[strum(serialize = "compaction.writes")]
    CompactionWrites,

    /// Original per-datapoint cells deleted after a write
    #[strum(serialize = "compaction.deletes")]
    CompactionDeletes,

    /// Rows put back on the queue after a store throttle signal
    #[strum(serialize = "compaction.requeues")]
    CompactionRequeues,

    /// Rows lost to a throttle signal that carried no recoverable row key
    #[strum(serialize = "compaction.throttle.dropped")]
    CompactionThrottleDropped,

    /// True duplicate datapoints collapsed during a merge
    #[strum(serialize = "compaction.duplicates")]
    CompactionDuplicates,
}
