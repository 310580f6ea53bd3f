#![recursion_limit = "1024"]

//! Row compaction engine for a wide-column time-series store.
//!
//! The backing store keeps one cell per datapoint, which repeats the row key
//! on every cell and makes scans of aging rows expensive. This crate folds
//! all per-datapoint cells of a row into one canonical cell once the row has
//! aged out of its write window: writers report dirty row keys through
//! [`engine::CompactionEngine::enqueue`], a background worker claims aging
//! keys from a time-ordered queue and drives each row through a
//! read-merge-write-delete pipeline against the [`store::StoreClient`].

#[macro_use]
extern crate slog;
#[macro_use]
extern crate slog_scope;

pub mod annotation;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod merge;
pub mod metric_name;
pub mod metrics;
pub mod queue;
pub mod settings;
pub mod store;
pub mod util;
