//! Types and traits for recording training metrics and environment info.
//!
//! * [`Record`] - A container of named values
//! * [`RecordValue`] - Types of values a [`Record`] can hold
//! * [`Recorder`], [`AggregateRecorder`] - Output destinations of records
//! * [`RecordStorage`] - Aggregation of stored records
//! * [`BufferedRecorder`] - Keeps records in memory, mainly for tests
//! * [`NullRecorder`] - Discards all records
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
