//! Property-based test generators using proptest.
//!
//! Provides strategies for payloads and operation sequences against a log.

use proptest::prelude::*;
use seglog_core::Log;

/// Strategy for generating payloads (arbitrary bytes, possibly empty).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating a batch of payloads.
pub fn payload_batch_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(payload_strategy(), min..max)
}

/// An operation that can be applied to a log.
#[derive(Debug, Clone)]
pub enum LogOperation {
    /// Append a plain record.
    Append(Vec<u8>),
    /// Append a checkpoint record.
    Checkpoint(Vec<u8>),
    /// Flush and sync the active segment.
    Sync,
    /// Seal the active segment.
    Rotate,
}

impl LogOperation {
    /// Applies the operation, returning the sequence number for writes.
    ///
    /// # Panics
    ///
    /// Panics if the log rejects the operation.
    pub fn apply(&self, log: &Log) -> Option<u64> {
        match self {
            Self::Append(payload) => Some(log.append(payload).expect("append failed").as_u64()),
            Self::Checkpoint(payload) => {
                Some(log.checkpoint(payload).expect("checkpoint failed").as_u64())
            }
            Self::Sync => {
                log.sync().expect("sync failed");
                None
            }
            Self::Rotate => {
                log.rotate().expect("rotate failed");
                None
            }
        }
    }
}

/// Strategy for a single log operation, weighted toward appends.
pub fn log_operation_strategy() -> impl Strategy<Value = LogOperation> {
    prop_oneof![
        6 => payload_strategy().prop_map(LogOperation::Append),
        2 => payload_strategy().prop_map(LogOperation::Checkpoint),
        1 => Just(LogOperation::Sync),
        1 => Just(LogOperation::Rotate),
    ]
}

/// Strategy for a sequence of log operations.
pub fn log_operations_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<LogOperation>> {
    prop::collection::vec(log_operation_strategy(), min..max)
}

/// Configuration for property tests.
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a quick configuration for fast tests.
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest's Config.
    pub fn to_proptest_config(&self) -> proptest::test_runner::Config {
        proptest::test_runner::Config {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..Default::default()
        }
    }
}
