use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where, inside a chunk, a fault was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultOrigin {
    Read,
    Process,
    Write,
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultOrigin::Read => write!(f, "read"),
            FaultOrigin::Process => write!(f, "process"),
            FaultOrigin::Write => write!(f, "write"),
        }
    }
}

/// Category of a [`BatchError`], used to decide whether a fault can be skipped.
///
/// `Any` never comes out of [`BatchError::category`]: it is the wildcard entry
/// of a skip configuration and matches every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCategory {
    Any,
    ItemReader,
    ItemProcessor,
    ItemWriter,
    Io,
    Parse,
    Transaction,
    SkipLimitExceeded,
    NonSkippable,
    TaskRejected,
    Configuration,
    Step,
}

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader error: {0}")]
    ItemReader(String),

    #[error("ItemProcessor error: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter error: {0}")]
    ItemWriter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A skippable fault was refused because the step already skipped `limit` items.
    #[error("Skip limit of {limit} exceeded on {origin}: {cause}")]
    SkipLimitExceeded {
        limit: usize,
        origin: FaultOrigin,
        #[source]
        cause: Box<BatchError>,
    },

    /// The skip policy does not allow this fault to be skipped.
    #[error("Non skippable fault on {origin}: {cause}")]
    NonSkippable {
        origin: FaultOrigin,
        #[source]
        cause: Box<BatchError>,
    },

    #[error("Task rejected: {0}")]
    TaskRejected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Step error: {0}")]
    Step(String),
}

impl BatchError {
    /// Returns the category used by skip classification.
    pub fn category(&self) -> FaultCategory {
        match self {
            BatchError::ItemReader(_) => FaultCategory::ItemReader,
            BatchError::ItemProcessor(_) => FaultCategory::ItemProcessor,
            BatchError::ItemWriter(_) => FaultCategory::ItemWriter,
            BatchError::Io(_) => FaultCategory::Io,
            BatchError::Parse(_) => FaultCategory::Parse,
            BatchError::Transaction(_) => FaultCategory::Transaction,
            BatchError::SkipLimitExceeded { .. } => FaultCategory::SkipLimitExceeded,
            BatchError::NonSkippable { .. } => FaultCategory::NonSkippable,
            BatchError::TaskRejected(_) => FaultCategory::TaskRejected,
            BatchError::Configuration(_) => FaultCategory::Configuration,
            BatchError::Step(_) => FaultCategory::Step,
        }
    }
}
