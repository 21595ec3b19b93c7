use rand::distr::{Alphanumeric, SampleString};

/// Fault-tolerant chunk processing: assembly, commit, rollback and rescan
pub mod chunk;

/// Worker pool used by multi-threaded steps
pub mod executor;

pub mod item;

/// Skip classification, skip accounting and skip listeners
pub mod skip;

pub mod step;

pub mod transaction;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
