/// This module provides an in-memory item reader, handy for tests and small inputs.
pub mod list;

#[cfg(feature = "logger")]
/// This module provides a logger item writer, useful for debugging purposes.
pub mod logger;
