use std::fmt::Debug;

use log::info;

use crate::{
    BatchError,
    core::{item::ItemWriter, skip::SkipListener},
};

/// Writes every item of a chunk to the log at info level.
#[derive(Default)]
pub struct LoggerWriter;

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}

/// Logs every skipped item at info level.
#[derive(Default)]
pub struct LoggerSkipListener;

impl<I: Debug, O: Debug> SkipListener<I, O> for LoggerSkipListener {
    fn on_skip_in_read(&self, error: &BatchError) {
        info!("Skipped on read: {}", error);
    }

    fn on_skip_in_process(&self, item: &I, error: &BatchError) {
        info!("Skipped on process: {:?}, {}", item, error);
    }

    fn on_skip_in_write(&self, item: &O, error: &BatchError) {
        info!("Skipped on write: {:?}, {}", item, error);
    }
}
