use crate::error::BatchError;

/// Result of a read: `Ok(None)` once the source has no more items.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of a process call: `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of a chunk write.
pub type ItemWriterResult = Result<(), BatchError>;

/// Produces the input of a step, one item at a time.
///
/// Readers are shared between the workers of a multi-threaded step. The step
/// never calls `read` from two workers at the same time, but it does call it
/// from different threads, hence the `Sync` bound and `&self` receiver.
pub trait ItemReader<I>: Sync {
    fn read(&self) -> ItemReaderResult<I>;
}

/// Business logic applied to every item between read and write.
///
/// Inside a fault-tolerant step a processor may be invoked more than once for
/// the same item: once while the chunk is assembled and once more if the
/// chunk is rolled back and rescanned.
pub trait ItemProcessor<I, O>: Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Output of a step: persists a whole chunk at once.
///
/// Called once per chunk and, after a rollback, once per single-item rescan.
pub trait ItemWriter<O>: Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;
}

/// Processor used when a step has none: every item goes through unchanged.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_processor_returns_same_item() {
        let processor = PassThroughProcessor;
        let result = processor.process(&"1".to_string());
        assert_eq!(result.ok().flatten().as_deref(), Some("1"));
    }
}
