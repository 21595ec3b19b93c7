use log::debug;

use crate::error::BatchError;

/// Transactional boundary around a chunk or a single rescanned item.
///
/// A transaction is bound to the thread that began it: a chunk is assembled,
/// written and committed on one worker, so implementations typically keep
/// their pending state per thread. Nested transactions are never requested.
pub trait TransactionManager: Sync {
    fn begin(&self) -> Result<(), BatchError>;

    fn commit(&self) -> Result<(), BatchError>;

    fn rollback(&self) -> Result<(), BatchError>;
}

/// Transaction manager for steps whose resources are not transactional.
#[derive(Default)]
pub struct ResourcelessTransactionManager;

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<(), BatchError> {
        debug!("Begin resourceless transaction");
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        debug!("Rollback resourceless transaction");
        Ok(())
    }
}
