//! In-memory transactional store and the reader, processor and writer stubs using it.
use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use fault_tolerant_batch::{
    BatchError,
    core::{
        item::{
            ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter,
            ItemWriterResult,
        },
        transaction::TransactionManager,
    },
};

/// Table of `(step_name, message)` rows.
///
/// Inserts made while the calling thread has an open transaction stay pending
/// until commit and vanish on rollback; other inserts are committed at once.
#[derive(Default)]
pub struct TransactionalStore {
    committed: Mutex<Vec<(String, String)>>,
    pending: Mutex<HashMap<ThreadId, Vec<(String, String)>>>,
}

impl TransactionalStore {
    pub fn insert(&self, step_name: &str, message: &str) {
        let row = (step_name.to_string(), message.to_string());
        let mut pending = self.pending.lock();
        match pending.get_mut(&thread::current().id()) {
            Some(transaction) => transaction.push(row),
            None => self.committed.lock().push(row),
        }
    }

    pub fn committed(&self, step_name: &str) -> Vec<String> {
        self.committed
            .lock()
            .iter()
            .filter(|(name, _)| name == step_name)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn count_rows(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn open_transactions(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn delete(&self, step_name: &str) {
        self.committed.lock().retain(|(name, _)| name != step_name);
    }
}

impl TransactionManager for TransactionalStore {
    fn begin(&self) -> Result<(), BatchError> {
        let previous = self
            .pending
            .lock()
            .insert(thread::current().id(), Vec::new());
        match previous {
            Some(_) => Err(BatchError::Transaction(
                "transaction already open on this thread".to_string(),
            )),
            None => Ok(()),
        }
    }

    fn commit(&self) -> Result<(), BatchError> {
        let rows = self.pending.lock().remove(&thread::current().id());
        match rows {
            Some(rows) => {
                self.committed.lock().extend(rows);
                Ok(())
            }
            None => Err(BatchError::Transaction("no transaction to commit".to_string())),
        }
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.pending.lock().remove(&thread::current().id());
        Ok(())
    }
}

/// Transactions of a [`TransactionalStore`] with injected failures.
///
/// A failing commit leaves the transaction open for the caller to roll back.
/// A failing rollback still discards the pending rows.
pub struct FlakyTransactions<'a> {
    store: &'a TransactionalStore,
    failing_commits: AtomicUsize,
    fail_begin: bool,
    fail_rollback: bool,
}

impl<'a> FlakyTransactions<'a> {
    pub fn new(store: &'a TransactionalStore) -> Self {
        Self {
            store,
            failing_commits: AtomicUsize::new(0),
            fail_begin: false,
            fail_rollback: false,
        }
    }

    /// Fails the next `count` commits.
    pub fn failing_commits(self, count: usize) -> Self {
        self.failing_commits.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }
}

impl TransactionManager for FlakyTransactions<'_> {
    fn begin(&self) -> Result<(), BatchError> {
        if self.fail_begin {
            return Err(BatchError::Transaction("connection refused".to_string()));
        }
        self.store.begin()
    }

    fn commit(&self) -> Result<(), BatchError> {
        let failed = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BatchError::Transaction("commit failed".to_string()));
        }
        self.store.commit()
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.store.rollback()?;
        if self.fail_rollback {
            return Err(BatchError::Transaction("rollback failed".to_string()));
        }
        Ok(())
    }
}

/// Reads the given items; items listed as failures raise a read fault instead.
pub struct SkipReaderStub {
    items: Mutex<VecDeque<String>>,
    failures: Vec<String>,
}

impl SkipReaderStub {
    pub fn new(items: &[&str]) -> Self {
        Self {
            items: Mutex::new(items.iter().map(|i| i.to_string()).collect()),
            failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: &[&str]) -> Self {
        self.failures = failures.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn remaining(&self) -> usize {
        self.items.lock().len()
    }
}

impl ItemReader<String> for SkipReaderStub {
    fn read(&self) -> ItemReaderResult<String> {
        match self.items.lock().pop_front() {
            Some(item) if self.failures.contains(&item) => {
                Err(BatchError::ItemReader(format!("Planned failure on {}", item)))
            }
            item => Ok(item),
        }
    }
}

/// Records every processed item, in memory and in the `processed` table.
pub struct SkipProcessorStub<'a> {
    store: &'a TransactionalStore,
    processed: Mutex<Vec<String>>,
    failures: Vec<String>,
    filtered: Vec<String>,
}

impl<'a> SkipProcessorStub<'a> {
    pub fn new(store: &'a TransactionalStore) -> Self {
        Self {
            store,
            processed: Mutex::new(Vec::new()),
            failures: Vec::new(),
            filtered: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: &[&str]) -> Self {
        self.failures = failures.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Items for which the processor produces no output.
    pub fn with_filtered(mut self, filtered: &[&str]) -> Self {
        self.filtered = filtered.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().clone()
    }

    pub fn committed(&self) -> Vec<String> {
        self.store.committed("processed")
    }
}

impl ItemProcessor<String, String> for SkipProcessorStub<'_> {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        self.processed.lock().push(item.clone());
        self.store.insert("processed", item);
        if self.failures.contains(item) {
            return Err(BatchError::ItemProcessor("Planned failure".to_string()));
        }
        if self.filtered.contains(item) {
            return Ok(None);
        }
        Ok(Some(item.clone()))
    }
}

/// Inserts every item in the `written` table, failing on the configured items.
pub struct SkipWriterStub<'a> {
    store: &'a TransactionalStore,
    written: Mutex<Vec<String>>,
    chunk_sizes: Mutex<Vec<usize>>,
    failures: Vec<String>,
}

impl<'a> SkipWriterStub<'a> {
    pub fn new(store: &'a TransactionalStore) -> Self {
        Self {
            store,
            written: Mutex::new(Vec::new()),
            chunk_sizes: Mutex::new(Vec::new()),
            failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: &[&str]) -> Self {
        self.failures = failures.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.lock().clone()
    }

    pub fn committed(&self) -> Vec<String> {
        self.store.committed("written")
    }
}

impl ItemWriter<String> for SkipWriterStub<'_> {
    fn write(&self, items: &[String]) -> ItemWriterResult {
        self.chunk_sizes.lock().push(items.len());
        for item in items {
            self.written.lock().push(item.clone());
            self.store.insert("written", item);
            if self.failures.contains(item) {
                return Err(BatchError::ItemWriter("Planned failure".to_string()));
            }
        }
        Ok(())
    }
}

pub fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}
