use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    slice,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{BatchError, FaultOrigin};

use super::{
    item::{ItemProcessor, ItemReader, ItemWriter},
    skip::{SkipCounter, SkipListener, SkipPolicy},
    step::StepContribution,
    transaction::TransactionManager,
};

/// Lifecycle of a chunk. `Committed` and `Rescanned` are terminal; a fatal
/// fault leaves the chunk through an `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Assembling,
    Committing,
    Committed,
    RollingBack,
    Rescanning,
    Rescanned,
}

/// What happened to one item of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed,
    Filtered,
    SkippedOnRead,
    SkippedOnProcess,
    SkippedOnWrite,
}

/// Inputs read for one unit of work.
#[derive(Debug)]
pub struct Chunk<I> {
    items: Vec<I>,
    capacity: usize,
    read_skips: usize,
    end_of_input: bool,
}

impl<I> Chunk<I> {
    pub fn new(capacity: usize) -> Chunk<I> {
        Chunk {
            items: Vec::with_capacity(capacity),
            capacity,
            read_skips: 0,
            end_of_input: false,
        }
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn get_items(&self) -> &[I] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// True when the source reported end of input while this chunk was filled.
    pub fn is_end_of_input(&self) -> bool {
        self.end_of_input
    }

    fn mark_end_of_input(&mut self) {
        self.end_of_input = true;
    }
}

/// Outcome of a chunk that did not fail the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    /// `Committed` for the fast path, `Rescanned` after a rollback.
    pub state: ChunkState,
    /// Read skips first, in the order they happened, then one entry per
    /// buffered input in read order.
    pub outcomes: Vec<ItemOutcome>,
    pub end_of_input: bool,
}

impl ChunkReport {
    pub fn count(&self, outcome: ItemOutcome) -> usize {
        self.outcomes.iter().filter(|o| **o == outcome).count()
    }

    pub fn skip_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    ItemOutcome::SkippedOnRead
                        | ItemOutcome::SkippedOnProcess
                        | ItemOutcome::SkippedOnWrite
                )
            })
            .count()
    }
}

/// Fault that aborted the fast path, with the outputs produced before it.
struct ChunkFault<O> {
    error: BatchError,
    origin: FaultOrigin,
    processed: Vec<Option<O>>,
}

enum Phase<O> {
    Committing,
    RollingBack(ChunkFault<O>),
    Rescanning(Vec<Option<O>>),
}

/// Reads, processes and writes chunks, isolating faulty items by rescanning.
///
/// One instance serves a whole step execution and is shared by reference
/// between workers: reads go through an internal lock, everything else a
/// chunk needs is owned by the call processing it.
///
/// Once a chunk fails, the processor is stopped and no further chunk is read.
/// A panic in a component is turned into [`BatchError::Step`] after the open
/// transaction, if any, has been rolled back.
pub struct ChunkProcessor<'a, I, O> {
    pub(crate) reader: &'a dyn ItemReader<I>,
    pub(crate) processor: &'a dyn ItemProcessor<I, O>,
    pub(crate) writer: &'a dyn ItemWriter<O>,
    pub(crate) transaction_manager: &'a dyn TransactionManager,
    pub(crate) skip_policy: &'a dyn SkipPolicy,
    pub(crate) skip_listener: &'a dyn SkipListener<I, O>,
    pub(crate) skip_counter: &'a SkipCounter,
    pub(crate) contribution: &'a StepContribution,
    pub(crate) commit_interval: usize,
    pub(crate) processor_transactional: bool,
    pub(crate) read_lock: Mutex<()>,
    pub(crate) exhausted: AtomicBool,
    pub(crate) stopped: AtomicBool,
}

impl<I, O> ChunkProcessor<'_, I, O> {
    /// Reads the next chunk and processes it.
    ///
    /// Any error returned here is fatal and stops the processor.
    pub fn run_chunk(&self) -> Result<ChunkReport, BatchError> {
        let chunk = panic::catch_unwind(AssertUnwindSafe(|| self.read_chunk()))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload);
                error!("Chunk reading panicked: {}", message);
                Err(BatchError::Step(format!("chunk reading panicked: {}", message)))
            })
            .map_err(|fatal| self.fail(fatal))?;
        let mut report = self.process_chunk(&chunk).map_err(|fatal| self.fail(fatal))?;

        let mut outcomes = vec![ItemOutcome::SkippedOnRead; chunk.read_skips];
        outcomes.append(&mut report.outcomes);
        report.outcomes = outcomes;

        Ok(report)
    }

    /// Fills a chunk from the reader.
    ///
    /// The read lock is held for the whole chunk, so chunks handed to
    /// different workers hold consecutive items.
    pub fn read_chunk(&self) -> Result<Chunk<I>, BatchError> {
        let _guard = self.read_lock.lock();
        let mut chunk = Chunk::new(self.commit_interval);

        if self.is_stopped() {
            debug!("Step stopped, no more items are read");
            chunk.mark_end_of_input();
            return Ok(chunk);
        }
        if self.exhausted.load(Ordering::Acquire) {
            chunk.mark_end_of_input();
            return Ok(chunk);
        }

        Self::enter(ChunkState::Assembling);

        while !chunk.is_full() {
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.add_item(item);
                    self.contribution.inc_read_count();
                }
                Ok(None) => {
                    self.exhausted.store(true, Ordering::Release);
                    chunk.mark_end_of_input();
                    break;
                }
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    let error = self
                        .register_skip(error, FaultOrigin::Read)
                        .map_err(|fatal| self.fail(fatal))?;
                    chunk.read_skips += 1;
                    self.contribution.inc_read_skip_count();
                    self.skip_listener.on_skip_in_read(&error);
                }
            }
        }

        debug!(
            "End reading chunk: {} items, end of input: {}",
            chunk.len(),
            chunk.is_end_of_input()
        );
        Ok(chunk)
    }

    /// Processes and writes a chunk that has already been read.
    ///
    /// Tries the whole chunk in one transaction first. On any fault the
    /// transaction is rolled back and every input is replayed in its own
    /// transaction so that only the faulty items are skipped.
    pub fn process_chunk(&self, chunk: &Chunk<I>) -> Result<ChunkReport, BatchError> {
        if chunk.is_empty() {
            debug!("No items to process, skipping transaction");
            return Ok(ChunkReport {
                state: ChunkState::Committed,
                outcomes: Vec::new(),
                end_of_input: chunk.is_end_of_input(),
            });
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.transact(chunk))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                error!("Chunk processing panicked: {}", message);
                self.rollback()?;
                Err(BatchError::Step(format!(
                    "chunk processing panicked: {}",
                    message
                )))
            }
        }
    }

    /// Prevents any further chunk from being read.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn fail(&self, fatal: BatchError) -> BatchError {
        self.stop();
        fatal
    }

    fn transact(&self, chunk: &Chunk<I>) -> Result<ChunkReport, BatchError> {
        let mut phase = Phase::Committing;

        loop {
            phase = match phase {
                Phase::Committing => {
                    Self::enter(ChunkState::Committing);
                    self.begin()?;
                    match self.commit_chunk(chunk) {
                        Ok(outcomes) => {
                            return Ok(ChunkReport {
                                state: ChunkState::Committed,
                                outcomes,
                                end_of_input: chunk.is_end_of_input(),
                            });
                        }
                        Err(fault) => Phase::RollingBack(fault),
                    }
                }
                Phase::RollingBack(fault) => {
                    Self::enter(ChunkState::RollingBack);
                    warn!(
                        "Rolling back chunk of {} items after {} fault: {}",
                        chunk.len(),
                        fault.origin,
                        fault.error
                    );
                    self.rollback()?;
                    if self.processor_transactional {
                        Phase::Rescanning(Vec::new())
                    } else {
                        Phase::Rescanning(fault.processed)
                    }
                }
                Phase::Rescanning(cache) => {
                    Self::enter(ChunkState::Rescanning);
                    let outcomes = self.rescan(chunk, cache)?;
                    return Ok(ChunkReport {
                        state: ChunkState::Rescanned,
                        outcomes,
                        end_of_input: chunk.is_end_of_input(),
                    });
                }
            };
        }
    }

    /// Fast path: the whole chunk in the transaction opened by the caller.
    fn commit_chunk(&self, chunk: &Chunk<I>) -> Result<Vec<ItemOutcome>, ChunkFault<O>> {
        debug!("Processing chunk of {} items", chunk.len());

        let mut outputs = Vec::with_capacity(chunk.len());
        let mut produced = Vec::with_capacity(chunk.len());

        for item in chunk.get_items() {
            match self.processor.process(item) {
                Ok(Some(output)) => {
                    outputs.push(output);
                    produced.push(true);
                }
                Ok(None) => produced.push(false),
                Err(error) => {
                    warn!("Error processing item: {}", error);
                    return Err(ChunkFault {
                        error,
                        origin: FaultOrigin::Process,
                        processed: Self::zip_outputs(&produced, outputs),
                    });
                }
            }
        }

        debug!("Writing chunk of {} items", outputs.len());

        let written = if outputs.is_empty() {
            debug!("No items to write, skipping write call");
            Ok(())
        } else {
            self.writer.write(&outputs)
        };

        if let Err(error) = written.and_then(|()| self.transaction_manager.commit()) {
            warn!("Error writing items: {}", error);
            return Err(ChunkFault {
                error,
                origin: FaultOrigin::Write,
                processed: Self::zip_outputs(&produced, outputs),
            });
        }

        self.contribution.add_write_count(outputs.len());
        self.contribution.add_filter_count(produced.len() - outputs.len());
        self.contribution.inc_commit_count();

        Ok(produced
            .into_iter()
            .map(|p| {
                if p {
                    ItemOutcome::Committed
                } else {
                    ItemOutcome::Filtered
                }
            })
            .collect())
    }

    /// Replays each input in its own transaction.
    ///
    /// `cache` holds outputs of the aborted fast path, aligned with the first
    /// inputs; it is empty when the processor is transactional.
    fn rescan(
        &self,
        chunk: &Chunk<I>,
        cache: Vec<Option<O>>,
    ) -> Result<Vec<ItemOutcome>, BatchError> {
        debug!("Rescanning chunk of {} items", chunk.len());

        let mut cache = cache.into_iter();
        let mut outcomes = Vec::with_capacity(chunk.len());

        for item in chunk.get_items() {
            let cached = cache.next();
            self.begin()?;

            let processed = match cached {
                Some(output) => Ok(output),
                None => self.processor.process(item),
            };

            let outcome = match processed {
                Ok(None) => match self.transaction_manager.commit() {
                    Ok(()) => {
                        self.contribution.add_filter_count(1);
                        self.contribution.inc_commit_count();
                        ItemOutcome::Filtered
                    }
                    Err(error) => self.skip_in_write(None, error)?,
                },
                Ok(Some(output)) => {
                    let written = self
                        .writer
                        .write(slice::from_ref(&output))
                        .and_then(|()| self.transaction_manager.commit());
                    match written {
                        Ok(()) => {
                            self.contribution.add_write_count(1);
                            self.contribution.inc_commit_count();
                            ItemOutcome::Committed
                        }
                        Err(error) => self.skip_in_write(Some(&output), error)?,
                    }
                }
                Err(error) => {
                    self.rollback()?;
                    let error = self.register_skip(error, FaultOrigin::Process)?;
                    self.contribution.inc_process_skip_count();
                    self.skip_listener.on_skip_in_process(item, &error);
                    ItemOutcome::SkippedOnProcess
                }
            };

            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn skip_in_write(
        &self,
        output: Option<&O>,
        error: BatchError,
    ) -> Result<ItemOutcome, BatchError> {
        self.rollback()?;
        let error = self.register_skip(error, FaultOrigin::Write)?;
        self.contribution.inc_write_skip_count();
        if let Some(output) = output {
            self.skip_listener.on_skip_in_write(output, &error);
        }
        Ok(ItemOutcome::SkippedOnWrite)
    }

    /// Classifies a fault and takes one skip from the budget.
    ///
    /// Gives the fault back when it may be skipped, or the fatal error that
    /// must end the step.
    fn register_skip(
        &self,
        fault: BatchError,
        origin: FaultOrigin,
    ) -> Result<BatchError, BatchError> {
        if !self.skip_policy.is_skippable(&fault, origin) {
            error!("Non skippable fault on {}: {}", origin, fault);
            return Err(BatchError::NonSkippable {
                origin,
                cause: Box::new(fault),
            });
        }

        if !self.skip_counter.try_register_skip() {
            error!(
                "Skip limit of {} exceeded on {}: {}",
                self.skip_counter.limit(),
                origin,
                fault
            );
            return Err(BatchError::SkipLimitExceeded {
                limit: self.skip_counter.limit(),
                origin,
                cause: Box::new(fault),
            });
        }

        warn!("Skipping item on {}: {}", origin, fault);
        Ok(fault)
    }

    fn begin(&self) -> Result<(), BatchError> {
        self.transaction_manager.begin().map_err(|error| {
            error!("Unable to begin transaction: {}", error);
            BatchError::Step(format!("unable to begin transaction: {}", error))
        })
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.contribution.inc_rollback_count();
        self.transaction_manager.rollback().map_err(|error| {
            error!("Unable to roll back transaction: {}", error);
            BatchError::Step(format!("unable to roll back transaction: {}", error))
        })
    }

    fn enter(state: ChunkState) {
        debug!("Chunk state: {:?}", state);
    }

    fn zip_outputs(produced: &[bool], outputs: Vec<O>) -> Vec<Option<O>> {
        let mut outputs = outputs.into_iter();
        produced
            .iter()
            .map(|p| if *p { outputs.next() } else { None })
            .collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown cause".to_string(),
        },
    }
}
