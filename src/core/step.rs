use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BatchError, FaultCategory};

use super::{
    build_name,
    chunk::{ChunkProcessor, ChunkReport},
    executor::{TaskExecutorConfig, ThreadPoolTaskExecutor},
    item::{ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor},
    skip::{NoOpSkipListener, SkipCounter, SkipListener, SkipPolicy, SkippableFaults},
    transaction::{ResourcelessTransactionManager, TransactionManager},
};

static PASS_THROUGH: PassThroughProcessor = PassThroughProcessor;
static RESOURCELESS: ResourcelessTransactionManager = ResourcelessTransactionManager;
static NO_OP_LISTENER: NoOpSkipListener = NoOpSkipListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Created, not run yet.
    Starting,
    /// Chunks are being processed.
    Executing,
    /// Every item was committed, filtered or skipped.
    Completed,
    /// A fatal fault stopped the step.
    Failed,
}

/// Counters shared by every worker of a running step.
#[derive(Debug, Default)]
pub struct StepContribution {
    read_count: AtomicUsize,
    write_count: AtomicUsize,
    filter_count: AtomicUsize,
    read_skip_count: AtomicUsize,
    process_skip_count: AtomicUsize,
    write_skip_count: AtomicUsize,
    commit_count: AtomicUsize,
    rollback_count: AtomicUsize,
}

impl StepContribution {
    pub fn inc_read_count(&self) {
        self.read_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn add_write_count(&self, count: usize) {
        self.write_count.fetch_add(count, Ordering::AcqRel);
    }

    pub fn add_filter_count(&self, count: usize) {
        self.filter_count.fetch_add(count, Ordering::AcqRel);
    }

    pub fn inc_read_skip_count(&self) {
        self.read_skip_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_process_skip_count(&self) {
        self.process_skip_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_write_skip_count(&self) {
        self.write_skip_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_commit_count(&self) {
        self.commit_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_rollback_count(&self) {
        self.rollback_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::Acquire)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Acquire)
    }

    pub fn filter_count(&self) -> usize {
        self.filter_count.load(Ordering::Acquire)
    }

    pub fn read_skip_count(&self) -> usize {
        self.read_skip_count.load(Ordering::Acquire)
    }

    pub fn process_skip_count(&self) -> usize {
        self.process_skip_count.load(Ordering::Acquire)
    }

    pub fn write_skip_count(&self) -> usize {
        self.write_skip_count.load(Ordering::Acquire)
    }

    pub fn commit_count(&self) -> usize {
        self.commit_count.load(Ordering::Acquire)
    }

    pub fn rollback_count(&self) -> usize {
        self.rollback_count.load(Ordering::Acquire)
    }
}

/// Execution record of one step run, filled in by [`Step::execute`].
#[derive(Debug)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Human-readable name for the step
    pub name: String,
    /// Current status of the step execution
    pub status: StepStatus,
    pub start_time: Instant,
    pub end_time: Instant,
    pub duration: Duration,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items successfully written
    pub write_count: usize,
    /// Number of items dropped by the processor
    pub filter_count: usize,
    /// Number of items skipped because of a read fault
    pub read_skip_count: usize,
    /// Number of items skipped because of a process fault
    pub process_skip_count: usize,
    /// Number of items skipped because of a write fault
    pub write_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    /// Fault that failed the step, if any
    pub failure: Option<String>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::Starting,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            failure: None,
        }
    }

    /// Total number of skipped items, whatever the cause.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    fn apply(&mut self, contribution: &StepContribution) {
        self.read_count = contribution.read_count();
        self.write_count = contribution.write_count();
        self.filter_count = contribution.filter_count();
        self.read_skip_count = contribution.read_skip_count();
        self.process_skip_count = contribution.process_skip_count();
        self.write_skip_count = contribution.write_skip_count();
        self.commit_count = contribution.commit_count();
        self.rollback_count = contribution.rollback_count();
    }
}

pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step.
    ///
    /// This method represents the main operation of the step. It coordinates
    /// reading items, processing them, and writing them out.
    ///
    /// # Returns
    /// - `Ok(())`: The step completed, possibly with skipped items
    /// - `Err(BatchError)`: The fatal fault that failed the step
    ///
    /// Either way `step_execution` holds the final status and counters.
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Step reading, processing and writing items chunk by chunk, skipping faulty items.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    transaction_manager: &'a dyn TransactionManager,
    skip_policy: Option<&'a dyn SkipPolicy>,
    skippable_faults: SkippableFaults,
    skip_listener: &'a dyn SkipListener<I, O>,
    /// Number of items to process in each chunk
    commit_interval: usize,
    /// Maximum number of skipped items before failing the step
    skip_limit: usize,
    processor_transactional: bool,
    task_executor: Option<TaskExecutorConfig>,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let start_time = Instant::now();
        step_execution.status = StepStatus::Starting;

        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        let skip_policy: &dyn SkipPolicy = match self.skip_policy {
            Some(skip_policy) => skip_policy,
            None => &self.skippable_faults,
        };
        let skip_counter = SkipCounter::new(self.skip_limit);
        let contribution = StepContribution::default();
        let chunks = ChunkProcessor {
            reader: self.reader,
            processor: self.processor,
            writer: self.writer,
            transaction_manager: self.transaction_manager,
            skip_policy,
            skip_listener: self.skip_listener,
            skip_counter: &skip_counter,
            contribution: &contribution,
            commit_interval: self.commit_interval,
            processor_transactional: self.processor_transactional,
            read_lock: Mutex::new(()),
            exhausted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };

        step_execution.status = StepStatus::Executing;

        let result = match &self.task_executor {
            None => self.run_chunks(&chunks),
            Some(config) => self.run_chunks_concurrently(&chunks, config),
        };

        step_execution.apply(&contribution);
        step_execution.start_time = start_time;
        step_execution.end_time = Instant::now();
        step_execution.duration = start_time.elapsed();

        match &result {
            Ok(()) => step_execution.status = StepStatus::Completed,
            Err(fatal) => {
                error!("Step {} failed: {}", step_execution.name, fatal);
                step_execution.status = StepStatus::Failed;
                step_execution.failure = Some(fatal.to_string());
            }
        }

        info!(
            "End of step: {}, id: {}, status: {:?}, read: {}, write: {}, skip: {}",
            step_execution.name,
            step_execution.id,
            step_execution.status,
            step_execution.read_count,
            step_execution.write_count,
            step_execution.skip_count()
        );

        result
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    pub fn get_commit_interval(&self) -> usize {
        self.commit_interval
    }

    pub fn get_skip_limit(&self) -> usize {
        self.skip_limit
    }

    /// Runs chunks one after the other on the calling thread.
    fn run_chunks(&self, chunks: &ChunkProcessor<'_, I, O>) -> Result<(), BatchError> {
        loop {
            let report = chunks.run_chunk()?;
            debug!(
                "Chunk {:?}: {} items, {} skipped",
                report.state,
                report.outcomes.len(),
                report.skip_count()
            );

            if report.end_of_input {
                return Ok(());
            }
        }
    }

    /// Dispatches one task per chunk to a worker pool.
    ///
    /// Stops dispatching once a task reports end of input or a fatal fault,
    /// then waits for every dispatched task. The first fatal fault wins.
    fn run_chunks_concurrently(
        &self,
        chunks: &ChunkProcessor<'_, I, O>,
        config: &TaskExecutorConfig,
    ) -> Result<(), BatchError> {
        let (result_sender, results) = channel::unbounded::<TaskResult>();

        thread::scope(|scope| {
            let mut executor = ThreadPoolTaskExecutor::new(scope, config.clone())?;
            let mut aggregate = Aggregate::default();

            while !aggregate.is_done() {
                if aggregate.in_flight >= config.throttle_limit {
                    match results.recv() {
                        Ok(result) => aggregate.record(result),
                        Err(_) => break,
                    }
                    continue;
                }

                let result_sender = result_sender.clone();
                let task = Box::new(move || {
                    let result = (!chunks.is_stopped()).then(|| chunks.run_chunk());
                    // The coordinator keeps a receiver until every task reported.
                    let _ = result_sender.send(result);
                });

                if let Err(rejected) = executor.execute(task) {
                    error!("Unable to dispatch chunk: {}", rejected);
                    chunks.stop();
                    aggregate.fail(rejected);
                    break;
                }
                aggregate.in_flight += 1;

                while let Ok(result) = results.try_recv() {
                    aggregate.record(result);
                }
            }

            debug!("Waiting for {} chunk(s) in flight", aggregate.in_flight);
            while aggregate.in_flight > 0 {
                match results.recv() {
                    Ok(result) => aggregate.record(result),
                    Err(_) => break,
                }
            }

            executor.shutdown()?;
            aggregate.finish()
        })
    }
}

/// `None` when the task started after the step was stopped and did nothing.
type TaskResult = Option<Result<ChunkReport, BatchError>>;

#[derive(Default)]
struct Aggregate {
    in_flight: usize,
    end_of_input: bool,
    failure: Option<BatchError>,
}

impl Aggregate {
    fn record(&mut self, result: TaskResult) {
        self.in_flight -= 1;
        match result {
            None => debug!("Chunk task cancelled"),
            Some(Ok(report)) => {
                debug!(
                    "Chunk {:?}: {} items, {} skipped",
                    report.state,
                    report.outcomes.len(),
                    report.skip_count()
                );
                if report.end_of_input {
                    self.end_of_input = true;
                }
            }
            Some(Err(fatal)) => self.fail(fatal),
        }
    }

    fn fail(&mut self, fatal: BatchError) {
        match self.failure {
            None => self.failure = Some(fatal),
            Some(_) => warn!("Another chunk failed: {}", fatal),
        }
    }

    fn is_done(&self) -> bool {
        self.end_of_input || self.failure.is_some()
    }

    fn finish(self) -> Result<(), BatchError> {
        match self.failure {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    /// Name of the step (generated randomly if not specified)
    name: String,
    /// Component responsible for reading items from the source
    reader: Option<&'a dyn ItemReader<I>>,
    /// Component responsible for processing items
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    /// Component responsible for writing items to the destination
    writer: Option<&'a dyn ItemWriter<O>>,
    transaction_manager: &'a dyn TransactionManager,
    skip_policy: Option<&'a dyn SkipPolicy>,
    skippable_faults: SkippableFaults,
    skip_listener: &'a dyn SkipListener<I, O>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    /// Maximum number of skipped items before failing the step
    skip_limit: usize,
    processor_transactional: bool,
    task_executor: Option<TaskExecutorConfig>,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            transaction_manager: &RESOURCELESS,
            skip_policy: None,
            skippable_faults: SkippableFaults::none(),
            skip_listener: &NO_OP_LISTENER,
            chunk_size: 10,
            skip_limit: 0,
            processor_transactional: true,
            task_executor: None,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Marks a fault category as skippable or not.
    ///
    /// Ignored when a custom policy is set with [`skip_policy`](Self::skip_policy).
    pub fn skippable(mut self, category: FaultCategory, skippable: bool) -> Self {
        self.skippable_faults = self.skippable_faults.with(category, skippable);
        self
    }

    pub fn skip_policy(mut self, skip_policy: &'a dyn SkipPolicy) -> Self {
        self.skip_policy = Some(skip_policy);
        self
    }

    pub fn skip_listener(mut self, skip_listener: &'a dyn SkipListener<I, O>) -> Self {
        self.skip_listener = skip_listener;
        self
    }

    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = transaction_manager;
        self
    }

    /// When `false`, a rescan reuses the outputs of the aborted chunk instead
    /// of processing the items again.
    pub fn processor_transactional(mut self, processor_transactional: bool) -> Self {
        self.processor_transactional = processor_transactional;
        self
    }

    /// Processes chunks concurrently on a worker pool.
    pub fn task_executor(mut self, config: TaskExecutorConfig) -> Self {
        self.task_executor = Some(config);
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if let Some(config) = &self.task_executor {
            config.validate()?;
        }

        let reader = self.reader.ok_or_else(|| {
            BatchError::Configuration("reader is required for building a step".to_string())
        })?;
        let processor = self.processor.ok_or_else(|| {
            BatchError::Configuration("processor is required for building a step".to_string())
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Configuration("writer is required for building a step".to_string())
        })?;

        if self.skip_limit > 0 && self.skip_policy.is_none() && self.skippable_faults.is_empty() {
            warn!(
                "Step {} has a skip limit of {} but no skippable fault",
                self.name, self.skip_limit
            );
        }

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            transaction_manager: self.transaction_manager,
            skip_policy: self.skip_policy,
            skippable_faults: self.skippable_faults,
            skip_listener: self.skip_listener,
            commit_interval: self.chunk_size,
            skip_limit: self.skip_limit,
            processor_transactional: self.processor_transactional,
            task_executor: self.task_executor,
        })
    }
}

impl<'a, I: Clone> ChunkOrientedStepBuilder<'a, I, I> {
    /// Uses a processor writing every item unchanged.
    pub fn pass_through(self) -> Self {
        self.processor(&PASS_THROUGH)
    }
}

pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// A step with a random name.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
