use std::thread::{Scope, ScopedJoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// What to do with a task when every worker is busy and the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Wait until a worker takes the task.
    #[default]
    Block,
    /// Refuse the task with [`BatchError::TaskRejected`].
    Abort,
}

/// Sizing of the worker pool running the chunks of a multi-threaded step.
///
/// ```
/// use fault_tolerant_batch::core::executor::{RejectionPolicy, TaskExecutorConfig};
///
/// let config: TaskExecutorConfig = serde_json::from_str(
///     r#"{ "core_pool_size": 3, "max_pool_size": 6, "queue_capacity": 0 }"#,
/// ).unwrap();
///
/// assert_eq!(config.throttle_limit, 4);
/// assert_eq!(config.rejection_policy, RejectionPolicy::Block);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskExecutorConfig {
    /// Workers started before anything is queued.
    pub core_pool_size: usize,
    /// Upper bound on workers, reached only when the queue is full.
    pub max_pool_size: usize,
    /// Tasks waiting for a worker. 0 hands each task directly to an idle worker.
    pub queue_capacity: usize,
    /// Chunks the step keeps in flight at once.
    pub throttle_limit: usize,
    pub rejection_policy: RejectionPolicy,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size: 4,
            queue_capacity: 0,
            throttle_limit: 4,
            rejection_policy: RejectionPolicy::Block,
        }
    }
}

impl TaskExecutorConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.core_pool_size == 0 {
            return Err(BatchError::Configuration(
                "core pool size must be greater than 0".to_string(),
            ));
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(BatchError::Configuration(format!(
                "max pool size {} is lower than core pool size {}",
                self.max_pool_size, self.core_pool_size
            )));
        }
        if self.throttle_limit == 0 {
            return Err(BatchError::Configuration(
                "throttle limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub type Task<'scope> = Box<dyn FnOnce() + Send + 'scope>;

/// Bounded pool of scoped worker threads.
///
/// Submission follows the usual thread pool executor rules: start a worker
/// while below the core size, otherwise queue the task, otherwise start a
/// worker while below the max size, otherwise apply the rejection policy.
/// Workers live until [`shutdown`](Self::shutdown) and never outlive the scope.
pub struct ThreadPoolTaskExecutor<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    config: TaskExecutorConfig,
    sender: Option<Sender<Task<'scope>>>,
    receiver: Receiver<Task<'scope>>,
    workers: Vec<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope, 'env> ThreadPoolTaskExecutor<'scope, 'env> {
    pub fn new(
        scope: &'scope Scope<'scope, 'env>,
        config: TaskExecutorConfig,
    ) -> Result<Self, BatchError> {
        config.validate()?;
        let (sender, receiver) = channel::bounded(config.queue_capacity);

        Ok(Self {
            scope,
            config,
            sender: Some(sender),
            receiver,
            workers: Vec::new(),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute(&mut self, task: Task<'scope>) -> Result<(), BatchError> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| BatchError::TaskRejected("executor is shut down".to_string()))?;

        if self.pool_size() < self.config.core_pool_size {
            self.spawn_worker(task);
            return Ok(());
        }

        let task = match sender.try_send(task) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(task)) => task,
            Err(TrySendError::Disconnected(_)) => {
                return Err(BatchError::TaskRejected("no worker left".to_string()));
            }
        };

        if self.pool_size() < self.config.max_pool_size {
            self.spawn_worker(task);
            return Ok(());
        }

        match self.config.rejection_policy {
            RejectionPolicy::Block => {
                debug!("All {} workers busy, waiting", self.pool_size());
                sender
                    .send(task)
                    .map_err(|_| BatchError::TaskRejected("no worker left".to_string()))
            }
            RejectionPolicy::Abort => {
                warn!(
                    "Task rejected: {} workers busy and queue of {} full",
                    self.pool_size(),
                    self.config.queue_capacity
                );
                Err(BatchError::TaskRejected(format!(
                    "{} workers busy and queue of {} full",
                    self.pool_size(),
                    self.config.queue_capacity
                )))
            }
        }
    }

    /// Closes the queue and waits for every worker to drain it and stop.
    pub fn shutdown(mut self) -> Result<(), BatchError> {
        self.sender = None;

        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                panicked += 1;
            }
        }

        if panicked > 0 {
            return Err(BatchError::Step(format!("{} worker(s) panicked", panicked)));
        }
        Ok(())
    }

    fn spawn_worker(&mut self, first_task: Task<'scope>) {
        let receiver = self.receiver.clone();
        let worker = self.workers.len() + 1;
        debug!("Starting worker {}", worker);

        let handle = self.scope.spawn(move || {
            first_task();
            while let Ok(task) = receiver.recv() {
                task();
            }
            debug!("Worker {} stopped", worker);
        });
        self.workers.push(handle);
    }
}
