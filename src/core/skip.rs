use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;

use crate::error::{BatchError, FaultCategory, FaultOrigin};

/// Decides whether a fault raised while handling an item may be skipped.
///
/// Implementations must be pure: the verdict depends only on the fault and its
/// origin, never on the chunk or thread asking.
pub trait SkipPolicy: Sync {
    fn is_skippable(&self, fault: &BatchError, origin: FaultOrigin) -> bool;
}

/// Skip policy built from an explicit `FaultCategory -> skippable` table.
///
/// Lookup order: the exact category of the fault, then the [`FaultCategory::Any`]
/// entry. Categories that match nothing are not skippable. Errors produced by
/// the engine itself (skip limit exceeded, rejected tasks, ...) are never
/// skippable, whatever the table says.
#[derive(Debug, Clone, Default)]
pub struct SkippableFaults {
    classification: HashMap<FaultCategory, bool>,
}

impl SkippableFaults {
    /// A policy that skips nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// A policy that skips every fault raised by the step components.
    pub fn all() -> Self {
        Self::none().with(FaultCategory::Any, true)
    }

    pub fn with(mut self, category: FaultCategory, skippable: bool) -> Self {
        self.classification.insert(category, skippable);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.classification.is_empty()
    }

    fn classify(&self, category: FaultCategory) -> bool {
        if matches!(
            category,
            FaultCategory::SkipLimitExceeded
                | FaultCategory::NonSkippable
                | FaultCategory::TaskRejected
                | FaultCategory::Configuration
                | FaultCategory::Step
        ) {
            return false;
        }

        self.classification
            .get(&category)
            .or_else(|| self.classification.get(&FaultCategory::Any))
            .copied()
            .unwrap_or(false)
    }
}

impl SkipPolicy for SkippableFaults {
    fn is_skippable(&self, fault: &BatchError, _origin: FaultOrigin) -> bool {
        self.classify(fault.category())
    }
}

/// Step-wide skip budget shared by every worker.
#[derive(Debug)]
pub struct SkipCounter {
    limit: usize,
    count: AtomicUsize,
}

impl SkipCounter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: AtomicUsize::new(0),
        }
    }

    /// Registers one skip if the budget allows it.
    ///
    /// Returns `false`, leaving the count untouched, when one more skip would
    /// exceed the limit. Two workers racing for the last slot cannot both win.
    pub fn try_register_skip(&self) -> bool {
        let registered = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.limit).then_some(count + 1)
            })
            .is_ok();

        if !registered {
            debug!("Skip refused, limit {} reached", self.limit);
        }
        registered
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Callbacks invoked once an item has been skipped and its transaction rolled back.
pub trait SkipListener<I, O>: Sync {
    fn on_skip_in_read(&self, _error: &BatchError) {}

    fn on_skip_in_process(&self, _item: &I, _error: &BatchError) {}

    fn on_skip_in_write(&self, _item: &O, _error: &BatchError) {}
}

/// Listener used when none is configured.
#[derive(Default)]
pub struct NoOpSkipListener;

impl<I, O> SkipListener<I, O> for NoOpSkipListener {}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn unknown_category_is_not_skippable() {
        let policy = SkippableFaults::none().with(FaultCategory::ItemWriter, true);

        let write_fault = BatchError::ItemWriter("Planned failure".to_string());
        let read_fault = BatchError::ItemReader("bad line".to_string());

        assert!(policy.is_skippable(&write_fault, FaultOrigin::Write));
        assert!(!policy.is_skippable(&read_fault, FaultOrigin::Read));
    }

    #[test]
    fn exact_entry_wins_over_wildcard() {
        let policy = SkippableFaults::all().with(FaultCategory::Io, false);

        let io_fault: BatchError = std::io::Error::other("disk full").into();
        let parse_fault = BatchError::Parse("not a number".to_string());

        assert!(!policy.is_skippable(&io_fault, FaultOrigin::Write));
        assert!(policy.is_skippable(&parse_fault, FaultOrigin::Read));
    }

    #[test]
    fn engine_errors_are_never_skippable() {
        let policy = SkippableFaults::all();
        let error = BatchError::TaskRejected("queue full".to_string());

        assert!(!policy.is_skippable(&error, FaultOrigin::Write));
    }

    #[test]
    fn classification_is_stable() {
        let policy = SkippableFaults::none().with(FaultCategory::ItemProcessor, true);
        let fault = BatchError::ItemProcessor("boom".to_string());

        let first = policy.is_skippable(&fault, FaultOrigin::Process);
        let second = policy.is_skippable(&fault, FaultOrigin::Process);

        assert_eq!(first, second);
    }

    #[test]
    fn zero_limit_refuses_every_skip() {
        let counter = SkipCounter::new(0);

        assert!(!counter.try_register_skip());
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn counter_stops_at_limit() {
        let counter = SkipCounter::new(2);

        assert!(counter.try_register_skip());
        assert!(counter.try_register_skip());
        assert!(!counter.try_register_skip());
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn racing_workers_never_exceed_limit() {
        let counter = Arc::new(SkipCounter::new(50));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..100).filter(|_| counter.try_register_skip()).count())
            })
            .collect();

        let granted: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();

        assert_eq!(granted, 50);
        assert_eq!(counter.count(), 50);
    }
}
