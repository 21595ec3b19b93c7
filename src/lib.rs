#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Fault-tolerant batch steps

 A chunk-oriented step pulls items from an [`ItemReader`](core::item::ItemReader),
 transforms them with an [`ItemProcessor`](core::item::ItemProcessor) and hands
 them, one chunk at a time, to an [`ItemWriter`](core::item::ItemWriter) inside a
 single transaction.

 Unlike a plain batch loop, a step survives item-level failures: when a chunk
 fails, its transaction is rolled back and the chunk is rescanned one item at a
 time, each item in its own transaction. Items whose fault is skippable are left
 out and counted; every other item still commits. Once the configured skip limit
 is exhausted, the next skippable fault fails the step.

 ## Core Concepts

- **Step:** reads, processes and writes items chunk by chunk. See [`core::step`].
- **Chunk:** the items committed together, at most `chunk_size` of them. See [`core::chunk`].
- **Skip policy:** decides which faults may be skipped. See [`core::skip`].
- **Skip limit:** the number of items a step may skip, shared by all its workers.
- **Task executor:** a bounded worker pool running chunks concurrently. See [`core::executor`].
- **Transaction manager:** the boundary around a chunk or a single rescanned item.
  See [`core::transaction`].

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| logger        | Enables a logger `ItemWriter` and `SkipListener`, useful for debugging purposes |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use fault_tolerant_batch::{
#     core::{
#         item::{ItemWriter, ItemWriterResult},
#         step::{Step, StepBuilder, StepExecution, StepStatus},
#     },
#     error::{BatchError, FaultCategory},
#     item::list::ListItemReader,
# };
struct RejectOdd;

impl ItemWriter<u32> for RejectOdd {
    fn write(&self, items: &[u32]) -> ItemWriterResult {
        match items.iter().find(|item| *item % 2 == 1) {
            Some(item) => Err(BatchError::ItemWriter(format!("odd item {}", item))),
            None => Ok(()),
        }
    }
}

fn main() -> Result<(), BatchError> {
    let reader: ListItemReader<u32> = (1..=6).collect();
    let writer = RejectOdd;

    let step = StepBuilder::new("even-numbers")
        .chunk(2) // set commit interval
        .reader(&reader)
        .pass_through()
        .writer(&writer)
        .skippable(FaultCategory::ItemWriter, true)
        .skip_limit(3) // set fault tolerance
        .build()?;

    let mut step_execution = StepExecution::new(step.get_name());
    step.execute(&mut step_execution)?;

    assert_eq!(step_execution.status, StepStatus::Completed);
    assert_eq!(step_execution.write_count, 3);
    assert_eq!(step_execution.skip_count(), 3);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Ready-made readers and writers
pub mod item;
