use fault_tolerant_batch::{
    BatchError, FaultCategory,
    core::{
        executor::TaskExecutorConfig,
        item::{ItemProcessor, ItemProcessorResult},
        step::{Step, StepBuilder, StepExecution},
    },
    item::{
        list::ListItemReader,
        logger::{LoggerSkipListener, LoggerWriter},
    },
};

/// Parses each line as an amount; lines that are not numbers are skipped.
struct ParseAmount;

impl ItemProcessor<String, u64> for ParseAmount {
    fn process(&self, item: &String) -> ItemProcessorResult<u64> {
        let amount = item
            .trim()
            .parse::<u64>()
            .map_err(|error| BatchError::Parse(format!("{}: {}", item, error)))?;

        // zero amounts carry no information
        Ok((amount > 0).then_some(amount))
    }
}

fn main() -> Result<(), BatchError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let lines = ["120", "7", "abc", "0", "42", "13x", "99", "1", "5", "64"];
    let reader: ListItemReader<String> = lines.iter().map(|l| l.to_string()).collect();
    let processor = ParseAmount;
    let writer = LoggerWriter;
    let listener = LoggerSkipListener;

    let step = StepBuilder::new("parse-amounts")
        .chunk(3)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .skip_listener(&listener)
        .skippable(FaultCategory::Parse, true)
        .skip_limit(2)
        .task_executor(TaskExecutorConfig {
            core_pool_size: 2,
            max_pool_size: 4,
            ..Default::default()
        })
        .build()?;

    let mut step_execution = StepExecution::new(step.get_name());
    step.execute(&mut step_execution)?;

    println!(
        "status: {:?}, read: {}, written: {}, filtered: {}, skipped: {}",
        step_execution.status,
        step_execution.read_count,
        step_execution.write_count,
        step_execution.filter_count,
        step_execution.skip_count()
    );

    Ok(())
}
