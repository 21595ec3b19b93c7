//! Mocked step components.
use mockall::mock;

use fault_tolerant_batch::{
    BatchError,
    core::{item::ItemWriter, skip::SkipListener},
};

mock! {
    pub Writer {}
    impl ItemWriter<String> for Writer {
        fn write(&self, items: &[String]) -> Result<(), BatchError>;
    }
}

mock! {
    pub Listener {}
    impl SkipListener<String, String> for Listener {
        fn on_skip_in_read(&self, error: &BatchError);
        fn on_skip_in_process(&self, item: &String, error: &BatchError);
        fn on_skip_in_write(&self, item: &String, error: &BatchError);
    }
}
