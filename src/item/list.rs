use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::item::{ItemReader, ItemReaderResult};

/// Reads the items of an in-memory list, in order, then reports end of input.
///
/// Safe to share between the workers of a multi-threaded step.
///
/// ```
/// use fault_tolerant_batch::core::item::ItemReader;
/// use fault_tolerant_batch::item::list::ListItemReader;
///
/// let reader = ListItemReader::new(vec!["1", "2"]);
///
/// assert_eq!(reader.read().unwrap(), Some("1"));
/// assert_eq!(reader.read().unwrap(), Some("2"));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct ListItemReader<I> {
    items: Mutex<VecDeque<I>>,
}

impl<I> ListItemReader<I> {
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }

    /// Number of items not read yet.
    pub fn remaining(&self) -> usize {
        self.items.lock().len()
    }
}

impl<I> FromIterator<I> for ListItemReader<I> {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<I: Send> ItemReader<I> for ListItemReader<I> {
    fn read(&self) -> ItemReaderResult<I> {
        Ok(self.items.lock().pop_front())
    }
}
