use std::collections::BTreeMap;

use crate::error::{Error, ErrorCondition, Result};

/// Maps small integer handles (channel numbers, link handles) to objects.
///
/// [`add`](Self::add) allocates the lowest free handle up to `max`;
/// [`insert`](Self::insert) registers a handle chosen by the peer.
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    max: u32,
    entries: BTreeMap<u32, T>,
}

impl<T> HandleTable<T> {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            max,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn max(&self) -> u32 {
        self.max
    }

    pub(crate) fn set_max(&mut self, max: u32) {
        self.max = max;
    }

    /// The lowest free handle.
    pub(crate) fn vacant(&self) -> Result<u32> {
        let mut handle = 0u32;
        for key in self.entries.keys() {
            if *key != handle {
                break;
            }
            handle = handle.saturating_add(1);
        }
        if handle > self.max || self.entries.contains_key(&handle) {
            return Err(Error::amqp(
                ErrorCondition::ResourceLimitExceeded,
                format!("all {} handles are in use", u64::from(self.max) + 1),
            ));
        }
        Ok(handle)
    }

    /// Stores `value` under the lowest free handle and returns it.
    pub(crate) fn add(&mut self, value: T) -> Result<u32> {
        let handle = self.vacant()?;
        self.entries.insert(handle, value);
        Ok(handle)
    }

    /// Stores `value` under `handle`, which must be free and within range.
    pub(crate) fn insert(&mut self, handle: u32, value: T) -> Result<()> {
        if handle > self.max {
            return Err(Error::amqp(
                ErrorCondition::ResourceLimitExceeded,
                format!("handle {handle} exceeds the maximum {}", self.max),
            ));
        }
        if self.entries.contains_key(&handle) {
            return Err(Error::amqp(ErrorCondition::HandleInUse, format!("handle {handle} is in use")));
        }
        self.entries.insert(handle, value);
        Ok(())
    }

    pub(crate) fn get(&self, handle: u32) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub(crate) fn remove(&mut self, handle: u32) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reuses_lowest_free_handle() {
        let mut table = HandleTable::new(3);
        assert_eq!(table.add("a").unwrap(), 0);
        assert_eq!(table.add("b").unwrap(), 1);
        assert_eq!(table.add("c").unwrap(), 2);
        assert_eq!(table.remove(1), Some("b"));
        assert_eq!(table.add("d").unwrap(), 1);
        assert_eq!(table.add("e").unwrap(), 3);

        let err = table.add("f").unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::ResourceLimitExceeded));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let mut table = HandleTable::new(10);
        table.insert(7, 'x').unwrap();
        let err = table.insert(7, 'y').unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::HandleInUse));
        let err = table.insert(11, 'z').unwrap_err();
        assert_eq!(err.condition(), Some(&ErrorCondition::ResourceLimitExceeded));
        assert_eq!(table.get(7), Some(&'x'));
        assert_eq!(table.drain(), vec!['x']);
        assert!(table.is_empty());
    }

    #[test]
    fn full_range_table() {
        let mut table = HandleTable::new(u32::MAX);
        table.insert(u32::MAX, ()).unwrap();
        assert_eq!(table.add(()).unwrap(), 0);
    }
}
