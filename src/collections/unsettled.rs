use std::collections::BTreeMap;

/// Unsettled deliveries of one session direction, ordered by delivery-id.
///
/// Delivery-ids are 32-bit serial numbers: a range `[first, last]` with
/// `last < first` wraps through `u32::MAX`, and its entries are visited from
/// `first` upwards, then from zero.
#[derive(Debug)]
pub(crate) struct UnsettledMap<T> {
    entries: BTreeMap<u32, T>,
}

impl<T> UnsettledMap<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: u32, value: T) -> Option<T> {
        self.entries.insert(id, value)
    }

    pub(crate) fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids present in `[first, last]`, in serial order.
    pub(crate) fn ids_in(&self, first: u32, last: u32) -> Vec<u32> {
        if first <= last {
            self.entries.range(first..=last).map(|(k, _)| *k).collect()
        } else {
            self.entries
                .range(first..)
                .chain(self.entries.range(..=last))
                .map(|(k, _)| *k)
                .collect()
        }
    }

    /// Removes and returns the entries in `[first, last]`, in serial order.
    pub(crate) fn remove_range(&mut self, first: u32, last: u32) -> Vec<(u32, T)> {
        self.ids_in(first, last)
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|v| (id, v)))
            .collect()
    }

    /// Removes and returns the entries matching `f`.
    pub(crate) fn remove_where<F: FnMut(&T) -> bool>(&mut self, mut f: F) -> Vec<(u32, T)> {
        let ids: Vec<u32> = self.entries.iter().filter(|(_, v)| f(v)).map(|(k, _)| *k).collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|v| (id, v)))
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<(u32, T)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}

impl<T> Default for UnsettledMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_range() {
        let mut map = UnsettledMap::new();
        for id in [3, 5, 6, 7, 9] {
            map.insert(id, id * 10);
        }
        assert_eq!(map.ids_in(5, 7), vec![5, 6, 7]);
        assert_eq!(map.remove_range(4, 8), vec![(5, 50), (6, 60), (7, 70)]);
        assert_eq!(map.len(), 2);
        assert!(map.remove_range(5, 7).is_empty());
    }

    #[test]
    fn wrapping_range_is_serial_ordered() {
        let mut map = UnsettledMap::new();
        for id in [u32::MAX - 1, u32::MAX, 0, 1, 100] {
            map.insert(id, ());
        }
        assert_eq!(map.ids_in(u32::MAX - 1, 1), vec![u32::MAX - 1, u32::MAX, 0, 1]);
        let removed: Vec<u32> = map.remove_range(u32::MAX, 0).into_iter().map(|(id, _)| id).collect();
        assert_eq!(removed, vec![u32::MAX, 0]);
        assert_eq!(map.len(), 3);
        assert!(map.get(100).is_some());
    }

    #[test]
    fn remove_where_filters() {
        let mut map = UnsettledMap::new();
        for id in 0..6u32 {
            map.insert(id, id % 2 == 0);
        }
        let removed: Vec<u32> = map.remove_where(|even| *even).into_iter().map(|(id, _)| id).collect();
        assert_eq!(removed, vec![0, 2, 4]);
        assert_eq!(map.ids_in(0, 10), vec![1, 3, 5]);
    }
}
