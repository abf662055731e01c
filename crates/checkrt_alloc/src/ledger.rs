//! # ledger
//! Maps every live, budget-tracked block to the number of bytes it was
//! charged. Only peak mode keeps a ledger; it is what lets `free` and
//! `realloc` know how much headroom to give back.
use ahash::RandomState;
use hashbrown::{HashMap, TryReserveError};

use crate::backend::LibcAlloc;

type Map = HashMap<usize, usize, RandomState, LibcAlloc>;

/// Address -> charged size.
///
/// The table is created on first insert, so an empty ledger costs nothing
/// and [`Ledger::new`] can be `const`.
#[derive(Debug, Default)]
pub struct Ledger {
    map: Option<Map>,
}

impl Ledger {
    /// An empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self { map: None }
    }

    /// Records that `addr` was charged `size` bytes.
    ///
    /// Replaces any stale entry at the same address, so an address never
    /// appears twice. Fails only if the table itself cannot grow.
    pub fn insert(&mut self, addr: usize, size: usize) -> Result<(), TryReserveError> {
        let map = self
            .map
            .get_or_insert_with(|| HashMap::with_hasher_in(RandomState::with_seeds(0, 0, 0, 0), LibcAlloc));
        map.try_reserve(1)?;
        map.insert(addr, size);
        Ok(())
    }

    /// The size charged to `addr`, if it is tracked.
    #[must_use]
    pub fn get(&self, addr: usize) -> Option<usize> {
        self.map.as_ref()?.get(&addr).copied()
    }

    /// Forgets `addr` and returns what it was charged.
    pub fn remove(&mut self, addr: usize) -> Option<usize> {
        self.map.as_mut()?.remove(&addr)
    }

    /// Forgets everything. The blocks themselves are untouched.
    pub fn clear(&mut self) {
        if let Some(map) = self.map.as_mut() {
            map.clear();
        }
    }

    /// Number of tracked blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, HashMap::len)
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all tracked sizes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.map
            .as_ref()
            .map_or(0, |map| map.values().copied().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::Ledger;

    #[test]
    fn test_insert_get_remove() {
        let mut ledger = Ledger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.remove(0x1000), None);

        ledger.insert(0x1000, 4).unwrap();
        ledger.insert(0x2000, 6).unwrap();
        assert_eq!(ledger.get(0x1000), Some(4));
        assert_eq!(ledger.total(), 10);

        assert_eq!(ledger.remove(0x1000), Some(4));
        assert_eq!(ledger.get(0x1000), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_same_address_replaces() {
        let mut ledger = Ledger::new();
        ledger.insert(0x1000, 4).unwrap();
        ledger.insert(0x1000, 9).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(0x1000), Some(9));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut ledger = Ledger::new();
        for addr in 1..=100 {
            ledger.insert(addr * 16, addr).unwrap();
        }
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.total(), 0);
    }
}
