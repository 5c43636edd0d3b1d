use std::collections::HashSet;

use tracing::{info, warn};

use crate::record::RecordKey;
use crate::store::RecordStore;

/// Keys already durably persisted. Grows only after a successful write.
#[derive(Debug, Default)]
pub struct Ledger {
    keys: HashSet<RecordKey>,
}

impl Ledger {
    /// Loads the keys of the store. An unreadable store leaves the ledger empty.
    pub fn load(store: &dyn RecordStore) -> Self {
        match store.load_existing_keys() {
            Ok(keys) => {
                info!(count = keys.len(), "records already in the store");
                Self { keys }
            }
            Err(e) => {
                warn!(error = %e, "couldn't load the existing store, starting with an empty ledger");
                Self::default()
            }
        }
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }

    pub fn add(&mut self, key: RecordKey) {
        self.keys.insert(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::{Error, Result};

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn load_existing_keys(&self) -> Result<HashSet<RecordKey>> {
            Err(Error::Store("corrupt".into()))
        }

        fn append_batch(&self, _records: &[Record]) -> Result<()> {
            Ok(())
        }
    }

    struct FixedStore;

    impl RecordStore for FixedStore {
        fn load_existing_keys(&self) -> Result<HashSet<RecordKey>> {
            Ok(HashSet::from([RecordKey::new("2025 T 1")]))
        }

        fn append_batch(&self, _records: &[Record]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_broken_store_gives_empty_ledger() {
        assert!(Ledger::load(&BrokenStore).is_empty());
    }

    #[test]
    fn test_load_and_add() {
        let mut ledger = Ledger::load(&FixedStore);
        assert!(ledger.contains(&RecordKey::new("2025 T 1")));
        assert!(!ledger.contains(&RecordKey::new("2025 T 2")));

        ledger.add(RecordKey::new("2025 T 2"));
        ledger.add(RecordKey::new("2025 T 2"));
        assert!(ledger.contains(&RecordKey::new("2025 T 2")));
        assert_eq!(ledger.len(), 2);
    }
}
