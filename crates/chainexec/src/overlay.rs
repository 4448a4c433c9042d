use std::collections::HashMap;

use opnet_primitives::{ContractAddress, StoragePointer, StorageValue};

type SlotKey = (ContractAddress, StoragePointer);

/// Journaled write overlay shared by every frame of one transaction.
///
/// Writes land here only; the block processor promotes the surviving
/// entries into the snapshot after a successful top-level frame. Child
/// frames take a checkpoint before running and roll back to it when they
/// revert, which undoes their writes without touching the parent's.
#[derive(Debug, Default)]
pub struct StorageOverlay {
    entries: HashMap<SlotKey, StorageValue>,
    journal: Vec<JournalEntry>,
}

#[derive(Debug)]
struct JournalEntry {
    key: SlotKey,
    prev: Option<StorageValue>,
}

impl StorageOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contract: &ContractAddress, pointer: &StoragePointer) -> Option<StorageValue> {
        self.entries.get(&(*contract, *pointer)).copied()
    }

    /// Whether the overlay has ever seen this slot (used for the
    /// new-entry storage cost decision).
    pub fn contains(&self, contract: &ContractAddress, pointer: &StoragePointer) -> bool {
        self.entries.contains_key(&(*contract, *pointer))
    }

    pub fn write(
        &mut self,
        contract: ContractAddress,
        pointer: StoragePointer,
        value: StorageValue,
    ) {
        let key = (contract, pointer);
        let prev = self.entries.insert(key, value);
        self.journal.push(JournalEntry { key, prev });
    }

    /// Marks the current journal position.
    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Rolls back every write made after `checkpoint`, newest first.
    pub fn rollback_to(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            let entry = self.journal.pop().expect("length just checked");
            match entry.prev {
                Some(prev) => {
                    self.entries.insert(entry.key, prev);
                }
                None => {
                    self.entries.remove(&entry.key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains the surviving writes for promotion into the snapshot.
    pub fn into_deltas(self) -> HashMap<SlotKey, StorageValue> {
        self.entries
    }

    /// Borrow of the surviving writes.
    pub fn deltas(&self) -> &HashMap<SlotKey, StorageValue> {
        &self.entries
    }
}
