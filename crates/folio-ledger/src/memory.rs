//! In-memory ledger for tests and dry runs.
//!
//! Streams live in a sharded map, so appends to different keys do not
//! contend.

use dashmap::DashMap;
use tracing::debug;

use crate::event::LedgerEvent;
use crate::ledger::{Ledger, LedgerError, LedgerKey, check_key};

#[derive(Debug, Default)]
pub struct MemoryLedger {
    streams: DashMap<LedgerKey, Vec<LedgerEvent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events across every stream.
    pub fn len(&self) -> usize {
        self.streams.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ledger for MemoryLedger {
    fn append(&self, key: &LedgerKey, event: LedgerEvent) -> Result<(), LedgerError> {
        check_key(key, &event)?;
        debug!(key = %key, action = event.action.as_str(), "ledger append");
        self.streams.entry(key.clone()).or_default().push(event);
        Ok(())
    }

    fn history(&self, key: &LedgerKey) -> Result<Vec<LedgerEvent>, LedgerError> {
        Ok(self
            .streams
            .get(key)
            .map(|events| events.value().clone())
            .unwrap_or_default())
    }

    fn page_keys(&self, unit_id: &str) -> Result<Vec<LedgerKey>, LedgerError> {
        let mut keys: Vec<LedgerKey> = self
            .streams
            .iter()
            .filter(|entry| matches!(entry.key(), LedgerKey::Page(unit, _) if unit == unit_id))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn units(&self) -> Result<Vec<String>, LedgerError> {
        let mut units: Vec<String> = self
            .streams
            .iter()
            .filter_map(|entry| match entry.key() {
                LedgerKey::Unit(unit) => Some(unit.clone()),
                _ => None,
            })
            .collect();
        units.sort();
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LedgerAction, ORCHESTRATOR_ACTOR};
    use folio_kernel::verdict::Verdict;
    use std::sync::Arc;

    fn finalized(unit: &str, page: u32) -> LedgerEvent {
        LedgerEvent::new(
            "run-1",
            unit,
            ORCHESTRATOR_ACTOR,
            LedgerAction::PageFinalized {
                page,
                verdict: Verdict::Pass,
            },
        )
    }

    #[test]
    fn page_keys_are_scoped_and_sorted() {
        let ledger = MemoryLedger::new();
        for (unit, page) in [("u1", 3), ("u2", 1), ("u1", 1), ("u1", 2)] {
            ledger.record(finalized(unit, page)).expect("append");
        }
        let keys = ledger.page_keys("u1").expect("keys");
        let pages: Vec<u32> = keys
            .iter()
            .filter_map(|k| match k {
                LedgerKey::Page(_, page) => Some(*page),
                _ => None,
            })
            .collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn concurrent_appends_on_distinct_keys() {
        let ledger = Arc::new(MemoryLedger::new());
        let handles: Vec<_> = (1..=16)
            .map(|page| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.record(finalized("u1", page)))
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread").expect("append");
        }
        assert_eq!(ledger.page_keys("u1").expect("keys").len(), 16);
    }
}
