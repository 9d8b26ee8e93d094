//! Ledger appends off the async workers.
//!
//! A JSONL append takes a file lock with backoff, writes and fsyncs. It runs
//! on tokio's blocking pool so page workers sharing a runtime thread keep
//! making progress while one of them waits on the disk.

use folio_ledger::{Ledger, LedgerEvent};
use std::sync::Arc;

use crate::error::GateError;

pub(crate) async fn append_event(ledger: &Arc<dyn Ledger>, event: LedgerEvent) -> Result<(), GateError> {
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || ledger.record(event))
        .await
        .map_err(|err| GateError::Worker(err.to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_kernel::record::UnitState;
    use folio_ledger::{
        LedgerAction, LedgerError, LedgerKey, MemoryLedger, ORCHESTRATOR_ACTOR,
    };
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    /// Remembers which thread every append ran on.
    struct ThreadTracking {
        inner: MemoryLedger,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl Ledger for ThreadTracking {
        fn append(&self, key: &LedgerKey, event: LedgerEvent) -> Result<(), LedgerError> {
            self.threads.lock().expect("threads lock").push(thread::current().id());
            self.inner.append(key, event)
        }

        fn history(&self, key: &LedgerKey) -> Result<Vec<LedgerEvent>, LedgerError> {
            self.inner.history(key)
        }

        fn page_keys(&self, unit_id: &str) -> Result<Vec<LedgerKey>, LedgerError> {
            self.inner.page_keys(unit_id)
        }

        fn units(&self) -> Result<Vec<String>, LedgerError> {
            self.inner.units()
        }
    }

    #[tokio::test]
    async fn append_runs_off_the_runtime_thread() {
        let tracking = Arc::new(ThreadTracking {
            inner: MemoryLedger::new(),
            threads: Mutex::new(Vec::new()),
        });
        let ledger: Arc<dyn Ledger> = tracking.clone();
        let event = LedgerEvent::new(
            "run-1",
            "u1",
            ORCHESTRATOR_ACTOR,
            LedgerAction::UnitStateChanged {
                from: UnitState::ExtractionReady,
                to: UnitState::PerPageVerification,
            },
        );
        append_event(&ledger, event).await.expect("append");

        let threads = tracking.threads.lock().expect("threads lock");
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
        assert_eq!(tracking.inner.len(), 1);
    }
}
