//! Undo journal backing the ledger's transaction boundary.
//!
//! While a transaction is open, every write to ledger state records the value
//! it overwrote. Committing the outermost transaction discards the journal
//! and releases buffered events; rolling back replays the recorded values in
//! reverse down to the checkpoint.
//!
//! Transactions nest. A re-entrant call made from inside a transfer opens an
//! inner checkpoint on the same journal, so rolling back the outer call also
//! undoes everything the inner call did.

use custody_protocol::Address;

use crate::ledger::LedgerEvent;

/// The mutable aggregate counters, journaled as one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Aggregates {
    pub total_deposited: u64,
    pub deposit_count: u64,
    pub withdrawal_count: u64,
}

/// A single undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalEntry {
    /// `account` held `previous` before the write (`None` = no entry existed).
    Balance {
        account: Address,
        previous: Option<u64>,
    },
    /// The aggregates before the write.
    Aggregates(Aggregates),
}

/// Position in the journal and event buffer a transaction can return to.
#[must_use = "a checkpoint must be committed or rolled back"]
#[derive(Debug)]
pub(crate) struct Checkpoint {
    entries: usize,
    events: usize,
    depth: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    depth: usize,
    entries: Vec<JournalEntry>,
    pending: Vec<LedgerEvent>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a (possibly nested) transaction.
    pub fn begin(&mut self) -> Checkpoint {
        self.depth += 1;
        Checkpoint {
            entries: self.entries.len(),
            events: self.pending.len(),
            depth: self.depth,
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Records an undo entry. Writes outside a transaction are not undoable.
    pub fn record(&mut self, entry: JournalEntry) {
        debug_assert!(self.depth > 0, "ledger write outside a transaction");
        if self.depth > 0 {
            self.entries.push(entry);
        }
    }

    /// Buffers an event until the outermost transaction commits.
    pub fn raise(&mut self, event: LedgerEvent) {
        self.pending.push(event);
    }

    /// Closes a transaction. Returns the events to publish when this was the
    /// outermost one, `None` otherwise.
    pub fn commit(&mut self, checkpoint: Checkpoint) -> Option<Vec<LedgerEvent>> {
        debug_assert_eq!(checkpoint.depth, self.depth, "checkpoints closed out of order");
        self.depth -= 1;
        if self.depth == 0 {
            self.entries.clear();
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Closes a transaction and hands back the undo entries recorded since
    /// `checkpoint`, oldest first. Events raised since then are dropped.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> Vec<JournalEntry> {
        debug_assert_eq!(checkpoint.depth, self.depth, "checkpoints closed out of order");
        self.depth -= 1;
        self.pending.truncate(checkpoint.events);
        self.entries.split_off(checkpoint.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit_event(amount: u64) -> LedgerEvent {
        LedgerEvent::Deposit {
            account: Address::repeat_byte(1),
            amount,
        }
    }

    #[test]
    fn outermost_commit_releases_events_in_order() {
        let mut journal = Journal::new();
        let outer = journal.begin();
        journal.raise(deposit_event(1));

        let inner = journal.begin();
        journal.raise(deposit_event(2));
        assert!(journal.commit(inner).is_none());

        let events = journal.commit(outer).unwrap();
        assert_eq!(events, vec![deposit_event(1), deposit_event(2)]);
        assert_eq!(journal.depth(), 0);
    }

    #[test]
    fn rollback_returns_entries_since_checkpoint() {
        let mut journal = Journal::new();
        let outer = journal.begin();
        journal.record(JournalEntry::Aggregates(Aggregates::default()));
        journal.raise(deposit_event(1));

        let inner = journal.begin();
        let account = Address::repeat_byte(2);
        journal.record(JournalEntry::Balance {
            account,
            previous: Some(7),
        });
        journal.raise(deposit_event(2));

        let undone = journal.rollback(inner);
        assert_eq!(
            undone,
            vec![JournalEntry::Balance {
                account,
                previous: Some(7)
            }]
        );

        let events = journal.commit(outer).unwrap();
        assert_eq!(events, vec![deposit_event(1)]);
    }

    #[test]
    fn outer_rollback_undoes_committed_inner_work() {
        let mut journal = Journal::new();
        let outer = journal.begin();

        let inner = journal.begin();
        journal.record(JournalEntry::Aggregates(Aggregates::default()));
        journal.raise(deposit_event(5));
        assert!(journal.commit(inner).is_none());

        let undone = journal.rollback(outer);
        assert_eq!(undone.len(), 1);
        assert_eq!(journal.depth(), 0);

        // Nothing left over for the next transaction.
        let next = journal.begin();
        assert_eq!(journal.commit(next), Some(vec![]));
    }
}
