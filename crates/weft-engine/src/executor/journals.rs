use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use weft_journal::{IgnoreLock as _, Journal, NodeData};

/// Reusable worker journals
///
/// Journals are checked out by a worker for one task and come back reset, so
/// the number of journals stays fixed once every worker has run a task. Every
/// pooled journal is isolated: it keeps the nodes its task touched claimed
/// until the barrier splices it or the worker unwinds it.
#[derive(Debug)]
pub struct JournalPool<V> {
    idle: Mutex<Vec<Journal<V>>>,
    created: AtomicUsize,
}

impl<V: NodeData> JournalPool<V> {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Top the pool up to `count` idle journals.
    pub fn preallocate(&self, count: usize) {
        let mut idle = self.idle.lock_ignore_poison();
        while idle.len() < count {
            let mut journal = Journal::isolated();
            journal.reset();
            idle.push(journal);
            self.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take an idle journal (or create one) bound to the calling thread.
    pub fn checkout(&self) -> Journal<V> {
        let reused = self.idle.lock_ignore_poison().pop();
        let mut journal = reused.unwrap_or_else(|| {
            let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(total, "journal pool empty, creating a journal");
            Journal::isolated()
        });
        journal.bind_to_current_thread();
        journal
    }

    /// Reset a journal and make it available again.
    pub fn restore(&self, mut journal: Journal<V>) {
        journal.reset();
        self.idle.lock_ignore_poison().push(journal);
    }

    /// Journals currently idle.
    pub fn available(&self) -> usize {
        self.idle.lock_ignore_poison().len()
    }

    /// Journals created over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<V: NodeData> Default for JournalPool<V> {
    fn default() -> Self {
        Self::new()
    }
}
