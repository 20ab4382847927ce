//! Query Coordinator
//!
//! Single owner of the current query. Every accepted change gets a new
//! generation id and a fresh cancellation token; the previous token is
//! cancelled on the spot, so all work keyed to the old query stops and any
//! late result can be recognised by its stale generation.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The current query together with its generation.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub generation: u64,
    /// Trimmed query text; empty means no active search.
    pub text: String,
    /// Cancelled as soon as a newer query is accepted.
    pub token: CancellationToken,
}

impl QuerySnapshot {
    fn initial() -> Self {
        Self { generation: 0, text: String::new(), token: CancellationToken::new() }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

pub struct QueryCoordinator {
    tx: watch::Sender<QuerySnapshot>,
}

impl Default for QueryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(QuerySnapshot::initial());
        Self { tx }
    }

    /// Trim and store `query`. Returns false when the trimmed text is
    /// unchanged, in which case nothing is invalidated.
    pub fn submit(&self, query: &str) -> bool {
        let trimmed = query.trim();
        self.replace(|current| (current.text != trimmed).then(|| trimmed.to_string()))
    }

    /// Start a new generation for the same text, e.g. after a failed load.
    pub fn resubmit(&self) -> QuerySnapshot {
        self.replace(|current| Some(current.text.clone()));
        self.current()
    }

    fn replace(&self, next_text: impl FnOnce(&QuerySnapshot) -> Option<String>) -> bool {
        let mut superseded = None;
        let changed = self.tx.send_if_modified(|current| match next_text(current) {
            Some(text) => {
                let next = QuerySnapshot {
                    generation: current.generation + 1,
                    text,
                    token: CancellationToken::new(),
                };
                superseded = Some(std::mem::replace(current, next));
                true
            }
            None => false,
        });
        if let Some(old) = superseded {
            old.token.cancel();
        }
        changed
    }

    pub fn current(&self) -> QuerySnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.tx.borrow().generation == generation
    }

    pub fn subscribe(&self, debounce: Duration) -> QuerySubscription {
        QuerySubscription {
            rx: self.tx.subscribe(),
            window: debounce,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// The query changed; emitted immediately.
    Changed(QuerySnapshot),
    /// A non-blank query has been stable for the debounce window.
    Settled(QuerySnapshot),
}

/// Debounced view of the coordinator's query. `next` is cancel-safe, so it
/// can sit in a `select!` loop next to other event sources.
pub struct QuerySubscription {
    rx: watch::Receiver<QuerySnapshot>,
    window: Duration,
    deadline: Option<Instant>,
}

impl QuerySubscription {
    /// Next event, or `None` once the coordinator is dropped.
    pub async fn next(&mut self) -> Option<QueryEvent> {
        let deadline = self.deadline;
        tokio::select! {
            changed = self.rx.changed() => {
                changed.ok()?;
                let snapshot = self.rx.borrow_and_update().clone();
                // Blank clears at once; there is nothing to debounce
                self.deadline = (!snapshot.is_blank()).then(|| Instant::now() + self.window);
                Some(QueryEvent::Changed(snapshot))
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                self.deadline = None;
                Some(QueryEvent::Settled(self.rx.borrow().clone()))
            }
        }
    }
}
