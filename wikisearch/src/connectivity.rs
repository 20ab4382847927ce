//! Connectivity signal and the gate that picks the authoritative stream.

use tokio::sync::watch;

use crate::interface::{DisplayState, OfflineBanner, ResultItem, ResultPage, ResultStream, ResultsView, SearchError};

/// Externally driven online/offline flag, observed by the session.
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Publish a new state. Repeating the current value does not wake observers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Which stream the screen shows for a given `(online, query)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Prompt,
    Remote,
    Merged,
}

/// Latest results of each stream for one query generation.
///
/// `None` means nothing has arrived yet for that stream.
#[derive(Debug, Clone, Default)]
pub struct StreamResults {
    pub online: Option<Result<ResultPage, SearchError>>,
    pub offline: Option<Vec<ResultItem>>,
}

pub struct ConnectivityGate;

impl ConnectivityGate {
    pub fn authority(online: bool, query: &str) -> Authority {
        match (online, query.trim().is_empty()) {
            (_, true) => Authority::Prompt,
            (true, false) => Authority::Remote,
            (false, false) => Authority::Merged,
        }
    }

    pub fn banner(online: bool, query: &str) -> OfflineBanner {
        match Self::authority(online, query) {
            _ if online => OfflineBanner::Hidden,
            Authority::Prompt => OfflineBanner::Offline,
            Authority::Remote | Authority::Merged => OfflineBanner::ShowingOfflineResults,
        }
    }

    /// Prefetching downloads content, which only makes sense online.
    pub fn allows_prefetch(online: bool) -> bool {
        online
    }

    /// Build the display state for one generation. Only the authoritative
    /// stream contributes; the other is ignored even when present.
    pub fn decide(online: bool, query: &str, generation: u64, results: &StreamResults) -> DisplayState {
        let view = match Self::authority(online, query) {
            Authority::Prompt => ResultsView::Prompt,
            Authority::Remote => match &results.online {
                None => ResultsView::Loading,
                Some(Err(e)) => ResultsView::Error {
                    message: e.user_message(),
                    retryable: e.is_retryable(),
                },
                Some(Ok(page)) if page.items.is_empty() => ResultsView::NoResults,
                Some(Ok(page)) => ResultsView::Populated {
                    stream: ResultStream::Online { page: page.clone() },
                },
            },
            Authority::Merged => match &results.offline {
                None => ResultsView::Loading,
                Some(items) if items.is_empty() => ResultsView::NoResults,
                Some(items) => ResultsView::Populated {
                    stream: ResultStream::Offline { items: items.clone() },
                },
            },
        };

        DisplayState {
            generation,
            query: query.trim().to_string(),
            online,
            view,
            banner: Self::banner(online, query),
        }
    }
}
