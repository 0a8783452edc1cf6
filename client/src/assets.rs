//! Collaborator seam for model/texture downloads. The core only ever hands
//! over a URL it found in an entity record and later observes a completion;
//! the actual HTTP-fetch-and-cache machinery lives outside this crate.
//!
//! The interface is deliberately forgiving: a completion may never arrive
//! (the URL stays pending and the caller keeps rendering a fallback), and
//! it may arrive more than once for the same URL (last value wins).

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchState {
    Pending,
    Ready(String),
    Failed(String),
}

struct Completion {
    url: String,
    success: bool,
    path_or_error: String,
}

/// Handle a fetcher uses to report completions. Cloneable and callable from
/// any thread; completions are applied on the poll thread via
/// [`AssetCache::apply_completions`].
#[derive(Clone)]
pub struct CompletionSink {
    completions: Arc<Mutex<Vec<Completion>>>,
}

impl CompletionSink {
    pub fn complete(&self, url: &str, success: bool, path_or_error: impl Into<String>) {
        let mut completions = self
            .completions
            .lock()
            .expect("no code panics while holding the completion lock");
        completions.push(Completion {
            url: url.to_owned(),
            success,
            path_or_error: path_or_error.into(),
        });
    }
}

/// Downloads a URL to local storage, eventually. Implementations must
/// tolerate being handed the same URL repeatedly.
pub trait AssetFetcher: Send {
    fn request(&mut self, url: &str, sink: CompletionSink);
}

/// Fetcher that never completes anything; every URL stays pending.
pub struct NoopFetcher;

impl AssetFetcher for NoopFetcher {
    fn request(&mut self, _url: &str, _sink: CompletionSink) {}
}

pub struct AssetCache {
    states: FxHashMap<String, FetchState>,
    completions: Arc<Mutex<Vec<Completion>>>,
}

impl AssetCache {
    pub fn new() -> AssetCache {
        AssetCache {
            states: FxHashMap::default(),
            completions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn sink(&self) -> CompletionSink {
        CompletionSink {
            completions: self.completions.clone(),
        }
    }

    /// Kicks off a fetch the first time a URL is seen; later calls are
    /// no-ops regardless of the URL's current state.
    pub fn ensure_fetched(&mut self, fetcher: &mut dyn AssetFetcher, url: &str) {
        if self.states.contains_key(url) {
            return;
        }
        debug!("requesting asset fetch for {}", url);
        self.states.insert(url.to_owned(), FetchState::Pending);
        fetcher.request(url, self.sink());
    }

    /// Applies queued completions in arrival order; called once per poll
    /// cycle. Repeated completions for one URL simply overwrite - last
    /// value wins.
    pub fn apply_completions(&mut self) {
        let drained: Vec<Completion> = {
            let mut completions = self
                .completions
                .lock()
                .expect("no code panics while holding the completion lock");
            std::mem::take(&mut *completions)
        };

        for completion in drained {
            let state = if completion.success {
                FetchState::Ready(completion.path_or_error)
            } else {
                FetchState::Failed(completion.path_or_error)
            };
            self.states.insert(completion.url, state);
        }
    }

    /// URLs nobody completed yet - including URLs never requested - read as
    /// pending.
    pub fn state(&self, url: &str) -> FetchState {
        self.states
            .get(url)
            .cloned()
            .unwrap_or(FetchState::Pending)
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        AssetCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingFetcher {
        requested: Vec<String>,
    }

    impl AssetFetcher for RecordingFetcher {
        fn request(&mut self, url: &str, _sink: CompletionSink) {
            self.requested.push(url.to_owned());
        }
    }

    #[test]
    fn test_fetch_requested_once_per_url() {
        let mut cache = AssetCache::new();
        let mut fetcher = RecordingFetcher { requested: Vec::new() };

        cache.ensure_fetched(&mut fetcher, "https://example.org/chair.glb");
        cache.ensure_fetched(&mut fetcher, "https://example.org/chair.glb");
        cache.ensure_fetched(&mut fetcher, "https://example.org/table.glb");

        assert_eq!(fetcher.requested.len(), 2);
        assert_eq!(
            cache.state("https://example.org/chair.glb"),
            FetchState::Pending
        );
    }

    #[test]
    fn test_never_firing_callback_stays_pending() {
        let mut cache = AssetCache::new();
        cache.ensure_fetched(&mut NoopFetcher, "https://example.org/a.glb");
        cache.apply_completions();
        assert_eq!(cache.state("https://example.org/a.glb"), FetchState::Pending);
        assert_eq!(cache.state("https://example.org/unseen.glb"), FetchState::Pending);
    }

    #[test]
    fn test_repeated_completions_last_value_wins() {
        let mut cache = AssetCache::new();
        cache.ensure_fetched(&mut NoopFetcher, "https://example.org/a.glb");

        let sink = cache.sink();
        sink.complete("https://example.org/a.glb", false, "timeout");
        sink.complete("https://example.org/a.glb", true, "/cache/a.glb");
        cache.apply_completions();

        assert_eq!(
            cache.state("https://example.org/a.glb"),
            FetchState::Ready("/cache/a.glb".to_owned())
        );

        sink.complete("https://example.org/a.glb", false, "evicted");
        cache.apply_completions();
        assert_eq!(
            cache.state("https://example.org/a.glb"),
            FetchState::Failed("evicted".to_owned())
        );
    }
}
