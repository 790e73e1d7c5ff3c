//! Content downloads.
//!
//! A ContentCheck message names a file the client must hold before the
//! server sends the baseline. The actual storage and fetching live
//! behind the `ContentStore` trait; the engine only sequences mirror
//! failover and reports the outcome to the connection layer.

use crate::net::protocol::ContentCheckMsg;
use crate::net::stats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    InProgress,
    Done,
    Failed(String),
}

pub trait ContentStore {
    /// The named content is already present with the right hash.
    fn has(&self, name: &str, hash: u64) -> bool;

    /// Starts fetching from one mirror. Returning false refuses the
    /// mirror outright (unsupported scheme, blocked host).
    fn begin_fetch(&mut self, name: &str, hash: u64, mirror: &str) -> bool;

    fn poll_fetch(&mut self) -> FetchStatus;
}

/// Store for installations that never download; every check that is
/// not already satisfied fails immediately.
#[derive(Debug, Default)]
pub struct NullContentStore;

impl ContentStore for NullContentStore {
    fn has(&self, _name: &str, _hash: u64) -> bool {
        false
    }

    fn begin_fetch(&mut self, _name: &str, _hash: u64, _mirror: &str) -> bool {
        false
    }

    fn poll_fetch(&mut self) -> FetchStatus {
        FetchStatus::Failed("downloads disabled".into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgress {
    Fetching,
    Complete,
    /// Every mirror failed or was refused.
    Failed,
}

/// One outstanding content fetch with mirror failover. Mirrors are
/// shuffled once so a struggling first mirror is not hammered by every
/// client in the same order.
#[derive(Debug)]
pub struct DownloadRequest {
    pub name: String,
    pub hash: u64,
    mirrors: Vec<String>,
    next_mirror: usize,
    fetching: bool,
}

impl DownloadRequest {
    pub fn new(msg: &ContentCheckMsg) -> Self {
        let mut mirrors = msg.mirrors.clone();
        stats::shuffle(&mut mirrors);
        Self {
            name: msg.name.clone(),
            hash: msg.hash,
            mirrors,
            next_mirror: 0,
            fetching: false,
        }
    }

    /// Drives the fetch by one poll. Called once per local step while
    /// the connection sits in the Downloading state.
    pub fn poll<C: ContentStore>(&mut self, store: &mut C) -> DownloadProgress {
        loop {
            if self.fetching {
                match store.poll_fetch() {
                    FetchStatus::InProgress => return DownloadProgress::Fetching,
                    FetchStatus::Done => {
                        log::info!("downloaded {}", self.name);
                        return DownloadProgress::Complete;
                    }
                    FetchStatus::Failed(why) => {
                        log::warn!("fetch of {} failed: {}", self.name, why);
                        self.fetching = false;
                    }
                }
            }

            let Some(mirror) = self.mirrors.get(self.next_mirror) else {
                log::warn!("all mirrors exhausted for {}", self.name);
                return DownloadProgress::Failed;
            };
            self.next_mirror += 1;
            if store.begin_fetch(&self.name, self.hash, mirror) {
                self.fetching = true;
            } else {
                log::debug!("mirror {} refused for {}", mirror, self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(mirrors: &[&str]) -> ContentCheckMsg {
        ContentCheckMsg {
            name: "maps/e1m1.pak".into(),
            hash: 0xABCD,
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Scripted store: each started fetch pops the next outcome.
    struct ScriptedStore {
        outcomes: Vec<FetchStatus>,
        started: Vec<String>,
    }

    impl ScriptedStore {
        fn new(outcomes: Vec<FetchStatus>) -> Self {
            Self {
                outcomes,
                started: Vec::new(),
            }
        }
    }

    impl ContentStore for ScriptedStore {
        fn has(&self, _name: &str, _hash: u64) -> bool {
            false
        }

        fn begin_fetch(&mut self, _name: &str, _hash: u64, mirror: &str) -> bool {
            self.started.push(mirror.to_owned());
            true
        }

        fn poll_fetch(&mut self) -> FetchStatus {
            self.outcomes.remove(0)
        }
    }

    #[test]
    fn first_mirror_success() {
        let mut store = ScriptedStore::new(vec![FetchStatus::InProgress, FetchStatus::Done]);
        let mut request = DownloadRequest::new(&check(&["http://a"]));

        assert_eq!(request.poll(&mut store), DownloadProgress::Fetching);
        assert_eq!(request.poll(&mut store), DownloadProgress::Complete);
        assert_eq!(store.started, vec!["http://a"]);
    }

    #[test]
    fn failover_to_next_mirror() {
        let mut store = ScriptedStore::new(vec![
            FetchStatus::Failed("timeout".into()),
            FetchStatus::Done,
        ]);
        let mut request = DownloadRequest::new(&check(&["http://a", "http://b"]));

        // The first poll rolls straight from the failed mirror onto the
        // next one and reports its outcome.
        assert_eq!(request.poll(&mut store), DownloadProgress::Complete);
        assert_eq!(store.started.len(), 2);
    }

    #[test]
    fn all_mirrors_failing_gives_up() {
        let mut store = ScriptedStore::new(vec![
            FetchStatus::Failed("timeout".into()),
            FetchStatus::Failed("404".into()),
        ]);
        let mut request = DownloadRequest::new(&check(&["http://a", "http://b"]));
        assert_eq!(request.poll(&mut store), DownloadProgress::Failed);
    }

    #[test]
    fn no_mirrors_fails_immediately() {
        let mut store = NullContentStore;
        let mut request = DownloadRequest::new(&check(&[]));
        assert_eq!(request.poll(&mut store), DownloadProgress::Failed);
    }

    #[test]
    fn null_store_refuses_mirrors() {
        let mut store = NullContentStore;
        let mut request = DownloadRequest::new(&check(&["http://a"]));
        assert_eq!(request.poll(&mut store), DownloadProgress::Failed);
    }
}
