//! The redirect table: a single swappable pointer to the live backend.
//!
//! Every proxied request loads the current target without taking the
//! transition lock. Targets are immutable and replaced whole, so a reader
//! sees either the old or the new backend, never a mix.

use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;

use crate::state_machine::SideLabel;

/// Address the front door forwards unmatched requests to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub side: SideLabel,
    pub host: String,
    pub port: u16,
}

impl RedirectTarget {
    pub fn new(side: SideLabel, host: impl Into<String>, port: u16) -> Self {
        Self {
            side,
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URL for a request path (which must start with `/`).
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.authority(), path_and_query)
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "side {} at {}", self.side, self.authority())
    }
}

#[derive(Default)]
pub struct RedirectTable {
    current: ArcSwapOption<RedirectTarget>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend new requests should go to, if any has been deployed.
    pub fn current(&self) -> Option<Arc<RedirectTarget>> {
        self.current.load_full()
    }

    /// Atomically point at `target`, returning what was there before.
    pub fn replace(&self, target: RedirectTarget) -> Option<Arc<RedirectTarget>> {
        self.current.swap(Some(Arc::new(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_empty_table_has_no_target() {
        assert!(RedirectTable::new().current().is_none());
    }

    #[test]
    fn test_replace_returns_previous_target() {
        let table = RedirectTable::new();
        let first = RedirectTarget::new(SideLabel::One, "localhost", 8081);
        let second = RedirectTarget::new(SideLabel::Two, "localhost", 8082);

        assert!(table.replace(first.clone()).is_none());
        let previous = table.replace(second.clone()).unwrap();

        assert_eq!(*previous, first);
        assert_eq!(*table.current().unwrap(), second);
    }

    #[test]
    fn test_url_for_keeps_path_and_query() {
        let target = RedirectTarget::new(SideLabel::Two, "localhost", 8082);
        assert_eq!(
            target.url_for("/api/items?page=2"),
            "http://localhost:8082/api/items?page=2"
        );
    }

    #[test]
    fn test_concurrent_readers_only_see_whole_targets() {
        let table = Arc::new(RedirectTable::new());
        let one = RedirectTarget::new(SideLabel::One, "localhost", 8081);
        let two = RedirectTarget::new(SideLabel::Two, "localhost", 8082);
        table.replace(one.clone());

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let done = done.clone();
                let (one, two) = (one.clone(), two.clone());
                std::thread::spawn(move || {
                    let mut reads = 0u64;
                    while !done.load(Ordering::Relaxed) || reads == 0 {
                        let target = table.current().unwrap();
                        assert!(*target == one || *target == two, "torn target: {:?}", target);
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();

        for i in 0..10_000 {
            let next = if i % 2 == 0 { two.clone() } else { one.clone() };
            table.replace(next);
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }
}
