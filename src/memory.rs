//! In-memory navigator implementation.
//!
//! Keeps a linear history stack the way a browser tab does. Use for
//! tests, server-side rendering, and hosts without a real address bar.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{QueryStateError, Result};
use crate::location::Location;
use crate::navigator::Navigator;

struct History {
    entries: Vec<Location>,
    index: usize,
    navigations: u64,
    fail_next: Option<String>,
}

/// In-memory implementation of [`Navigator`].
///
/// `navigate` pushes a new entry and truncates forward history.
/// `back`/`forward` move through history without counting as navigations
/// made by the store, which is how external navigations are simulated.
/// Clones share the same history.
#[derive(Clone)]
pub struct MemoryNavigator {
    history: Arc<RwLock<History>>,
}

impl MemoryNavigator {
    /// Create a navigator showing `href`.
    pub fn new(href: &str) -> Result<Self> {
        Ok(Self::at(Location::parse(href)?))
    }

    /// Create a navigator showing an already parsed location.
    pub fn at(location: Location) -> Self {
        Self {
            history: Arc::new(RwLock::new(History {
                entries: vec![location],
                index: 0,
                navigations: 0,
                fail_next: None,
            })),
        }
    }

    /// Number of successful `navigate` calls so far.
    pub fn navigation_count(&self) -> u64 {
        self.history.read().navigations
    }

    /// Relative hrefs of every history entry, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history
            .read()
            .entries
            .iter()
            .map(|l| l.relative_href().to_string())
            .collect()
    }

    /// Step back one entry. Returns false at the start of history.
    pub fn back(&self) -> bool {
        let mut history = self.history.write();
        if history.index == 0 {
            return false;
        }
        history.index -= 1;
        true
    }

    /// Step forward one entry. Returns false at the end of history.
    pub fn forward(&self) -> bool {
        let mut history = self.history.write();
        if history.index + 1 >= history.entries.len() {
            return false;
        }
        history.index += 1;
        true
    }

    /// Make the next `navigate` call fail with `message`.
    pub fn fail_next_navigation(&self, message: impl Into<String>) {
        self.history.write().fail_next = Some(message.into());
    }
}

impl Navigator for MemoryNavigator {
    fn current(&self) -> Location {
        let history = self.history.read();
        history.entries[history.index].clone()
    }

    fn navigate(&self, to: &Location) -> Result<()> {
        let mut history = self.history.write();
        if let Some(message) = history.fail_next.take() {
            return Err(QueryStateError::Navigation(message));
        }

        let next = history.index + 1;
        history.entries.truncate(next);
        history.entries.push(to.clone());
        history.index = next;
        history.navigations += 1;
        Ok(())
    }
}
