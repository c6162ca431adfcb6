//! Navigator trait - the routing primitive query state synchronizes through.
//!
//! A navigator owns the live location. Hosts implement it over a real
//! router (browser history, a webview, a TUI page stack); tests use
//! [`MemoryNavigator`](crate::memory::MemoryNavigator).

use std::sync::Arc;

use crate::error::Result;
use crate::location::Location;

/// Read and change the live location.
///
/// Implementations must be cheap to query: the store reads the live
/// location on every reconciliation and every channel read.
pub trait Navigator: Send + Sync {
    /// The location currently shown to the user.
    fn current(&self) -> Location;

    /// Navigate to `to`, updating the address bar and notifying readers.
    ///
    /// Errors are propagated to whoever triggered the reconciliation.
    fn navigate(&self, to: &Location) -> Result<()>;

    /// Relative href of the live location (`/path?query`).
    fn current_href(&self) -> String {
        self.current().relative_href().to_string()
    }
}

impl<N: Navigator + ?Sized> Navigator for Arc<N> {
    fn current(&self) -> Location {
        (**self).current()
    }

    fn navigate(&self, to: &Location) -> Result<()> {
        (**self).navigate(to)
    }
}
