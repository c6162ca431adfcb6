//! Change notifications for query state readers.
//!
//! Every reconciliation that pushes a navigation publishes one
//! [`QueryEvent`] per query key whose value changed, plus one under
//! [`PATH_KEY`] when the pathname changed. Readers subscribe with a
//! pattern and re-read their channel when an event arrives.

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::location::Location;

/// Reserved key under which pathname changes are reported.
pub const PATH_KEY: &str = "@path";

/// Type of change that occurred to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Key was absent before the navigation.
    Created,
    /// Key was present and its value changed.
    Updated,
    /// Key was removed.
    Deleted,
}

/// A change to one query key (or the pathname) caused by a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// The key that changed, or [`PATH_KEY`].
    pub key: String,
    /// Type of change.
    pub event_type: EventType,
    /// Previous decoded value.
    pub old_value: Option<String>,
    /// New decoded value.
    pub new_value: Option<String>,
    /// Relative href after the navigation.
    pub href: String,
}

impl QueryEvent {
    fn new(
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        href: impl Into<String>,
    ) -> Self {
        let event_type = match (&old_value, &new_value) {
            (None, _) => EventType::Created,
            (Some(_), Some(_)) => EventType::Updated,
            (Some(_), None) => EventType::Deleted,
        };
        Self {
            key: key.into(),
            event_type,
            old_value,
            new_value,
            href: href.into(),
        }
    }
}

/// Compute the events that describe moving from `before` to `after`.
///
/// Keys are reported in the order they appear in `before`, followed by
/// keys only present in `after`.
pub fn diff(before: &Location, after: &Location) -> Vec<QueryEvent> {
    let href = after.relative_href();
    let mut events = Vec::new();

    if before.pathname() != after.pathname() {
        events.push(QueryEvent::new(
            PATH_KEY,
            Some(before.pathname().to_string()),
            Some(after.pathname().to_string()),
            href,
        ));
    }

    let old_pairs = before.query_pairs();
    let new_pairs = after.query_pairs();
    fn first(pairs: &[(String, String)], key: &str) -> Option<String> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    let mut seen: Vec<&str> = Vec::new();
    for (key, _) in old_pairs.iter().chain(new_pairs.iter()) {
        if seen.contains(&key.as_str()) {
            continue;
        }
        seen.push(key.as_str());

        let old_value = first(&old_pairs, key.as_str());
        let new_value = first(&new_pairs, key.as_str());
        if old_value != new_value {
            events.push(QueryEvent::new(key.clone(), old_value, new_value, href));
        }
    }
    events
}

/// A stream of query events for a specific pattern.
pub struct QueryStream {
    inner: BroadcastStream<QueryEvent>,
    pattern: String,
}

impl QueryStream {
    /// Create a new stream for the given pattern.
    pub fn new(receiver: broadcast::Receiver<QueryEvent>, pattern: impl Into<String>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern: pattern.into(),
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if a key matches this stream's pattern.
    fn matches(&self, key: &str) -> bool {
        if let Some(prefix) = self.pattern.strip_suffix('*') {
            key.starts_with(prefix)
        } else {
            key == self.pattern
        }
    }
}

impl Stream for QueryStream {
    type Item = QueryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.matches(&event.key) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => {
                    // Readers re-read the live location anyway
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Publishes location changes to subscribed readers.
#[derive(Clone)]
pub(crate) struct QuerySender {
    sender: broadcast::Sender<QueryEvent>,
}

impl QuerySender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send one event per change between `before` and `after`.
    ///
    /// Returns the number of events sent; the diff is skipped when nobody
    /// is subscribed.
    pub(crate) fn publish(&self, before: &Location, after: &Location) -> usize {
        if self.sender.receiver_count() == 0 {
            return 0;
        }
        let events = diff(before, after);
        let count = events.len();
        for event in events {
            // Receivers may drop between the check and the send
            let _ = self.sender.send(event);
        }
        count
    }

    pub(crate) fn subscribe(&self, pattern: impl Into<String>) -> QueryStream {
        QueryStream::new(self.sender.subscribe(), pattern)
    }
}
