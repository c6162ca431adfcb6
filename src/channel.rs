//! Typed per-key bindings over a [`QueryStateStore`].
//!
//! A [`QueryState<T>`] reads one JSON value out of the live query string
//! and writes changes back through the store. Empty values (`null`, `""`,
//! `[]`, `{}`) are never stored: writing one removes the key.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{QueryStateError, Result};
use crate::store::{QueryOp, QueryStateStore};
use crate::watch::QueryStream;

/// Options for [`QueryState::set_with`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Also move the query string to this path (or absolute URL).
    pub base_url: Option<String>,
}

impl SetOptions {
    /// Options that override the base path.
    pub fn base_url(path: impl Into<String>) -> Self {
        Self {
            base_url: Some(path.into()),
        }
    }
}

/// Lifecycle of a channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not mounted yet.
    Uninitialized,
    /// Mounted and wrote its default value into the URL.
    Seeded,
    /// Mounted (or written to) without seeding, or written after seeding.
    Live,
}

/// The empty predicate: values equivalent to "absent".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Build the store operation that writes `value` under `key`.
pub fn encode<T: Serialize>(key: &str, value: Option<&T>) -> Result<QueryOp> {
    let Some(value) = value else {
        return Ok(QueryOp::delete(key));
    };
    let json = serde_json::to_value(value)?;
    if is_empty_value(&json) {
        return Ok(QueryOp::delete(key));
    }
    QueryOp::set_json(key, &json)
}

/// A read/write binding for one query key.
pub struct QueryState<T> {
    store: Arc<QueryStateStore>,
    key: String,
    default: Option<T>,
    state: Mutex<ChannelState>,
}

impl<T> QueryState<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Bind `key` on `store`.
    pub fn new(store: Arc<QueryStateStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            default: None,
            state: Mutex::new(ChannelState::Uninitialized),
        }
    }

    /// Value returned while the key is absent, and seeded on mount.
    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    /// The bound key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The default value, if any.
    pub fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    /// Read the value from the live location.
    ///
    /// Undecodable values read as absent.
    pub fn get(&self) -> Option<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %self.key, %err, "ignoring undecodable query value");
                self.default.clone()
            }
        }
    }

    /// Read the value from the live location, reporting decode failures.
    pub fn try_get(&self) -> Result<Option<T>> {
        match self.store.current().get(&self.key) {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| QueryStateError::Decode {
                    key: self.key.clone(),
                    message: e.to_string(),
                }),
            None => Ok(self.default.clone()),
        }
    }

    /// Write `value`; `None` and empty values remove the key.
    pub fn set(&self, value: Option<T>) -> Result<()> {
        self.set_with(value, SetOptions::default())
    }

    /// Write `value`, optionally moving the query to another base path in
    /// the same batch.
    pub fn set_with(&self, value: Option<T>, options: SetOptions) -> Result<()> {
        let mut ops = vec![encode(&self.key, value.as_ref())?];
        if let Some(path) = options.base_url {
            ops.push(QueryOp::base_url(path));
        }
        self.store.apply(ops)?;
        *self.state.lock() = ChannelState::Live;
        Ok(())
    }

    /// Remove the key.
    pub fn clear(&self) -> Result<()> {
        self.set(None)
    }

    /// Run first-mount initialization.
    ///
    /// When a default is set and the key is absent, the default is written
    /// once so shared links carry it explicitly. Later calls return the
    /// current state without writing.
    pub fn mount(&self) -> Result<ChannelState> {
        let mut state = self.state.lock();
        if *state != ChannelState::Uninitialized {
            return Ok(*state);
        }

        let seed = match &self.default {
            Some(default)
                if self.store.options().seed_defaults
                    && !self.store.working_copy().contains(&self.key) =>
            {
                match encode(&self.key, Some(default))? {
                    op @ QueryOp::Set { .. } => Some(op),
                    _ => None,
                }
            }
            _ => None,
        };

        *state = match seed {
            Some(op) => {
                self.store.apply(vec![op])?;
                debug!(key = %self.key, "seeded default value");
                ChannelState::Seeded
            }
            None => ChannelState::Live,
        };
        Ok(*state)
    }

    /// Watch for changes to this key.
    pub fn watch(&self) -> QueryStream {
        self.store.watch(&self.key)
    }
}
