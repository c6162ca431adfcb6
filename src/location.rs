//! URL primitives for query state.
//!
//! A [`Location`] is a parsed absolute URL with `URLSearchParams`-style
//! mutation helpers. Query values are serialized as
//! `application/x-www-form-urlencoded`, which is what a browser produces
//! for the same pairs.

use std::fmt;
use std::str::FromStr;

use url::{form_urlencoded, Position, Url};

use crate::error::Result;

/// A browser location: pathname plus query string on a fixed origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    url: Url,
}

impl Location {
    /// Parse an absolute href.
    pub fn parse(href: &str) -> Result<Self> {
        Ok(Self {
            url: Url::parse(href)?,
        })
    }

    /// The underlying URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The path component, always starting with `/` for web URLs.
    pub fn pathname(&self) -> &str {
        self.url.path()
    }

    /// The raw query string without the leading `?`, if any.
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// Decoded query pairs in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url.query_pairs().into_owned().collect()
    }

    /// Decoded value of the first occurrence of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Check whether `key` is present in the query string.
    pub fn contains(&self, key: &str) -> bool {
        self.url.query_pairs().any(|(k, _)| k == key)
    }

    /// Set `key` to `value`.
    ///
    /// The first occurrence is replaced in place and later duplicates are
    /// dropped; an absent key is appended.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut pairs = self.query_pairs();
        let mut found = false;
        pairs.retain_mut(|(k, v)| {
            if k.as_str() != key {
                return true;
            }
            if found {
                return false;
            }
            found = true;
            *v = value.to_string();
            true
        });
        if !found {
            pairs.push((key.to_string(), value.to_string()));
        }
        self.write_pairs(&pairs);
    }

    /// Remove every occurrence of `key`. Returns whether anything was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        if !self.contains(key) {
            return false;
        }
        let mut pairs = self.query_pairs();
        pairs.retain(|(k, _)| k != key);
        self.write_pairs(&pairs);
        true
    }

    /// Override the base of this location while keeping its query.
    ///
    /// An absolute URL replaces origin and path; anything else replaces
    /// only the pathname.
    pub fn set_base(&mut self, path: &str) -> Result<()> {
        if has_scheme(path) {
            let mut next = Url::parse(path)?;
            next.set_query(self.url.query());
            self.url = next;
        } else {
            self.url.set_path(path);
        }
        Ok(())
    }

    /// Full absolute href.
    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    /// Path and query without origin or fragment, e.g. `/portal?search=%22shoe%22`.
    pub fn relative_href(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    fn write_pairs(&mut self, pairs: &[(String, String)]) {
        if pairs.is_empty() {
            self.url.set_query(None);
            return;
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.url.set_query(Some(&query));
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.href())
    }
}

impl FromStr for Location {
    type Err = crate::error::QueryStateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether `path` starts with a URL scheme (`ALPHA *(ALPHA / DIGIT / + / - / .) ":"`).
pub fn has_scheme(path: &str) -> bool {
    let Some((scheme, _)) = path.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
