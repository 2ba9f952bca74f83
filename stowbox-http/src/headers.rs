//! Case-insensitive header container.
//!
//! [`Headers`] is used both for outgoing request headers and for the parsed
//! headers of a [`Response`](crate::Response). Names are stored lower-cased,
//! so `Content-Type` and `content-type` address the same entry. Repeated
//! [`add`](Headers::add) calls on one name join the values with `,`.

use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::HttpError;

/// Mapping from lower-cased header name to its string value.
///
/// The `Debug` output hides the `Authorization` value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Replaces any value stored under `name`.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.inner
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Appends `value` to `name`, joining with `,` when a value is already present.
    pub fn add(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        match self.inner.entry(name.as_ref().to_ascii_lowercase()) {
            hash_map::Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                current.push(',');
                current.push_str(value.as_ref());
            }
            hash_map::Entry::Vacant(entry) => {
                entry.insert(value.as_ref().to_owned());
            }
        }
        self
    }

    /// Removes `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.inner.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(lower-cased name, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every entry of `other` over `self`; `other` wins on conflicts.
    pub fn extend_from(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.inner.insert(name.to_owned(), value.to_owned());
        }
    }

    /// Converts into a wire-level [`HeaderMap`].
    pub fn to_header_map(&self) -> Result<HeaderMap, HttpError> {
        let mut map = HeaderMap::with_capacity(self.inner.len());
        for (name, value) in &self.inner {
            let invalid = || HttpError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let mut header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            if header_name == http::header::AUTHORIZATION {
                header_value.set_sensitive(true);
            }
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.inner.iter().map(|(name, value)| {
                let value = if name == "authorization" {
                    "***"
                } else {
                    value.as_str()
                };
                (name, value)
            }))
            .finish()
    }
}

impl From<&HeaderMap> for Headers {
    /// Values that are not visible ASCII are skipped.
    fn from(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.add(name.as_str(), value);
            }
        }
        headers
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}
