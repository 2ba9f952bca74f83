//! Cache key validation and version derivation.

use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Longest accepted key, in characters.
pub const MAX_KEY_LENGTH: usize = 512;
/// Most keys accepted by one lookup.
pub const MAX_LOOKUP_KEYS: usize = 10;

// Bumped when the layout of stored entries changes.
const VERSION_SALT: &str = "1.0";

/// Rejects keys the service cannot store.
pub fn check_key(key: &str) -> Result<(), CacheError> {
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey {
            key: key.to_owned(),
            reason: "longer than 512 characters",
        });
    }
    if key.contains(',') {
        return Err(CacheError::InvalidKey {
            key: key.to_owned(),
            reason: "contains a comma",
        });
    }
    Ok(())
}

/// Validates the ordered key list of a lookup.
pub fn check_keys(keys: &[&str]) -> Result<(), CacheError> {
    if keys.is_empty() {
        return Err(CacheError::InvalidKey {
            key: String::new(),
            reason: "at least one key is required",
        });
    }
    if keys.len() > MAX_LOOKUP_KEYS {
        return Err(CacheError::InvalidKey {
            key: keys.join(","),
            reason: "more than 10 keys",
        });
    }
    keys.iter().try_for_each(|key| check_key(key))
}

/// Derives an entry version from what went into the archive.
///
/// `components` are typically the cached paths; `compression` names the
/// archive compression so entries written with different methods never
/// collide.
pub fn cache_version(components: &[&str], compression: Option<&str>) -> String {
    let mut parts: Vec<&str> = components.to_vec();
    parts.extend(compression);
    parts.push(VERSION_SALT);

    hex::encode(Sha256::digest(parts.join("|")))
}
