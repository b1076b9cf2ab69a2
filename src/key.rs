// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::KeyError;

/// Source of API credentials for a rate-limited platform
pub trait KeyProvider: Send + Sync {
    /// Returns the credential to use for the next request
    fn get(&self) -> String;
}

/// A shared reference to a key provider
pub type SharedKeyProvider = Arc<dyn KeyProvider>;

/// Create the right provider for the number of keys given
///
/// One key yields a [`FixedKey`], two or more a [`RotatedKeys`].
pub fn new_key_provider(keys: Vec<String>) -> Result<SharedKeyProvider, KeyError> {
    match keys.len() {
        0 => Err(KeyError::NoKeys),
        1 => Ok(Arc::new(FixedKey::new(keys[0].clone())?)),
        _ => Ok(Arc::new(RotatedKeys::new(keys)?)),
    }
}

/// Always hands out the same key
#[derive(Debug, Clone)]
pub struct FixedKey {
    key: String,
}

impl FixedKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(KeyError::EmptyKey);
        }
        Ok(Self { key })
    }
}

impl KeyProvider for FixedKey {
    fn get(&self) -> String {
        self.key.clone()
    }
}

/// Round-robin over several keys to spread upstream quota
#[derive(Debug)]
pub struct RotatedKeys {
    keys: Vec<String>,
    index: Mutex<usize>,
}

impl RotatedKeys {
    pub fn new(keys: Vec<String>) -> Result<Self, KeyError> {
        if keys.len() < 2 {
            return Err(KeyError::NotEnoughKeys(keys.len()));
        }
        if keys.iter().any(String::is_empty) {
            return Err(KeyError::EmptyKey);
        }
        Ok(Self {
            keys,
            index: Mutex::new(0),
        })
    }
}

impl KeyProvider for RotatedKeys {
    fn get(&self) -> String {
        // The cursor is a plain counter, a poisoned lock still holds a usable value
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *index % self.keys.len();
        *index = index.wrapping_add(1);
        self.keys[current].clone()
    }
}
