/*
 * SPDX-FileCopyrightText: 2024-2025 deltapply contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Durable progress store. The performer records its resume state under a
//! small set of named values; the store itself is a trivial key-value
//! interface so tests can substitute an in-memory implementation.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;

/// Bytes of header + manifest before the blob region.
pub const MANIFEST_METADATA_SIZE: &str = "manifest-metadata-size";
/// Next operation index to execute; -1 means the update is not resumable.
pub const UPDATE_STATE_NEXT_OPERATION: &str = "update-state-next-operation";
/// Blob-region offset consumed at the last checkpoint.
pub const UPDATE_STATE_NEXT_DATA_OFFSET: &str = "update-state-next-data-offset";
/// Serialized hash state at the last checkpoint.
pub const UPDATE_STATE_SHA256_CONTEXT: &str = "update-state-sha256-context";
/// Hash state captured at the signature boundary.
pub const UPDATE_STATE_SIGNED_SHA256_CONTEXT: &str = "update-state-signed-sha256-context";
/// Expected payload hash from the update metadata server (written by the
/// caller, only read here).
pub const UPDATE_CHECK_RESPONSE_HASH: &str = "update-check-response-hash";

/// Sentinel for [`UPDATE_STATE_NEXT_OPERATION`].
pub const UPDATE_STATE_OPERATION_INVALID: i64 = -1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),
    #[error("Value for {0:?} is not an integer: {1:?}")]
    InvalidInt(String, String),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

pub trait Prefs {
    fn get_string(&self, key: &str) -> Result<Option<String>>;
    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get_string(key)? {
            Some(raw) => {
                let value = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| Error::InvalidInt(key.to_owned(), raw.clone()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }
}

/// File-per-key store rooted at a state directory. Values are the raw file
/// contents. Keys are restricted to a safe character set so they can never
/// escape the directory.
#[derive(Debug)]
pub struct FilePrefs {
    prefs_dir: PathBuf,
}

impl FilePrefs {
    pub fn new(prefs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(prefs_dir)?;

        Ok(Self {
            prefs_dir: prefs_dir.to_owned(),
        })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidKey(key.to_owned()));
        }

        Ok(self.prefs_dir.join(key))
    }
}

impl Prefs for FilePrefs {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;

        match fs::read_to_string(path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;

        fs::write(path, value)?;

        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemPrefs {
    values: Mutex<HashMap<String, String>>,
}

impl MemPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prefs for MemPrefs {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap();
        Ok(values.get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{Error, FilePrefs, MemPrefs, Prefs};

    #[test]
    fn mem_prefs_typed_access() {
        let prefs = MemPrefs::new();

        assert_eq!(prefs.get_i64("missing").unwrap(), None);

        prefs.set_i64("counter", -1).unwrap();
        assert_eq!(prefs.get_i64("counter").unwrap(), Some(-1));

        prefs.set_string("counter", "not a number").unwrap();
        assert_matches!(prefs.get_i64("counter"), Err(Error::InvalidInt(_, _)));
    }

    #[test]
    fn file_prefs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePrefs::new(dir.path()).unwrap();

        assert_eq!(prefs.get_string("update-state-sha256-context").unwrap(), None);

        prefs.set_i64("manifest-metadata-size", 1234).unwrap();
        assert_eq!(prefs.get_i64("manifest-metadata-size").unwrap(), Some(1234));

        // A second instance sees the same durable state.
        let reopened = FilePrefs::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get_i64("manifest-metadata-size").unwrap(),
            Some(1234)
        );
    }

    #[test]
    fn file_prefs_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = FilePrefs::new(dir.path()).unwrap();

        assert_matches!(prefs.get_string("../escape"), Err(Error::InvalidKey(_)));
        assert_matches!(prefs.set_string("a/b", "x"), Err(Error::InvalidKey(_)));
    }
}
