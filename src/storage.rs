//! Interface for storing tokens so that they can be re-used across runs.
//! There are built-in memory and file-based storage providers. You can
//! implement your own by implementing the TokenStorage trait.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::types::{json_io_error, Token};

/// Implements a specialized storage to set and retrieve `Token` instances.
///
/// Tokens are keyed by an opaque storage key, typically derived from the
/// invoking tool's identity (the original command-line samples use
/// `<script-name>-oauth2.json`). The storage has no particular semantic
/// requirement beyond get/set/delete with last-writer-wins, which is why
/// `NullStorage` and `MemoryStorage` can be used as well.
pub trait TokenStorage: Send {
    /// Returns the token stored under `key`, or `None` if there is none.
    fn get(&self, key: &str) -> io::Result<Option<Token>>;

    /// Stores `token` under `key`, overwriting any prior value.
    fn set(&self, key: &str, token: &Token) -> io::Result<()>;

    /// Removes the token stored under `key`, if any.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// A storage that remembers nothing.
#[derive(Default)]
pub struct NullStorage;

impl TokenStorage for NullStorage {
    fn get(&self, _: &str) -> io::Result<Option<Token>> {
        Ok(None)
    }

    fn set(&self, _: &str, _: &Token) -> io::Result<()> {
        Ok(())
    }

    fn delete(&self, _: &str) -> io::Result<()> {
        Ok(())
    }
}

/// A storage that remembers values for one session only.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tokens: Mutex<HashMap<String, Token>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage.
    pub fn new() -> MemoryStorage {
        Default::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<Token>> {
        let tokens = self.tokens.lock().expect("poisoned mutex");
        Ok(tokens.get(key).cloned())
    }

    fn set(&self, key: &str, token: &Token) -> io::Result<()> {
        let mut tokens = self.tokens.lock().expect("poisoned mutex");
        tokens.insert(key.to_string(), token.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        let mut tokens = self.tokens.lock().expect("poisoned mutex");
        tokens.remove(key);
        Ok(())
    }
}

/// Serializes tokens to JSON files on disk, one file per storage key,
/// named `<key>-oauth2.json` inside the configured directory.
///
/// No cross-process locking is attempted; the store is meant for a single
/// interactive user running one tool at a time.
pub struct DiskStorage {
    dir: PathBuf,
}

impl DiskStorage {
    /// Creates a storage rooted at `dir`, creating the directory if needed.
    pub fn new<S: Into<PathBuf>>(dir: S) -> Result<DiskStorage, io::Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DiskStorage { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are caller-chosen identifiers, not paths; flatten anything
        // that would escape the storage directory.
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}-oauth2.json", safe))
    }
}

impl TokenStorage for DiskStorage {
    fn get(&self, key: &str) -> io::Result<Option<Token>> {
        let contents = match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let token = serde_json::from_str(&contents).map_err(json_io_error)?;
        Ok(Some(token))
    }

    fn set(&self, key: &str, token: &Token) -> io::Result<()> {
        let serialized = serde_json::to_string(token).map_err(json_io_error)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path_for(key))?;
        f.write_all(serialized.as_bytes())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
