//! Crash-safe single-record files
//!
//! Each durable key is one JSON document replaced atomically:
//! 1. Write to `<name>.tmp`
//! 2. fsync the temp file
//! 3. Rename over the final path (atomic on POSIX)
//! 4. fsync the directory so the rename survives a crash
//!
//! A crash at any step leaves either the previous committed document or the
//! new one, never a torn write. Writers coordinate through [`KeyLock`], an
//! exclusive advisory lock on a sibling `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{IntakeError, IntakeResult};

/// Exclusive advisory lock held for the lifetime of the guard
#[derive(Debug)]
pub struct KeyLock {
    file: File,
    path: PathBuf,
}

impl KeyLock {
    /// Block until the lock at `path` is held
    pub fn acquire(path: &Path) -> IntakeResult<Self> {
        ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                IntakeError::storage(format!("failed to open lock {}: {}", path.display(), e))
            })?;
        file.lock_exclusive().map_err(|e| {
            IntakeError::storage(format!("failed to lock {}: {}", path.display(), e))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        let _ = self.file.unlock();
    }
}

/// Read a JSON document; `None` when it has never been written
pub fn read_json<T: DeserializeOwned>(path: &Path) -> IntakeResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IntakeError::storage(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    let value = serde_json::from_slice(&bytes).map_err(|e| {
        IntakeError::storage(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(value))
}

/// Atomically replace the JSON document at `path`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> IntakeResult<()> {
    ensure_parent_dir(path)?;
    let temp_path = temp_path_for(path);

    let content = serde_json::to_vec_pretty(value)?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| {
            IntakeError::storage(format!("failed to create {}: {}", temp_path.display(), e))
        })?;
    file.write_all(&content).map_err(|e| {
        IntakeError::storage(format!("failed to write {}: {}", temp_path.display(), e))
    })?;
    file.sync_all().map_err(|e| {
        IntakeError::storage(format!("failed to fsync {}: {}", temp_path.display(), e))
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        IntakeError::storage(format!("failed to commit {}: {}", path.display(), e))
    })?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Run blocking file work off the async worker threads
pub async fn run_blocking<T, F>(f: F) -> IntakeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> IntakeResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IntakeError::storage(format!("blocking worker failed: {}", e)))?
}

/// Map an arbitrary key to a safe single path component.
///
/// The mapping is injective and the output never contains `:`, `{`, `}` or
/// `/`, so encoded components can be joined with a separator unambiguously.
pub fn sanitize_component(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent_dir(path: &Path) -> IntakeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            IntakeError::storage(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}
