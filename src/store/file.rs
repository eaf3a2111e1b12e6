//! Filesystem backend.
//!
//! One file per key under `<root>/<scope>/`. Key names are percent-escaped
//! so arbitrary example ids stay filesystem safe. The per-run lock is a lock
//! file created with `create_new` (O_EXCL) under `<root>/<run_id>/`; the
//! guard removes it on drop. Lock files older than the stale window are
//! assumed to belong to a crashed process and are broken.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::backend::{BackendProvider, LockGuard, StoreBackend};
use crate::error::Result;

const LOCK_FILE: &str = "____lock";
const LOCK_POLL: Duration = Duration::from_millis(25);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

pub struct FileProvider {
    root: PathBuf,
}

impl FileProvider {
    pub fn new(root: &str) -> Self {
        Self {
            root: PathBuf::from(root),
        }
    }
}

#[async_trait]
impl BackendProvider for FileProvider {
    fn open(&self, scope: &str) -> Result<Arc<dyn StoreBackend>> {
        Ok(Arc::new(FileBackend {
            dir: self.root.join(scope),
        }))
    }

    async fn lock(&self, run_id: &str) -> Result<LockGuard> {
        let dir = self.root.join(run_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);

        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(LockGuard::new(Box::new(FileLock { path })));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    break_stale_lock(&path);

                    let jitter = rand::random::<u64>() % 25;
                    tokio::time::sleep(LOCK_POLL + Duration::from_millis(jitter)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn break_stale_lock(path: &Path) {
    let Ok(meta) = fs::metadata(path) else { return };
    let Ok(modified) = meta.modified() else { return };

    if modified.elapsed().unwrap_or_default() > LOCK_STALE_AFTER {
        tracing::warn!("Breaking stale lock file {}", path.display());
        let _ = fs::remove_file(path);
    }
}

struct FileLock {
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    fn read_key(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StoreBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_key(key)
    }

    fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.read_key(key)? {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.key_path(key), value)?;
        Ok(())
    }

    fn merge(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        for (key, value) in entries {
            fs::write(self.key_path(&key), value)?;
        }
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            match fs::remove_file(self.key_path(key)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                keys.push(decode_key(&entry.file_name().to_string_lossy()));
            }
        }
        Ok(keys)
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-escape everything outside `[A-Za-z0-9._-]` so keys like
/// `spec/a_spec.rb[1:2]` map to flat, reversible file names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn decode_key(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = name.get(i + 1..i + 3)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
