// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Credential Store
//!
//! Persistent key/value map shared by every proxy worker on a host. The
//! backing file holds one `key=value` record per line; blank lines and lines
//! starting with `#` are ignored. Inside keys and values the characters
//! newline, carriage return, tab, backslash and `=` are written as `\n`, `\r`,
//! `\t`, `\\` and `\=`.
//!
//! Every read-modify-write of the file runs under a [`NamedMutex`], and each
//! write replaces the whole file. Reads are served from the in-memory map, so
//! a process must [`CredentialStore::reload`] before it can observe a record
//! written by a sibling.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Cross-process persistence of device credentials

use crate::domain::credentials::Credential;
use crate::domain::error::StorageError;
use crate::infrastructure::named_mutex::NamedMutex;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct CredentialStore {
    path: PathBuf,
    lock: NamedMutex,
    records: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    /// Attach to the store at `path` guarded by the named lock `lock_name`,
    /// loading whatever the file currently holds.
    pub fn open(path: impl Into<PathBuf>, lock_name: &str) -> Result<Self, StorageError> {
        let store = Self {
            path: path.into(),
            lock: NamedMutex::open(lock_name)?,
            records: Mutex::new(HashMap::new()),
        };
        store.reload()?;
        info!(path = %store.path.display(), "Opened credential store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value for `key` as of the last load or write by this process
    pub fn get(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).cloned()
    }

    /// Record `key = value` and rewrite the file.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|records| {
            records.insert(key.to_string(), value.to_string());
        })
    }

    /// Drop every record and truncate the file.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.update(HashMap::clear)
    }

    /// Replace the in-memory map with the file contents. A missing file
    /// reads as empty.
    pub fn reload(&self) -> Result<(), StorageError> {
        let mut records = self.records.lock();
        let _guard = self.lock.lock()?;
        *records = self.read_file()?;
        debug!(path = %self.path.display(), records = records.len(), "Reloaded credential store");
        Ok(())
    }

    /// Keys currently held in memory, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Credential stored for `installation_code`, if both halves are present
    pub fn load_credential(&self, installation_code: &str) -> Option<Credential> {
        let records = self.records.lock();
        let app_id = records.get(&Credential::app_id_key(installation_code))?;
        let app_secret = records.get(&Credential::app_secret_key(installation_code))?;
        Some(Credential::new(app_id.clone(), app_secret.clone()))
    }

    /// Persist both halves of `credential` in a single write.
    pub fn save_credential(
        &self,
        installation_code: &str,
        credential: &Credential,
    ) -> Result<(), StorageError> {
        self.update(|records| {
            records.insert(
                Credential::app_id_key(installation_code),
                credential.app_id.clone(),
            );
            records.insert(
                Credential::app_secret_key(installation_code),
                credential.app_secret.clone(),
            );
        })
    }

    // Merge with the file under the lock so a sibling's records survive.
    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StorageError> {
        let mut records = self.records.lock();
        let _guard = self.lock.lock()?;

        let mut merged = self.read_file()?;
        apply(&mut merged);
        self.write_file(&merged)?;

        *records = merged;
        Ok(())
    }

    fn read_file(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => parse_records(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    fn write_file(&self, records: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }

        // Readers that skip the lock must never see a half-written file.
        let staging = self.path.with_extension("tmp");
        write_synced(&staging, &serialize_records(records))
            .map_err(|e| StorageError::io(&staging, e))?;
        fs::rename(&staging, &self.path).map_err(|e| StorageError::io(&self.path, e))?;

        debug!(path = %self.path.display(), records = records.len(), "Wrote credential store");
        Ok(())
    }
}

fn write_synced(path: &Path, content: &str) -> io::Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

fn parse_records(content: &str) -> Result<HashMap<String, String>, StorageError> {
    let mut records = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let split = separator_index(line).ok_or(StorageError::MalformedRecord { line: index + 1 })?;
        records.insert(unescape(&line[..split]), unescape(&line[split + 1..]));
    }

    Ok(records)
}

fn serialize_records(records: &HashMap<String, String>) -> String {
    let ordered: BTreeMap<&String, &String> = records.iter().collect();
    let mut out = String::new();
    for (key, value) in ordered {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

/// Byte offset of the first `=` not preceded by an escaping backslash
fn separator_index(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' => return Some(index),
            _ => {}
        }
    }
    None
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('=') => out.push('='),
            // Unknown escapes are kept verbatim.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
