// Copyright (c) 2026 Gatekeeper Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Credential store sharing between independent store handles.
//!
//! Each handle maps the named mutex separately, the same way two worker
//! processes would, so these tests exercise the cross-process path.

use gatekeeper_core::infrastructure::NamedMutex;
use gatekeeper_core::{Credential, CredentialStore, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

struct SharedFile {
    dir: tempfile::TempDir,
    lock_name: String,
}

impl SharedFile {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            lock_name: format!("/gatekeeper-store-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.path().join("credentials.conf")
    }

    fn open(&self) -> CredentialStore {
        CredentialStore::open(self.path(), &self.lock_name).unwrap()
    }
}

impl Drop for SharedFile {
    fn drop(&mut self) {
        let _ = NamedMutex::unlink(&self.lock_name);
    }
}

#[test]
fn test_concurrent_writers_keep_every_record() {
    let shared = SharedFile::new();
    let stores: Vec<Arc<CredentialStore>> = (0..4).map(|_| Arc::new(shared.open())).collect();

    let writers: Vec<_> = stores
        .iter()
        .cloned()
        .enumerate()
        .map(|(worker, store)| {
            thread::spawn(move || {
                for n in 0..10 {
                    store
                        .set(&format!("worker{worker}.key{n}"), &format!("value={n}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let reader = shared.open();
    assert_eq!(reader.keys().len(), 40);
    assert_eq!(reader.get("worker3.key9").as_deref(), Some("value=9"));
}

#[test]
fn test_credentials_written_by_one_handle_are_read_by_another() {
    let shared = SharedFile::new();
    let master = shared.open();
    let worker = shared.open();

    master
        .save_credential("INST", &Credential::new("id\twith\ttabs", "sec\\ret"))
        .unwrap();

    assert!(worker.load_credential("INST").is_none());
    worker.reload().unwrap();
    assert_eq!(
        worker.load_credential("INST"),
        Some(Credential::new("id\twith\ttabs", "sec\\ret"))
    );

    worker.clear().unwrap();
    master.reload().unwrap();
    assert!(master.load_credential("INST").is_none());
}

#[test]
fn test_corrupt_file_is_reported_with_line_number() {
    let shared = SharedFile::new();
    std::fs::write(shared.path(), "# comment\nok=1\n\nbroken line\n").unwrap();

    match CredentialStore::open(shared.path(), &shared.lock_name) {
        Err(StorageError::MalformedRecord { line }) => assert_eq!(line, 4),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("corrupt file was accepted"),
    }
}
