// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Keyed store on a shared directory.
//!
//! Each hash is a directory and each field a file named after the SHA-256
//! digest of the field, so names stay short whatever the key length. The file
//! starts with the field itself (a big-endian `u16` length and the bytes),
//! followed by the value. A field is claimed by writing it to a staging file
//! and hard-linking that into place; the link fails if the field file already
//! exists, which makes the claim atomic on local and most network filesystems.

use super::KeyedStore;
use crate::error::{LockyardError, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const FIELD_SUFFIX: &str = ".lock";
pub(crate) const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone)]
pub struct FileKeyedStore {
    root: PathBuf,
}

impl FileKeyedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hash_dir(&self, hash: &str) -> PathBuf {
        self.root.join(digest(hash))
    }

    fn field_path(&self, hash: &str, field: &str) -> PathBuf {
        self.hash_dir(hash)
            .join(format!("{}{FIELD_SUFFIX}", digest(field)))
    }

    fn write_staging(dir: &Path, contents: &[u8]) -> io::Result<PathBuf> {
        let staging = dir.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)?;
        let written = file.write_all(contents).and_then(|_| file.sync_all());
        if let Err(err) = written {
            drop(file);
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        Ok(staging)
    }

    /// Reads the field file at `path`, `None` when it does not exist.
    fn read_entry(path: &Path) -> Result<Option<(String, Vec<u8>)>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(store_error("read", path, err)),
        };
        split_entry(&bytes).map(Some).ok_or_else(|| {
            LockyardError::Store(format!("malformed field file {}", path.display()))
        })
    }
}

fn digest(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Errors a retry cannot fix are reported as [`LockyardError::StoreRejected`].
fn store_error(action: &str, path: &Path, err: io::Error) -> LockyardError {
    let message = format!("failed to {action} {}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied => {
            LockyardError::StoreRejected(message)
        }
        _ => LockyardError::Store(message),
    }
}

fn encode_entry(field: &str, value: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(field.len()).map_err(|_| {
        LockyardError::StoreRejected(format!(
            "field name of {} bytes exceeds the {} byte limit",
            field.len(),
            u16::MAX
        ))
    })?;
    let mut contents = Vec::with_capacity(2 + field.len() + value.len());
    contents.extend_from_slice(&len.to_be_bytes());
    contents.extend_from_slice(field.as_bytes());
    contents.extend_from_slice(value);
    Ok(contents)
}

fn split_entry(contents: &[u8]) -> Option<(String, Vec<u8>)> {
    let (len, rest) = contents.split_first_chunk::<2>()?;
    let len = usize::from(u16::from_be_bytes(*len));
    if rest.len() < len {
        return None;
    }
    let (field, value) = rest.split_at(len);
    let field = String::from_utf8(field.to_vec()).ok()?;
    Some((field, value.to_vec()))
}

impl KeyedStore for FileKeyedStore {
    fn put_if_absent(&self, hash: &str, field: &str, value: &[u8]) -> Result<bool> {
        let contents = encode_entry(field, value)?;
        let dir = self.hash_dir(hash);
        fs::create_dir_all(&dir).map_err(|err| store_error("create", &dir, err))?;

        let staging = Self::write_staging(&dir, &contents)
            .map_err(|err| store_error("stage in", &dir, err))?;
        let target = self.field_path(hash, field);
        let outcome = fs::hard_link(&staging, &target);
        if let Err(err) = fs::remove_file(&staging) {
            warn!("Failed to remove staging file {}: {err}", staging.display());
        }

        match outcome {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(store_error("publish", &target, err)),
        }
    }

    fn get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let path = self.field_path(hash, field);
        match Self::read_entry(&path)? {
            None => Ok(None),
            Some((stored, value)) if stored == field => Ok(Some(value)),
            Some((stored, _)) => Err(LockyardError::Store(format!(
                "{} holds field '{stored}', expected '{field}'",
                path.display()
            ))),
        }
    }

    fn remove(&self, hash: &str, field: &str) -> Result<bool> {
        let path = self.field_path(hash, field);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(store_error("remove", &path, err)),
        }
    }

    fn entries(&self, hash: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let dir = self.hash_dir(hash);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(store_error("list", &dir, err)),
        };

        let mut entries = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|err| store_error("list", &dir, err))?;
            let is_field = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(FIELD_SUFFIX));
            if !is_field {
                continue;
            }
            match Self::read_entry(&entry.path()) {
                Ok(Some(field_and_value)) => entries.push(field_and_value),
                Ok(None) => {}
                Err(LockyardError::Store(details)) => warn!("Skipping field file: {details}"),
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    fn sweep_artifacts(&self, hash: &str, older_than: Duration) -> Result<usize> {
        let dir = self.hash_dir(hash);
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(store_error("list", &dir, err)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in listing.flatten() {
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if !is_staging {
                continue;
            }

            let path = entry.path();
            let age = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale staging file {}", path.display());
                    removed += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove staging file {}: {err}", path.display()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn claim_is_exclusive_and_readable() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());

        assert!(store.put_if_absent("reg", "a/b:c", b"first").unwrap());
        assert!(!store.put_if_absent("reg", "a/b:c", b"second").unwrap());
        assert_eq!(store.get("reg", "a/b:c").unwrap().unwrap(), b"first");
        assert_eq!(store.get("reg", "missing").unwrap(), None);
    }

    #[test]
    fn staging_files_are_cleaned_after_publish() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        store.put_if_absent("reg", "a", b"x").unwrap();
        store.put_if_absent("reg", "a", b"y").unwrap();

        let names: Vec<String> = fs::read_dir(store.hash_dir("reg"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.lock", digest("a"))]);
    }

    #[test]
    fn entries_decode_field_names() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        store.put_if_absent("reg", "one", b"1").unwrap();
        store.put_if_absent("reg", "two", b"2").unwrap();
        fs::write(store.hash_dir("reg").join("README"), b"ignored").unwrap();
        fs::write(store.hash_dir("reg").join("truncated.lock"), [0, 9, b'x']).unwrap();

        let mut entries = store.entries("reg").unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("one".to_string(), b"1".to_vec()),
                ("two".to_string(), b"2".to_vec())
            ]
        );
        assert!(store.entries("unknown").unwrap().is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        store.put_if_absent("reg", "a", b"x").unwrap();
        assert!(store.remove("reg", "a").unwrap());
        assert!(!store.remove("reg", "a").unwrap());
    }

    #[test]
    fn sweep_removes_only_old_staging_files() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        store.put_if_absent("reg", "a", b"x").unwrap();
        let leftover = store.hash_dir("reg").join(format!("{STAGING_PREFIX}crashed"));
        fs::write(&leftover, b"partial").unwrap();

        assert_eq!(
            store
                .sweep_artifacts("reg", Duration::from_secs(3600))
                .unwrap(),
            0
        );
        assert_eq!(store.sweep_artifacts("reg", Duration::ZERO).unwrap(), 1);
        assert!(!leftover.exists());
        assert!(store.get("reg", "a").unwrap().is_some());
    }

    #[test]
    fn long_fields_fit_in_file_names() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        let field = "k".repeat(255);

        assert!(store.put_if_absent("reg", &field, b"held").unwrap());
        assert!(!store.put_if_absent("reg", &field, b"other").unwrap());
        assert_eq!(store.get("reg", &field).unwrap().unwrap(), b"held");
        assert_eq!(
            store.entries("reg").unwrap(),
            vec![(field.clone(), b"held".to_vec())]
        );
        assert!(store.remove("reg", &field).unwrap());
    }

    #[test]
    fn oversized_field_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = FileKeyedStore::new(temp.path());
        let field = "k".repeat(usize::from(u16::MAX) + 1);

        let err = store.put_if_absent("reg", &field, b"x").unwrap_err();
        assert!(matches!(err, LockyardError::StoreRejected(_)));
    }

    #[test]
    fn entry_layout_round_trips() {
        let contents = encode_entry("jobs/7", b"\x00\x01").unwrap();
        assert_eq!(&contents[..2], &[0, 6]);
        assert_eq!(
            split_entry(&contents),
            Some(("jobs/7".to_string(), vec![0, 1]))
        );
        assert_eq!(split_entry(&[0]), None);
        assert_eq!(split_entry(&[0, 4, b'a']), None);
    }
}
