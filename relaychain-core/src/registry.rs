//! Membership registry
//!
//! A plain-text directory of `(username, public key)` pairs, one per line:
//!
//! ```text
//! alice, MCowBQYDK2VuAyEA...
//! ```
//!
//! Entries are only ever appended. Uniqueness is on the exact pair, so a user
//! who re-registers with a new key gains a second line. Lookups are linear.

use crate::ledger::{decode_base64, encode_base64, StoreError, StoreResult};
use crate::metrics::REGISTRY_MEMBERS_ADDED;
use metrics::counter;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const SEPARATOR: &str = ", ";

/// One registered identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub username: String,
    pub public_key: Vec<u8>,
}

/// Split a registry line into username and encoded key
///
/// Splits on the last separator: base64 never contains ", " but usernames may.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let (username, encoded) = line.trim_end_matches(['\r', '\n']).rsplit_once(SEPARATOR)?;
    if username.is_empty() || encoded.is_empty() {
        return None;
    }
    Some((username, encoded))
}

/// Durable, deduplicated member list
pub struct MembershipRegistry {
    path: PathBuf,
    // Serializes the read-check-append sequence of `store`
    guard: Mutex<()>,
}

impl MembershipRegistry {
    /// Open (creating if needed) the member list at `path`
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(MembershipRegistry {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `(username, public_key)` unless the exact pair is already present
    ///
    /// Returns `true` when a new entry was written.
    pub fn store(&self, username: &str, public_key: &[u8]) -> StoreResult<bool> {
        if username.is_empty() || username.contains(['\r', '\n']) {
            return Err(StoreError::InvalidMember(format!(
                "unusable username {:?}",
                username
            )));
        }
        if public_key.is_empty() {
            return Err(StoreError::InvalidMember("empty public key".to_string()));
        }

        let encoded = encode_base64(public_key);
        let _guard = self
            .guard
            .lock()
            .map_err(|_| StoreError::Poisoned("membership registry"))?;

        let contents = self.read_contents()?;
        let known = contents
            .lines()
            .filter_map(split_line)
            .any(|(name, key)| name == username && key == encoded);
        if known {
            debug!(username, "Member already registered");
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = String::new();
        if !contents.is_empty() && !contents.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&format!("{}{}{}\n", username, SEPARATOR, encoded));
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        counter!(REGISTRY_MEMBERS_ADDED).increment(1);
        info!(username, "Registered new member");
        Ok(true)
    }

    /// All well-formed entries, in file order
    pub fn entries(&self) -> StoreResult<Vec<MemberEntry>> {
        let contents = self.read_contents()?;
        let entries = contents
            .lines()
            .filter_map(|line| {
                let (username, encoded) = split_line(line)?;
                match decode_base64(encoded) {
                    Ok(public_key) => Some(MemberEntry {
                        username: username.to_string(),
                        public_key,
                    }),
                    Err(e) => {
                        debug!(error = %e, "Skipping registry line with undecodable key");
                        None
                    }
                }
            })
            .collect();
        Ok(entries)
    }

    fn read_contents(&self) -> StoreResult<String> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn open_registry(dir: &Path) -> MembershipRegistry {
        MembershipRegistry::open(dir.join("members.txt")).unwrap()
    }

    #[test]
    fn test_store_is_idempotent_for_identical_pair() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());

        assert!(registry.store("alice", b"key-a").unwrap());
        assert!(!registry.store("alice", b"key-a").unwrap());

        let entries = registry.entries().unwrap();
        assert_eq!(
            entries,
            vec![MemberEntry {
                username: "alice".into(),
                public_key: b"key-a".to_vec(),
            }]
        );
    }

    #[test]
    fn test_same_username_new_key_adds_entry() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());

        registry.store("alice", b"key-a").unwrap();
        registry.store("alice", b"key-b").unwrap();
        registry.store("bob", b"key-a").unwrap();

        assert_eq!(registry.entries().unwrap().len(), 3);
    }

    #[test]
    fn test_line_format() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        registry.store("alice", b"\x01\x02\x03").unwrap();

        let contents = fs::read_to_string(registry.path()).unwrap();
        assert_eq!(contents, "alice, AQID\n");
    }

    #[test]
    fn test_username_with_separator_round_trips() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        registry.store("smith, john", b"key").unwrap();
        assert!(!registry.store("smith, john", b"key").unwrap());

        let entries = registry.entries().unwrap();
        assert_eq!(entries[0].username, "smith, john");
        assert_eq!(entries[0].public_key, b"key");
    }

    #[test]
    fn test_rejects_unwritable_entries() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        assert!(matches!(
            registry.store("eve\nmallory", b"k"),
            Err(StoreError::InvalidMember(_))
        ));
        assert!(matches!(registry.store("", b"k"), Err(StoreError::InvalidMember(_))));
        assert!(matches!(
            registry.store("eve", b""),
            Err(StoreError::InvalidMember(_))
        ));
        assert!(registry.entries().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("members.txt");
        fs::write(&path, "garbage\n\nbob, !!!notbase64\nalice, AQID").unwrap();

        let registry = MembershipRegistry::open(&path).unwrap();
        assert_eq!(registry.entries().unwrap().len(), 1);

        // Appending after a line without terminator keeps lines separate
        registry.store("carol", b"\x04").unwrap();
        let names: Vec<String> = registry
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_concurrent_registration_of_same_pair() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(open_registry(dir.path()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.store("alice", b"key-a").unwrap())
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|new| *new)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(registry.entries().unwrap().len(), 1);
    }
}
