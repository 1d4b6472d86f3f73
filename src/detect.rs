//! Incremental change detection.
//!
//! Compares the remembered per-document fingerprints against a fresh remote
//! listing. A remote file is `new` when its name is unknown, `updated` when
//! its fingerprint differs, and omitted when the fingerprint matches. Known
//! documents missing from the listing are `deleted`.
//!
//! [`detect`] is pure: it never mutates the known-document map.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{Document, RemoteFile};

/// Classification of one remote listing against the known documents.
///
/// `new` and `updated` keep the order of the remote listing; `deleted`
/// follows the iteration order of the known map (sorted by name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub new: Vec<RemoteFile>,
    pub updated: Vec<RemoteFile>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// Number of files that need processing (new + updated).
    pub fn pending(&self) -> usize {
        self.new.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub fn detect(remote: &[RemoteFile], known: &BTreeMap<String, Document>) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for file in remote {
        match known.get(&file.name) {
            None => changes.new.push(file.clone()),
            Some(doc) if doc.fingerprint != file.fingerprint => {
                changes.updated.push(file.clone())
            }
            Some(_) => {}
        }
    }

    let remote_names: HashSet<&str> = remote.iter().map(|f| f.name.as_str()).collect();
    changes.deleted = known
        .keys()
        .filter(|name| !remote_names.contains(name.as_str()))
        .cloned()
        .collect();

    changes
}
