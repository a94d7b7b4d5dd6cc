use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::types::RevNum;

use super::{Blob, ContentHash, PushOp, StorageError, StoragePath, StoredRevision, TransactionError};

/// Immutable state of a file store at one revision.
///
/// Every path maps to a blob that is present in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    rev_num: RevNum,
    blobs: HashMap<ContentHash, Blob>,
    paths: HashMap<StoragePath, ContentHash>,
}

/// Serializable export of a [`FileSnapshot`], sorted for stable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshotV1 {
    pub rev_num: RevNum,
    pub blobs: Vec<Blob>,
    pub paths: Vec<(StoragePath, ContentHash)>,
}

impl FileSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rev_num(&self) -> RevNum {
        self.rev_num
    }

    pub fn has_blob(&self, hash: &ContentHash) -> bool {
        self.blobs.contains_key(hash)
    }

    pub fn blob(&self, hash: &ContentHash) -> Option<&Blob> {
        self.blobs.get(hash)
    }

    pub fn has_path(&self, path: &StoragePath) -> bool {
        self.paths.contains_key(path)
    }

    pub fn path_hash(&self, path: &StoragePath) -> Option<ContentHash> {
        self.paths.get(path).copied()
    }

    pub fn path_blob(&self, path: &StoragePath) -> Option<&Blob> {
        self.paths.get(path).and_then(|hash| self.blobs.get(hash))
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Strict descendants of `prefix`, sorted.
    pub fn paths_with_prefix(&self, prefix: &StoragePath) -> Vec<&StoragePath> {
        let mut out: Vec<&StoragePath> = self.paths.keys().filter(|path| path.is_under(prefix)).collect();
        out.sort();
        out
    }

    /// Applies `pushes` atomically and advances the revision by one.
    pub fn with_pushes(&self, pushes: &[PushOp]) -> Result<Self, TransactionError> {
        let mut next = self.clone();
        let mut deleted_blobs = Vec::new();

        for push in pushes.iter().filter(|push| push.is_deletion()) {
            match push {
                PushOp::DeleteBlob { hash } => {
                    next.blobs.remove(hash);
                    deleted_blobs.push(*hash);
                }
                PushOp::DeletePath { path } => {
                    next.paths.remove(path);
                }
                PushOp::DeletePathPrefix { prefix } => {
                    next.paths.retain(|path, _| !path.is_under(prefix));
                }
                PushOp::DeleteAll => {
                    next.paths.clear();
                    next.blobs.clear();
                }
                PushOp::WriteBlob { .. } | PushOp::WritePath { .. } => {
                    unreachable!("writes are filtered out of the deletion pass")
                }
            }
        }

        for push in pushes.iter().filter(|push| !push.is_deletion()) {
            match push {
                PushOp::WriteBlob { blob } => {
                    next.blobs.insert(blob.hash(), blob.clone());
                }
                PushOp::WritePath { path, blob } => {
                    next.blobs.insert(blob.hash(), blob.clone());
                    next.paths.insert(path.clone(), blob.hash());
                }
                _ => unreachable!("deletions are filtered out of the write pass"),
            }
        }

        if !deleted_blobs.is_empty() {
            let referenced: HashSet<ContentHash> = next.paths.values().copied().collect();
            if let Some(hash) = deleted_blobs
                .into_iter()
                .find(|hash| referenced.contains(hash) && !next.blobs.contains_key(hash))
            {
                return Err(TransactionError::BlobInUse(hash));
            }
        }

        next.rev_num = self.rev_num + 1;
        Ok(next)
    }

    /// Re-applies a journaled revision on top of this snapshot.
    pub fn apply_revision(&self, revision: &StoredRevision) -> Result<Self, TransactionError> {
        let next = self.with_pushes(&revision.pushes)?;
        debug_assert_eq!(next.rev_num, revision.rev_num);
        Ok(next)
    }

    pub fn export(&self) -> FileSnapshotV1 {
        let mut blobs: Vec<Blob> = self.blobs.values().cloned().collect();
        blobs.sort_by_key(Blob::hash);
        let mut paths: Vec<(StoragePath, ContentHash)> =
            self.paths.iter().map(|(path, hash)| (path.clone(), *hash)).collect();
        paths.sort();
        FileSnapshotV1 {
            rev_num: self.rev_num,
            blobs,
            paths,
        }
    }

    /// Rebuilds a snapshot, rejecting paths whose blob is missing.
    pub fn import(export: FileSnapshotV1) -> Result<Self, StorageError> {
        let blobs: HashMap<ContentHash, Blob> =
            export.blobs.into_iter().map(|blob| (blob.hash(), blob)).collect();
        let mut paths = HashMap::with_capacity(export.paths.len());
        for (path, hash) in export.paths {
            if !blobs.contains_key(&hash) {
                return Err(StorageError::BadValue(format!(
                    "snapshot maps {path} to missing blob {hash}"
                )));
            }
            paths.insert(path, hash);
        }
        Ok(Self {
            rev_num: export.rev_num,
            blobs,
            paths,
        })
    }
}
