use crate::core::fingerprint::VideoFingerprint;
use crate::core::hash::VideoId;
use crate::core::video::MediaInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Cache entry is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a cache hit saves: the probe result and the extracted fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFingerprint {
    pub media: MediaInfo,
    pub fingerprint: VideoFingerprint,
}

/// Persistent store of fingerprints, shared by extraction workers.
pub trait FingerprintCache: Send + Sync {
    fn read_fingerprint(&self, id: &VideoId) -> Result<Option<CachedFingerprint>, CacheError>;
    fn write_fingerprint(&self, id: &VideoId, entry: &CachedFingerprint)
    -> Result<(), CacheError>;
    fn remove(&self, id: &VideoId) -> Result<(), CacheError>;
}

pub struct SledCache {
    db: sled::Db,
}

impl SledCache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }
}

impl FingerprintCache for SledCache {
    fn read_fingerprint(&self, id: &VideoId) -> Result<Option<CachedFingerprint>, CacheError> {
        match self.db.get(id.as_str())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_fingerprint(
        &self,
        id: &VideoId,
        entry: &CachedFingerprint,
    ) -> Result<(), CacheError> {
        self.db.insert(id.as_str(), serde_json::to_vec(entry)?)?;
        Ok(())
    }

    fn remove(&self, id: &VideoId) -> Result<(), CacheError> {
        self.db.remove(id.as_str())?;
        Ok(())
    }
}

/// In-process cache, used when persistence is disabled.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<VideoId, CachedFingerprint>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FingerprintCache for MemoryCache {
    fn read_fingerprint(&self, id: &VideoId) -> Result<Option<CachedFingerprint>, CacheError> {
        Ok(self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(id).cloned()))
    }

    fn write_fingerprint(
        &self,
        id: &VideoId,
        entry: &CachedFingerprint,
    ) -> Result<(), CacheError> {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(id.clone(), entry.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &VideoId) -> Result<(), CacheError> {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(id);
        }
        Ok(())
    }
}
