//! Raw-data identity fingerprinting.
//!
//! The cache key is derived from what the input *is* (file names, sizes,
//! modification times), never from when the pipeline ran. Identical raw
//! inputs therefore always hit the same cache entry.

use crate::error::PipelineResult;
use anyhow::Context;
use std::path::Path;
use std::time::UNIX_EPOCH;
use uuid::Uuid;

/// Fixed namespace for v5 hashing; changing it invalidates every cache.
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_a8d2_49e3_4b07_9a55_d310_72c8_e914);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataFingerprint(String);

impl DataFingerprint {
    /// Fingerprint a set of raw source files from their metadata.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> PipelineResult<Self> {
        let mut parts = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let meta = std::fs::metadata(path)
                .with_context(|| format!("cannot stat raw input {}", path.display()))?;
            let mtime = meta
                .modified()
                .with_context(|| format!("no mtime for {}", path.display()))?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            parts.push((path.display().to_string(), meta.len(), mtime));
        }
        Ok(Self::from_parts(parts))
    }

    /// Fingerprint explicit (name, length, mtime) triples. Order of the
    /// input does not matter; parts are sorted before hashing.
    pub fn from_parts(mut parts: Vec<(String, u64, u64)>) -> Self {
        parts.sort();
        let mut material = String::new();
        for (name, len, mtime) in &parts {
            material.push_str(name);
            material.push('\x1f');
            material.push_str(&len.to_string());
            material.push('\x1f');
            material.push_str(&mtime.to_string());
            material.push('\n');
        }
        let id = Uuid::new_v5(&FINGERPRINT_NAMESPACE, material.as_bytes());
        Self(id.to_string())
    }

    /// Wrap an already-computed fingerprint string (store reads).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DataFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
