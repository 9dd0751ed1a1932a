//! Persistent cache of decompiled sources.
//!
//! Uses LMDB (via heed). Keys combine an archive fingerprint, the class's
//! binary name, and a fingerprint of the decompiler settings, so a rebuilt
//! archive or a settings change never serves stale output.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::cfr::DecompilerSettings;

pub const SOURCES_DB: &str = "sources";

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 4;

type StrDb = Database<Str, Str>;

#[derive(Debug)]
pub struct SourceCache {
    env: Env,
    db_path: PathBuf,
    sources: StrDb,
}

impl SourceCache {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let env = open_env(&db_path)?;
        let mut wtxn = env.write_txn()?;
        let sources = env.create_database::<Str, Str>(&mut wtxn, Some(SOURCES_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            sources,
        })
    }

    pub fn get_source(&self, key: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.sources.get(&rtxn, key)?.map(|v| v.to_string()))
    }

    pub fn put_source(&self, key: &str, source: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.sources.put(&mut wtxn, key, source)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rtxn = self.env.read_txn()?;
        let (source_entries, source_bytes) = table_usage(&self.sources, &rtxn)?;
        Ok(CacheStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            source_entries,
            source_bytes,
        })
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: We do not use NO_LOCK and keep default LMDB locking guarantees.
    // NO_SUB_DIR keeps --db a single file path.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

fn table_usage(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<(u64, u64)> {
    let mut count = 0u64;
    let mut bytes = 0u64;
    for item in db.iter(rtxn)? {
        let (_, v) = item?;
        count += 1;
        bytes += v.len() as u64;
    }
    Ok((count, bytes))
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub db_path: String,
    pub source_entries: u64,
    pub source_bytes: u64,
}

pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity of an archive on disk: canonical path, length, and mtime.
pub fn archive_fingerprint(path: &Path) -> Result<String> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
    let meta = std::fs::metadata(&canonical)
        .with_context(|| format!("Failed to stat: {}", canonical.display()))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(hash_content(&format!(
        "{}|{}|{}",
        canonical.to_string_lossy(),
        meta.len(),
        mtime
    )))
}

pub fn settings_fingerprint(settings: &DecompilerSettings) -> Result<String> {
    Ok(hash_content(&serde_json::to_string(settings)?))
}

pub fn source_key(archive_fingerprint: &str, binary_name: &str, settings_fingerprint: &str) -> String {
    format!("{archive_fingerprint}::{binary_name}::{settings_fingerprint}")
}
