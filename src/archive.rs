//! Archive loading: entry enumeration, display ordering, and the name tree.
//!
//! Archives are memory-mapped and read through `zip`; the reader is kept for
//! the lifetime of the [`LoadedArchive`] so extraction never reopens the file.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::Limits;
use crate::error::ViewError;
use crate::tree::ArchiveTree;

const META_INF: &str = "META-INF";
const ARCHIVE_SUFFIXES: [&str; 2] = [".jar", ".zip"];

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

enum Backing {
    Zip(Mutex<ZipArchive<Cursor<Mmap>>>),
    /// A lone file (usually a `.class`) shown as a single root node.
    Single,
}

pub struct LoadedArchive {
    path: PathBuf,
    file_name: String,
    len: u64,
    entries: Vec<ArchiveEntry>,
    tree: ArchiveTree,
    backing: Backing,
}

impl std::fmt::Debug for LoadedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArchive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("nodes", &self.tree.len())
            .finish()
    }
}

impl LoadedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn tree(&self) -> &ArchiveTree {
        &self.tree
    }

    /// Non-directory entries in display order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn is_single_file(&self) -> bool {
        matches!(self.backing, Backing::Single)
    }

    /// Length of the loaded file itself.
    pub fn file_len(&self) -> u64 {
        self.len
    }

    /// Central-directory record for `path`, directories included.
    pub fn entry(&self, path: &str) -> Option<ArchiveEntry> {
        let Backing::Zip(archive) = &self.backing else {
            return None;
        };
        let mut archive = archive.lock().unwrap_or_else(PoisonError::into_inner);
        let file = archive.by_name(path).ok()?;
        Some(ArchiveEntry {
            path: file.name().to_string(),
            size: file.size(),
            is_dir: file.is_dir(),
        })
    }

    pub fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        let Backing::Zip(archive) = &self.backing else {
            anyhow::bail!("{} is not an archive", self.path.display());
        };
        let mut archive = archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = archive
            .by_name(path)
            .with_context(|| format!("Failed to locate entry: {path}"))?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .with_context(|| format!("Failed to read entry: {path}"))?;
        Ok(buf)
    }

    /// Reads the loaded file itself from disk.
    pub fn read_self(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).with_context(|| format!("Failed to read: {}", self.path.display()))
    }
}

pub fn is_archive_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ARCHIVE_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Opens `path` and builds its tree. Refuses files above `limits.max_archive_bytes`.
pub fn load_archive(path: &Path, limits: &Limits) -> Result<LoadedArchive, ViewError> {
    let file_name = file_name_of(path);
    let open_err = |source: anyhow::Error| ViewError::Open {
        name: file_name.clone(),
        source,
    };

    let len = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat: {}", path.display()))
        .map_err(open_err)?
        .len();
    if len > limits.max_archive_bytes {
        return Err(ViewError::FileTooLarge {
            name: file_name,
            size: len,
        });
    }

    if !is_archive_name(&file_name) {
        return Ok(LoadedArchive {
            path: path.to_path_buf(),
            tree: ArchiveTree::new(file_name.clone()),
            file_name,
            len,
            entries: Vec::new(),
            backing: Backing::Single,
        });
    }

    let mut archive = open_zip(path).map_err(open_err)?;
    let raw = list_entries(&mut archive).map_err(open_err)?;
    let names: Vec<String> = raw.iter().map(|e| e.path.clone()).collect();
    let ordered = order_entries(&names);

    let mut by_path: HashMap<String, ArchiveEntry> =
        raw.into_iter().map(|e| (e.path.clone(), e)).collect();
    let entries: Vec<ArchiveEntry> = ordered.iter().filter_map(|n| by_path.remove(n)).collect();

    let tree = build_tree(&file_name, &ordered);
    tracing::info!(
        archive = %path.display(),
        entries = entries.len(),
        nodes = tree.len(),
        "archive loaded"
    );

    Ok(LoadedArchive {
        path: path.to_path_buf(),
        file_name,
        len,
        entries,
        tree,
        backing: Backing::Zip(Mutex::new(archive)),
    })
}

fn open_zip(path: &Path) -> Result<ZipArchive<Cursor<Mmap>>> {
    let file = File::open(path).with_context(|| format!("Failed to open archive: {}", path.display()))?;
    // SAFETY: The file is opened read-only; the mapping owns its own handle and
    // stays valid for as long as the archive reader holds it.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap archive: {}", path.display()))?;
    ZipArchive::new(Cursor::new(mmap))
        .with_context(|| format!("Failed to read zip structure: {}", path.display()))
}

fn list_entries(archive: &mut ZipArchive<Cursor<Mmap>>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = match archive.by_index_raw(i) {
            Ok(entry) => entry,
            Err(ZipError::UnsupportedArchive(msg)) => {
                tracing::warn!(index = i, "skipping unsupported entry: {msg}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if entry.is_dir() {
            continue;
        }
        entries.push(ArchiveEntry {
            path: entry.name().to_string(),
            size: entry.size(),
            is_dir: false,
        });
    }
    Ok(entries)
}

/// Orders entry names for display: `META-INF` content first, then files
/// grouped by their directory with deeper directories before shallower ones,
/// then top-level files. Every input name appears exactly once.
pub fn order_entries<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut sorted: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
    sorted.sort_by(|a, b| case_insensitive_cmp(a, b));

    let mut seen: HashSet<&str> = HashSet::with_capacity(sorted.len());
    let mut ordered = Vec::with_capacity(sorted.len());

    for &name in sorted.iter() {
        if is_meta_inf(name) && seen.insert(name) {
            ordered.push(name.to_string());
        }
    }

    let dirs: BTreeSet<&str> = sorted.iter().filter_map(|n| parent_dir(n)).collect();
    let mut dirs: Vec<&str> = dirs.into_iter().collect();
    dirs.sort_by(|a, b| case_insensitive_cmp(a, b));
    dirs.sort_by_key(|d| std::cmp::Reverse(depth(d)));

    for dir in dirs {
        for &name in sorted.iter() {
            if parent_dir(name) == Some(dir) && !is_meta_inf(name) && seen.insert(name) {
                ordered.push(name.to_string());
            }
        }
    }

    for &name in sorted.iter() {
        if parent_dir(name).is_none() && seen.insert(name) {
            ordered.push(name.to_string());
        }
    }

    ordered
}

/// Builds the name tree from already ordered entry paths.
pub fn build_tree<S: AsRef<str>>(root_name: &str, ordered: &[S]) -> ArchiveTree {
    let mut tree = ArchiveTree::new(root_name);
    for path in ordered {
        let segments = split_entry_path(path.as_ref());
        if !segments.is_empty() {
            tree.insert_path(&segments);
        }
    }
    tree
}

/// Splits an entry path on `/`. Empty segments inside the path are kept, so
/// `a/b.txt` and `a//b.txt` stay distinct; trailing empty segments are dropped.
pub fn split_entry_path(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    segments
}

/// Directory part of `name` including the trailing slash, if any.
fn parent_dir(name: &str) -> Option<&str> {
    name.rfind('/').map(|i| &name[..=i])
}

fn depth(dir: &str) -> usize {
    dir.split('/').filter(|s| !s.is_empty()).count()
}

fn is_meta_inf(name: &str) -> bool {
    match name.rfind('/') {
        Some(i) => name[..i].split('/').any(|s| s == META_INF),
        None => false,
    }
}

/// Char-wise comparison folding case through upper then lower case. A char
/// whose upper case is not a single char (`ß`) is left as it is.
pub fn case_insensitive_cmp(a: &str, b: &str) -> Ordering {
    let fold = |c: char| -> char {
        let mut upper = c.to_uppercase();
        let upper = match (upper.next(), upper.next()) {
            (Some(u), None) => u,
            _ => c,
        };
        upper.to_lowercase().next().unwrap_or(upper)
    };
    a.chars().map(fold).cmp(b.chars().map(fold))
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}
