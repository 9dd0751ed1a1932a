use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::cfr::DecompilerSettings;
use crate::cli::Cli;

pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 1_000_000_000;
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 1_000_000;

/// Size guards applied before anything is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Upper bound for the opened file as a whole.
    pub max_archive_bytes: u64,
    /// Upper bound for a single entry (or a lone opened file) shown in a tab.
    pub max_entry_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }
}

pub fn resolve_limits(cli: &Cli) -> Limits {
    let defaults = Limits::default();
    Limits {
        max_archive_bytes: cli.max_archive_size.unwrap_or(defaults.max_archive_bytes),
        max_entry_bytes: cli.max_entry_size.unwrap_or(defaults.max_entry_bytes),
    }
}

pub fn resolve_settings(cli: &Cli) -> Result<DecompilerSettings> {
    let mut settings = DecompilerSettings {
        comments: cli.comments,
        show_version: !cli.hide_version,
        ..DecompilerSettings::default()
    };
    for raw in cli.cfr_option.iter() {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("CFR option must look like KEY=VALUE: {raw}"))?;
        settings.set(key.trim(), value.trim())?;
    }
    Ok(settings)
}

/// `None` when the source cache is disabled.
pub fn resolve_db_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if cli.no_cache {
        return Ok(None);
    }
    if let Some(p) = cli.db.clone() {
        return Ok(Some(p));
    }

    Ok(Some(jar_viewer_home()?.join("sources.lmdb")))
}

pub fn resolve_cfr_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.cfr.clone() {
        return Ok(p);
    }

    if let Ok(p) = env::var("CFR_JAR") {
        return Ok(PathBuf::from(p));
    }

    let default_path = jar_viewer_home()?.join("tools").join("cfr.jar");
    if default_path.exists() {
        return Ok(default_path);
    }

    install_cfr_if_missing(&default_path)?;
    Ok(default_path)
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

fn jar_viewer_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("jar-viewer"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}

fn install_cfr_if_missing(target_path: &Path) -> Result<()> {
    if target_path.exists() {
        return Ok(());
    }

    let url = "https://github.com/leibnitz27/cfr/releases/download/0.152/cfr-0.152.jar";
    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    tracing::info!(target = %target_path.display(), "CFR not found, downloading");
    let status = std::process::Command::new("curl")
        .args([
            "-L",
            "--fail",
            "--silent",
            "--show-error",
            "-o",
            target_path
                .to_str()
                .context("cfr.jar target path is not valid UTF-8")?,
            url,
        ])
        .status()
        .context(
            "Failed to execute curl (ensure curl is installed, or use --cfr to specify cfr.jar)",
        )?;

    if !status.success() {
        anyhow::bail!("Failed to download CFR. You can use --cfr to specify local cfr.jar");
    }

    Ok(())
}
