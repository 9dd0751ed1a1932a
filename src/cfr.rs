//! Decompiler bridge.
//!
//! [`Decompiler`] is the seam the resolver calls through; [`Cfr`] implements
//! it by running `java -jar cfr.jar` as a subprocess.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Options forwarded to the decompiler. Shared behind a lock by the session so
/// a change never lands in the middle of a decompilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecompilerSettings {
    pub comments: bool,
    pub show_version: bool,
    /// Additional `--key value` pairs.
    pub extra: BTreeMap<String, String>,
}

impl Default for DecompilerSettings {
    fn default() -> Self {
        Self {
            comments: false,
            show_version: true,
            extra: BTreeMap::new(),
        }
    }
}

impl DecompilerSettings {
    /// Applies a named option; `comments` and `showversion` map onto the typed
    /// fields, anything else lands in `extra`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim_start_matches("--");
        if key.is_empty() {
            bail!("empty decompiler option name");
        }
        match key {
            "comments" => self.comments = parse_flag(value)?,
            "showversion" => self.show_version = parse_flag(value)?,
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--silent".to_string(),
            "true".to_string(),
            "--comments".to_string(),
            self.comments.to_string(),
            "--showversion".to_string(),
            self.show_version.to_string(),
        ];
        for (k, v) in self.extra.iter() {
            args.push(format!("--{k}"));
            args.push(v.clone());
        }
        args
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

/// What to decompile.
#[derive(Debug, Clone, Copy)]
pub enum ClassSource<'a> {
    /// A class inside an archive, by slash-separated binary name.
    Archive {
        archive: &'a Path,
        binary_name: &'a str,
    },
    /// A standalone `.class` file.
    File(&'a Path),
}

impl ClassSource<'_> {
    pub fn describe(&self) -> String {
        match self {
            ClassSource::Archive { binary_name, .. } => binary_name.to_string(),
            ClassSource::File(path) => path.display().to_string(),
        }
    }
}

pub trait Decompiler: Send + Sync {
    fn decompile(&self, source: ClassSource<'_>, settings: &DecompilerSettings) -> Result<String>;
}

fn java_command(args: &[String]) -> Result<std::process::Output> {
    let java_bin = std::env::var("JAR_VIEWER_JAVA").unwrap_or_else(|_| "java".to_string());

    #[cfg(windows)]
    {
        let lower = java_bin.to_ascii_lowercase();
        if lower.ends_with(".cmd") || lower.ends_with(".bat") {
            return Command::new("cmd")
                .arg("/C")
                .arg(&java_bin)
                .args(args)
                .output()
                .context("Failed to execute java (ensure JRE/JDK is installed)");
        }
    }

    Command::new(&java_bin)
        .args(args)
        .output()
        .context("Failed to execute java (ensure JRE/JDK is installed)")
}

#[derive(Debug, Clone)]
pub struct Cfr {
    cfr_jar: PathBuf,
}

impl Cfr {
    pub fn new(cfr_jar: PathBuf) -> Self {
        Self { cfr_jar }
    }

    fn build_args(&self, source: ClassSource<'_>, settings: &DecompilerSettings) -> Result<Vec<String>> {
        let mut args = vec![
            "-jar".to_string(),
            self.cfr_jar
                .to_str()
                .context("cfr.jar path is not valid UTF-8")?
                .to_string(),
        ];
        match source {
            ClassSource::Archive {
                archive,
                binary_name,
            } => {
                args.push("--extraclasspath".to_string());
                args.push(
                    archive
                        .to_str()
                        .context("archive path is not valid UTF-8")?
                        .to_string(),
                );
                args.push(binary_name.replace('/', "."));
            }
            ClassSource::File(path) => {
                args.push(
                    path.to_str()
                        .context("class file path is not valid UTF-8")?
                        .to_string(),
                );
            }
        }
        args.extend(settings.to_args());
        Ok(args)
    }
}

impl Decompiler for Cfr {
    fn decompile(&self, source: ClassSource<'_>, settings: &DecompilerSettings) -> Result<String> {
        let args = self.build_args(source, settings)?;
        tracing::debug!(class = %source.describe(), "invoking CFR");
        let output = java_command(&args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("CFR decompilation failed: {}", stderr.trim());
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            bail!("Unable to resolve type: {}", source.describe());
        }
        Ok(text)
    }
}
