//! Errors reported to the user through the status label.
//!
//! Each variant renders as the exact status text shown for it, so front ends
//! can display `err.to_string()` without further formatting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("File not found: {name}")]
    EntryNotFound { name: String },

    #[error("File is too large: {name} - size: {}", readable_size(*.size))]
    FileTooLarge { name: String, size: u64 },

    #[error("Binary resource: {name}")]
    BinaryResource { name: String },

    #[error("Cannot open: {name}")]
    Extraction {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cannot open: {name}")]
    Open {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Load already in progress: {name}")]
    LoadInProgress { name: String },
}

impl ViewError {
    pub fn extraction(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Extraction {
            name: name.into(),
            source,
        }
    }

    /// Failures that get a dialog on top of the status.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Extraction { .. })
    }
}

/// Formats a byte count with 1024-based units, e.g. `1.5 MB`.
pub fn readable_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if size < 1024 {
        return format!("{size} B");
    }

    let mut value = size as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
