//! # jar-viewer
//!
//! Browse the entries of a Java archive and view decompiled classes or text
//! resources as tabs.
//!
//! ## Architecture
//!
//! - **archive**: Archive loading, display ordering of entries, tree building
//! - **tree**: Arena-backed name tree of archive entries
//! - **resolve**: Selection to tab content, with size and binary guards
//! - **classify**: Text-versus-binary policy for resources
//! - **tabs**: Open tabs keyed by display name
//! - **session**: Per-window state machine, background tasks, status
//! - **cfr**: Decompiler trait and the CFR subprocess bridge
//! - **cache**: Persistent LMDB cache of decompiled sources
//! - **config**: Limits and path resolution
//! - **cli**: Command-line definition
//! - **error**: User-facing error kinds

pub mod archive;
pub mod cache;
pub mod cfr;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolve;
pub mod session;
pub mod tabs;
pub mod tree;
