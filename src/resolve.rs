//! Entry resolution: selection to tab content.
//!
//! Guards run in a fixed order (existence, size, class-or-text) so an entry
//! over the size limit never reaches the decompiler or the text decoder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::archive::LoadedArchive;
use crate::cache::{SourceCache, archive_fingerprint, settings_fingerprint, source_key};
use crate::cfr::{ClassSource, Decompiler, DecompilerSettings};
use crate::classify::{decode_lines, is_text};
use crate::config::Limits;
use crate::error::ViewError;
use crate::session::Status;

pub const CLASS_SUFFIX: &str = ".class";

/// What a selection points at: the tab title and the path identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub display_name: String,
    pub path: String,
    /// The selection is the tree root, i.e. the opened file itself.
    pub is_root: bool,
}

impl Target {
    /// `selection` runs from the root name down to the selected node.
    pub fn from_selection<S: AsRef<str>>(archive: &LoadedArchive, selection: &[S]) -> Result<Self, ViewError> {
        let target = match selection {
            [] => Self {
                display_name: String::new(),
                path: String::new(),
                is_root: false,
            },
            [_root] => Self {
                display_name: archive.file_name().to_string(),
                path: archive.path().to_string_lossy().replace('\\', "/"),
                is_root: true,
            },
            [_root, rest @ ..] => Self {
                display_name: rest[rest.len() - 1].as_ref().trim().to_string(),
                path: rest
                    .iter()
                    .map(|s| s.as_ref().trim())
                    .collect::<Vec<_>>()
                    .join("/"),
                is_root: false,
            },
        };
        if target.display_name.is_empty() || target.path.is_empty() {
            return Err(ViewError::EntryNotFound {
                name: target.display_name,
            });
        }
        Ok(target)
    }

    pub fn is_class(&self) -> bool {
        self.display_name.ends_with(CLASS_SUFFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Decompiled,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub display_name: String,
    pub path: String,
    pub content: String,
    pub kind: ContentKind,
}

/// Decompiled sources of the current session, keyed by binary name.
#[derive(Debug, Default)]
pub struct TypeMemo {
    sources: Mutex<HashMap<String, String>>,
}

impl TypeMemo {
    pub fn get(&self, binary_name: &str) -> Option<String> {
        self.lock().get(binary_name).cloned()
    }

    pub fn insert(&self, binary_name: &str, source: &str) {
        self.lock().insert(binary_name.to_string(), source.to_string());
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Resolver {
    decompiler: Arc<dyn Decompiler>,
    settings: Arc<Mutex<DecompilerSettings>>,
    cache: Option<Arc<SourceCache>>,
    limits: Limits,
}

impl Resolver {
    pub fn new(
        decompiler: Arc<dyn Decompiler>,
        settings: Arc<Mutex<DecompilerSettings>>,
        cache: Option<Arc<SourceCache>>,
        limits: Limits,
    ) -> Self {
        Self {
            decompiler,
            settings,
            cache,
            limits,
        }
    }

    /// Produces the tab content for `target`. `progress` receives the
    /// `Extracting`/`Opening` status once the guards have passed.
    pub fn resolve(
        &self,
        archive: &LoadedArchive,
        memo: &TypeMemo,
        target: &Target,
        progress: &mut dyn FnMut(Status),
    ) -> Result<Extraction, ViewError> {
        let name = target.display_name.as_str();

        let size = if target.is_root {
            archive.file_len()
        } else {
            match archive.entry(&target.path) {
                Some(entry) if !entry.is_dir => entry.size,
                _ => {
                    return Err(ViewError::EntryNotFound {
                        name: name.to_string(),
                    });
                }
            }
        };
        if size > self.limits.max_entry_bytes {
            return Err(ViewError::FileTooLarge {
                name: name.to_string(),
                size,
            });
        }

        if target.is_class() {
            progress(Status::Extracting(name.to_string()));
            let content = self.decompile(archive, memo, target)?;
            return Ok(Extraction {
                display_name: name.to_string(),
                path: target.path.clone(),
                content,
                kind: ContentKind::Decompiled,
            });
        }

        progress(Status::Opening(name.to_string()));
        let bytes = if target.is_root {
            archive.read_self()
        } else {
            archive.read_entry(&target.path)
        }
        .map_err(|e| ViewError::extraction(name, e))?;

        let decoded = decode_lines(&bytes);
        if !is_text(name, &decoded) {
            return Err(ViewError::BinaryResource {
                name: name.to_string(),
            });
        }
        Ok(Extraction {
            display_name: name.to_string(),
            path: target.path.clone(),
            content: decoded.content,
            kind: ContentKind::Text,
        })
    }

    fn decompile(&self, archive: &LoadedArchive, memo: &TypeMemo, target: &Target) -> Result<String, ViewError> {
        let name = target.display_name.as_str();
        let (binary_name, class_path) = if target.is_root {
            (target.path.clone(), PathBuf::from(archive.path()))
        } else {
            let binary = target
                .path
                .strip_suffix(CLASS_SUFFIX)
                .unwrap_or(&target.path)
                .to_string();
            (binary, archive.path().to_path_buf())
        };

        // Held for the whole call: settings changes wait for us and vice versa.
        let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(source) = memo.get(&binary_name) {
            tracing::debug!(class = %binary_name, "session memo hit");
            return Ok(source);
        }

        let cache_key = self.cache_key(archive, &binary_name, &settings);
        if let (Some(cache), Some(key)) = (self.cache.as_deref(), cache_key.as_deref()) {
            match cache.get_source(key) {
                Ok(Some(source)) => {
                    tracing::debug!(class = %binary_name, "source cache hit");
                    memo.insert(&binary_name, &source);
                    return Ok(source);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("source cache read failed: {e:#}"),
            }
        }

        let source = if target.is_root {
            ClassSource::File(&class_path)
        } else {
            ClassSource::Archive {
                archive: &class_path,
                binary_name: &binary_name,
            }
        };
        let text = self
            .decompiler
            .decompile(source, &settings)
            .map_err(|e| ViewError::extraction(name, e))?;

        memo.insert(&binary_name, &text);
        if let (Some(cache), Some(key)) = (self.cache.as_deref(), cache_key.as_deref())
            && let Err(e) = cache.put_source(key, &text)
        {
            tracing::warn!("source cache write failed: {e:#}");
        }
        Ok(text)
    }

    fn cache_key(&self, archive: &LoadedArchive, binary_name: &str, settings: &DecompilerSettings) -> Option<String> {
        self.cache.as_ref()?;
        let archive_fp = archive_fingerprint(archive.path())
            .map_err(|e| tracing::warn!("cannot fingerprint archive: {e:#}"))
            .ok()?;
        let settings_fp = settings_fingerprint(settings)
            .map_err(|e| tracing::warn!("cannot fingerprint settings: {e:#}"))
            .ok()?;
        Some(source_key(&archive_fp, binary_name, &settings_fp))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingDecompiler;
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use zip::write::{FileOptions, ZipWriter};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("jar_viewer_resolve_{}_{}_{}", std::process::id(), n, name))
    }

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let mut zip = ZipWriter::new(std::fs::File::create(path)?);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default())?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn fixture() -> anyhow::Result<(PathBuf, LoadedArchive)> {
        let jar = temp_path("fixture.jar");
        write_jar(
            &jar,
            &[
                ("org/example/App.class", b"\xca\xfe\xba\xbe"),
                ("org/example/Broken.class", b"\xca\xfe\xba\xbe"),
                ("config/app.properties", b"name=demo\n"),
                ("assets/logo.png", &[0x89, b'P', b'N', b'G', 0, 0, 0, 0, 0xff, 0xfe]),
                ("assets/big.txt", &[b'x'; 64]),
            ],
        )?;
        let loaded = crate::archive::load_archive(&jar, &Limits::default())?;
        Ok((jar, loaded))
    }

    fn resolver(decompiler: Arc<CountingDecompiler>, limits: Limits) -> Resolver {
        Resolver::new(
            decompiler,
            Arc::new(Mutex::new(DecompilerSettings::default())),
            None,
            limits,
        )
    }

    fn select(archive: &LoadedArchive, path: &str) -> Target {
        let mut segments = vec![archive.file_name().to_string()];
        segments.extend(path.split('/').map(str::to_string));
        Target::from_selection(archive, &segments).unwrap()
    }

    #[test]
    fn selection_maps_to_display_name_and_path() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let target = select(&archive, "org/example/App.class");
        assert_eq!(target.display_name, "App.class");
        assert_eq!(target.path, "org/example/App.class");
        assert!(target.is_class());

        let root = Target::from_selection(&archive, &[archive.file_name()])?;
        assert!(root.is_root);
        assert_eq!(root.display_name, archive.file_name());

        assert!(matches!(
            Target::from_selection::<&str>(&archive, &[]),
            Err(ViewError::EntryNotFound { .. })
        ));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn class_entry_is_decompiled_with_binary_name() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let resolver = resolver(decompiler.clone(), Limits::default());
        let memo = TypeMemo::default();
        let mut statuses = Vec::new();

        let out = resolver.resolve(&archive, &memo, &select(&archive, "org/example/App.class"), &mut |s| {
            statuses.push(s)
        })?;
        assert_eq!(out.kind, ContentKind::Decompiled);
        assert!(out.content.starts_with("// org/example/App"));
        assert_eq!(statuses, vec![Status::Extracting("App.class".to_string())]);
        assert_eq!(decompiler.calls(), 1);

        resolver.resolve(&archive, &memo, &select(&archive, "org/example/App.class"), &mut |_| {})?;
        assert_eq!(decompiler.calls(), 1, "memo serves repeated lookups");
        assert_eq!(memo.len(), 1);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn missing_and_directory_paths_are_not_found() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let resolver = resolver(Arc::new(CountingDecompiler::default()), Limits::default());
        let memo = TypeMemo::default();

        for path in ["org/example/Nope.class", "org/example"] {
            let err = resolver
                .resolve(&archive, &memo, &select(&archive, path), &mut |_| {})
                .unwrap_err();
            assert!(matches!(err, ViewError::EntryNotFound { .. }), "{path}");
        }
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn oversized_entry_never_reaches_decompiler_or_reader() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let limits = Limits {
            max_entry_bytes: 3,
            ..Limits::default()
        };
        let resolver = resolver(decompiler.clone(), limits);
        let memo = TypeMemo::default();
        let mut statuses = Vec::new();

        let err = resolver
            .resolve(&archive, &memo, &select(&archive, "org/example/App.class"), &mut |s| {
                statuses.push(s)
            })
            .unwrap_err();
        assert!(matches!(err, ViewError::FileTooLarge { size: 4, .. }));
        assert!(err.to_string().starts_with("File is too large: App.class - size: 4 B"));
        assert_eq!(decompiler.calls(), 0);
        assert!(statuses.is_empty());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn text_and_binary_resources_are_classified() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let resolver = resolver(Arc::new(CountingDecompiler::default()), Limits::default());
        let memo = TypeMemo::default();

        let props = resolver.resolve(&archive, &memo, &select(&archive, "config/app.properties"), &mut |_| {})?;
        assert_eq!(props.kind, ContentKind::Text);
        assert_eq!(props.content, "name=demo\n");

        let err = resolver
            .resolve(&archive, &memo, &select(&archive, "assets/logo.png"), &mut |_| {})
            .unwrap_err();
        assert_eq!(err.to_string(), "Binary resource: logo.png");
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn decompiler_failure_becomes_extraction_error() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let resolver = resolver(Arc::new(CountingDecompiler::default()), Limits::default());
        let memo = TypeMemo::default();
        let err = resolver
            .resolve(&archive, &memo, &select(&archive, "org/example/Broken.class"), &mut |_| {})
            .unwrap_err();
        assert!(err.is_unexpected());
        assert_eq!(err.to_string(), "Cannot open: Broken.class");
        assert!(memo.is_empty());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn lone_class_file_decompiles_from_its_path() -> anyhow::Result<()> {
        let class = temp_path("Lone.class");
        std::fs::write(&class, b"\xca\xfe\xba\xbe")?;
        let archive = crate::archive::load_archive(&class, &Limits::default())?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let resolver = resolver(decompiler.clone(), Limits::default());

        let target = Target::from_selection(&archive, &[archive.file_name()])?;
        let out = resolver.resolve(&archive, &TypeMemo::default(), &target, &mut |_| {})?;
        assert!(out.content.starts_with("// file "));
        assert_eq!(decompiler.calls(), 1);
        std::fs::remove_file(class)?;
        Ok(())
    }

    #[test]
    fn persistent_cache_serves_a_fresh_session() -> anyhow::Result<()> {
        let (jar, archive) = fixture()?;
        let db = temp_path("resolve_cache.lmdb");
        let cache = Arc::new(SourceCache::open(db.clone())?);
        let decompiler = Arc::new(CountingDecompiler::default());
        let resolver = Resolver::new(
            decompiler.clone(),
            Arc::new(Mutex::new(DecompilerSettings::default())),
            Some(cache),
            Limits::default(),
        );
        let target = select(&archive, "org/example/App.class");

        resolver.resolve(&archive, &TypeMemo::default(), &target, &mut |_| {})?;
        resolver.resolve(&archive, &TypeMemo::default(), &target, &mut |_| {})?;
        assert_eq!(decompiler.calls(), 1);

        drop(resolver);
        crate::config::clear_db(&db)?;
        std::fs::remove_file(jar)?;
        Ok(())
    }
}
