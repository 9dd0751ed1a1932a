//! One viewer window: the loaded file, its tree, the open tabs, and status.
//!
//! The thread owning a [`Session`] is the interactive thread. Loading and
//! extraction run on worker threads and report back through a channel;
//! results are applied only in [`Session::poll`] / [`Session::wait_idle`], so
//! the tab set is never touched off the owning thread.
//!
//! State machine: Closed -> Loading -> Loaded -> Closed. A second `load`
//! while one is in flight is refused. Every load or close bumps the session
//! generation and results from older generations are dropped on arrival.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::archive::{LoadedArchive, file_name_of, load_archive, split_entry_path};
use crate::cache::SourceCache;
use crate::cfr::{Decompiler, DecompilerSettings};
use crate::config::Limits;
use crate::error::ViewError;
use crate::resolve::{Extraction, Resolver, Target, TypeMemo};
use crate::tabs::{OpenEntry, TabManager, TabOutcome};
use crate::tree::ArchiveTree;

/// Text of the status label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Loading(String),
    Extracting(String),
    Opening(String),
    Complete,
    NoOpenFile,
    NoOpenTab,
    Failed(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => Ok(()),
            Status::Loading(name) => write!(f, "Loading: {name}"),
            Status::Extracting(name) => write!(f, "Extracting: {name}"),
            Status::Opening(name) => write!(f, "Opening: {name}"),
            Status::Complete => f.write_str("Complete"),
            Status::NoOpenFile => f.write_str("No open file"),
            Status::NoOpenTab => f.write_str("No open tab"),
            Status::Failed(message) => f.write_str(message),
        }
    }
}

/// Something the front end must surface beyond the status label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error { title: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRequest {
    /// The entry is already showing; its tab was focused.
    AlreadyOpen,
    /// An extraction task was launched.
    Started,
    /// Nothing to do; the status says why.
    Rejected,
}

enum SessionEvent {
    Status {
        generation: u64,
        status: Status,
    },
    Loaded {
        generation: u64,
        result: Result<LoadedArchive, ViewError>,
    },
    Extracted {
        generation: u64,
        result: Result<Extraction, ViewError>,
    },
}

enum State {
    Closed,
    Loading { name: String },
    Loaded(Arc<LoadedArchive>),
}

pub struct Session {
    resolver: Resolver,
    settings: Arc<Mutex<DecompilerSettings>>,
    limits: Limits,
    state: State,
    file: Option<PathBuf>,
    generation: u64,
    memo: Arc<TypeMemo>,
    tabs: TabManager,
    status: Status,
    in_flight: usize,
    notices: Vec<Notice>,
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
}

impl Session {
    pub fn new(
        decompiler: Arc<dyn Decompiler>,
        settings: DecompilerSettings,
        cache: Option<Arc<SourceCache>>,
        limits: Limits,
    ) -> Self {
        let settings = Arc::new(Mutex::new(settings));
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            resolver: Resolver::new(decompiler, Arc::clone(&settings), cache, limits),
            settings,
            limits,
            state: State::Closed,
            file: None,
            generation: 0,
            memo: Arc::new(TypeMemo::default()),
            tabs: TabManager::new(),
            status: Status::Idle,
            in_flight: 0,
            notices: Vec::new(),
            tx,
            rx,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Whether the busy indicator is visible.
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Closed => Phase::Closed,
            State::Loading { .. } => Phase::Loading,
            State::Loaded(_) => Phase::Loaded,
        }
    }

    pub fn archive(&self) -> Option<&LoadedArchive> {
        match &self.state {
            State::Loaded(archive) => Some(archive.as_ref()),
            _ => None,
        }
    }

    pub fn tree(&self) -> Option<&ArchiveTree> {
        self.archive().map(LoadedArchive::tree)
    }

    pub fn tabs(&self) -> &TabManager {
        &self.tabs
    }

    /// Number of classes in the session's decompiled-source memo.
    pub fn resolved_types(&self) -> usize {
        self.memo.len()
    }

    pub fn settings(&self) -> DecompilerSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Starts loading `path` in the background, closing the current file first.
    pub fn load(&mut self, path: &Path) -> Result<(), ViewError> {
        if let State::Loading { name } = &self.state {
            let err = ViewError::LoadInProgress { name: name.clone() };
            tracing::warn!("{err}");
            self.status = Status::Failed(err.to_string());
            return Err(err);
        }
        if matches!(self.state, State::Loaded(_)) {
            self.close();
        }

        let name = file_name_of(path);
        self.generation += 1;
        self.state = State::Loading { name: name.clone() };
        self.file = Some(path.to_path_buf());
        self.status = Status::Loading(name.clone());
        tracing::info!(file = %path.display(), "loading");

        let generation = self.generation;
        let limits = self.limits;
        let owned = path.to_path_buf();
        let task_name = name;
        self.spawn("load", move |tx| {
            let result = guarded(&task_name, || load_archive(&owned, &limits));
            let _ = tx.send(SessionEvent::Loaded { generation, result });
        });
        Ok(())
    }

    /// Loads the last file again.
    pub fn reload(&mut self) -> Result<(), ViewError> {
        match self.file.clone() {
            Some(path) => self.load(&path),
            None => {
                self.status = Status::NoOpenFile;
                Ok(())
            }
        }
    }

    /// Closes the file: tree, tabs, and resolved types are dropped.
    pub fn close(&mut self) {
        self.tabs.clear();
        self.state = State::Closed;
        self.generation += 1;
        self.memo.clear();
        self.memo = Arc::new(TypeMemo::default());
        tracing::debug!(generation = self.generation, "session closed");
    }

    /// Opens the node at `selection` (root name first) in a tab.
    pub fn open<S: AsRef<str>>(&mut self, selection: &[S]) -> OpenRequest {
        let archive = match &self.state {
            State::Loaded(archive) => Arc::clone(archive),
            _ => {
                self.status = Status::NoOpenFile;
                return OpenRequest::Rejected;
            }
        };
        let target = match Target::from_selection(&archive, selection) {
            Ok(target) => target,
            Err(err) => {
                self.report(err);
                return OpenRequest::Rejected;
            }
        };

        if self.tabs.is_showing(&target.display_name, &target.path) {
            self.tabs.focus(&target.display_name);
            self.status = Status::Complete;
            return OpenRequest::AlreadyOpen;
        }

        let generation = self.generation;
        let resolver = self.resolver.clone();
        let memo = Arc::clone(&self.memo);
        self.spawn("extract", move |tx| {
            tracing::debug!(path = %target.path, "extracting");
            let result = guarded(&target.display_name, || {
                resolver.resolve(&archive, &memo, &target, &mut |status| {
                    let _ = tx.send(SessionEvent::Status { generation, status });
                })
            });
            let _ = tx.send(SessionEvent::Extracted { generation, result });
        });
        OpenRequest::Started
    }

    /// Opens an archive-relative path; an empty path selects the root.
    pub fn open_path(&mut self, path: &str) -> OpenRequest {
        let Some(root) = self.archive().map(|a| a.file_name().to_string()) else {
            self.status = Status::NoOpenFile;
            return OpenRequest::Rejected;
        };
        let mut selection = vec![root];
        selection.extend(split_entry_path(path).into_iter().map(str::to_string));
        self.open(&selection)
    }

    pub fn close_tab(&mut self, name: &str) -> bool {
        self.tabs.close(name).is_some()
    }

    pub fn focus_tab(&mut self, name: &str) -> bool {
        self.tabs.focus(name)
    }

    pub fn opened_file(&mut self) -> Option<PathBuf> {
        if matches!(self.state, State::Loaded(_))
            && let Some(file) = self.file.clone()
        {
            return Some(file);
        }
        self.status = Status::NoOpenFile;
        None
    }

    pub fn current_tab(&mut self) -> Option<&OpenEntry> {
        if self.tabs.selected().is_none() {
            self.status = Status::NoOpenTab;
            return None;
        }
        self.tabs.selected()
    }

    pub fn current_tab_title(&mut self) -> Option<String> {
        self.current_tab().map(|t| t.name().to_string())
    }

    /// Changes decompiler settings. Waits for any running decompilation and
    /// forgets memoised sources, which were produced with the old settings.
    pub fn update_settings<R>(&mut self, f: impl FnOnce(&mut DecompilerSettings) -> R) -> R {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut settings);
        self.memo.clear();
        out
    }

    /// Applies every result that has arrived. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Blocks until every launched task has reported back.
    pub fn wait_idle(&mut self) {
        while self.in_flight > 0 {
            match self.rx.recv() {
                Ok(event) => self.handle(event),
                Err(_) => break,
            }
        }
        self.poll();
    }

    fn spawn(&mut self, kind: &str, task: impl FnOnce(Sender<SessionEvent>) + Send + 'static) {
        let tx = self.tx.clone();
        self.in_flight += 1;
        let spawned = std::thread::Builder::new()
            .name(format!("jar-viewer-{kind}"))
            .spawn(move || task(tx));
        if let Err(e) = spawned {
            self.in_flight -= 1;
            self.report(ViewError::extraction(kind, anyhow::Error::new(e)));
            if matches!(self.state, State::Loading { .. }) {
                self.state = State::Closed;
            }
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Status { generation, status } => {
                if generation == self.generation {
                    self.status = status;
                }
            }
            SessionEvent::Loaded { generation, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if generation != self.generation {
                    tracing::debug!(generation, "dropping stale load result");
                    return;
                }
                match result {
                    Ok(archive) => {
                        self.state = State::Loaded(Arc::new(archive));
                        self.status = Status::Complete;
                    }
                    Err(err) => {
                        self.state = State::Closed;
                        self.report(err);
                    }
                }
            }
            SessionEvent::Extracted { generation, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if generation != self.generation {
                    tracing::debug!(generation, "dropping stale extraction result");
                    return;
                }
                match result {
                    Ok(extraction) => {
                        let outcome =
                            self.tabs
                                .show(&extraction.display_name, &extraction.path, extraction.content);
                        if outcome == TabOutcome::Replaced {
                            tracing::info!(tab = %extraction.display_name, path = %extraction.path, "tab content replaced");
                        }
                        self.status = Status::Complete;
                    }
                    Err(err) => self.report(err),
                }
            }
        }
    }

    fn report(&mut self, err: ViewError) {
        self.status = Status::Failed(err.to_string());
        match std::error::Error::source(&err) {
            Some(source) => tracing::error!("{err}: {source}"),
            None => tracing::info!("{err}"),
        }
        if err.is_unexpected() {
            let detail = std::error::Error::source(&err)
                .map(|s| s.to_string())
                .unwrap_or_else(|| err.to_string());
            self.notices.push(Notice::Error {
                title: "Error!".to_string(),
                message: detail,
            });
        }
    }
}

/// Runs `f`, turning a panic into an extraction failure so the task still
/// reports back and the busy indicator clears.
fn guarded<T>(name: &str, f: impl FnOnce() -> Result<T, ViewError>) -> Result<T, ViewError> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ViewError::extraction(
                name,
                anyhow::anyhow!("task panicked: {message}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::test_support::CountingDecompiler;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use zip::write::{FileOptions, ZipWriter};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("jar_viewer_session_{}_{}_{}", std::process::id(), n, name))
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

    fn demo_jar(name: &str) -> anyhow::Result<PathBuf> {
        let jar = temp_path(name);
        write_jar(
            &jar,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
                ("org/example/App.class", b"\xca\xfe\xba\xbe"),
                ("org/other/App.class", b"\xca\xfe\xba\xbe"),
                ("org/example/Broken.class", b"\xca\xfe\xba\xbe"),
                ("notes.txt", b"hello\n"),
                ("blob.bin", &[0u8; 32]),
            ],
        )?;
        Ok(jar)
    }

    fn session(decompiler: Arc<CountingDecompiler>) -> Session {
        Session::new(decompiler, DecompilerSettings::default(), None, Limits::default())
    }

    fn loaded(decompiler: Arc<CountingDecompiler>, jar: &Path) -> Session {
        let mut s = session(decompiler);
        s.load(jar).unwrap();
        s.wait_idle();
        assert_eq!(s.phase(), Phase::Loaded);
        s
    }

    #[test]
    fn load_builds_tree_and_reports_complete() -> anyhow::Result<()> {
        let jar = demo_jar("load.jar")?;
        let mut s = session(Arc::new(CountingDecompiler::default()));
        s.load(&jar)?;
        assert_eq!(s.phase(), Phase::Loading);
        assert!(s.is_busy());
        assert!(s.status().to_string().starts_with("Loading: "));

        s.wait_idle();
        assert!(!s.is_busy());
        assert_eq!(s.status(), &Status::Complete);
        let tree = s.tree().unwrap();
        assert!(tree.find(&["org", "example", "App.class"]).is_some());
        assert_eq!(s.opened_file(), Some(jar.clone()));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn overlapping_load_is_rejected() -> anyhow::Result<()> {
        let jar = demo_jar("overlap.jar")?;
        let mut s = session(Arc::new(CountingDecompiler::default()));
        s.load(&jar)?;
        let second = s.load(&jar);
        assert!(matches!(second, Err(ViewError::LoadInProgress { .. })));

        s.wait_idle();
        assert_eq!(s.phase(), Phase::Loaded);
        assert_eq!(s.status(), &Status::Complete);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn reopening_open_entry_only_focuses() -> anyhow::Result<()> {
        let jar = demo_jar("focus.jar")?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let mut s = loaded(decompiler.clone(), &jar);

        assert_eq!(s.open_path("org/example/App.class"), OpenRequest::Started);
        s.wait_idle();
        assert_eq!(s.status(), &Status::Complete);
        assert_eq!(decompiler.calls(), 1);

        assert_eq!(s.open_path("notes.txt"), OpenRequest::Started);
        s.wait_idle();
        assert_eq!(s.current_tab_title().as_deref(), Some("notes.txt"));

        assert_eq!(s.open_path("org/example/App.class"), OpenRequest::AlreadyOpen);
        assert!(!s.is_busy());
        assert_eq!(decompiler.calls(), 1);
        assert_eq!(s.current_tab_title().as_deref(), Some("App.class"));
        assert_eq!(s.tabs().len(), 2);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn same_name_from_other_path_replaces_tab() -> anyhow::Result<()> {
        let jar = demo_jar("replace.jar")?;
        let mut s = loaded(Arc::new(CountingDecompiler::default()), &jar);

        s.open_path("org/example/App.class");
        s.wait_idle();
        let view = s.tabs().get("App.class").map(OpenEntry::view);

        assert_eq!(s.open_path("org/other/App.class"), OpenRequest::Started);
        s.wait_idle();
        assert_eq!(s.tabs().len(), 1);
        let tab = s.tabs().get("App.class").unwrap();
        assert_eq!(tab.path(), "org/other/App.class");
        assert!(tab.content().contains("org/other/App"));
        assert_eq!(Some(tab.view()), view);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn entry_with_empty_segment_opens_by_its_exact_path() -> anyhow::Result<()> {
        let jar = temp_path("double_slash.jar");
        write_jar(&jar, &[("c/d.txt", b"single\n"), ("c//d.txt", b"double\n")])?;
        let mut s = loaded(Arc::new(CountingDecompiler::default()), &jar);

        assert_eq!(s.open_path("c//d.txt"), OpenRequest::Started);
        s.wait_idle();
        assert_eq!(s.status(), &Status::Complete);
        let tab = s.tabs().get("d.txt").unwrap();
        assert_eq!(tab.path(), "c//d.txt");
        assert_eq!(tab.content(), "double\n");

        assert_eq!(s.open_path("c/d.txt"), OpenRequest::Started);
        s.wait_idle();
        assert_eq!(s.tabs().len(), 1);
        assert_eq!(s.tabs().get("d.txt").unwrap().content(), "single\n");
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn guard_failures_set_status_without_tabs() -> anyhow::Result<()> {
        let jar = demo_jar("guards.jar")?;
        let mut s = loaded(Arc::new(CountingDecompiler::default()), &jar);

        s.open_path("blob.bin");
        s.wait_idle();
        assert_eq!(s.status().to_string(), "Binary resource: blob.bin");

        s.open_path("org/example/Missing.class");
        s.wait_idle();
        assert_eq!(s.status().to_string(), "File not found: Missing.class");

        assert!(s.tabs().is_empty());
        assert!(s.take_notices().is_empty());
        assert!(!s.is_busy());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn oversized_entry_reports_too_large() -> anyhow::Result<()> {
        let jar = demo_jar("too_large.jar")?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let limits = Limits {
            max_entry_bytes: 2,
            ..Limits::default()
        };
        let mut s = Session::new(decompiler.clone(), DecompilerSettings::default(), None, limits);
        s.load(&jar)?;
        s.wait_idle();

        s.open_path("org/example/App.class");
        s.wait_idle();
        assert_eq!(s.status().to_string(), "File is too large: App.class - size: 4 B");
        assert_eq!(decompiler.calls(), 0);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn decompiler_failure_raises_notice() -> anyhow::Result<()> {
        let jar = demo_jar("notice.jar")?;
        let mut s = loaded(Arc::new(CountingDecompiler::default()), &jar);

        s.open_path("org/example/Broken.class");
        s.wait_idle();
        assert_eq!(s.status().to_string(), "Cannot open: Broken.class");
        let notices = s.take_notices();
        assert_eq!(notices.len(), 1);
        let Notice::Error { title, message } = &notices[0];
        assert_eq!(title, "Error!");
        assert!(message.contains("Unable to resolve type"));
        assert!(!s.is_busy());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn close_clears_tree_tabs_and_resolved_types() -> anyhow::Result<()> {
        let jar = demo_jar("close.jar")?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let mut s = loaded(decompiler.clone(), &jar);
        s.open_path("org/example/App.class");
        s.wait_idle();
        assert_eq!(s.resolved_types(), 1);

        s.close();
        assert_eq!(s.phase(), Phase::Closed);
        assert!(s.tree().is_none());
        assert!(s.tabs().is_empty());
        assert_eq!(s.resolved_types(), 0);
        assert!(s.opened_file().is_none());
        assert_eq!(s.status(), &Status::NoOpenFile);
        assert_eq!(s.open_path("notes.txt"), OpenRequest::Rejected);

        s.reload()?;
        s.wait_idle();
        s.open_path("org/example/App.class");
        s.wait_idle();
        assert_eq!(decompiler.calls(), 2, "memo does not survive close");
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn results_for_a_closed_archive_are_dropped() -> anyhow::Result<()> {
        let jar = demo_jar("stale.jar")?;
        let mut s = loaded(Arc::new(CountingDecompiler::default()), &jar);
        s.open_path("notes.txt");
        s.close();
        s.wait_idle();
        assert!(s.tabs().is_empty());
        assert!(!s.is_busy());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn settings_change_forgets_memoised_sources() -> anyhow::Result<()> {
        let jar = demo_jar("settings.jar")?;
        let decompiler = Arc::new(CountingDecompiler::default());
        let mut s = loaded(decompiler.clone(), &jar);
        s.open_path("org/example/App.class");
        s.wait_idle();
        assert_eq!(s.resolved_types(), 1);

        s.update_settings(|settings| settings.comments = true);
        assert!(s.settings().comments);
        assert_eq!(s.resolved_types(), 0);

        s.close_tab("App.class");
        s.open_path("org/example/App.class");
        s.wait_idle();
        assert_eq!(decompiler.calls(), 2);
        assert!(s.tabs().get("App.class").unwrap().content().contains("comments=true"));
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn current_tab_without_tabs_sets_status() {
        let mut s = session(Arc::new(CountingDecompiler::default()));
        assert!(s.current_tab_title().is_none());
        assert_eq!(s.status().to_string(), "No open tab");
        assert_eq!(s.open_path("x"), OpenRequest::Rejected);
        assert_eq!(s.status().to_string(), "No open file");
    }

    #[test]
    fn failed_load_returns_to_closed() -> anyhow::Result<()> {
        let jar = temp_path("broken.jar");
        std::fs::write(&jar, b"not a zip")?;
        let mut s = session(Arc::new(CountingDecompiler::default()));
        s.load(&jar)?;
        s.wait_idle();
        assert_eq!(s.phase(), Phase::Closed);
        assert!(s.status().to_string().starts_with("Cannot open: "));
        assert!(!s.is_busy());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn guarded_turns_panic_into_extraction_error() {
        let result: Result<(), ViewError> = guarded("X.class", || panic!("boom"));
        let err = result.unwrap_err();
        assert!(err.is_unexpected());
        assert_eq!(err.to_string(), "Cannot open: X.class");
    }
}
