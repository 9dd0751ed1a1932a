//! Open tabs, keyed by display name.

use serde::Serialize;

/// Handle of the view showing a tab's content. Survives in-place replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ViewId(u64);

#[derive(Debug, Clone, Serialize)]
pub struct OpenEntry {
    name: String,
    path: String,
    content: String,
    view: ViewId,
}

impl OpenEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn view(&self) -> ViewId {
        self.view
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabOutcome {
    /// Same name and path already open; only focused.
    Focused,
    /// Same name from another path; content and path replaced in place.
    Replaced,
    Created,
}

/// At most one tab per display name; tabs keep opening order.
#[derive(Debug, Default)]
pub struct TabManager {
    tabs: Vec<OpenEntry>,
    selected: Option<usize>,
    next_view: u64,
}

impl TabManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpenEntry> {
        self.tabs.iter()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.tabs.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&OpenEntry> {
        self.position(name).map(|i| &self.tabs[i])
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.name == name)
    }

    /// True when `name` is open and shows `path`.
    pub fn is_showing(&self, name: &str, path: &str) -> bool {
        self.get(name).is_some_and(|t| t.path == path)
    }

    pub fn focus(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(i) => {
                self.selected = Some(i);
                true
            }
            None => false,
        }
    }

    /// Shows `content` under `name`, reusing an existing tab of that name.
    pub fn show(&mut self, name: &str, path: &str, content: String) -> TabOutcome {
        match self.position(name) {
            Some(i) if self.tabs[i].path == path => {
                self.selected = Some(i);
                TabOutcome::Focused
            }
            Some(i) => {
                let tab = &mut self.tabs[i];
                tab.content = content;
                tab.path = path.to_string();
                self.selected = Some(i);
                TabOutcome::Replaced
            }
            None => {
                let view = ViewId(self.next_view);
                self.next_view += 1;
                self.tabs.push(OpenEntry {
                    name: name.to_string(),
                    path: path.to_string(),
                    content,
                    view,
                });
                self.selected = Some(self.tabs.len() - 1);
                TabOutcome::Created
            }
        }
    }

    /// Removes the tab; focus moves to its left neighbour when it was focused.
    pub fn close(&mut self, name: &str) -> Option<OpenEntry> {
        let index = self.position(name)?;
        let removed = self.tabs.remove(index);
        self.selected = match self.selected {
            _ if self.tabs.is_empty() => None,
            Some(s) if s == index => Some(index.saturating_sub(1)),
            Some(s) if s > index => Some(s - 1),
            other => other,
        };
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&OpenEntry> {
        self.selected.and_then(|i| self.tabs.get(i))
    }
}
