//! The browser as a data provider.
//!
//! Routes only see the [`Browser`] trait. [`MemoryBrowser`] keeps tabs and
//! windows in memory; it backs the tests and the standalone binary.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub type TabId = i64;
pub type WindowId = i64;

/// An open tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    pub title: String,
    pub url: String,
    /// Whether this is the selected tab of its window.
    pub active: bool,
}

/// A browser window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: WindowId,
    pub focused: bool,
}

/// Fields to change on a tab; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabUpdate {
    pub url: Option<String>,
    pub active: Option<bool>,
}

/// Commands accepted by a tab's `control` file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum TabCommand {
    Remove,
    Reload,
    GoBack,
    GoForward,
    Discard,
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn tabs(&self) -> Result<Vec<Tab>>;
    async fn tab(&self, id: TabId) -> Result<Tab>;
    async fn create_tab(&self, url: &str) -> Result<Tab>;
    async fn update_tab(&self, id: TabId, update: TabUpdate) -> Result<()>;
    async fn remove_tab(&self, id: TabId) -> Result<()>;
    async fn run_command(&self, id: TabId, command: TabCommand) -> Result<()>;
    /// The active tab of the last focused window.
    async fn last_focused_tab(&self) -> Result<Tab>;

    /// `document.body.innerText`.
    async fn page_text(&self, id: TabId) -> Result<String>;
    /// `document.body.innerHTML`.
    async fn page_html(&self, id: TabId) -> Result<String>;
    /// Run a script in the tab and return its result.
    async fn execute_script(&self, id: TabId, code: &str, all_frames: bool)
    -> Result<serde_json::Value>;

    /// IDs of the page's text inputs and textareas.
    async fn input_ids(&self, id: TabId) -> Result<Vec<String>>;
    /// Value of input `input_id`, or `None` if the page has no such input.
    async fn input_value(&self, id: TabId, input_id: &str) -> Result<Option<String>>;
    async fn set_input_value(&self, id: TabId, input_id: &str, value: &str) -> Result<()>;

    async fn windows(&self) -> Result<Vec<Window>>;
    async fn window(&self, id: WindowId) -> Result<Window>;
    async fn last_focused_window(&self) -> Result<Window>;
    async fn set_window_focused(&self, id: WindowId, focused: bool) -> Result<()>;
    /// PNG screenshot of the window's visible tab.
    async fn capture_visible_tab(&self, window_id: WindowId) -> Result<Vec<u8>>;

    /// Reload the browser side of the filesystem.
    async fn reload_runtime(&self) -> Result<()>;
}

pub type SharedBrowser = Arc<dyn Browser>;

#[derive(Debug, Clone)]
struct TabState {
    tab: Tab,
    text: String,
    html: String,
    inputs: IndexMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    tabs: IndexMap<TabId, TabState>,
    windows: IndexMap<WindowId, Window>,
    next_id: i64,
    commands: Vec<(TabId, TabCommand)>,
    scripts: Vec<(TabId, String, bool)>,
    script_results: IndexMap<String, serde_json::Value>,
    runtime_reloads: usize,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tab_mut(&mut self, id: TabId) -> Result<&mut TabState> {
        self.tabs.get_mut(&id).with_context(|| format!("no tab with id {id}"))
    }

    fn focused_window(&self) -> Option<WindowId> {
        self.windows
            .values()
            .find(|w| w.focused)
            .or_else(|| self.windows.values().last())
            .map(|w| w.id)
    }

    fn activate(&mut self, id: TabId) -> Result<()> {
        let window_id = self.tab_mut(id)?.tab.window_id;
        for state in self.tabs.values_mut() {
            if state.tab.window_id == window_id {
                state.tab.active = state.tab.id == id;
            }
        }
        Ok(())
    }
}

/// In-memory [`Browser`].
#[derive(Debug, Default)]
pub struct MemoryBrowser {
    state: Mutex<State>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A browser with two windows and a few tabs.
    pub fn demo() -> Self {
        let browser = Self::new();
        let first = browser.open_window();
        browser.open_tab(first, "Example Domain", "https://example.com/");
        browser.open_tab(first, "Rust Programming Language", "https://www.rust-lang.org/");
        let second = browser.open_window();
        browser.open_tab(second, "docs.rs", "https://docs.rs/");
        browser
    }

    /// Open a window and focus it.
    pub fn open_window(&self) -> WindowId {
        let mut state = self.state.lock();
        let id = state.next_id();
        for window in state.windows.values_mut() {
            window.focused = false;
        }
        state.windows.insert(id, Window { id, focused: true });
        id
    }

    /// Open a tab in `window_id`, make it active, and give it some page
    /// content derived from the title.
    pub fn open_tab(&self, window_id: WindowId, title: &str, url: &str) -> TabId {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.tabs.insert(
            id,
            TabState {
                tab: Tab {
                    id,
                    window_id,
                    title: title.to_string(),
                    url: url.to_string(),
                    active: false,
                },
                text: title.to_string(),
                html: format!("<h1>{title}</h1>"),
                inputs: IndexMap::new(),
            },
        );
        for other in state.tabs.values_mut() {
            if other.tab.window_id == window_id {
                other.tab.active = other.tab.id == id;
            }
        }
        id
    }

    /// Add or replace a text input on the tab's page.
    pub fn set_input(&self, id: TabId, input_id: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .tab_mut(id)?
            .inputs
            .insert(input_id.to_string(), value.to_string());
        Ok(())
    }

    /// Number of [`Browser::reload_runtime`] calls so far.
    pub fn runtime_reloads(&self) -> usize {
        self.state.lock().runtime_reloads
    }

    /// Result [`Browser::execute_script`] returns for `code`.
    pub fn set_script_result(&self, code: impl Into<String>, value: serde_json::Value) {
        self.state.lock().script_results.insert(code.into(), value);
    }

    /// PNG bytes returned by [`Browser::capture_visible_tab`].
    pub fn screenshot(window_id: WindowId) -> Vec<u8> {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&window_id.to_be_bytes());
        png
    }

    /// Commands run so far, oldest first.
    pub fn commands(&self) -> Vec<(TabId, TabCommand)> {
        self.state.lock().commands.clone()
    }

    /// Scripts executed so far as `(tab, code, all_frames)`.
    pub fn scripts(&self) -> Vec<(TabId, String, bool)> {
        self.state.lock().scripts.clone()
    }
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn tabs(&self) -> Result<Vec<Tab>> {
        Ok(self.state.lock().tabs.values().map(|s| s.tab.clone()).collect())
    }

    async fn tab(&self, id: TabId) -> Result<Tab> {
        Ok(self.state.lock().tab_mut(id)?.tab.clone())
    }

    async fn create_tab(&self, url: &str) -> Result<Tab> {
        if url.is_empty() {
            bail!("empty URL");
        }
        let focused = self.state.lock().focused_window();
        let window_id = match focused {
            Some(id) => id,
            None => self.open_window(),
        };
        let id = self.open_tab(window_id, url, url);
        self.tab(id).await
    }

    async fn update_tab(&self, id: TabId, update: TabUpdate) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(url) = update.url {
            state.tab_mut(id)?.tab.url = url;
        }
        match update.active {
            Some(true) => state.activate(id)?,
            Some(false) => state.tab_mut(id)?.tab.active = false,
            None => {}
        }
        Ok(())
    }

    async fn remove_tab(&self, id: TabId) -> Result<()> {
        self.state
            .lock()
            .tabs
            .shift_remove(&id)
            .map(|_| ())
            .with_context(|| format!("no tab with id {id}"))
    }

    async fn run_command(&self, id: TabId, command: TabCommand) -> Result<()> {
        let mut state = self.state.lock();
        state.tab_mut(id)?;
        state.commands.push((id, command));
        if command == TabCommand::Remove {
            state.tabs.shift_remove(&id);
        }
        Ok(())
    }

    async fn last_focused_tab(&self) -> Result<Tab> {
        let state = self.state.lock();
        let window_id = state.focused_window().context("no windows")?;
        state
            .tabs
            .values()
            .find(|s| s.tab.window_id == window_id && s.tab.active)
            .map(|s| s.tab.clone())
            .with_context(|| format!("window {window_id} has no active tab"))
    }

    async fn page_text(&self, id: TabId) -> Result<String> {
        Ok(self.state.lock().tab_mut(id)?.text.clone())
    }

    async fn page_html(&self, id: TabId) -> Result<String> {
        Ok(self.state.lock().tab_mut(id)?.html.clone())
    }

    async fn execute_script(
        &self,
        id: TabId,
        code: &str,
        all_frames: bool,
    ) -> Result<serde_json::Value> {
        let mut state = self.state.lock();
        state.tab_mut(id)?;
        state.scripts.push((id, code.to_string(), all_frames));
        Ok(state
            .script_results
            .get(code.trim())
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn input_ids(&self, id: TabId) -> Result<Vec<String>> {
        Ok(self.state.lock().tab_mut(id)?.inputs.keys().cloned().collect())
    }

    async fn input_value(&self, id: TabId, input_id: &str) -> Result<Option<String>> {
        Ok(self.state.lock().tab_mut(id)?.inputs.get(input_id).cloned())
    }

    async fn set_input_value(&self, id: TabId, input_id: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        let input = state
            .tab_mut(id)?
            .inputs
            .get_mut(input_id)
            .with_context(|| format!("tab {id} has no input {input_id:?}"))?;
        *input = value.to_string();
        Ok(())
    }

    async fn windows(&self) -> Result<Vec<Window>> {
        Ok(self.state.lock().windows.values().cloned().collect())
    }

    async fn window(&self, id: WindowId) -> Result<Window> {
        self.state
            .lock()
            .windows
            .get(&id)
            .cloned()
            .with_context(|| format!("no window with id {id}"))
    }

    async fn last_focused_window(&self) -> Result<Window> {
        let state = self.state.lock();
        let id = state.focused_window().context("no windows")?;
        state.windows.get(&id).cloned().context("no windows")
    }

    async fn set_window_focused(&self, id: WindowId, focused: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.windows.contains_key(&id) {
            bail!("no window with id {id}");
        }
        for window in state.windows.values_mut() {
            if window.id == id {
                window.focused = focused;
            } else if focused {
                window.focused = false;
            }
        }
        Ok(())
    }

    async fn capture_visible_tab(&self, window_id: WindowId) -> Result<Vec<u8>> {
        self.window(window_id).await?;
        Ok(Self::screenshot(window_id))
    }

    async fn reload_runtime(&self) -> Result<()> {
        self.state.lock().runtime_reloads += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_demo_layout() {
        let browser = MemoryBrowser::demo();
        assert_eq!(browser.windows().await.unwrap().len(), 2);
        let tabs = browser.tabs().await.unwrap();
        assert_eq!(tabs.len(), 3);
        let focused = browser.last_focused_tab().await.unwrap();
        assert_eq!(focused.title, "docs.rs");
    }

    #[tokio::test]
    async fn test_activate_is_per_window() {
        let browser = MemoryBrowser::new();
        let w = browser.open_window();
        let a = browser.open_tab(w, "a", "https://a/");
        let b = browser.open_tab(w, "b", "https://b/");
        assert!(browser.tab(b).await.unwrap().active);
        assert!(!browser.tab(a).await.unwrap().active);

        let update = TabUpdate {
            active: Some(true),
            ..Default::default()
        };
        browser.update_tab(a, update).await.unwrap();
        assert!(browser.tab(a).await.unwrap().active);
        assert!(!browser.tab(b).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_missing_tab_is_error() {
        let browser = MemoryBrowser::new();
        assert!(browser.tab(42).await.is_err());
        assert!(browser.remove_tab(42).await.is_err());
        assert!(browser.run_command(42, TabCommand::Reload).await.is_err());
    }

    #[tokio::test]
    async fn test_inputs() {
        let browser = MemoryBrowser::demo();
        browser.set_input(2, "q", "").unwrap();
        assert_eq!(browser.input_ids(2).await.unwrap(), vec!["q"]);
        browser.set_input_value(2, "q", "ferris").await.unwrap();
        assert_eq!(browser.input_value(2, "q").await.unwrap().as_deref(), Some("ferris"));
        assert_eq!(browser.input_value(2, "nope").await.unwrap(), None);
        assert!(browser.set_input_value(2, "nope", "x").await.is_err());
        assert!(browser.set_input(42, "q", "").is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(TabCommand::from_str("goBack").unwrap(), TabCommand::GoBack);
        assert_eq!(TabCommand::GoForward.to_string(), "goForward");
        assert!(TabCommand::from_str("explode").is_err());
    }
}
