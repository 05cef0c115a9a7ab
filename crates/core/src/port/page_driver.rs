// Browser Driver Port (automation sessions)

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Browser driver failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("connection to browser lost: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("tab closed: {0}")]
    TabClosed(String),

    #[error("browser command timed out: {0}")]
    Timeout(String),
}

/// How text gets written into an input surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// `<textarea>` / `<input>` (value setter)
    Plain,
    /// contenteditable region (insertText)
    Rich,
}

/// An anchor element as seen by the page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub href: String,
    pub text: String,
    pub title: Option<String>,
}

impl LinkInfo {
    pub fn new(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: text.into(),
            title: None,
        }
    }
}

/// One open tab. Selector-level queries only; adapters never see raw protocol.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Stable handle of the underlying tab
    fn tab_id(&self) -> &str;

    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// True if `selector` matches at least one element
    async fn exists(&self, selector: &str) -> Result<bool, DriverError>;

    /// True if the first match exists and is not disabled
    async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError>;

    /// innerText of the last element matching `selector`
    async fn text_of_last(&self, selector: &str) -> Result<Option<String>, DriverError>;

    /// innerText of the document body, minus the text of elements matching `exclude`
    async fn visible_text(&self, exclude: &[&str]) -> Result<String, DriverError>;

    /// Anchors inside the last element matching `scope`, in document order
    async fn links_within(&self, scope: &str) -> Result<Vec<LinkInfo>, DriverError>;

    /// `src` of every iframe on the page
    async fn iframe_sources(&self) -> Result<Vec<String>, DriverError>;

    /// Focus the element and write `text`, dispatching focus/beforeinput/input/change.
    /// Returns false if the element is absent.
    async fn set_input(&self, selector: &str, text: &str, kind: InputKind)
        -> Result<bool, DriverError>;

    /// Returns false if the element is absent
    async fn click(&self, selector: &str) -> Result<bool, DriverError>;

    /// Synthetic Enter keystroke on the element. Returns false if absent.
    async fn press_enter(&self, selector: &str) -> Result<bool, DriverError>;
}

/// Tab lifecycle on the controlled browser
#[async_trait]
pub trait BrowserPort: Send + Sync {
    /// Open a new tab at `url`
    async fn open_tab(&self, url: &str) -> Result<Arc<dyn PageDriver>, DriverError>;

    /// Close a tab (no-op if already gone)
    async fn close_tab(&self, tab_id: &str) -> Result<(), DriverError>;

    /// Tab ids the browser currently has open
    async fn list_tabs(&self) -> Result<Vec<String>, DriverError>;
}

pub mod mocks {
    //! Scriptable in-memory page and browser

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixtureState {
        url: String,
        present: HashSet<String>,
        disabled: HashSet<String>,
        /// selector -> remaining `exists` checks that report true
        transient: HashMap<String, usize>,
        /// selector -> text frames; each read advances, the last frame repeats
        frames: HashMap<String, (Vec<String>, usize)>,
        visible_text: String,
        links: HashMap<String, Vec<LinkInfo>>,
        iframes: Vec<String>,
        /// selectors that appear only after a submit
        after_submit: HashSet<String>,
        submitted: bool,

        inputs: Vec<(String, String, InputKind)>,
        clicks: Vec<String>,
        enters: Vec<String>,
        navigations: Vec<String>,
    }

    /// Fixture DOM. Built with `with_*`, inspected after the run.
    pub struct FixturePage {
        tab_id: String,
        closed: AtomicBool,
        state: Mutex<FixtureState>,
    }

    impl FixturePage {
        pub fn new(tab_id: impl Into<String>, url: impl Into<String>) -> Self {
            Self {
                tab_id: tab_id.into(),
                closed: AtomicBool::new(false),
                state: Mutex::new(FixtureState {
                    url: url.into(),
                    ..Default::default()
                }),
            }
        }

        fn edit(self, f: impl FnOnce(&mut FixtureState)) -> Self {
            if let Ok(mut state) = self.state.lock() {
                f(&mut *state);
            }
            self
        }

        pub fn with_element(self, selector: &str) -> Self {
            self.edit(|s| {
                s.present.insert(selector.to_string());
            })
        }

        pub fn with_disabled(self, selector: &str) -> Self {
            self.edit(|s| {
                s.present.insert(selector.to_string());
                s.disabled.insert(selector.to_string());
            })
        }

        /// Present for the next `checks` existence checks, then gone
        pub fn with_transient(self, selector: &str, checks: usize) -> Self {
            self.edit(|s| {
                s.transient.insert(selector.to_string(), checks);
            })
        }

        /// Present only once something was clicked or Enter was pressed
        pub fn with_element_after_submit(self, selector: &str) -> Self {
            self.edit(|s| {
                s.after_submit.insert(selector.to_string());
            })
        }

        pub fn with_text_frames<I, S>(self, selector: &str, frames: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let frames: Vec<String> = frames.into_iter().map(Into::into).collect();
            self.edit(|s| {
                s.present.insert(selector.to_string());
                s.frames.insert(selector.to_string(), (frames, 0));
            })
        }

        pub fn with_visible_text(self, text: &str) -> Self {
            self.edit(|s| s.visible_text = text.to_string())
        }

        pub fn with_links(self, scope: &str, links: Vec<LinkInfo>) -> Self {
            self.edit(|s| {
                s.links.insert(scope.to_string(), links);
            })
        }

        pub fn with_iframe(self, src: &str) -> Self {
            self.edit(|s| s.iframes.push(src.to_string()))
        }

        pub fn inputs(&self) -> Vec<(String, String, InputKind)> {
            self.read(|s| s.inputs.clone())
        }

        pub fn clicks(&self) -> Vec<String> {
            self.read(|s| s.clicks.clone())
        }

        pub fn enters(&self) -> Vec<String> {
            self.read(|s| s.enters.clone())
        }

        pub fn navigations(&self) -> Vec<String> {
            self.read(|s| s.navigations.clone())
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn set_closed(&self, closed: bool) {
            self.closed.store(closed, Ordering::SeqCst);
        }

        fn read<T: Default>(&self, f: impl FnOnce(&FixtureState) -> T) -> T {
            self.state.lock().map(|s| f(&*s)).unwrap_or_default()
        }

        fn with_state<T>(
            &self,
            f: impl FnOnce(&mut FixtureState) -> T,
        ) -> Result<T, DriverError> {
            if self.is_closed() {
                return Err(DriverError::TabClosed(self.tab_id.clone()));
            }
            let mut state = self
                .state
                .lock()
                .map_err(|_| DriverError::Protocol("fixture state poisoned".to_string()))?;
            Ok(f(&mut *state))
        }
    }

    impl FixtureState {
        fn exists(&mut self, selector: &str) -> bool {
            if let Some(remaining) = self.transient.get_mut(selector) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
                return false;
            }
            if self.after_submit.contains(selector) {
                return self.submitted;
            }
            self.present.contains(selector)
        }
    }

    #[async_trait]
    impl PageDriver for FixturePage {
        fn tab_id(&self) -> &str {
            &self.tab_id
        }

        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.with_state(|s| {
                s.navigations.push(url.to_string());
                s.url = url.to_string();
            })
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            self.with_state(|s| s.url.clone())
        }

        async fn exists(&self, selector: &str) -> Result<bool, DriverError> {
            self.with_state(|s| s.exists(selector))
        }

        async fn is_enabled(&self, selector: &str) -> Result<bool, DriverError> {
            self.with_state(|s| s.exists(selector) && !s.disabled.contains(selector))
        }

        async fn text_of_last(&self, selector: &str) -> Result<Option<String>, DriverError> {
            self.with_state(|s| {
                let (frames, cursor) = s.frames.get_mut(selector)?;
                if frames.is_empty() {
                    return None;
                }
                let idx = (*cursor).min(frames.len() - 1);
                *cursor += 1;
                Some(frames[idx].clone())
            })
        }

        async fn visible_text(&self, exclude: &[&str]) -> Result<String, DriverError> {
            self.with_state(|s| {
                let mut text = s.visible_text.clone();
                for (selector, (frames, cursor)) in &s.frames {
                    if exclude.contains(&selector.as_str()) || frames.is_empty() {
                        continue;
                    }
                    // Frame last handed out by text_of_last
                    let idx = cursor.saturating_sub(1).min(frames.len() - 1);
                    text.push('\n');
                    text.push_str(&frames[idx]);
                }
                text
            })
        }

        async fn links_within(&self, scope: &str) -> Result<Vec<LinkInfo>, DriverError> {
            self.with_state(|s| s.links.get(scope).cloned().unwrap_or_default())
        }

        async fn iframe_sources(&self) -> Result<Vec<String>, DriverError> {
            self.with_state(|s| s.iframes.clone())
        }

        async fn set_input(
            &self,
            selector: &str,
            text: &str,
            kind: InputKind,
        ) -> Result<bool, DriverError> {
            self.with_state(|s| {
                if !s.exists(selector) {
                    return false;
                }
                s.inputs
                    .push((selector.to_string(), text.to_string(), kind));
                true
            })
        }

        async fn click(&self, selector: &str) -> Result<bool, DriverError> {
            self.with_state(|s| {
                if !s.exists(selector) {
                    return false;
                }
                s.clicks.push(selector.to_string());
                s.submitted = true;
                true
            })
        }

        async fn press_enter(&self, selector: &str) -> Result<bool, DriverError> {
            self.with_state(|s| {
                if !s.exists(selector) {
                    return false;
                }
                s.enters.push(selector.to_string());
                s.submitted = true;
                true
            })
        }
    }

    /// Serves registered fixture pages by URL prefix
    #[derive(Default)]
    pub struct FixtureBrowser {
        pages: Mutex<Vec<(String, Arc<FixturePage>)>>,
        open: Mutex<Vec<String>>,
        opened: Mutex<Vec<String>>,
    }

    impl FixtureBrowser {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(self, url_prefix: &str, page: Arc<FixturePage>) -> Self {
            if let Ok(mut pages) = self.pages.lock() {
                pages.push((url_prefix.to_string(), page));
            }
            self
        }

        /// URLs passed to `open_tab`, in order
        pub fn opened_urls(&self) -> Vec<String> {
            self.opened.lock().map(|o| o.clone()).unwrap_or_default()
        }

        pub fn open_tab_ids(&self) -> Vec<String> {
            self.open.lock().map(|o| o.clone()).unwrap_or_default()
        }

        /// Simulate the user closing a tab behind our back
        pub fn close_externally(&self, tab_id: &str) {
            if let Ok(mut open) = self.open.lock() {
                open.retain(|t| t != tab_id);
            }
            if let Some(page) = self.page_by_tab(tab_id) {
                page.set_closed(true);
            }
        }

        fn page_by_tab(&self, tab_id: &str) -> Option<Arc<FixturePage>> {
            self.pages.lock().ok().and_then(|pages| {
                pages
                    .iter()
                    .find(|(_, p)| p.tab_id() == tab_id)
                    .map(|(_, p)| p.clone())
            })
        }
    }

    #[async_trait]
    impl BrowserPort for FixtureBrowser {
        async fn open_tab(&self, url: &str) -> Result<Arc<dyn PageDriver>, DriverError> {
            if let Ok(mut opened) = self.opened.lock() {
                opened.push(url.to_string());
            }
            let page = self
                .pages
                .lock()
                .ok()
                .and_then(|pages| {
                    pages
                        .iter()
                        .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                        .map(|(_, p)| p.clone())
                })
                .ok_or_else(|| DriverError::Connection(format!("no fixture for {}", url)))?;

            page.set_closed(false);
            if let Ok(mut open) = self.open.lock() {
                open.push(page.tab_id().to_string());
            }
            Ok(page as Arc<dyn PageDriver>)
        }

        async fn close_tab(&self, tab_id: &str) -> Result<(), DriverError> {
            if let Ok(mut open) = self.open.lock() {
                open.retain(|t| t != tab_id);
            }
            if let Some(page) = self.page_by_tab(tab_id) {
                page.set_closed(true);
            }
            Ok(())
        }

        async fn list_tabs(&self) -> Result<Vec<String>, DriverError> {
            Ok(self.open_tab_ids())
        }
    }
}
