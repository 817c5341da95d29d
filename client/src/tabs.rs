//! Tab session store.
//!
//! [`SessionRegistry`] keeps tabs in display order and tracks the single
//! active tab. A non-empty registry always has exactly one active tab.
//!
//! Each [`Tab`] owns its render surface and its history. The history cursor
//! always points at the displayed entry:
//!
//! ```text
//! history  [a, b, c]
//! cursor         ^ Some(1)    displayed = b, forward = [c]
//! ```
//!
//! Pushing from a non-tip position drops the forward branch first.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::chrome::{Chrome, SelectorId};
use crate::frame::RenderSurface;
use crate::navigation::NavigationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TabId(u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

pub struct Tab {
    id: TabId,
    surface: Box<dyn RenderSurface>,
    history: Vec<String>,
    cursor: Option<usize>,
    selector: SelectorId,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn selector(&self) -> SelectorId {
        self.selector
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn surface_mut(&mut self) -> &mut dyn RenderSurface {
        self.surface.as_mut()
    }

    /// The displayed URL.
    pub fn current(&self) -> Option<&str> {
        self.cursor.map(|i| self.history[i].as_str())
    }

    /// Record a navigation to `url`: drop the forward branch, append, advance.
    pub fn push(&mut self, url: &str) {
        let keep = self.cursor.map_or(0, |i| i + 1);
        self.history.truncate(keep);
        self.history.push(url.to_string());
        self.cursor = Some(keep);
    }

    /// Move one entry back. `None` at the start of history.
    pub fn step_back(&mut self) -> Option<&str> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                self.current()
            }
            _ => None,
        }
    }

    /// Move one entry forward. `None` at the tip.
    pub fn step_forward(&mut self) -> Option<&str> {
        match self.cursor {
            Some(i) if i + 1 < self.history.len() => {
                self.cursor = Some(i + 1);
                self.current()
            }
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    tabs: IndexMap<TabId, Tab>,
    active: Option<TabId>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active
    }

    /// Display position of the active tab.
    pub fn active_index(&self) -> Option<usize> {
        self.active.and_then(|id| self.tabs.get_index_of(&id))
    }

    pub fn id_at(&self, index: usize) -> Option<TabId> {
        self.tabs.get_index(index).map(|(id, _)| *id)
    }

    pub fn get(&self, id: TabId) -> Option<&Tab> {
        self.tabs.get(&id)
    }

    pub fn get_mut(&mut self, id: TabId) -> Result<&mut Tab, NavigationError> {
        self.tabs.get_mut(&id).ok_or(NavigationError::UnknownTab(id))
    }

    /// Tabs in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.values()
    }

    /// Append a tab with an empty history. It starts inactive.
    pub fn insert(&mut self, surface: Box<dyn RenderSurface>, selector: SelectorId) -> TabId {
        self.next_id += 1;
        let id = TabId(self.next_id);
        self.tabs.insert(
            id,
            Tab {
                id,
                surface,
                history: Vec::new(),
                cursor: None,
                selector,
            },
        );
        id
    }

    /// Make `id` the only active tab and sync the address field to its
    /// displayed URL. A tab with no history leaves the address untouched.
    pub fn activate(&mut self, id: TabId, chrome: &mut Chrome) -> Result<(), NavigationError> {
        if !self.tabs.contains_key(&id) {
            return Err(NavigationError::UnknownTab(id));
        }
        for tab in self.tabs.values_mut() {
            let active = tab.id == id;
            tab.surface.set_active(active);
            chrome.set_selector_active(tab.selector, active);
            if active {
                if let Some(url) = tab.current() {
                    chrome.set_address(url);
                }
            }
        }
        self.active = Some(id);
        Ok(())
    }

    /// Close `id`: tear down its surface, drop its selector and remove it.
    ///
    /// Closing the active tab activates the tab that takes over its display
    /// position, or the new last tab.
    pub fn close(&mut self, id: TabId, chrome: &mut Chrome) -> Result<(), NavigationError> {
        let (index, _, mut tab) = self
            .tabs
            .shift_remove_full(&id)
            .ok_or(NavigationError::UnknownTab(id))?;
        tab.surface.close();
        chrome.remove_selector(tab.selector);
        drop(tab);

        if self.active != Some(id) {
            return Ok(());
        }
        self.active = None;
        let successor = self.id_at(index.min(self.tabs.len().saturating_sub(1)));
        match successor {
            Some(next) => self.activate(next, chrome),
            None => Ok(()),
        }
    }
}
