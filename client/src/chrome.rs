//! Browser chrome: tab selectors, the address field, theme and status line.
//!
//! Tabs refer to their selector by [`SelectorId`] only; the chrome owns the
//! selector itself.

use indexmap::IndexMap;
use serde::Serialize;

/// Key of a tab selector in [`Chrome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SelectorId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selector {
    pub label: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

#[derive(Debug, Default)]
pub struct Chrome {
    selectors: IndexMap<SelectorId, Selector>,
    next_selector: u64,
    address: String,
    theme: Theme,
    error: Option<String>,
}

impl Chrome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an inactive selector labelled `label`.
    pub fn add_selector(&mut self, label: &str) -> SelectorId {
        self.next_selector += 1;
        let id = SelectorId(self.next_selector);
        self.selectors.insert(
            id,
            Selector {
                label: label.to_string(),
                active: false,
            },
        );
        id
    }

    pub fn remove_selector(&mut self, id: SelectorId) {
        self.selectors.shift_remove(&id);
    }

    pub fn selector(&self, id: SelectorId) -> Option<&Selector> {
        self.selectors.get(&id)
    }

    pub fn set_label(&mut self, id: SelectorId, label: &str) {
        if let Some(selector) = self.selectors.get_mut(&id) {
            label.clone_into(&mut selector.label);
        }
    }

    pub fn set_selector_active(&mut self, id: SelectorId, active: bool) {
        if let Some(selector) = self.selectors.get_mut(&id) {
            selector.active = active;
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, url: &str) {
        url.clone_into(&mut self.address);
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    /// Status line text, if an error is showing.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn show_error(&mut self, message: String) {
        self.error = Some(message);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
