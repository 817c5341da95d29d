//! Navigation controller.
//!
//! [`Browser`] owns the session registry, the chrome and the transport
//! binder, and is the only thing that mutates them. Every load goes through
//! [`Browser::navigate`]; user-submitted input first passes the readiness
//! and transport guard, and a guard failure is shown on the status line
//! instead of navigating.

use tracing::{debug, warn};

use crate::chrome::Chrome;
use crate::frame::FrameFactory;
use crate::readiness::{ReadinessError, WorkerRegistrar};
use crate::search::{AddressResolver, SearchEngines};
use crate::tabs::{SessionRegistry, TabId};
use crate::transport::{TransportBinder, TransportError, TransportState, TransportTarget};

/// URL that creates a tab without loading anything.
pub const BLANK: &str = "about:blank";

/// Selector label for tabs without a host to show.
pub const DEFAULT_LABEL: &str = "New Tab";

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("no active tab")]
    NoActiveTab,
    #[error("unknown tab {0}")]
    UnknownTab(TabId),
    #[error("no tab at position {0}")]
    NoTabAt(usize),
    #[error("Failed to register service worker. {0}")]
    Readiness(#[from] ReadinessError),
    #[error("Failed to configure transport. {0}")]
    Transport(#[from] TransportError),
}

/// Collaborators a [`Browser`] drives.
pub struct BrowserParts {
    pub frames: Box<dyn FrameFactory>,
    pub registrar: Box<dyn WorkerRegistrar>,
    pub binder: TransportBinder,
    pub target: TransportTarget,
    pub resolver: Box<dyn AddressResolver>,
    pub engines: SearchEngines,
}

pub struct Browser {
    tabs: SessionRegistry,
    chrome: Chrome,
    frames: Box<dyn FrameFactory>,
    registrar: Box<dyn WorkerRegistrar>,
    binder: TransportBinder,
    target: TransportTarget,
    resolver: Box<dyn AddressResolver>,
    engines: SearchEngines,
}

impl Browser {
    pub fn new(parts: BrowserParts) -> Self {
        Self {
            tabs: SessionRegistry::new(),
            chrome: Chrome::new(),
            frames: parts.frames,
            registrar: parts.registrar,
            binder: parts.binder,
            target: parts.target,
            resolver: parts.resolver,
            engines: parts.engines,
        }
    }

    pub fn tabs(&self) -> &SessionRegistry {
        &self.tabs
    }

    pub fn chrome(&self) -> &Chrome {
        &self.chrome
    }

    pub fn chrome_mut(&mut self) -> &mut Chrome {
        &mut self.chrome
    }

    pub async fn transport_state(&self) -> TransportState {
        self.binder.state().await
    }

    /// Open a tab at the end of the strip, activate it, and load `url`
    /// unless it is [`BLANK`].
    pub async fn create_tab(&mut self, url: &str) -> Result<TabId, NavigationError> {
        let surface = self.frames.create_frame();
        let selector = self.chrome.add_selector(DEFAULT_LABEL);
        let id = self.tabs.insert(surface, selector);
        self.tabs.activate(id, &mut self.chrome)?;
        if url != BLANK {
            self.navigate(id, url).await?;
        }
        Ok(id)
    }

    pub fn activate_tab(&mut self, id: TabId) -> Result<(), NavigationError> {
        self.tabs.activate(id, &mut self.chrome)
    }

    pub fn close_tab(&mut self, id: TabId) -> Result<(), NavigationError> {
        self.tabs.close(id, &mut self.chrome)
    }

    /// Tab at display position `index`.
    pub fn tab_at(&self, index: usize) -> Result<TabId, NavigationError> {
        self.tabs.id_at(index).ok_or(NavigationError::NoTabAt(index))
    }

    /// Load `url` in tab `id` as a new history entry.
    pub async fn navigate(&mut self, id: TabId, url: &str) -> Result<(), NavigationError> {
        let tab = self.tabs.get_mut(id)?;
        tab.push(url);
        tab.surface_mut().go(url).await;
        let selector = tab.selector();

        self.chrome.set_label(selector, &host_label(url));
        self.chrome.set_address(url);
        debug!(tab = %id, url, "navigated");
        Ok(())
    }

    /// Step the active tab back. `Ok(false)` at the start of its history.
    pub async fn back(&mut self) -> Result<bool, NavigationError> {
        let id = self.tabs.active_id().ok_or(NavigationError::NoActiveTab)?;
        let tab = self.tabs.get_mut(id)?;
        let Some(url) = tab.step_back().map(str::to_string) else {
            return Ok(false);
        };
        tab.surface_mut().go(&url).await;
        self.chrome.set_address(&url);
        Ok(true)
    }

    /// Step the active tab forward. `Ok(false)` at the tip of its history.
    pub async fn forward(&mut self) -> Result<bool, NavigationError> {
        let id = self.tabs.active_id().ok_or(NavigationError::NoActiveTab)?;
        let tab = self.tabs.get_mut(id)?;
        let Some(url) = tab.step_forward().map(str::to_string) else {
            return Ok(false);
        };
        tab.surface_mut().go(&url).await;
        self.chrome.set_address(&url);
        Ok(true)
    }

    /// Readiness, then transport. A failure is shown on the status line and
    /// returned; success clears any earlier error.
    pub async fn prepare(&mut self) -> Result<(), NavigationError> {
        let registered = self.registrar.register().await;
        if let Err(e) = registered {
            return Err(self.surface_error(e.into()));
        }
        let bound = self.binder.ensure_transport(&self.target).await;
        if let Err(e) = bound {
            return Err(self.surface_error(e.into()));
        }
        self.chrome.clear_error();
        Ok(())
    }

    /// Address-bar submission: guard, resolve `input` with `engine`'s
    /// template, then load it in the active tab.
    pub async fn submit(&mut self, input: &str, engine: Option<&str>) -> Result<(), NavigationError> {
        self.prepare().await?;
        let url = self.resolver.resolve(input, self.engines.template(engine));
        let id = self.tabs.active_id().ok_or(NavigationError::NoActiveTab)?;
        self.navigate(id, &url).await
    }

    /// Open a tab for `url`. Anything but [`BLANK`] passes the guard first;
    /// if the guard fails the tab still opens, blank, with the error showing.
    pub async fn open_tab(&mut self, url: Option<&str>) -> Result<TabId, NavigationError> {
        let url = url.unwrap_or(BLANK);
        if url != BLANK && self.prepare().await.is_err() {
            return self.create_tab(BLANK).await;
        }
        self.create_tab(url).await
    }

    fn surface_error(&mut self, error: NavigationError) -> NavigationError {
        warn!("{error}");
        self.chrome.show_error(error.to_string());
        error
    }
}

/// Selector label for `url`: its host, or [`DEFAULT_LABEL`].
fn host_label(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().filter(|h| !h.is_empty()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LABEL.to_string())
}
