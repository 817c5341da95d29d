//! Render surfaces.
//!
//! The rewriting engine is an external collaborator: tabs only ever talk to
//! it through [`FrameFactory`] and [`RenderSurface`]. [`HeadlessFrames`]
//! is the implementation this binary ships; its frames report every command
//! as a `frame.*` event on the output stream instead of drawing.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;

use crate::events::Outbox;

/// One tab's rendering container.
#[async_trait]
pub trait RenderSurface: Send {
    /// Load `url` in this surface.
    async fn go(&mut self, url: &str);
    /// Show or hide the surface.
    fn set_active(&mut self, active: bool);
    /// Tear the surface down. Called once, right before it is dropped.
    fn close(&mut self);
}

/// Creates render surfaces.
pub trait FrameFactory: Send {
    fn create_frame(&self) -> Box<dyn RenderSurface>;
}

/// Factory for [`HeadlessFrame`]s sharing one output stream.
pub struct HeadlessFrames {
    out: Outbox,
    next_id: AtomicU64,
}

impl HeadlessFrames {
    pub fn new(out: Outbox) -> Self {
        Self {
            out,
            next_id: AtomicU64::new(1),
        }
    }
}

impl FrameFactory for HeadlessFrames {
    fn create_frame(&self) -> Box<dyn RenderSurface> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.out.send(json!({ "type": "frame.created", "frame": id }));
        Box::new(HeadlessFrame {
            id,
            out: self.out.clone(),
            active: false,
        })
    }
}

/// Render surface that narrates instead of drawing.
pub struct HeadlessFrame {
    id: u64,
    out: Outbox,
    active: bool,
}

#[async_trait]
impl RenderSurface for HeadlessFrame {
    async fn go(&mut self, url: &str) {
        let _ = self
            .out
            .send(json!({ "type": "frame.go", "frame": self.id, "url": url }));
    }

    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        let _ = self
            .out
            .send(json!({ "type": "frame.active", "frame": self.id, "active": active }));
    }

    fn close(&mut self) {
        let _ = self
            .out
            .send(json!({ "type": "frame.closed", "frame": self.id }));
    }
}
