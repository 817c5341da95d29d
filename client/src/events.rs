//! UI event dispatch over stdio.
//!
//! Reads one JSON command per line from stdin, applies it to the
//! [`Browser`], and answers with a `state` snapshot on stdout. Commands are
//! handled strictly one after another.
//!
//! ## Commands
//!
//! | `type`         | Fields                     | Effect                          |
//! |----------------|----------------------------|---------------------------------|
//! | `submit`       | `input`, `engine?`         | Resolve and load in active tab  |
//! | `back`         | —                          | Active tab one entry back       |
//! | `forward`      | —                          | Active tab one entry forward    |
//! | `new_tab`      | `url?`                     | Open and activate a tab         |
//! | `activate`     | `index`                    | Activate tab at display index   |
//! | `close`        | `index`                    | Close tab at display index      |
//! | `toggle_theme` | —                          | Flip light/dark                 |
//! | `state`        | —                          | Snapshot only                   |
//!
//! Malformed lines and failed commands produce an `error` line. Render
//! surfaces write their `frame.*` events to the same stream, in order.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::navigation::{Browser, NavigationError};
use crate::transport::TransportState;

/// Output stream shared by the dispatch loop and render surfaces.
pub type Outbox = mpsc::UnboundedSender<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Submit {
        input: String,
        #[serde(default)]
        engine: Option<String>,
    },
    Back,
    Forward,
    NewTab {
        #[serde(default)]
        url: Option<String>,
    },
    Activate {
        index: usize,
    },
    Close {
        index: usize,
    },
    ToggleTheme,
    State,
}

/// Apply one command.
pub async fn dispatch(browser: &mut Browser, command: Command) -> Result<(), NavigationError> {
    match command {
        Command::Submit { input, engine } => browser.submit(&input, engine.as_deref()).await,
        Command::Back => browser.back().await.map(|_| ()),
        Command::Forward => browser.forward().await.map(|_| ()),
        Command::NewTab { url } => browser.open_tab(url.as_deref()).await.map(|_| ()),
        Command::Activate { index } => {
            let id = browser.tab_at(index)?;
            browser.activate_tab(id)
        }
        Command::Close { index } => {
            let id = browser.tab_at(index)?;
            browser.close_tab(id)
        }
        Command::ToggleTheme => {
            browser.chrome_mut().toggle_theme();
            Ok(())
        }
        Command::State => Ok(()),
    }
}

/// `{"type":"state", ...}` snapshot of tabs, chrome and transport.
pub fn snapshot(browser: &Browser, transport: &TransportState) -> Value {
    let chrome = browser.chrome();
    let tabs: Vec<Value> = browser
        .tabs()
        .iter()
        .map(|tab| {
            let selector = chrome.selector(tab.selector());
            json!({
                "id": tab.id(),
                "label": selector.map(|s| s.label.as_str()),
                "active": selector.is_some_and(|s| s.active),
                "url": tab.current(),
                "history": tab.history(),
                "cursor": tab.cursor(),
            })
        })
        .collect();
    json!({
        "type": "state",
        "tabs": tabs,
        "active": browser.tabs().active_index(),
        "address": chrome.address(),
        "theme": chrome.theme(),
        "status": chrome.error(),
        "transport": {
            "id": transport.current_transport_id,
            "configured": transport.configured,
        },
    })
}

/// Process commands from `input` until EOF.
pub async fn run<R>(browser: &mut Browser, input: R, out: &Outbox)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                tracing::error!("stdin read error: {e}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(trimmed) {
            Ok(c) => c,
            Err(e) => {
                let _ = out.send(json!({
                    "type": "error",
                    "message": format!("Parse error: {e}"),
                }));
                continue;
            }
        };

        debug!(?command, "dispatch");
        if let Err(e) = dispatch(browser, command).await {
            let _ = out.send(json!({ "type": "error", "message": e.to_string() }));
        }
        let transport = browser.transport_state().await;
        let _ = out.send(snapshot(browser, &transport));
    }
}

/// Write every event from `events` to `writer`, one JSON object per line.
pub async fn write_events<W>(mut events: mpsc::UnboundedReceiver<Value>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_string(&event) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("failed to serialize event: {e}");
                continue;
            }
        };
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}
