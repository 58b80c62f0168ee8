use crate::error::Result;
use crate::events::{DepthcamEvent, EventBus};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KEY_TASK_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleRecording,
    Quit,
    Ignore,
}

/// Key bindings: `r` toggles recording, `q` or Esc quits
pub fn action_for(code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('r') | KeyCode::Char('R') => KeyAction::ToggleRecording,
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => KeyAction::Quit,
        _ => KeyAction::Ignore,
    }
}

/// Raw terminal mode for as long as the guard lives
struct RawTerminal;

impl RawTerminal {
    fn enter() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        debug!("Terminal switched to raw mode");
        Ok(Self)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        match terminal::disable_raw_mode() {
            Ok(()) => debug!("Terminal restored from raw mode"),
            Err(e) => error!("Could not restore terminal mode: {}", e),
        }
    }
}

/// Terminal keyboard control of the recorder
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    token: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            token: CancellationToken::new(),
            reader: Mutex::new(None),
        }
    }

    /// Spawn the blocking key reader
    pub async fn start(&self) -> Result<()> {
        info!("Keyboard control active: 'r' toggles recording, 'q' quits");

        let bus = Arc::clone(&self.event_bus);
        let token = self.token.clone();
        let handle = Handle::current();

        let reader = tokio::task::spawn_blocking(move || {
            let _raw = match RawTerminal::enter() {
                Ok(raw) => raw,
                Err(e) => {
                    error!("Keyboard control unavailable, raw mode failed: {}", e);
                    return;
                }
            };
            read_keys(&bus, &handle, &token);
        });
        *self.reader.lock() = Some(reader);

        Ok(())
    }

    /// Cancel the reader and wait for it to restore the terminal
    pub async fn stop(&self) -> Result<()> {
        debug!("Stopping keyboard control");
        self.token.cancel();

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if tokio::time::timeout(KEY_TASK_JOIN_TIMEOUT, reader).await.is_err() {
                warn!("Keyboard reader did not exit in time");
                let _ = terminal::disable_raw_mode();
            }
        }

        Ok(())
    }
}

/// Poll the terminal until cancelled or a quit key is seen
fn read_keys(bus: &Arc<EventBus>, handle: &Handle, token: &CancellationToken) {
    while !token.is_cancelled() {
        let ready = match event::poll(KEY_POLL_INTERVAL) {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Keyboard poll failed: {}", e);
                continue;
            }
        };
        if !ready {
            continue;
        }

        let Ok(Event::Key(key)) = event::read() else {
            continue;
        };
        // Press only; repeats and releases are ignored
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let action = action_for(key.code);
        let event = match action {
            KeyAction::ToggleRecording => DepthcamEvent::toggle_recording(),
            KeyAction::Quit => DepthcamEvent::shutdown("User requested via keyboard"),
            KeyAction::Ignore => {
                debug!("Unbound key {:?}", key.code);
                continue;
            }
        };

        let bus = Arc::clone(bus);
        handle.spawn(async move {
            if let Err(e) = bus.publish(event).await {
                warn!("Keyboard event not delivered: {}", e);
            }
        });

        if action == KeyAction::Quit {
            info!("Quit key pressed");
            return;
        }
    }
    debug!("Keyboard reader cancelled");
}
