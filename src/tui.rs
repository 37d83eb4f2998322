use crate::events::TuiEvent;
use anyhow::{Context, Result};
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io::{self, Stdout};
use tokio::sync::mpsc;
use tokio::time::Duration;

pub type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Switch the terminal into raw, alternate-screen mode
pub fn init() -> Result<Tui> {
    install_panic_hook();
    enable_raw_mode().context("Failed to enable raw mode")?;
    execute!(io::stdout(), EnterAlternateScreen, EnableBracketedPaste)
        .context("Failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(io::stdout())).context("Failed to create terminal")
}

/// Put the terminal back the way we found it
pub fn restore() -> Result<()> {
    execute!(io::stdout(), DisableBracketedPaste, LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    disable_raw_mode().context("Failed to disable raw mode")?;
    Ok(())
}

/// Restore the terminal before the panic message is printed
pub fn install_panic_hook() {
    chain_panic_hook(|| {
        let _ = restore();
    });
}

fn chain_panic_hook(on_panic: impl Fn() + Send + Sync + 'static) {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        on_panic();
        original_hook(panic_info);
    }));
}

/// Merges terminal input and a periodic tick into one channel
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<TuiEvent>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let tx_events = tx.clone();
        tokio::spawn(async move {
            let mut reader = EventStream::new();
            while let Some(evt) = reader.next().await {
                let tui_event = match evt {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        Some(TuiEvent::Key(key))
                    }
                    Ok(Event::Paste(text)) => Some(TuiEvent::Paste(text)),
                    Ok(Event::Resize(_, _)) => Some(TuiEvent::Resize),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::error!(error = %e, "terminal event stream failed");
                        break;
                    }
                };

                if let Some(event) = tui_event {
                    if tx_events.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_rate);
            loop {
                interval.tick().await;
                if tx.send(TuiEvent::Tick).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }

    pub async fn next(&mut self) -> Option<TuiEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn panic_runs_cleanup_then_previous_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        chain_panic_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result: std::thread::Result<()> = std::panic::catch_unwind(|| panic!("draw failed"));
        assert!(result.is_err());
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
