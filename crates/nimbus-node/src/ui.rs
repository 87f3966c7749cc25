//! Button events from a line-oriented console.
//!
//! Headless hosts have no button, so the node reads stdin instead:
//!
//! ```text
//! s    short press   next macro
//! l    long press    loop the current macro
//! ll   double long   power off / maintenance / restart
//! ```

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::machine::UiEvent;

/// Map one console line to a button event.
pub fn parse_line(line: &str) -> Option<UiEvent> {
    match line.trim() {
        "s" | "short" => Some(UiEvent::ShortPress),
        "l" | "long" => Some(UiEvent::LongPress(1)),
        "ll" | "off" => Some(UiEvent::LongPress(2)),
        _ => None,
    }
}

/// Forward stdin lines as button events until stdin or the receiver closes.
pub fn spawn_stdin(events: mpsc::Sender<UiEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(event) => {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!(line = %line.trim(), "Unknown console command (s, l, ll)"),
                },
                Ok(None) => {
                    debug!("Console closed");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Console read failed");
                    return;
                }
            }
        }
    })
}
