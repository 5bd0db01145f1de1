//! A minimal terminal spinner shown while a turn is running.

use std::io::Write;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Braille spinner frames.
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const INTERVAL: Duration = Duration::from_millis(80);

/// A stderr spinner running in a background task. The label can change
/// while it spins (e.g. to the stage currently in flight).
pub struct Spinner {
    handle: JoinHandle<()>,
    label: watch::Sender<String>,
    cancel: watch::Sender<bool>,
}

impl Spinner {
    pub fn start(label: &str) -> Self {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (label_tx, label_rx) = watch::channel(label.to_string());

        let handle = tokio::spawn(async move {
            let mut i = 0;
            loop {
                let frame = FRAMES[i % FRAMES.len()];
                let label = label_rx.borrow().clone();
                // \r moves to start of line, \x1b[2K clears the line
                eprint!("\x1b[2K\r{frame} {label}");
                let _ = std::io::stderr().flush();

                tokio::select! {
                    _ = tokio::time::sleep(INTERVAL) => {}
                    _ = cancel_rx.changed() => break,
                }
                i += 1;
            }
            eprint!("\x1b[2K\r");
            let _ = std::io::stderr().flush();
        });

        Self {
            handle,
            label: label_tx,
            cancel: cancel_tx,
        }
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.label.send_replace(label.into());
    }

    /// Stop the spinner and clear its line.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        let _ = self.handle.await;
    }
}
