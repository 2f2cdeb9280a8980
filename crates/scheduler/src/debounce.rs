//! Re-armable single-shot timer for render debouncing.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::debug;

enum TimerMessage {
    Arm,
    Cancel,
    Shutdown,
}

/// Single-shot timer in the style of a GUI toolkit's restartable timer:
/// `arm` (re)starts the countdown, and the callback fires once when it
/// elapses undisturbed. Bursts of `arm` calls coalesce into one firing.
pub struct DebounceTimer {
    control: Sender<TimerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn spawn(interval: Duration, on_fire: Arc<dyn Fn() + Send + Sync>) -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let thread = thread::Builder::new()
            .name("paperglass-debounce".to_owned())
            .spawn(move || {
                let mut deadline: Option<Instant> = None;
                loop {
                    let message = match deadline {
                        None => match control_rx.recv() {
                            Ok(message) => message,
                            Err(_) => break,
                        },
                        Some(when) => {
                            let now = Instant::now();
                            if when <= now {
                                deadline = None;
                                on_fire();
                                continue;
                            }
                            match control_rx.recv_timeout(when - now) {
                                Ok(message) => message,
                                Err(RecvTimeoutError::Timeout) => {
                                    deadline = None;
                                    on_fire();
                                    continue;
                                }
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    };

                    match message {
                        TimerMessage::Arm => deadline = Some(Instant::now() + interval),
                        TimerMessage::Cancel => deadline = None,
                        TimerMessage::Shutdown => break,
                    }
                }
                debug!("debounce timer stopped");
            })
            .expect("failed to spawn debounce timer thread");

        Self { control: control_tx, thread: Some(thread) }
    }

    /// Start (or restart) the countdown.
    pub fn arm(&self) {
        let _ = self.control.send(TimerMessage::Arm);
    }

    /// Drop any pending firing.
    pub fn cancel(&self) {
        let _ = self.control.send(TimerMessage::Cancel);
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        let _ = self.control.send(TimerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
