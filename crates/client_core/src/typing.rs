//! Typing indicator debouncing.
//!
//! Every keystroke restarts an idle timer. The first keystroke after a quiet period emits
//! `typing`; the timer expiring, a send, or switching receivers emits `stopTyping`.

use std::{sync::Arc, time::Duration};

use shared::{domain::UserId, protocol::ClientSignal};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(800);

/// Anything that can carry client signals to the server.
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, signal: ClientSignal) -> ClientResult<()>;
}

impl SignalSink for mpsc::UnboundedSender<ClientSignal> {
    fn send_signal(&self, signal: ClientSignal) -> ClientResult<()> {
        self.send(signal)
            .map_err(|_| ClientError::Realtime("signal channel closed".into()))
    }
}

enum Command {
    Keystroke(UserId),
    Stop,
}

/// Dropping the indicator closes its queue; the worker flushes a pending `stopTyping`
/// and exits.
pub struct TypingIndicator {
    commands: mpsc::UnboundedSender<Command>,
}

impl TypingIndicator {
    pub fn new(sink: Arc<dyn SignalSink>, idle: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(sink, idle, rx));
        Self { commands }
    }

    /// Records local input aimed at `receiver_id`.
    pub fn keystroke(&self, receiver_id: UserId) {
        let _ = self.commands.send(Command::Keystroke(receiver_id));
    }

    /// Ends the current typing burst right away, e.g. when the message is sent.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }
}

async fn run(sink: Arc<dyn SignalSink>, idle: Duration, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut active: Option<UserId> = None;
    let timer = time::sleep(idle);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Keystroke(receiver_id)) => {
                    if active.as_ref() != Some(&receiver_id) {
                        if let Some(previous) = active.take() {
                            emit(&*sink, ClientSignal::StopTyping { receiver_id: previous });
                        }
                        emit(&*sink, ClientSignal::Typing { receiver_id: receiver_id.clone() });
                        active = Some(receiver_id);
                    }
                    timer.as_mut().reset(Instant::now() + idle);
                }
                Some(Command::Stop) => {
                    if let Some(receiver_id) = active.take() {
                        emit(&*sink, ClientSignal::StopTyping { receiver_id });
                    }
                }
                None => {
                    if let Some(receiver_id) = active.take() {
                        emit(&*sink, ClientSignal::StopTyping { receiver_id });
                    }
                    break;
                }
            },
            () = timer.as_mut(), if active.is_some() => {
                if let Some(receiver_id) = active.take() {
                    emit(&*sink, ClientSignal::StopTyping { receiver_id });
                }
            }
        }
    }
}

fn emit(sink: &dyn SignalSink, signal: ClientSignal) {
    if let Err(err) = sink.send_signal(signal) {
        debug!(%err, "typing signal dropped");
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
