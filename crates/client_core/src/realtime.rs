//! The client end of the realtime channel.

use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{ClientSignal, ServerEvent},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ClientError, ClientResult},
    typing::SignalSink,
};

const EVENT_BUFFER: usize = 256;

/// Decoded server events fan out to every subscriber; outgoing signals are queued and
/// written in order by a dedicated task.
pub struct RealtimeConnection {
    events: broadcast::Sender<ServerEvent>,
    signals: mpsc::UnboundedSender<ClientSignal>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeConnection {
    pub async fn connect(server_url: &str, user_id: &UserId) -> ClientResult<Self> {
        let ws_url = realtime_url(server_url, user_id)?;
        let (stream, _) = connect_async(ws_url.as_str()).await?;
        info!(%user_id, "realtime channel open");
        let (mut writer, mut reader) = stream.split();

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (signals, mut signal_rx) = mpsc::unbounded_channel::<ClientSignal>();

        let reader_events = events.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            debug!(event = event.name(), "server event");
                            let _ = reader_events.send(event);
                        }
                        Err(err) => warn!(%err, "ignoring undecodable server event"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "realtime channel failed");
                        break;
                    }
                }
            }
            info!("realtime channel closed");
        });

        let writer_task = tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                let text = match serde_json::to_string(&signal) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode signal");
                        continue;
                    }
                };
                if writer.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        Ok(Self {
            events,
            signals,
            tasks: vec![reader_task, writer_task],
        })
    }

    /// Wraps existing channels; no socket is involved.
    pub fn from_channels(
        events: broadcast::Sender<ServerEvent>,
        signals: mpsc::UnboundedSender<ClientSignal>,
    ) -> Self {
        Self {
            events,
            signals,
            tasks: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn signal_sender(&self) -> mpsc::UnboundedSender<ClientSignal> {
        self.signals.clone()
    }
}

impl SignalSink for RealtimeConnection {
    fn send_signal(&self, signal: ClientSignal) -> ClientResult<()> {
        self.signals.send_signal(signal)
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// `http(s)://host[/base]` becomes `ws(s)://host[/base]/ws?user_id=<id>`.
pub fn realtime_url(server_url: &str, user_id: &UserId) -> ClientResult<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|err| ClientError::InvalidUrl(format!("{server_url}: {err}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => url.scheme(),
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {server_url}"
            )))
        }
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {server_url}")))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("user_id", user_id.as_str());
    Ok(url)
}
