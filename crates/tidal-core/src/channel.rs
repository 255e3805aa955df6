use std::time::Duration;

use futures_util::StreamExt;
use tidal_shared::PushMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// What the connector reports to stores, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Message(PushMessage),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl ChannelConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

/// Owns the socket loop for one logical push channel.
///
/// Messages are only delivered between a `Connected` and the following
/// `Disconnected`. Dropping the connector stops the loop.
pub struct ChannelConnector {
    task: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelConnector {
    /// Starts the socket loop on the current tokio runtime.
    pub fn spawn(config: ChannelConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(channel_loop(config, tx));
        Self { task, events }
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for ChannelConnector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum PumpEnd {
    Closed,
    ReceiverGone,
}

async fn channel_loop(config: ChannelConfig, tx: mpsc::UnboundedSender<ChannelEvent>) {
    let mut backoff = config.backoff_initial;
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws, _response)) => {
                info!(url = %config.url, "push channel connected");
                backoff = config.backoff_initial;
                if tx.send(ChannelEvent::Connected).is_err() {
                    return;
                }

                let end = pump_frames(ws, &tx).await;
                if matches!(end, PumpEnd::ReceiverGone) {
                    return;
                }
                warn!(url = %config.url, "push channel disconnected");
                if tx.send(ChannelEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(url = %config.url, error = %err, retry_in = ?backoff, "push channel connect failed");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, config.backoff_max);
    }
}

async fn pump_frames<S>(mut stream: S, tx: &mpsc::UnboundedSender<ChannelEvent>) -> PumpEnd
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Some(message) = parse_push_frame(text.as_str()) else {
                    continue;
                };
                if tx.send(ChannelEvent::Message(message)).is_err() {
                    return PumpEnd::ReceiverGone;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "push channel closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "push channel read failed");
                break;
            }
        }
    }
    PumpEnd::Closed
}

/// Decodes one text frame. Malformed frames are logged and dropped.
pub fn parse_push_frame(text: &str) -> Option<PushMessage> {
    trace!(frame = text, "push frame");
    match serde_json::from_str::<PushMessage>(text) {
        Ok(PushMessage::Unknown) => {
            debug!(frame = text, "push frame with unrecognized event");
            Some(PushMessage::Unknown)
        }
        Ok(message) => Some(message),
        Err(err) => {
            warn!(error = %err, frame_len = text.len(), "dropping malformed push frame");
            None
        }
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
