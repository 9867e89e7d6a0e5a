use super::messages::{OutboundAudio, ServerEvent, SessionSetup};
use crate::error::{VoiceError, VoiceResult};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Capacity of the inbound event channel toward the session loop
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for the connection task before aborting it
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What a live connection reports to the session loop
#[derive(Debug)]
pub enum ClientEvent {
    /// Parsed message from the service
    Event(ServerEvent),
    /// The stream ended; code and reason when the peer sent a close frame
    Closed { code: Option<u16>, reason: String },
}

/// Duplex WebSocket connection to the speech service.
///
/// `connect` resolves once the socket is open and the setup frame is sent;
/// a spawned task then pumps outbound frames from a channel and inbound
/// frames into `ClientEvent`s. Malformed inbound messages are logged and
/// ignored, the stream stays open. Sending on a connection that is going
/// away is quietly dropped.
pub struct LiveClient {
    outbound_tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl LiveClient {
    pub async fn connect(
        url: &str,
        setup: &SessionSetup,
    ) -> VoiceResult<(Self, mpsc::Receiver<ClientEvent>)> {
        Url::parse(url).map_err(|e| VoiceError::Config(format!("invalid service url: {}", e)))?;

        info!("Opening live session to {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| VoiceError::ConnectionLost(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();

        // setup frame goes out before any audio
        let setup_text = serde_json::to_string(setup)?;
        sink.send(Message::Text(setup_text))
            .await
            .map_err(|e| VoiceError::ConnectionLost(e.to_string()))?;

        info!("Live session open (voice={})", setup.voice);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::channel::<ClientEvent>(EVENT_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            let mut close_code: Option<u16> = None;
            let mut close_reason = String::new();

            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if let Err(e) = sink.send(message).await {
                                    debug!("Send on closing session ignored: {}", e);
                                    break;
                                }
                            }
                            None => {
                                // handle dropped: close gracefully
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }

                    inbound = stream.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if events_tx.send(ClientEvent::Event(event)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Ignoring malformed server message: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                if let Some(frame) = frame {
                                    close_code = Some(u16::from(frame.code));
                                    close_reason = frame.reason.to_string();
                                }
                                break;
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                debug!("Ignoring {}-byte binary frame", bytes.len());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Session stream error: {}", e);
                                close_reason = e.to_string();
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            // Best effort: a full or dropped channel means nobody is
            // listening, and the channel closing carries the same signal
            let _ = events_tx.try_send(ClientEvent::Closed {
                code: close_code,
                reason: close_reason,
            });

            debug!("Connection task exited");
        });

        Ok((Self { outbound_tx, task }, events_rx))
    }

    /// Send one audio frame. Dropped without error if the connection is
    /// already going away; capture is cheap to restart and frames are
    /// never queued for a dead stream.
    pub fn send_audio(&self, frame: &OutboundAudio) {
        match serde_json::to_string(frame) {
            Ok(text) => {
                if self.outbound_tx.send(Message::Text(text)).is_err() {
                    debug!("Dropped audio frame on closed session");
                }
            }
            Err(e) => warn!("Failed to encode outbound frame: {}", e),
        }
    }

    /// Close the stream and wait for the connection task to finish.
    ///
    /// The wait is bounded: a task still blocked after the grace period
    /// (for example on a backlogged event channel) is aborted rather than
    /// held onto.
    pub async fn close(mut self) {
        drop(self.outbound_tx);
        match timeout(CLOSE_GRACE, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Connection task panicked: {}", e),
            Err(_) => {
                warn!("Connection task still busy at close; aborting it");
                self.task.abort();
            }
        }
    }
}
