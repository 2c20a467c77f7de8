//! WebSocket client for the speech service
//!
//! Each successful connect spawns a reader and a writer task. A generation
//! number ties those tasks to the connect that created them, so a reader
//! outliving an explicit `disconnect` does not report a spurious
//! `Disconnected`.
//!
//! Events raised inside `connect` are offered without waiting, since the
//! caller may be the event consumer itself. Everything the reader reports,
//! including the terminal `Error` and `Disconnected`, waits for room in the
//! channel and is never dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::{Connection, ConnectionEvent, ConnectionState};
use crate::config::ServerConfig;
use crate::{Error, Result};

/// Outgoing messages buffered per connection
const OUTGOING_CAPACITY: usize = 64;

struct Shared {
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    /// Offer an event raised on the caller's task without waiting
    fn notify(&self, event: ConnectionEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(error = %e, "event channel full, dropping connect event");
        }
    }

    /// Deliver an event from the reader, waiting for the consumer
    async fn deliver(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Puts a connect abandoned mid-handshake back to `Disconnected`
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

struct Session {
    outgoing: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// [`Connection`] over a WebSocket
pub struct WsConnection {
    url: String,
    network_timeout: Duration,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    started: AtomicBool,
}

impl WsConnection {
    /// Create a disconnected client; events are delivered on `events`
    #[must_use]
    pub fn new(config: &ServerConfig, events: mpsc::Sender<ConnectionEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: config.url.clone(),
            network_timeout: config.network_timeout,
            shared: Arc::new(Shared {
                events,
                state,
                generation: AtomicU64::new(0),
            }),
            session: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Keep retrying `connect` every `interval` while disconnected
    ///
    /// Does nothing until the first connect attempt has been made.
    pub fn spawn_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !connection.started.load(Ordering::Acquire) || connection.is_connected() {
                    continue;
                }

                tracing::debug!(url = %connection.url, "auto-reconnect attempt");
                if let Err(e) = connection.connect().await {
                    tracing::debug!(error = %e, "auto-reconnect failed");
                }
            }
        })
    }

    fn spawn_tasks(&self, stream: WsStream, generation: u64) -> Session {
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            let live = |shared: &Shared| shared.generation.load(Ordering::Acquire) == generation;

            while let Some(message) = source.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => ConnectionEvent::Text(text),
                    Ok(Message::Binary(data)) => ConnectionEvent::Binary(data),
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "server closed connection");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        if live(&shared) && !shared.deliver(ConnectionEvent::Error(e.to_string())).await {
                            return;
                        }
                        break;
                    }
                };

                if !shared.deliver(event).await {
                    tracing::debug!("event receiver gone, closing reader");
                    return;
                }
            }

            // Only the live connection reports its own loss
            if live(&shared) {
                shared.state.send_replace(ConnectionState::Disconnected);
                tracing::info!("disconnected from server");
                shared.deliver(ConnectionEvent::Disconnected).await;
            }
        });

        Session {
            outgoing,
            reader,
            writer,
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        let outgoing = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) if self.state() == ConnectionState::Connected => s.outgoing.clone(),
                _ => return Err(Error::NotConnected),
            }
        };

        outgoing
            .send(message)
            .await
            .map_err(|_| Error::Connection("connection closed".to_string()))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[async_trait]
impl Connection for WsConnection {
    async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.started.store(true, Ordering::Release);

        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        // Tear down what is left of a connection that dropped on its own
        if let Some(old) = session.take() {
            old.reader.abort();
            old.writer.abort();
        }

        self.shared.state.send_replace(ConnectionState::Connecting);
        let _connecting = ConnectingGuard {
            state: &self.shared.state,
        };
        tracing::debug!(url = %self.url, "connecting to server");

        let stream = match tokio::time::timeout(
            self.network_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.shared.state.send_replace(ConnectionState::Error);
                self.shared.notify(ConnectionEvent::Error(e.to_string()));
                return Err(Error::Connection(e.to_string()));
            }
            Err(_) => {
                self.shared.state.send_replace(ConnectionState::Error);
                let reason = format!("connect timed out after {:?}", self.network_timeout);
                self.shared.notify(ConnectionEvent::Error(reason.clone()));
                return Err(Error::Connection(reason));
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;

        // Connected must reach the orchestrator ahead of anything the reader forwards
        self.shared.state.send_replace(ConnectionState::Connected);
        self.shared.notify(ConnectionEvent::Connected);
        *session = Some(self.spawn_tasks(stream, generation));
        tracing::info!(url = %self.url, "connected to server");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(old) = session.take() {
            old.reader.abort();
            // Dropping the sender lets the writer send a close frame
            drop(old.outgoing);
            if tokio::time::timeout(Duration::from_secs(1), old.writer).await.is_err() {
                tracing::debug!("websocket writer did not finish closing");
            }
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!("disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    async fn send_binary(&self, data: Vec<u8>) -> Result<usize> {
        let len = data.len();
        self.send(Message::Binary(data)).await?;
        Ok(len)
    }

    async fn send_text(&self, text: String) -> Result<usize> {
        let len = text.len();
        self.send(Message::Text(text)).await?;
        Ok(len)
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}
