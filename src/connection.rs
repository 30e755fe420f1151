use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{ SplitSink, SplitStream };
use futures::{ SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{ mpsc, watch, Mutex };
use tokio::task::JoinHandle;
use tokio::time::{ interval, MissedTickBehavior };
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{ connect_async, MaybeTlsStream, WebSocketStream };
use url::Url;

use crate::bootstrap::ConversationApi;
use crate::codec::{ decode_event, encode_intent };
use crate::error::ChannelError;
use crate::models::chat::{ ConnectionState, RiderLocation, Role };
use crate::models::envelope::{ ClientIntent, ServerEvent };
use crate::store::ConversationStore;

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Write half of an established channel.
#[async_trait]
pub trait ChannelSink: Send {
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;
    async fn close(&mut self);
}

/// Read half of an established channel. `None` means the remote closed.
#[async_trait]
pub trait ChannelSource: Send {
    async fn next(&mut self) -> Option<Result<String, ChannelError>>;
}

/// Transport seam for the channel manager. Production uses the WebSocket
/// implementation below; tests script their own connections.
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &Url
    ) -> Result<(Box<dyn ChannelSink>, Box<dyn ChannelSource>), ChannelError>;
}

/// Anything that can accept locally originated intents. The location
/// publisher depends on this rather than on the manager directly.
#[async_trait]
pub trait IntentSender: Send + Sync + 'static {
    async fn send_intent(&self, intent: ClientIntent);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport;

struct WsSink(SplitSink<WsStream, WsMessage>);

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl ChannelSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        Ok(self.0.send(WsMessage::Text(text)).await?)
    }

    async fn close(&mut self) {
        let _ = self.0.send(WsMessage::Close(None)).await;
        let _ = self.0.close().await;
    }
}

#[async_trait]
impl ChannelSource for WsSource {
    async fn next(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.0.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(Ok(text));
                }
                Some(Ok(WsMessage::Close(_))) => {
                    return None;
                }
                // Protocol-level pings are answered by tungstenite itself.
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                    continue;
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Ignoring binary frame on chat channel");
                    continue;
                }
                Some(Ok(WsMessage::Frame(_))) => {
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(e.into()));
                }
                None => {
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn connect(
        &self,
        url: &Url
    ) -> Result<(Box<dyn ChannelSink>, Box<dyn ChannelSource>), ChannelError> {
        let (ws, _) = connect_async(url.as_str()).await?;
        let (sink, source) = ws.split();
        Ok((Box::new(WsSink(sink)), Box::new(WsSource(source))))
    }
}

#[derive(Clone, Debug)]
pub struct ChannelSettings {
    /// Minimum delay between connection attempts. Retries never stop until
    /// an explicit close, but they are rate-capped by this value.
    pub reconnect_delay: Duration,
    /// Ping cadence while open. The pong is never awaited; liveness is
    /// inferred from transport-level close only.
    pub heartbeat_interval: Duration,
    /// Composer inactivity window before typing:false goes out.
    pub typing_debounce: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            typing_debounce: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub ws_base_url: String,
    pub conversation_id: String,
    pub role: Role,
    pub user_id: String,
    pub settings: ChannelSettings,
}

pub fn channel_url(
    base: &str,
    conversation_id: &str,
    role: Role,
    user_id: &str
) -> Result<Url, ChannelError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair("conversation_id", conversation_id)
        .append_pair("role", role.as_str())
        .append_pair("user_id", user_id);
    Ok(url)
}

/// Owns one persistent channel for one conversation. There is exactly one
/// of these per open conversation screen; the connection handle lives
/// inside it, never in ambient state.
pub struct ChannelManager {
    store: Arc<Mutex<ConversationStore>>,
    outbound: mpsc::Sender<ClientIntent>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    typing_generation: AtomicU64,
    typing_active: AtomicBool,
    settings: ChannelSettings,
}

impl ChannelManager {
    /// Establishes the channel and starts the reconnect loop. A single
    /// driver task owns all connection attempts, so two concurrent attempts
    /// for the same conversation cannot happen.
    pub fn open(
        config: ChannelConfig,
        store: Arc<Mutex<ConversationStore>>,
        transport: Arc<dyn ChannelTransport>,
        api: Option<Arc<dyn ConversationApi>>
    ) -> Result<Arc<Self>, ChannelError> {
        let url = channel_url(
            &config.ws_base_url,
            &config.conversation_id,
            config.role,
            &config.user_id
        )?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = tokio::spawn(
            drive(url, store.clone(), transport, api, config.settings.clone(), outbound_rx, shutdown_rx)
        );

        Ok(
            Arc::new(Self {
                store,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
                driver: Mutex::new(Some(driver)),
                typing_generation: AtomicU64::new(0),
                typing_active: AtomicBool::new(false),
                settings: config.settings,
            })
        )
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        self.store.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.store.lock().await.connection_state()
    }

    /// Fire-and-forget submission. Intents while the channel is not open
    /// are dropped, never buffered; a message typed during a reconnecting
    /// window is lost by design.
    pub async fn send_intent(&self, intent: ClientIntent) {
        let state = self.store.lock().await.connection_state();
        if state != ConnectionState::Open {
            debug!("Dropping outbound intent while channel is {}", state);
            return;
        }
        if self.outbound.try_send(intent).is_err() {
            warn!("Outbound queue full, dropping intent");
        }
    }

    pub async fn send_text(&self, content: impl Into<String>) {
        self.send_intent(ClientIntent::text(content)).await;
    }

    pub async fn send_location(&self, latitude: f64, longitude: f64, order_id: Option<String>) {
        self.send_intent(ClientIntent::location(latitude, longitude, order_id)).await;
    }

    /// Composer keystroke hook. Sends typing:true on the first keystroke
    /// and typing:false after the debounce window passes with no further
    /// input; every call re-arms the window.
    pub async fn note_input(self: &Arc<Self>) {
        let generation = self.typing_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.typing_active.swap(true, Ordering::SeqCst) {
            self.send_intent(ClientIntent::Typing { typing: true }).await;
        }
        let manager = Arc::clone(self);
        let debounce = self.settings.typing_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if manager.typing_generation.load(Ordering::SeqCst) == generation {
                manager.typing_active.store(false, Ordering::SeqCst);
                manager.send_intent(ClientIntent::Typing { typing: false }).await;
            }
        });
    }

    /// Deterministic teardown: stops the driver (and with it heartbeat and
    /// any reconnection), invalidates pending typing debounces, and marks
    /// the store closed. No reconnection ever follows an explicit close.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        self.typing_generation.fetch_add(1, Ordering::SeqCst);
        self.typing_active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.driver.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Channel driver task failed: {}", e);
            }
        }
        self.store.lock().await.set_connection_state(ConnectionState::Closed);
        info!("Channel closed");
    }
}

#[async_trait]
impl IntentSender for ChannelManager {
    async fn send_intent(&self, intent: ClientIntent) {
        ChannelManager::send_intent(self, intent).await;
    }
}

enum SessionEnd {
    Remote,
    Shutdown,
}

async fn drive(
    url: Url,
    store: Arc<Mutex<ConversationStore>>,
    transport: Arc<dyn ChannelTransport>,
    api: Option<Arc<dyn ConversationApi>>,
    settings: ChannelSettings,
    mut outbound: mpsc::Receiver<ClientIntent>,
    mut shutdown: watch::Receiver<bool>
) {
    let mut first_attempt = true;
    loop {
        if *shutdown.borrow() {
            break;
        }
        if !first_attempt {
            store.lock().await.set_connection_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(settings.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        first_attempt = false;

        store.lock().await.set_connection_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            result = transport.connect(&url) => result,
            _ = shutdown.changed() => break,
        };
        let (sink, source) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Channel connect failed: {}", e);
                continue;
            }
        };

        // Drop-not-queue: anything submitted while the channel was away is
        // stale and must not be replayed on the fresh connection.
        while outbound.try_recv().is_ok() {
            debug!("Discarding intent submitted while channel was not open");
        }

        store.lock().await.set_connection_state(ConnectionState::Open);
        info!("Channel open: {}", url);

        match
            run_session(
                &store,
                api.as_ref(),
                &settings,
                &mut outbound,
                &mut shutdown,
                sink,
                source
            ).await
        {
            SessionEnd::Shutdown => {
                break;
            }
            SessionEnd::Remote => {
                info!("Channel lost, will reconnect");
            }
        }
    }
    store.lock().await.set_connection_state(ConnectionState::Closed);
}

async fn run_session(
    store: &Arc<Mutex<ConversationStore>>,
    api: Option<&Arc<dyn ConversationApi>>,
    settings: &ChannelSettings,
    outbound: &mut mpsc::Receiver<ClientIntent>,
    shutdown: &mut watch::Receiver<bool>,
    mut sink: Box<dyn ChannelSink>,
    mut source: Box<dyn ChannelSource>
) -> SessionEnd {
    let mut heartbeat = interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; skip it so the
    // first ping goes out one full interval after open.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                sink.close().await;
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                match encode_intent(&ClientIntent::Ping) {
                    Ok(raw) => {
                        if let Err(e) = sink.send(raw).await {
                            warn!("Heartbeat send failed: {}", e);
                            return SessionEnd::Remote;
                        }
                    }
                    Err(e) => error!("Failed to encode ping: {}", e),
                }
            }
            maybe_intent = outbound.recv() => {
                let Some(intent) = maybe_intent else {
                    sink.close().await;
                    return SessionEnd::Shutdown;
                };
                match encode_intent(&intent) {
                    Ok(raw) => {
                        if let Err(e) = sink.send(raw).await {
                            warn!("Intent send failed: {}", e);
                            return SessionEnd::Remote;
                        }
                    }
                    Err(e) => error!("Failed to encode intent: {}", e),
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(raw)) => {
                        if let Some(event) = decode_event(&raw) {
                            handle_event(store, api, &mut sink, event).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Channel transport error: {}", e);
                        return SessionEnd::Remote;
                    }
                    None => {
                        info!("Channel closed by remote");
                        return SessionEnd::Remote;
                    }
                }
            }
        }
    }
}

async fn handle_event(
    store: &Arc<Mutex<ConversationStore>>,
    api: Option<&Arc<dyn ConversationApi>>,
    sink: &mut Box<dyn ChannelSink>,
    event: ServerEvent
) {
    match event {
        ServerEvent::NewMessage { message } => {
            let foreign = {
                let mut guard = store.lock().await;
                let foreign = message.sender_role != guard.local_role();
                guard.append_message(message);
                foreign
            };
            // Auto-read on receipt: the local participant is assumed to be
            // actively viewing while connected.
            if foreign {
                match encode_intent(&ClientIntent::Read) {
                    Ok(raw) => {
                        if let Err(e) = sink.send(raw).await {
                            warn!("Failed to send read receipt: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode read receipt: {}", e),
                }
            }
        }
        ServerEvent::Typing { role, typing } => {
            store.lock().await.set_typing(role, typing);
        }
        ServerEvent::RiderLocation { latitude, longitude, heading, speed, timestamp } => {
            let location = RiderLocation {
                latitude,
                longitude,
                heading,
                speed,
                timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp()),
            };
            store.lock().await.set_location(location);
        }
        ServerEvent::MessagesRead { .. } => {
            store.lock().await.mark_own_messages_read();
        }
        ServerEvent::UserJoined { role, user_id, name } => {
            store.lock().await.upsert_participant(role, user_id, name);
        }
        ServerEvent::UserLeft { role } => {
            store.lock().await.mark_participant_offline(role);
        }
        ServerEvent::RiderAssigned { rider_id, .. } => {
            // Rare enough mid-conversation that a full re-fetch beats an
            // incremental patch.
            info!("Rider assigned ({:?}), reloading conversation", rider_id);
            if let Some(api) = api {
                let conversation_id = store.lock().await.conversation().id.clone();
                match api.fetch_conversation(&conversation_id).await {
                    Ok(history) => {
                        store.lock().await.load_history(history.messages, history.participants);
                    }
                    Err(e) => error!("Reload after rider assignment failed: {}", e),
                }
            }
        }
        ServerEvent::Pong => {
            // No liveness timeout here: silence is broken only by a
            // transport-level close.
            debug!("Heartbeat pong");
        }
    }
}
