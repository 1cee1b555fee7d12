//! Stream Session Manager
//!
//! Owns the websocket lifecycle: connect, subscribe/unsubscribe,
//! heartbeat, reconnect with full-jitter backoff, and post-reconnect
//! subscription replay.
//!
//! # Design
//!
//! One driver task per manager runs the session state machine
//! (`Disconnected → Connecting → Connected → Active → Degraded →
//! Reconnecting → Active | Closed`). The [`SubscriptionRegistry`] is the
//! source of truth for what must be subscribed: on every (re)connect the
//! driver discards queued wire commands and replays the registry's
//! symbol union in one frame, which is also what keeps a subscription
//! cancelled mid-reconnect out of the replay set.
//!
//! Delivery is fan-out over one bounded queue per subscription; a full
//! queue drops the incoming tick for that subscriber only, so a slow
//! consumer never blocks ingestion, other subscriptions, or the
//! heartbeat. The manager keeps a last-tick cache per streamed symbol so
//! one-shot ticker requests can be served from this channel without
//! touching the wire.

use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::codec::{StreamCodec, StreamFrame};
use super::heartbeat::{HeartbeatConfig, HeartbeatState};
use super::messages::{CommandAck, RawPayload, StreamRequest, TickerEvent, ticker_stream};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::unifier::{DataUnifier, Normalized};
use crate::domain::health::{ChannelHealth, ChannelState};
use crate::domain::market::{CanonicalTicker, ChannelKind, Confidence, DataType, Symbol};
use crate::domain::subscription::{SubscriptionId, SubscriptionRegistry, SubscriptionState};
use crate::errors::{GatewayError, GatewayResult, unify};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Session State
// =============================================================================

/// Connection lifecycle state of the stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Dialing the websocket endpoint.
    Connecting,
    /// Socket established, subscription replay not yet acknowledged.
    Connected,
    /// Replay acknowledged; data is flowing.
    Active,
    /// Connected but flagged unhealthy (missed heartbeat window or
    /// elevated channel error rate).
    Degraded,
    /// Connection lost; backing off before the next attempt.
    Reconnecting,
    /// Shut down; the session will not reconnect.
    Closed,
}

impl SessionState {
    /// Short snake_case name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

// =============================================================================
// Wire Commands
// =============================================================================

/// Wire-level deltas queued for the driver while it holds the socket.
#[derive(Debug)]
enum SessionCommand {
    /// Subscribe symbols whose reference count went zero to one.
    Subscribe {
        id: SubscriptionId,
        symbols: BTreeSet<Symbol>,
    },
    /// Unsubscribe symbols whose reference count hit zero.
    Unsubscribe { symbols: BTreeSet<Symbol> },
}

/// What an inbound acknowledgment should do to subscription state.
#[derive(Debug)]
enum AckAction {
    /// Replay ack: every live subscription becomes `Active`.
    MarkAll,
    /// Targeted subscribe ack for specific subscriptions.
    Mark(Vec<SubscriptionId>),
    /// Unsubscribe ack; nothing to update.
    Discard,
}

/// Why the per-connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    /// Shutdown requested; do not reconnect.
    Cancelled,
    /// Nothing left to stream; close gracefully and park.
    Idle,
    /// Transport failure or staleness; reconnect with backoff.
    ConnectionLost,
}

enum Flow {
    Continue,
    Stop(EndReason),
}

// =============================================================================
// Manager
// =============================================================================

struct CachedTick {
    ticker: CanonicalTicker,
    received: Instant,
}

struct SubscriberSlot {
    symbols: BTreeSet<Symbol>,
    tx: mpsc::Sender<CanonicalTicker>,
}

/// Owner of the streaming channel: registry, session driver, last-tick
/// cache, and per-subscription delivery queues.
pub struct StreamSessionManager {
    registry: SubscriptionRegistry,
    health: Arc<ChannelHealth>,
    unifier: DataUnifier,
    settings: StreamSettings,
    phase: RwLock<SessionState>,
    latest: RwLock<HashMap<Symbol, CachedTick>>,
    subscribers: Mutex<HashMap<SubscriptionId, SubscriberSlot>>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSessionManager {
    /// Create the manager and spawn its session driver.
    ///
    /// The driver stays parked until the first subscription registers a
    /// symbol; the socket is dialed lazily.
    #[must_use]
    pub fn new(settings: StreamSettings, health: Arc<ChannelHealth>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            registry: SubscriptionRegistry::new(),
            health,
            unifier: DataUnifier::new(settings.fresh_tick_max_age),
            settings,
            phase: RwLock::new(SessionState::Disconnected),
            latest: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            cmd_tx,
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        });

        let driver = SessionDriver::new(Arc::clone(&manager), cmd_rx);
        *manager.driver.lock() = Some(tokio::spawn(driver.run()));
        manager
    }

    /// Register a continuous ticker subscription over the given symbols.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for an empty symbol set
    /// and [`GatewayError::Shutdown`] once the session is closed.
    pub fn subscribe(
        self: &Arc<Self>,
        symbols: BTreeSet<Symbol>,
    ) -> GatewayResult<TickerSubscription> {
        if symbols.is_empty() {
            return Err(GatewayError::InvalidRequest {
                message: "subscription requires at least one symbol".to_string(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }

        let (id, changes) = self.registry.register(symbols.clone(), DataType::Ticker);
        let (tx, rx) = mpsc::channel(self.settings.subscriber_queue_capacity);
        self.subscribers.lock().insert(
            id,
            SubscriberSlot {
                symbols: symbols.clone(),
                tx,
            },
        );

        if changes.subscribe.is_empty() {
            // Shared symbols are already flowing; no wire change needed.
            let phase = *self.phase.read();
            if matches!(phase, SessionState::Active | SessionState::Degraded) {
                self.registry.mark(id, SubscriptionState::Active);
            }
        } else if self
            .cmd_tx
            .send(SessionCommand::Subscribe {
                id,
                symbols: changes.subscribe,
            })
            .is_err()
        {
            self.registry.cancel(id);
            self.subscribers.lock().remove(&id);
            return Err(GatewayError::Shutdown);
        }

        metrics::set_stream_subscriptions(
            self.registry.active_count(),
            self.registry.symbol_count(),
        );
        tracing::info!(subscription = %id, symbols = symbols.len(), "subscription registered");

        Ok(TickerSubscription {
            id,
            symbols,
            rx,
            manager: Arc::clone(self),
            cancelled: false,
        })
    }

    /// Cancel a subscription, releasing its symbol references and cache
    /// entries. Idempotent; takes effect immediately even when the
    /// session is mid-reconnect.
    pub fn cancel_subscription(&self, id: SubscriptionId) {
        let changes = self.registry.cancel(id);
        self.subscribers.lock().remove(&id);

        if !changes.unsubscribe.is_empty() {
            let mut latest = self.latest.write();
            for symbol in &changes.unsubscribe {
                latest.remove(symbol);
            }
            drop(latest);
            // A closed driver means the socket is gone anyway.
            let _ = self.cmd_tx.send(SessionCommand::Unsubscribe {
                symbols: changes.unsubscribe,
            });
        }

        metrics::set_stream_subscriptions(
            self.registry.active_count(),
            self.registry.symbol_count(),
        );
        tracing::info!(subscription = %id, "subscription cancelled");
    }

    /// Serve a one-shot ticker from the last-tick cache.
    ///
    /// Fresh ticks keep their ingest confidence; ticks older than the
    /// fresh window but inside the servable window are downgraded; older
    /// entries are not served at all.
    #[must_use]
    pub fn serve_ticker(&self, symbol: &Symbol) -> Option<CanonicalTicker> {
        let guard = self.latest.read();
        let cached = guard.get(symbol)?;
        let age = cached.received.elapsed();
        if age <= self.settings.fresh_tick_max_age {
            Some(cached.ticker.clone())
        } else if age <= self.settings.servable_tick_max_age {
            let mut ticker = cached.ticker.clone();
            ticker.confidence = ticker.confidence.worst(Confidence::Degraded);
            Some(ticker)
        } else {
            None
        }
    }

    /// Whether a servable cached tick exists for the symbol.
    #[must_use]
    pub fn can_serve(&self, symbol: &Symbol) -> bool {
        self.latest
            .read()
            .get(symbol)
            .is_some_and(|cached| cached.received.elapsed() <= self.settings.servable_tick_max_age)
    }

    /// Whether any live subscription covers the symbol.
    #[must_use]
    pub fn covers(&self, symbol: &Symbol) -> bool {
        self.registry.covers(symbol)
    }

    /// Current session state, overlaid with channel health: an `Active`
    /// session on an unhealthy channel reports `Degraded`.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        let phase = *self.phase.read();
        if phase == SessionState::Active && self.health.state() != ChannelState::Healthy {
            SessionState::Degraded
        } else {
            phase
        }
    }

    /// Lifecycle state of one subscription, if it is still live.
    #[must_use]
    pub fn subscription_state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.registry.get(id).map(|record| record.state)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Number of distinct streamed symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.registry.symbol_count()
    }

    /// Health telemetry handle for this channel.
    #[must_use]
    pub fn health(&self) -> Arc<ChannelHealth> {
        Arc::clone(&self.health)
    }

    /// Stop the driver and wait for it to finish.
    ///
    /// All subscriptions are cancelled and every delivery queue closes,
    /// so outstanding `recv()` calls return `None` promptly.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "stream driver ended abnormally");
            }
        }
    }

    fn set_phase(&self, phase: SessionState) {
        let mut guard = self.phase.write();
        if *guard != phase {
            tracing::info!(from = guard.as_str(), to = phase.as_str(), "stream session transition");
            *guard = phase;
        }
    }

    pub(crate) fn store_latest(&self, ticker: CanonicalTicker) {
        self.latest.write().insert(
            ticker.symbol.clone(),
            CachedTick {
                ticker,
                received: Instant::now(),
            },
        );
    }

    /// Deliver one tick to every subscription covering its symbol.
    ///
    /// A full queue drops the tick for that subscriber only; a closed
    /// queue marks the subscription for removal.
    fn fan_out(&self, ticker: &CanonicalTicker) {
        let mut delivered = 0u64;
        let mut dropped = 0u64;
        let mut stale: Vec<SubscriptionId> = Vec::new();

        {
            let subscribers = self.subscribers.lock();
            for (id, slot) in subscribers.iter() {
                if !slot.symbols.contains(&ticker.symbol) {
                    continue;
                }
                match slot.tx.try_send(ticker.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => dropped += 1,
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        for id in stale {
            self.cancel_subscription(id);
        }
        metrics::record_ticks_delivered(delivered);
        if dropped > 0 {
            metrics::record_ticks_dropped(dropped);
            tracing::debug!(
                symbol = %ticker.symbol,
                dropped,
                "slow subscriber queues full, ticks dropped"
            );
        }
    }

    fn record_stream_failure(&self) {
        let before = self.health.state();
        self.health.record_failure(None);
        self.emit_transition(before);
    }

    fn record_stream_success(&self, latency: Duration) {
        let before = self.health.state();
        self.health.record_success(latency);
        self.emit_transition(before);
    }

    fn emit_transition(&self, before: ChannelState) {
        let after = self.health.state();
        if before != after {
            metrics::record_circuit_transition(ChannelKind::Stream, after);
        }
    }
}

impl std::fmt::Debug for StreamSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSessionManager")
            .field("state", &self.session_state())
            .field("subscriptions", &self.registry.active_count())
            .field("symbols", &self.registry.symbol_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Caller-held handle to a live ticker subscription.
///
/// Receives normalized ticks via [`recv`](Self::recv) or the
/// [`futures_util::Stream`] impl. Dropping the handle cancels the
/// subscription; [`cancel`](Self::cancel) does the same explicitly.
#[derive(Debug)]
pub struct TickerSubscription {
    id: SubscriptionId,
    symbols: BTreeSet<Symbol>,
    rx: mpsc::Receiver<CanonicalTicker>,
    manager: Arc<StreamSessionManager>,
    cancelled: bool,
}

impl TickerSubscription {
    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Symbols this subscription covers.
    #[must_use]
    pub const fn symbols(&self) -> &BTreeSet<Symbol> {
        &self.symbols
    }

    /// Current lifecycle state, `None` once cancelled.
    #[must_use]
    pub fn state(&self) -> Option<SubscriptionState> {
        self.manager.subscription_state(self.id)
    }

    /// Receive the next tick; `None` once the subscription ends.
    pub async fn recv(&mut self) -> Option<CanonicalTicker> {
        self.rx.recv().await
    }

    /// Cancel the subscription, taking effect immediately even while the
    /// session is reconnecting.
    pub fn cancel(mut self) {
        self.cancelled = true;
        self.manager.cancel_subscription(self.id);
        self.rx.close();
    }
}

impl Drop for TickerSubscription {
    fn drop(&mut self) {
        if !self.cancelled {
            self.manager.cancel_subscription(self.id);
        }
    }
}

impl futures_util::Stream for TickerSubscription {
    type Item = CanonicalTicker;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// =============================================================================
// Session Driver
// =============================================================================

struct SessionDriver {
    manager: Arc<StreamSessionManager>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    codec: StreamCodec,
    heartbeat: HeartbeatState,
    heartbeat_config: HeartbeatConfig,
    next_request_id: u64,
    pending_acks: HashMap<u64, AckAction>,
    /// Per-symbol monotonic event-time guard, reset per session.
    last_event_ms: HashMap<Symbol, i64>,
}

impl SessionDriver {
    fn new(
        manager: Arc<StreamSessionManager>,
        cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        let heartbeat_config = HeartbeatConfig::from(&manager.settings);
        Self {
            manager,
            cmd_rx,
            codec: StreamCodec::new(),
            heartbeat: HeartbeatState::new(),
            heartbeat_config,
            next_request_id: 0,
            pending_acks: HashMap::new(),
            last_event_ms: HashMap::new(),
        }
    }

    async fn run(mut self) {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::from(&self.manager.settings));

        loop {
            // Park while there is nothing to stream; a queued subscribe
            // command wakes us and the registry carries its content.
            if self.manager.registry.symbol_count() == 0 {
                self.manager.set_phase(SessionState::Disconnected);
                tokio::select! {
                    () = self.manager.cancel.cancelled() => break,
                    command = self.cmd_rx.recv() => {
                        if command.is_none() {
                            break;
                        }
                        continue;
                    }
                }
            }

            self.manager.set_phase(SessionState::Connecting);
            let connected = tokio::select! {
                () = self.manager.cancel.cancelled() => break,
                result = connect_async(&self.manager.settings.ws_url) => result,
            };
            let ws = match connected {
                Ok((ws, _response)) => ws,
                Err(error) => {
                    self.manager.record_stream_failure();
                    tracing::warn!(
                        error = %unify::websocket(ChannelKind::Stream, &error),
                        "websocket connect failed"
                    );
                    if self.backoff(&mut policy).await {
                        self.manager.set_phase(SessionState::Reconnecting);
                        continue;
                    }
                    break;
                }
            };

            self.manager.set_phase(SessionState::Connected);
            policy.reset();
            self.heartbeat.reset();
            self.pending_acks.clear();
            self.last_event_ms.clear();
            self.discard_queued_commands();

            match self.drive_connection(ws).await {
                EndReason::Cancelled => break,
                EndReason::Idle => {
                    self.manager.set_phase(SessionState::Disconnected);
                }
                EndReason::ConnectionLost => {
                    self.manager.registry.mark_all(SubscriptionState::Reconnecting);
                    self.manager.set_phase(SessionState::Reconnecting);
                    metrics::record_reconnect();
                    if !self.backoff(&mut policy).await {
                        break;
                    }
                }
            }
        }

        // Deterministic teardown: every queue closes so callers unblock.
        self.manager.set_phase(SessionState::Closed);
        let terminated = self.manager.registry.cancel_all();
        self.manager.subscribers.lock().clear();
        self.manager.latest.write().clear();
        metrics::set_stream_subscriptions(0, 0);
        if !terminated.is_empty() {
            tracing::info!(count = terminated.len(), "subscriptions terminated with session");
        }
    }

    /// Run one established connection until it ends.
    async fn drive_connection(&mut self, ws: WsStream) -> EndReason {
        let (mut write, mut read) = ws.split();

        // The registry, not the previous session, decides the replay.
        let replay = self.manager.registry.replay_set();
        if replay.is_empty() {
            return EndReason::Idle;
        }
        let request_id = self.next_id();
        self.pending_acks.insert(request_id, AckAction::MarkAll);
        let request =
            StreamRequest::subscribe(replay.iter().map(ticker_stream).collect(), request_id);
        if let Flow::Stop(reason) = self.send_request(&mut write, &request).await {
            return reason;
        }
        tracing::info!(symbols = replay.len(), request_id, "subscription replay sent");

        let mut heartbeat_tick = tokio::time::interval(self.heartbeat_config.ping_interval);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.manager.cancel.cancelled() => return EndReason::Cancelled,

                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        return EndReason::Cancelled;
                    };
                    if let Flow::Stop(reason) = self.handle_command(&mut write, command).await {
                        return reason;
                    }
                }

                _ = heartbeat_tick.tick() => {
                    if let Flow::Stop(reason) = self.handle_heartbeat_tick(&mut write).await {
                        return reason;
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            self.heartbeat.record_activity();
                            let flow = self.handle_message(&mut write, message).await;
                            if let Flow::Stop(reason) = flow {
                                return reason;
                            }
                        }
                        Some(Err(error)) => {
                            self.manager.record_stream_failure();
                            tracing::warn!(
                                error = %unify::websocket(ChannelKind::Stream, &error),
                                "websocket read failed"
                            );
                            return EndReason::ConnectionLost;
                        }
                        None => {
                            tracing::info!("websocket closed by peer");
                            return EndReason::ConnectionLost;
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, write: &mut WsSink, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Subscribe { id, symbols } => {
                let request_id = self.next_id();
                self.pending_acks.insert(request_id, AckAction::Mark(vec![id]));
                let request = StreamRequest::subscribe(
                    symbols.iter().map(ticker_stream).collect(),
                    request_id,
                );
                self.send_request(write, &request).await
            }
            SessionCommand::Unsubscribe { symbols } => {
                let request_id = self.next_id();
                self.pending_acks.insert(request_id, AckAction::Discard);
                let request = StreamRequest::unsubscribe(
                    symbols.iter().map(ticker_stream).collect(),
                    request_id,
                );
                if let Flow::Stop(reason) = self.send_request(write, &request).await {
                    return Flow::Stop(reason);
                }
                if self.manager.registry.symbol_count() == 0 {
                    tracing::info!("last subscription gone, closing session");
                    return Flow::Stop(EndReason::Idle);
                }
                Flow::Continue
            }
        }
    }

    async fn handle_heartbeat_tick(&mut self, write: &mut WsSink) -> Flow {
        if self.heartbeat.is_stale(self.heartbeat_config.idle_timeout) {
            self.manager.set_phase(SessionState::Degraded);
            self.manager.record_stream_failure();
            tracing::warn!(
                idle_timeout_ms = self.heartbeat_config.idle_timeout.as_millis(),
                "heartbeat window missed, tearing down connection"
            );
            return Flow::Stop(EndReason::ConnectionLost);
        }
        if self.heartbeat.needs_ping(self.heartbeat_config.ping_interval) {
            if let Err(error) = write.send(Message::Ping(Bytes::new())).await {
                tracing::warn!(
                    error = %unify::websocket(ChannelKind::Stream, &error),
                    "ping send failed"
                );
                return Flow::Stop(EndReason::ConnectionLost);
            }
            self.heartbeat.mark_ping_sent();
        }
        Flow::Continue
    }

    async fn handle_message(&mut self, write: &mut WsSink, message: Message) -> Flow {
        match message {
            Message::Text(text) => {
                self.handle_text(text.as_str());
                Flow::Continue
            }
            Message::Ping(payload) => {
                if write.send(Message::Pong(payload)).await.is_err() {
                    return Flow::Stop(EndReason::ConnectionLost);
                }
                Flow::Continue
            }
            Message::Close(frame) => {
                tracing::info!(frame = ?frame, "close frame received");
                Flow::Stop(EndReason::ConnectionLost)
            }
            Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => Flow::Continue,
        }
    }

    fn handle_text(&mut self, text: &str) {
        match self.codec.decode(text) {
            Ok(StreamFrame::Ticker(event)) => self.handle_ticker(event),
            Ok(StreamFrame::Ack(ack)) => self.handle_ack(&ack),
            Ok(StreamFrame::Error(frame)) => {
                // The ack for this request id will never arrive.
                if let Some(id) = frame.id {
                    self.pending_acks.remove(&id);
                }
                self.manager.record_stream_failure();
                tracing::warn!(
                    code = frame.error.code,
                    message = %frame.error.msg,
                    request_id = frame.id,
                    "stream request rejected by exchange"
                );
            }
            Err(error) => {
                metrics::record_rejected_payload(ChannelKind::Stream, "undecodable");
                self.manager.record_stream_failure();
                tracing::warn!(%error, "undecodable stream frame");
            }
        }
    }

    fn handle_ticker(&mut self, event: TickerEvent) {
        let raw = RawPayload::StreamTicker(event);
        let source_state = self.manager.health.state();
        match self.manager.unifier.normalize(&raw, source_state) {
            Ok((Normalized::Ticker(ticker), _)) => {
                let event_ms = ticker.timestamp.timestamp_millis();
                let last = self
                    .last_event_ms
                    .entry(ticker.symbol.clone())
                    .or_insert(i64::MIN);
                if event_ms < *last {
                    metrics::record_ticks_dropped(1);
                    tracing::debug!(symbol = %ticker.symbol, "out-of-order tick dropped");
                    return;
                }
                *last = event_ms;

                let lag = Utc::now()
                    .signed_duration_since(ticker.timestamp)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.manager.record_stream_success(lag);
                metrics::record_delivery_lag(lag);

                self.manager.store_latest(ticker.clone());
                self.manager.fan_out(&ticker);
            }
            Ok(_) => {}
            Err(reject) => {
                metrics::record_rejected_payload(ChannelKind::Stream, reject.as_label());
                self.manager.record_stream_failure();
                tracing::warn!(reason = %reject, payload = ?raw, "stream payload rejected");
            }
        }
    }

    fn handle_ack(&mut self, ack: &CommandAck) {
        match self.pending_acks.remove(&ack.id) {
            Some(AckAction::MarkAll) => {
                self.manager.registry.mark_all(SubscriptionState::Active);
                self.manager.set_phase(SessionState::Active);
                tracing::info!(request_id = ack.id, "subscription replay acknowledged");
            }
            Some(AckAction::Mark(ids)) => {
                for id in ids {
                    self.manager.registry.mark(id, SubscriptionState::Active);
                }
                self.manager.set_phase(SessionState::Active);
            }
            Some(AckAction::Discard) | None => {
                tracing::debug!(request_id = ack.id, "acknowledgment consumed");
            }
        }
    }

    async fn send_request(&mut self, write: &mut WsSink, request: &StreamRequest) -> Flow {
        let frame = match self.codec.encode(request) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(%error, "failed to encode stream request");
                return Flow::Stop(EndReason::ConnectionLost);
            }
        };
        if let Err(error) = write.send(Message::text(frame)).await {
            self.manager.record_stream_failure();
            tracing::warn!(
                error = %unify::websocket(ChannelKind::Stream, &error),
                "stream request send failed"
            );
            return Flow::Stop(EndReason::ConnectionLost);
        }
        Flow::Continue
    }

    /// Sleep out the jittered backoff; `false` means stop reconnecting
    /// (cancelled or attempts exhausted).
    async fn backoff(&self, policy: &mut ReconnectPolicy) -> bool {
        let Some(delay) = policy.next_delay() else {
            tracing::error!(attempts = policy.attempts(), "reconnect attempts exhausted");
            return false;
        };
        tracing::info!(
            attempt = policy.attempts(),
            delay_ms = delay.as_millis(),
            "reconnect backoff"
        );
        tokio::select! {
            () = self.manager.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn discard_queued_commands(&mut self) {
        let mut discarded = 0usize;
        while self.cmd_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "queued wire commands superseded by replay");
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }
}
