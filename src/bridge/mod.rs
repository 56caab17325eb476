//! Bridge channel: the reliable JSON control channel towards the SFU.
//!
//! The channel multiplexes typed [`ColibriMessage`]s over either an
//! in-band data channel of the SFU peer connection or an out-of-band
//! WebSocket. WebSocket channels reconnect on their own with exponential
//! backoff; data channels live and die with their peer connection.

mod backoff;

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use derive_more::Display;
use futures::{
    channel::mpsc,
    future::{abortable, AbortHandle},
    stream::LocalBoxStream,
    FutureExt as _, StreamExt as _,
};
use medea_reactive::ObservableCell;
use serde_json::Value;
use tracerr::Traced;

use argo_colibri_proto::{
    ColibriMessage, EndpointId, InboundMessage, MappedSource, SourceName,
};

use crate::{
    platform::{
        self, BridgeTransport, BridgeTransportFactory, CloseFrame,
        TransportError, TransportState,
    },
    utils::JsonParseError,
};

#[doc(inline)]
pub use self::backoff::BackoffDelayer;

/// Initial reconnect delay of a WebSocket channel.
const INITIAL_RETRY_DELAY: std::time::Duration =
    std::time::Duration::from_secs(1);

/// Cap of the reconnect delay.
const MAX_RETRY_DELAY: std::time::Duration =
    std::time::Duration::from_secs(60);

/// WebSocket close code sent on a graceful shutdown of the remote end.
const GOING_AWAY: u16 = 1001;

/// States of a [`BridgeChannel`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BridgeChannelState {
    /// Channel was created but never connected.
    New,

    /// A connection attempt is in flight.
    Connecting,

    /// The channel is open and routable.
    Open,

    /// The channel is being closed by the client.
    Closing,

    /// The channel is closed.
    Closed,
}

/// Transport flavor of a [`BridgeChannel`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BridgeMode {
    /// In-band SCTP data channel of the SFU peer connection.
    DataChannel,

    /// Out-of-band WebSocket.
    WebSocket,
}

/// Errors that may occur in a [`BridgeChannel`].
#[derive(Clone, Debug, Display, PartialEq)]
pub enum BridgeError {
    /// A send was attempted before the channel opened.
    #[display(fmt = "Bridge channel is not open")]
    ChannelNotOpen,

    /// An outbound message could not be serialized.
    #[display(fmt = "Failed to serialize message: {}", _0)]
    Serialize(JsonParseError),

    /// The underlying transport refused a frame.
    #[display(fmt = "Failed to send frame: {}", _0)]
    Send(TransportError),

    /// A connection attempt failed.
    #[display(fmt = "Failed to establish connection: {}", _0)]
    EstablishFailed(TransportError),
}

type Result<T> = std::result::Result<T, Traced<BridgeError>>;

/// Events dispatched by a [`BridgeChannel`].
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    /// The channel (re)opened.
    Open,

    /// The channel closed unexpectedly. Emitted once per failure episode,
    /// not per backoff step.
    Closed {
        /// Close code observed on the transport.
        code: u16,

        /// Close reason observed on the transport.
        reason: String,
    },

    /// The SFU detected a dominant speaker change.
    DominantSpeakerChanged {
        /// The new dominant speaker.
        endpoint: EndpointId,

        /// Previous speakers, most recent first.
        previous: Vec<EndpointId>,

        /// Whether the change is into silence.
        silence: bool,
    },

    /// Connectivity of another endpoint changed.
    EndpointConnStatusChanged {
        /// Affected endpoint.
        endpoint: EndpointId,

        /// Whether the endpoint is reachable.
        active: bool,
    },

    /// A datagram from another endpoint arrived.
    EndpointMessageReceived {
        /// Sending endpoint.
        from: EndpointId,

        /// Application-defined payload.
        payload: Value,
    },

    /// A stats report of another endpoint arrived.
    EndpointStatsReceived {
        /// Reporting endpoint.
        from: EndpointId,

        /// Application-defined stats blob.
        stats: serde_json::Map<String, Value>,
    },

    /// The set of forwarded sources changed.
    ForwardedSourcesChanged {
        /// Sources the SFU now forwards to this endpoint.
        sources: Vec<SourceName>,
    },

    /// The SFU asks to cap one of the local sources.
    SenderVideoConstraintsChanged {
        /// Source the constraint applies to.
        source_name: SourceName,

        /// Maximum height the SFU will forward.
        max_height: u32,
    },

    /// Video sources were remapped onto different SSRCs.
    VideoSsrcsRemapped {
        /// The remapped sources.
        sources: Vec<MappedSource>,
    },

    /// Audio sources were remapped onto different SSRCs.
    AudioSsrcsRemapped {
        /// The remapped sources.
        sources: Vec<MappedSource>,
    },

    /// A frame with a valid but unmodelled `colibriClass` arrived.
    Message {
        /// The unrecognized class.
        class: String,

        /// The whole frame, untouched.
        payload: Value,
    },
}

/// Provider of the current participant count, read lazily when a close
/// frame is being classified.
pub type ParticipantCountProvider = Box<dyn Fn() -> usize>;

/// Reliable bidirectional JSON message channel with the SFU.
pub struct BridgeChannel {
    /// Transport flavor of this channel.
    mode: BridgeMode,

    /// Current state of this channel.
    state: ObservableCell<BridgeChannelState>,

    /// Active transport, when any.
    transport: RefCell<Option<Rc<dyn BridgeTransport>>>,

    /// Factory producing fresh transports; WebSocket mode only.
    factory: Option<BridgeTransportFactory>,

    /// Event subscribers.
    subs: RefCell<Vec<mpsc::UnboundedSender<BridgeEvent>>>,

    /// Reconnect delay sequence.
    backoff: RefCell<BackoffDelayer>,

    /// Conference size oracle used by the close-classification policy.
    participant_count: ParticipantCountProvider,

    /// Set once the client called [`BridgeChannel::close()`].
    closed_by_client: Cell<bool>,

    /// Outstanding retry timer, at most one.
    retry_timer: RefCell<Option<AbortHandle>>,

    /// Whether the current failure episode was already reported.
    episode_reported: Cell<bool>,
}

impl BridgeChannel {
    /// Creates a channel over an already established data channel
    /// transport.
    #[must_use]
    pub fn over_data_channel(
        transport: Rc<dyn BridgeTransport>,
        participant_count: ParticipantCountProvider,
    ) -> Rc<Self> {
        let this = Self::new(BridgeMode::DataChannel, None, participant_count);
        Rc::clone(&this).attach(transport);
        this
    }

    /// Creates a channel that connects (and reconnects) through the
    /// provided WebSocket transport factory.
    #[must_use]
    pub fn over_websocket(
        factory: BridgeTransportFactory,
        participant_count: ParticipantCountProvider,
    ) -> Rc<Self> {
        Self::new(BridgeMode::WebSocket, Some(factory), participant_count)
    }

    fn new(
        mode: BridgeMode,
        factory: Option<BridgeTransportFactory>,
        participant_count: ParticipantCountProvider,
    ) -> Rc<Self> {
        Rc::new(Self {
            mode,
            state: ObservableCell::new(BridgeChannelState::New),
            transport: RefCell::new(None),
            factory,
            subs: RefCell::new(Vec::new()),
            backoff: RefCell::new(BackoffDelayer::new(
                INITIAL_RETRY_DELAY,
                2.0,
                MAX_RETRY_DELAY,
            )),
            participant_count,
            closed_by_client: Cell::new(false),
            retry_timer: RefCell::new(None),
            episode_reported: Cell::new(false),
        })
    }

    /// Returns the transport flavor of this channel.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    /// Returns the current state of this channel.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BridgeChannelState {
        self.state.get()
    }

    /// Subscribes to state changes of this channel; the current state is
    /// yielded first.
    pub fn on_state_change(
        &self,
    ) -> LocalBoxStream<'static, BridgeChannelState> {
        self.state.subscribe()
    }

    /// Subscribes to this channel's [`BridgeEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, BridgeEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Connects a WebSocket channel.
    ///
    /// Resolves immediately when the channel is open or a connection
    /// attempt is in flight already. Failed attempts schedule a
    /// reconnect on their own.
    ///
    /// # Errors
    ///
    /// With [`BridgeError::EstablishFailed`] if the attempt fails.
    pub async fn connect(self: Rc<Self>) -> Result<()> {
        match self.state.get() {
            BridgeChannelState::Open | BridgeChannelState::Connecting => {
                Ok(())
            }
            _ => self.establish().await,
        }
    }

    /// Serializes and sends the provided message, best effort.
    ///
    /// # Errors
    ///
    /// With [`BridgeError::ChannelNotOpen`] before the channel opens,
    /// [`BridgeError::Serialize`] on serialization failures, or
    /// [`BridgeError::Send`] when the transport refuses the frame.
    pub fn send(&self, message: &ColibriMessage) -> Result<()> {
        if self.state.get() != BridgeChannelState::Open {
            return Err(tracerr::new!(BridgeError::ChannelNotOpen));
        }
        let frame = serde_json::to_string(message).map_err(|e| {
            tracerr::new!(BridgeError::Serialize(JsonParseError::from(e)))
        })?;
        let transport = self.transport.borrow().clone();
        match transport {
            Some(transport) => transport.send(&frame).map_err(|e| {
                tracerr::new!(BridgeError::Send(e.into_inner()))
            }),
            None => Err(tracerr::new!(BridgeError::ChannelNotOpen)),
        }
    }

    /// Closes this channel on behalf of the client: the retry timer is
    /// cancelled, no reconnect will ever be scheduled again.
    ///
    /// Closing a closed channel is a no-op.
    pub fn close(&self) {
        if self.closed_by_client.replace(true) {
            return;
        }
        if let Some(timer) = self.retry_timer.borrow_mut().take() {
            timer.abort();
        }
        let transport = self.transport.borrow_mut().take();
        if let Some(transport) = transport {
            if transport.state().can_close() {
                self.state.set(BridgeChannelState::Closing);
                transport.close(1000, "closed by client");
            }
        }
        self.state.set(BridgeChannelState::Closed);
    }

    async fn establish(self: Rc<Self>) -> Result<()> {
        let factory = match self.factory.as_ref() {
            Some(factory) => factory,
            None => return Ok(()),
        };
        self.state.set(BridgeChannelState::Connecting);
        match (factory)().await {
            Ok(transport) => {
                Rc::clone(&self).attach(transport);
                Ok(())
            }
            Err(e) => {
                let cause = e.into_inner();
                self.state.set(BridgeChannelState::Closed);
                self.schedule_retry();
                Err(tracerr::new!(BridgeError::EstablishFailed(cause)))
            }
        }
    }

    /// Wires a fresh transport into this channel and spawns its reader
    /// tasks.
    fn attach(self: Rc<Self>, transport: Rc<dyn BridgeTransport>) {
        let mut messages = transport.on_message();
        let mut states = transport.on_state_change();
        *self.transport.borrow_mut() = Some(Rc::clone(&transport));

        let weak = Rc::downgrade(&self);
        let reader_transport = Rc::clone(&transport);
        platform::spawn(async move {
            while let Some(frame) = messages.next().await {
                match weak.upgrade() {
                    Some(this) => {
                        if !this.is_current(&reader_transport) {
                            break;
                        }
                        this.dispatch(&frame);
                    }
                    None => break,
                }
            }
        });

        let weak = Rc::downgrade(&self);
        let reader_transport = Rc::clone(&transport);
        platform::spawn(async move {
            while let Some(state) = states.next().await {
                match weak.upgrade() {
                    Some(this) => {
                        if !this.is_current(&reader_transport) {
                            break;
                        }
                        match state {
                            TransportState::Open => this.handle_open(),
                            TransportState::Closed(frame) => {
                                this.handle_close(&frame);
                            }
                            TransportState::Connecting
                            | TransportState::Closing => (),
                        }
                    }
                    None => break,
                }
            }
        });

        match transport.state() {
            TransportState::Open => self.handle_open(),
            _ => self.state.set(BridgeChannelState::Connecting),
        }
    }

    fn is_current(&self, transport: &Rc<dyn BridgeTransport>) -> bool {
        self.transport
            .borrow()
            .as_ref()
            .map_or(false, |current| Rc::ptr_eq(current, transport))
    }

    fn handle_open(&self) {
        self.backoff.borrow_mut().reset();
        self.episode_reported.set(false);
        self.state.set(BridgeChannelState::Open);
        self.emit(BridgeEvent::Open);
    }

    /// Classifies a transport close and decides whether to reconnect.
    ///
    /// A `1001` close while this endpoint is the only participant left is
    /// a graceful session end, indistinguishable from an idle proxy drop;
    /// there is nothing left to reconnect for, so no retry is scheduled.
    /// The participant count is read lazily here, racing a concurrent
    /// last-peer leave; the race resolves towards not retrying.
    fn handle_close(self: &Rc<Self>, frame: &CloseFrame) {
        self.transport.borrow_mut().take();
        self.state.set(BridgeChannelState::Closed);

        if self.closed_by_client.get() {
            return;
        }
        if frame.code == GOING_AWAY && (self.participant_count)() <= 1 {
            return;
        }
        if !self.episode_reported.replace(true) {
            self.emit(BridgeEvent::Closed {
                code: frame.code,
                reason: frame.reason.clone(),
            });
        }
        if self.mode == BridgeMode::WebSocket {
            self.schedule_retry();
        }
    }

    /// Arms the reconnect timer. At most one timer is outstanding; each
    /// firing either opens a new connection, re-arms, or bails.
    fn schedule_retry(self: &Rc<Self>) {
        if self.closed_by_client.get()
            || self.retry_timer.borrow().is_some()
        {
            return;
        }
        let delay = self.backoff.borrow_mut().next_delay();
        let weak = Rc::downgrade(self);
        let (timer, abort) = abortable(async move {
            platform::delay_for(delay).await;
            let this = match weak.upgrade() {
                Some(this) => this,
                None => return,
            };
            this.retry_timer.borrow_mut().take();
            if this.closed_by_client.get() {
                return;
            }
            if this.state.get() == BridgeChannelState::Connecting {
                // A connection attempt is still in flight; never open a
                // second socket next to it.
                this.schedule_retry();
                return;
            }
            if let Err(e) = Rc::clone(&this).establish().await {
                log::debug!("Bridge channel reconnect failed: {}", e);
            }
        });
        platform::spawn(timer.map(drop));
        *self.retry_timer.borrow_mut() = Some(abort);
    }

    /// Decodes and routes one inbound frame. Malformed frames are logged
    /// and discarded; they never close the channel.
    fn dispatch(&self, frame: &str) {
        let message = match InboundMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Discarding malformed channel frame: {}", e);
                return;
            }
        };
        match message {
            InboundMessage::Other { class, payload } => {
                self.emit(BridgeEvent::Message { class, payload });
            }
            InboundMessage::Known(message) => match message {
                ColibriMessage::DominantSpeakerEndpointChangeEvent {
                    dominant_speaker_endpoint,
                    previous_speakers,
                    silence,
                } => {
                    self.emit(BridgeEvent::DominantSpeakerChanged {
                        endpoint: dominant_speaker_endpoint,
                        previous: previous_speakers,
                        silence,
                    });
                }
                ColibriMessage::EndpointConnectivityStatusChangeEvent {
                    endpoint,
                    active,
                } => {
                    self.emit(BridgeEvent::EndpointConnStatusChanged {
                        endpoint,
                        active,
                    });
                }
                ColibriMessage::EndpointMessage {
                    from, msg_payload, ..
                } => {
                    self.emit(BridgeEvent::EndpointMessageReceived {
                        from: from.unwrap_or_else(|| {
                            EndpointId::from(String::new())
                        }),
                        payload: msg_payload,
                    });
                }
                ColibriMessage::EndpointStats(stats) => {
                    self.emit(BridgeEvent::EndpointStatsReceived {
                        from: stats.from.unwrap_or_else(|| {
                            EndpointId::from(String::new())
                        }),
                        stats: stats.stats,
                    });
                }
                ColibriMessage::ForwardedSources { forwarded_sources } => {
                    self.emit(BridgeEvent::ForwardedSourcesChanged {
                        sources: forwarded_sources,
                    });
                }
                ColibriMessage::SenderSourceConstraints {
                    source_name,
                    max_height,
                } => {
                    self.emit(BridgeEvent::SenderVideoConstraintsChanged {
                        source_name,
                        max_height,
                    });
                }
                ColibriMessage::ServerHello { version } => {
                    log::info!(
                        "Bridge channel established, SFU version: {}",
                        version.as_deref().unwrap_or("unknown"),
                    );
                }
                ColibriMessage::VideoSourcesMap { mapped_sources } => {
                    self.emit(BridgeEvent::VideoSsrcsRemapped {
                        sources: mapped_sources,
                    });
                }
                ColibriMessage::AudioSourcesMap { mapped_sources } => {
                    self.emit(BridgeEvent::AudioSsrcsRemapped {
                        sources: mapped_sources,
                    });
                }
                ColibriMessage::LastNChangedEvent { .. }
                | ColibriMessage::SelectedEndpointsChangedEvent { .. }
                | ColibriMessage::ReceiverVideoConstraints(_)
                | ColibriMessage::SourceVideoTypeMessage { .. } => {
                    log::debug!("Ignoring echoed outbound channel message");
                }
            },
        }
    }

    fn emit(&self, event: BridgeEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
