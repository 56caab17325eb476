//! Coordinator owning the peer connections, the local tracks and the
//! bridge channel of one session.
//!
//! Cross-references between peers, tracks and the channel go through the
//! small integer IDs assigned here; nothing in the core holds an owning
//! cycle.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};
use tracerr::Traced;

use argo_colibri_proto::{
    ColibriMessage, EndpointId, EndpointStats, ReceiverVideoConstraints,
    SourceName, VideoType,
};

use crate::{
    bridge::{
        BridgeChannel, BridgeEvent, ParticipantCountProvider,
    },
    media::{track::local, TrackId},
    options::RtcOptions,
    peer::{stats::now_ms, PeerConnection, PeerId},
    platform::{
        self, BridgeTransport, BridgeTransportFactory, BundlePolicy,
        IceServer, IceTransportPolicy, PeerConnectionFactory,
        RtcConfiguration,
    },
    signaling::SignalingLayer,
};

/// Events emitted by an [`RtcManager`].
#[derive(Clone, Debug)]
pub enum RtcEvent {
    /// The effective `lastN` value changed.
    LastNValueChanged {
        /// The new value.
        last_n: i32,
    },

    /// The set of forwarded sources changed.
    ForwardedSourcesChanged {
        /// Sources no longer forwarded, in their previous order.
        leaving: Vec<SourceName>,

        /// Sources newly forwarded, in the new list's order.
        entering: Vec<SourceName>,

        /// Time of the change, milliseconds since the Unix epoch.
        timestamp_ms: u64,
    },

    /// Any other bridge channel event, forwarded as-is.
    Bridge(BridgeEvent),
}

/// Ways of initializing the bridge channel.
pub enum BridgeInit {
    /// Over an established data channel of the SFU peer connection.
    DataChannel(Rc<dyn BridgeTransport>),

    /// Over an out-of-band WebSocket, reconnecting through the factory.
    WebSocket(BridgeTransportFactory),
}

/// Registry of peer connections plus the session-wide control state.
pub struct RtcManager {
    /// Factory producing native peer connections.
    factory: PeerConnectionFactory,

    /// Session configuration.
    options: Rc<RtcOptions>,

    /// Live peer connections, keyed by their ID.
    peers: RefCell<HashMap<PeerId, Rc<PeerConnection>>>,

    /// Next peer connection ID, monotonically increasing.
    next_peer_id: Cell<u64>,

    /// Local tracks of the session, keyed by their ID.
    local_tracks: RefCell<HashMap<TrackId, Rc<local::Track>>>,

    /// Next local track ID.
    next_track_id: Cell<u64>,

    /// Bridge channel, once initialized.
    bridge: RefCell<Option<Rc<BridgeChannel>>>,

    /// Cached `lastN`, set once the application expressed a preference.
    last_n: Cell<Option<i32>>,

    /// Cached receiver constraints.
    receiver_constraints: RefCell<Option<ReceiverVideoConstraints>>,

    /// Sources the SFU currently forwards; [`None`] until the first
    /// `ForwardedSources` arrives.
    forwarded_sources: RefCell<Option<Vec<SourceName>>>,

    /// Event subscribers.
    subs: RefCell<Vec<mpsc::UnboundedSender<RtcEvent>>>,
}

impl RtcManager {
    /// Creates a new [`RtcManager`] producing native connections through
    /// the provided factory.
    #[must_use]
    pub fn new(
        factory: PeerConnectionFactory,
        options: RtcOptions,
    ) -> Rc<Self> {
        Rc::new(Self {
            factory,
            options: Rc::new(options),
            peers: RefCell::new(HashMap::new()),
            next_peer_id: Cell::new(1),
            local_tracks: RefCell::new(HashMap::new()),
            next_track_id: Cell::new(1),
            bridge: RefCell::new(None),
            last_n: Cell::new(None),
            receiver_constraints: RefCell::new(None),
            forwarded_sources: RefCell::new(None),
            subs: RefCell::new(Vec::new()),
        })
    }

    /// Subscribes to this manager's [`RtcEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, RtcEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Creates a new [`PeerConnection`] and records it in the registry.
    ///
    /// Media is always bundled over one transport; ICE goes
    /// relay-only when TURN relaying is forced by the configuration.
    ///
    /// # Errors
    ///
    /// Propagates the native factory failure.
    pub fn create_peer_connection(
        &self,
        signaling: Rc<dyn SignalingLayer>,
        ice_servers: Vec<IceServer>,
        is_p2p: bool,
    ) -> Result<Rc<PeerConnection>, Traced<platform::Error>> {
        let config = RtcConfiguration {
            ice_servers,
            bundle_policy: BundlePolicy::MaxBundle,
            ice_transport_policy: if self.options.force_turn_relay {
                IceTransportPolicy::Relay
            } else {
                IceTransportPolicy::All
            },
            encoded_insertable_streams: self
                .options
                .enable_insertable_streams,
        };
        let native = (self.factory)(config)?;

        let id = PeerId(self.next_peer_id.get());
        self.next_peer_id.set(self.next_peer_id.get() + 1);
        let peer = PeerConnection::new(
            id,
            native,
            signaling,
            Rc::clone(&self.options),
            is_p2p,
        );
        self.peers.borrow_mut().insert(id, Rc::clone(&peer));
        Ok(peer)
    }

    /// Returns the peer connection with the provided ID.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<Rc<PeerConnection>> {
        self.peers.borrow().get(&id).cloned()
    }

    /// Removes a closed peer connection from the registry.
    pub fn remove_peer_connection(&self, id: PeerId) {
        if let Some(peer) = self.peers.borrow_mut().remove(&id) {
            peer.close();
        }
    }

    /// Registers a local track captured by the application, assigning it
    /// an ID.
    #[must_use]
    pub fn create_local_track(
        &self,
        source_name: SourceName,
        video_type: VideoType,
        native: Rc<dyn platform::MediaStreamTrack>,
    ) -> Rc<local::Track> {
        let id = TrackId(self.next_track_id.get());
        self.next_track_id.set(self.next_track_id.get() + 1);
        let track = local::Track::new(id, source_name, video_type, native);
        self.local_tracks
            .borrow_mut()
            .insert(id, Rc::clone(&track));
        track
    }

    /// Returns the local track with the provided ID.
    #[must_use]
    pub fn local_track(&self, id: TrackId) -> Option<Rc<local::Track>> {
        self.local_tracks.borrow().get(&id).cloned()
    }

    /// Builds the bridge channel and wires its events into this manager.
    ///
    /// On every channel open the cached receiver constraints and `lastN`
    /// are replayed, each exactly once.
    pub fn initialize_bridge_channel(
        self: &Rc<Self>,
        init: BridgeInit,
        participant_count: ParticipantCountProvider,
    ) {
        let channel = match init {
            BridgeInit::DataChannel(transport) => {
                BridgeChannel::over_data_channel(transport, participant_count)
            }
            BridgeInit::WebSocket(factory) => {
                let channel =
                    BridgeChannel::over_websocket(factory, participant_count);
                let connect = Rc::clone(&channel);
                platform::spawn(async move {
                    if let Err(e) = connect.connect().await {
                        log::warn!(
                            "Initial bridge channel connect failed: {}",
                            e,
                        );
                    }
                });
                channel
            }
        };

        let mut events = channel.subscribe();
        let weak = Rc::downgrade(self);
        platform::spawn(async move {
            while let Some(event) = events.next().await {
                match weak.upgrade() {
                    Some(this) => this.handle_bridge_event(event),
                    None => break,
                }
            }
        });
        *self.bridge.borrow_mut() = Some(channel);
    }

    /// Updates the `lastN` preference: caches it, pushes it over the
    /// channel when open, and emits [`RtcEvent::LastNValueChanged`].
    ///
    /// `-1` lifts the cap, `0` asks for no video. Unchanged values are
    /// ignored.
    pub fn set_last_n(&self, last_n: i32) {
        if self.last_n.get() == Some(last_n) {
            return;
        }
        self.last_n.set(Some(last_n));
        self.send_best_effort(&ColibriMessage::LastNChangedEvent { last_n });
        self.emit(RtcEvent::LastNValueChanged { last_n });
    }

    /// Updates the receiver video constraints: caches them and pushes
    /// them over the channel when open.
    ///
    /// Structurally unchanged constraints are ignored.
    pub fn set_receiver_video_constraints(
        &self,
        constraints: ReceiverVideoConstraints,
    ) {
        if self.receiver_constraints.borrow().as_ref() == Some(&constraints)
        {
            return;
        }
        self.send_best_effort(&ColibriMessage::ReceiverVideoConstraints(
            constraints.clone(),
        ));
        *self.receiver_constraints.borrow_mut() = Some(constraints);
    }

    /// Hints the SFU about which endpoints are on stage, best effort.
    pub fn send_selected_endpoints(&self, endpoints: Vec<EndpointId>) {
        self.send_best_effort(
            &ColibriMessage::SelectedEndpointsChangedEvent {
                selected_endpoints: endpoints,
            },
        );
    }

    /// Declares the video type of a local source to the SFU, best
    /// effort.
    pub fn send_source_video_type(
        &self,
        source_name: SourceName,
        video_type: VideoType,
    ) {
        self.send_best_effort(&ColibriMessage::SourceVideoTypeMessage {
            source_name,
            video_type,
        });
    }

    /// Publishes a self stats report, best effort.
    pub fn send_endpoint_stats(
        &self,
        stats: serde_json::Map<String, serde_json::Value>,
    ) {
        self.send_best_effort(&ColibriMessage::EndpointStats(
            EndpointStats { from: None, stats },
        ));
    }

    /// Sends a datagram to another endpoint (or to everyone, when `to`
    /// is empty), best effort.
    pub fn send_endpoint_message(
        &self,
        to: EndpointId,
        payload: serde_json::Value,
    ) {
        self.send_best_effort(&ColibriMessage::EndpointMessage {
            from: None,
            to: Some(to),
            msg_payload: payload,
        });
    }

    /// Indicates whether the provided source is currently forwarded to
    /// this endpoint.
    ///
    /// Before the first `ForwardedSources` arrives every source counts
    /// as forwarded, so that track creation is never blocked on the
    /// SFU's first report.
    #[must_use]
    pub fn is_in_forwarded_sources(&self, source_name: &SourceName) -> bool {
        self.forwarded_sources
            .borrow()
            .as_ref()
            .map_or(true, |sources| sources.contains(source_name))
    }

    /// Closes the bridge channel, keeping the peer connections alive.
    pub fn close_bridge_channel(&self) {
        if let Some(channel) = self.bridge.borrow_mut().take() {
            channel.close();
        }
    }

    /// Tears the whole session down: the bridge channel, every peer
    /// connection, and the local track registry.
    pub fn destroy(&self) {
        self.close_bridge_channel();
        let peers: Vec<Rc<PeerConnection>> =
            self.peers.borrow_mut().drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.close();
        }
        self.local_tracks.borrow_mut().clear();
    }

    fn handle_bridge_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Open => {
                self.replay_receiver_preferences();
                self.emit(RtcEvent::Bridge(BridgeEvent::Open));
            }
            BridgeEvent::ForwardedSourcesChanged { sources } => {
                self.handle_forwarded_sources(sources);
            }
            other => self.emit(RtcEvent::Bridge(other)),
        }
    }

    /// Replays the cached receiver preferences over a freshly opened
    /// channel, each exactly once.
    fn replay_receiver_preferences(&self) {
        let constraints = self.receiver_constraints.borrow().clone();
        if let Some(constraints) = constraints {
            self.send_best_effort(
                &ColibriMessage::ReceiverVideoConstraints(constraints),
            );
        }
        if let Some(last_n) = self.last_n.get() {
            self.send_best_effort(&ColibriMessage::LastNChangedEvent {
                last_n,
            });
        }
    }

    fn handle_forwarded_sources(&self, sources: Vec<SourceName>) {
        let previous = self
            .forwarded_sources
            .borrow_mut()
            .replace(sources.clone())
            .unwrap_or_default();

        let leaving: Vec<SourceName> = previous
            .iter()
            .filter(|s| !sources.contains(s))
            .cloned()
            .collect();
        let entering: Vec<SourceName> = sources
            .iter()
            .filter(|s| !previous.contains(s))
            .cloned()
            .collect();
        self.emit(RtcEvent::ForwardedSourcesChanged {
            leaving,
            entering,
            timestamp_ms: now_ms(),
        });
    }

    fn send_best_effort(&self, message: &ColibriMessage) {
        let channel = self.bridge.borrow().clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.send(message) {
                log::debug!("Bridge channel send skipped: {}", e);
            }
        }
    }

    fn emit(&self, event: RtcEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
