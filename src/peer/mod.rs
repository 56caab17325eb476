//! Adapter over one native peer connection and its bookkeeping.
//!
//! [`PeerConnection`] owns exactly one [`platform::RtcPeerConnection`],
//! applies the SDP munging pipelines on both negotiation directions,
//! attaches and detaches local tracks, binds remote tracks to their
//! owners through the signalling contract, and serializes every sender
//! reconfiguration through a per-connection queue.

pub mod encoder;
pub mod stats;

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use derive_more::Display;
use futures::{
    channel::{mpsc, oneshot},
    future::{LocalBoxFuture, Shared},
    stream::LocalBoxStream,
    FutureExt as _, StreamExt as _,
};
use tracerr::Traced;

use crate::{
    media::{
        track::{local, remote},
        Codec, EndpointId, MediaKind, SourceName, TrackId,
    },
    options::RtcOptions,
    platform::{self, SdpType, SendParameters, TransceiverDirection},
    sdp::{
        munge::{self, MungeOptions, SourceCounts, MIXED_STREAM_ID},
        ssrc::extract_source_ssrcs,
        LocalSsrcMap, RtxModifier, SessionDescription, SimulcastInjector,
    },
    signaling::{PeerMediaInfo, SignalingLayer},
};

#[doc(inline)]
pub use self::{
    encoder::{compute_encodings, EncoderRequest, EncodingsPlan},
    stats::{StatsCollector, StatsEvent, StatsSnapshot},
};

/// ID of a [`PeerConnection`], assigned by the coordinator.
#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub struct PeerId(pub u64);

/// Errors that may occur in a [`PeerConnection`].
#[derive(Clone, Debug, Display, PartialEq)]
pub enum PeerError {
    /// Native `createOffer` failed.
    #[display(fmt = "Failed to create SDP offer: {}", _0)]
    CreateOfferFailed(platform::Error),

    /// Native `createAnswer` failed.
    #[display(fmt = "Failed to create SDP answer: {}", _0)]
    CreateAnswerFailed(platform::Error),

    /// Native `setLocalDescription` failed.
    #[display(fmt = "Failed to set local SDP description: {}", _0)]
    SetLocalDescriptionFailed(platform::Error),

    /// Native `setRemoteDescription` failed.
    #[display(fmt = "Failed to set remote SDP description: {}", _0)]
    SetRemoteDescriptionFailed(platform::Error),

    /// Native `addIceCandidate` failed.
    #[display(fmt = "Failed to add ICE candidate: {}", _0)]
    AddIceCandidateFailed(platform::Error),

    /// Native `replaceTrack` failed.
    #[display(fmt = "Failed to replace sender track: {}", _0)]
    ReplaceTrackFailed(platform::Error),

    /// Native sender refused its parameters.
    #[display(fmt = "Sender rejected parameters: {}", _0)]
    SenderParametersRejected(platform::Error),

    /// Native `getStats` failed.
    #[display(fmt = "Failed to get stats: {}", _0)]
    GetStatsFailed(platform::Error),

    /// A description produced or received is not parseable SDP.
    #[display(fmt = "Malformed SDP: {}", _0)]
    MalformedSdp(crate::sdp::ParseError),

    /// The provided track is attached to this connection already.
    #[display(fmt = "Track {} is already attached", _0)]
    TrackAlreadyAttached(TrackId),

    /// The provided track is not attached to this connection.
    #[display(fmt = "Track {} is not attached", _0)]
    TrackNotAttached(TrackId),

    /// No attached video sender carries the provided source.
    #[display(fmt = "Unknown video source: {}", _0)]
    UnknownSource(SourceName),

    /// The connection is closed and cannot serve the call.
    #[display(fmt = "Peer connection is closed")]
    TransportClosed,
}

type Result<T> = std::result::Result<T, Traced<PeerError>>;

/// Events emitted by a [`PeerConnection`].
///
/// Events of one connection are strictly ordered; nothing is guaranteed
/// across connections.
#[derive(Clone)]
pub enum PeerEvent {
    /// A remote track was bound to its owner and registered.
    RemoteTrackAdded {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The registered track.
        track: Rc<remote::Track>,
    },

    /// A previously registered remote track left the connection.
    RemoteTrackRemoved {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The removed track.
        track: Rc<remote::Track>,
    },

    /// The native stack discovered a new local ICE candidate.
    IceCandidateDiscovered {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The discovered candidate.
        candidate: platform::IceCandidate,
    },

    /// ICE connection state of the native connection changed.
    IceConnectionStateChanged {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The new state.
        state: platform::IceConnectionState,
    },

    /// Aggregate connection state of the native connection changed.
    ConnectionStateChanged {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The new state.
        state: platform::PeerConnectionState,
    },

    /// ICE username fragment of the local description changed.
    LocalUfragChanged {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The new fragment.
        ufrag: String,
    },

    /// ICE username fragment of the remote description changed.
    RemoteUfragChanged {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The new fragment.
        ufrag: String,
    },

    /// A local source got a different primary SSRC after renegotiation.
    LocalTrackSsrcUpdated {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// Kind of the affected source.
        kind: MediaKind,

        /// Index of the source within its kind.
        source_index: usize,

        /// Previously assigned primary SSRC.
        previous: u32,

        /// Newly assigned primary SSRC.
        current: u32,
    },

    /// Highest active encoding of a local video source changed.
    MaxEnabledResolutionChanged {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// Source the change applies to.
        source_name: SourceName,

        /// Height of the highest active layer, `0` when nothing sends.
        height: u32,
    },

    /// Native `createOffer` failed.
    CreateOfferFailed {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The native error.
        error: platform::Error,
    },

    /// Native `createAnswer` failed.
    CreateAnswerFailed {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The native error.
        error: platform::Error,
    },

    /// Native `setLocalDescription` failed.
    SetLocalDescriptionFailed {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The native error.
        error: platform::Error,
    },

    /// Native `setRemoteDescription` failed.
    SetRemoteDescriptionFailed {
        /// ID of the emitting connection.
        peer_id: PeerId,

        /// The native error.
        error: platform::Error,
    },
}

/// Transmission pause strategy of one native stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PauseStrategy {
    /// Flip per-encoding `active` flags via sender parameters.
    EncodingFlags,

    /// Flip the send bit of transceiver directions.
    Direction,
}

/// Local track attached to a transceiver of this connection.
struct SenderEntry {
    /// The attached track.
    track: Rc<local::Track>,

    /// Transceiver the track is sent over.
    transceiver: Rc<dyn platform::Transceiver>,
}

/// Serialized queue of sender reconfigurations.
///
/// Every scheduled unit awaits the previous one; a failed unit still
/// completes its slot, so the chain always moves forward.
struct UpdateQueue {
    /// Completion of the most recently scheduled unit.
    tail: RefCell<Shared<LocalBoxFuture<'static, ()>>>,
}

impl UpdateQueue {
    fn new() -> Self {
        Self {
            tail: RefCell::new(futures::future::ready(()).boxed_local().shared()),
        }
    }

    /// Chains the provided operation after every previously scheduled
    /// one and runs it.
    async fn schedule<T, F>(&self, op: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let prev = self.tail.borrow().clone();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        *self.tail.borrow_mut() = done_rx.map(|_| ()).boxed_local().shared();

        prev.await;
        let out = op.await;
        drop(done_tx.send(()));
        out
    }
}

/// High-level wrapper around one native peer connection.
pub struct PeerConnection {
    /// Unique ID of this connection.
    id: PeerId,

    /// Underlying native connection.
    peer: Rc<dyn platform::RtcPeerConnection>,

    /// Whether this session faces another participant instead of the SFU.
    is_p2p: bool,

    /// Session configuration.
    options: Rc<RtcOptions>,

    /// Signalling layer used for SSRC ownership lookups.
    signaling: Rc<dyn SignalingLayer>,

    /// [`PeerEvent`] subscribers.
    subs: RefCell<Vec<mpsc::UnboundedSender<PeerEvent>>>,

    /// Attached local tracks, in attachment order.
    senders: RefCell<Vec<SenderEntry>>,

    /// Registered remote tracks, keyed by owner and kind.
    remote_tracks: RefCell<HashMap<(EndpointId, MediaKind), Rc<remote::Track>>>,

    /// Persistent local SSRC assignments.
    local_ssrcs: RefCell<LocalSsrcMap>,

    /// RTX pairing cache of this connection.
    rtx_modifier: RtxModifier,

    /// Simulcast SSRC expansion cache of this connection.
    simulcast_injector: SimulcastInjector,

    /// Munged local description last given to the native stack.
    local_description: RefCell<Option<SessionDescription>>,

    /// Munged remote description last given to the native stack.
    remote_description: RefCell<Option<SessionDescription>>,

    /// Whether a remote description has been applied yet.
    has_remote_description: Cell<bool>,

    /// Candidates received before the remote description.
    ice_candidates_buffer: RefCell<Vec<platform::IceCandidate>>,

    /// Last observed local ICE username fragment.
    local_ufrag: RefCell<Option<String>>,

    /// Last observed remote ICE username fragment.
    remote_ufrag: RefCell<Option<String>>,

    /// Serialized sender-update queue.
    update_queue: UpdateQueue,

    /// Pause strategy, probed on first use.
    pause_strategy: Cell<Option<PauseStrategy>>,

    /// Encoder plans stored for muted sources, applied on unmute.
    pending_encodings: RefCell<HashMap<SourceName, EncodingsPlan>>,

    /// Last requested max height per source.
    requested_heights: RefCell<HashMap<SourceName, u32>>,

    /// Last reported max enabled height per source.
    max_enabled_heights: RefCell<HashMap<SourceName, u32>>,

    /// Whether audio is currently transferred.
    audio_transfer_active: Cell<bool>,

    /// ICE restart flag consumed by the next offer.
    ice_restart: Cell<bool>,

    /// Stats collector of this connection, spawned lazily.
    stats_collector: RefCell<Option<Rc<StatsCollector>>>,

    /// Baseline of the direct [`PeerConnection::get_stats()`] path.
    stats_baseline: RefCell<Option<stats::Baseline>>,

    /// Set once [`PeerConnection::close()`] ran.
    closed: Cell<bool>,
}

impl PeerConnection {
    /// Creates a new [`PeerConnection`] wrapping the provided native one
    /// and binds all its native callbacks.
    #[must_use]
    pub fn new(
        id: PeerId,
        peer: Rc<dyn platform::RtcPeerConnection>,
        signaling: Rc<dyn SignalingLayer>,
        options: Rc<RtcOptions>,
        is_p2p: bool,
    ) -> Rc<Self> {
        let audio_active = !options.start_silent;
        let this = Rc::new(Self {
            id,
            peer,
            is_p2p,
            options,
            signaling,
            subs: RefCell::new(Vec::new()),
            senders: RefCell::new(Vec::new()),
            remote_tracks: RefCell::new(HashMap::new()),
            local_ssrcs: RefCell::new(LocalSsrcMap::new()),
            rtx_modifier: RtxModifier::new(),
            simulcast_injector: SimulcastInjector::new(),
            local_description: RefCell::new(None),
            remote_description: RefCell::new(None),
            has_remote_description: Cell::new(false),
            ice_candidates_buffer: RefCell::new(Vec::new()),
            local_ufrag: RefCell::new(None),
            remote_ufrag: RefCell::new(None),
            update_queue: UpdateQueue::new(),
            pause_strategy: Cell::new(None),
            pending_encodings: RefCell::new(HashMap::new()),
            requested_heights: RefCell::new(HashMap::new()),
            max_enabled_heights: RefCell::new(HashMap::new()),
            audio_transfer_active: Cell::new(audio_active),
            ice_restart: Cell::new(false),
            stats_collector: RefCell::new(None),
            stats_baseline: RefCell::new(None),
            closed: Cell::new(false),
        });

        this.bind_native_callbacks();
        Self::spawn_signaling_watchers(&this);
        this
    }

    /// Returns the ID of this connection.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Indicates whether this connection faces another participant.
    #[inline]
    #[must_use]
    pub fn is_p2p(&self) -> bool {
        self.is_p2p
    }

    /// Subscribes to this connection's [`PeerEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, PeerEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns the munged local description last handed to the native
    /// stack.
    #[must_use]
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local_description.borrow().clone()
    }

    /// Returns the munged remote description last handed to the native
    /// stack.
    #[must_use]
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_description.borrow().clone()
    }

    /// Marks this connection to trigger an ICE restart on the next
    /// [`PeerConnection::create_offer()`].
    #[inline]
    pub fn restart_ice(&self) {
        self.ice_restart.set(true);
    }

    /// Returns the lazily spawned [`StatsCollector`] of this connection.
    #[must_use]
    pub fn stats(&self) -> Rc<StatsCollector> {
        let mut slot = self.stats_collector.borrow_mut();
        if let Some(collector) = slot.as_ref() {
            return Rc::clone(collector);
        }
        let collector = StatsCollector::spawn(
            Rc::clone(&self.peer),
            self.options.max_stats,
        );
        *slot = Some(Rc::clone(&collector));
        collector
    }

    /// Obtains an SDP offer from the native stack and runs it through the
    /// local munging pipeline.
    ///
    /// # Errors
    ///
    /// With [`PeerError::CreateOfferFailed`] if the native call fails (the
    /// failure is also emitted as [`PeerEvent::CreateOfferFailed`]), or
    /// [`PeerError::MalformedSdp`] if its result is unparseable.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let raw = self
            .peer
            .create_offer(self.ice_restart.take())
            .await
            .map_err(|e| {
                self.emit(PeerEvent::CreateOfferFailed {
                    peer_id: self.id,
                    error: e.clone(),
                });
                tracerr::new!(PeerError::CreateOfferFailed(e))
            })?;
        let desc = SessionDescription::parse(&raw)
            .map_err(|e| tracerr::new!(PeerError::MalformedSdp(e)))?;
        Ok(self.munge_local(&desc))
    }

    /// Obtains an SDP answer from the native stack and runs it through
    /// the local munging pipeline.
    ///
    /// # Errors
    ///
    /// With [`PeerError::CreateAnswerFailed`] if the native call fails
    /// (also emitted as [`PeerEvent::CreateAnswerFailed`]), or
    /// [`PeerError::MalformedSdp`] if its result is unparseable.
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let raw = self.peer.create_answer().await.map_err(|e| {
            self.emit(PeerEvent::CreateAnswerFailed {
                peer_id: self.id,
                error: e.clone(),
            });
            tracerr::new!(PeerError::CreateAnswerFailed(e))
        })?;
        let desc = SessionDescription::parse(&raw)
            .map_err(|e| tracerr::new!(PeerError::MalformedSdp(e)))?;
        Ok(self.munge_local(&desc))
    }

    /// Applies the provided SDP as the local description, munging it
    /// first.
    ///
    /// # Errors
    ///
    /// With [`PeerError::SetLocalDescriptionFailed`] if the native call
    /// fails (also emitted as an event), or [`PeerError::MalformedSdp`].
    pub async fn set_local_description(&self, sdp: SdpType) -> Result<()> {
        self.ensure_open()?;
        let desc = SessionDescription::parse(sdp.sdp())
            .map_err(|e| tracerr::new!(PeerError::MalformedSdp(e)))?;
        let munged = self.munge_local(&desc);
        let munged_sdp = munged.to_string();
        let native_sdp = match sdp {
            SdpType::Offer(_) => SdpType::Offer(munged_sdp),
            SdpType::Answer(_) => SdpType::Answer(munged_sdp),
        };

        self.peer.set_local_description(native_sdp).await.map_err(|e| {
            self.emit(PeerEvent::SetLocalDescriptionFailed {
                peer_id: self.id,
                error: e.clone(),
            });
            tracerr::new!(PeerError::SetLocalDescriptionFailed(e))
        })?;

        if let Some(ufrag) = munged.ice_ufrag().map(ToOwned::to_owned) {
            let changed =
                self.local_ufrag.borrow().as_deref() != Some(ufrag.as_str());
            if changed {
                *self.local_ufrag.borrow_mut() = Some(ufrag.clone());
                self.emit(PeerEvent::LocalUfragChanged {
                    peer_id: self.id,
                    ufrag,
                });
            }
        }
        *self.local_description.borrow_mut() = Some(munged);
        Ok(())
    }

    /// Applies the provided SDP as the remote description, munging it
    /// first; flushes any buffered remote ICE candidates afterwards.
    ///
    /// # Errors
    ///
    /// With [`PeerError::SetRemoteDescriptionFailed`] if the native call
    /// fails (also emitted as an event), or [`PeerError::MalformedSdp`].
    pub async fn set_remote_description(&self, sdp: SdpType) -> Result<()> {
        self.ensure_open()?;
        let desc = SessionDescription::parse(sdp.sdp())
            .map_err(|e| tracerr::new!(PeerError::MalformedSdp(e)))?;
        let munged = munge::munge_remote_description(
            &desc,
            &self.munge_options(),
            self.local_source_counts(),
        );
        let munged_sdp = munged.to_string();
        let native_sdp = match sdp {
            SdpType::Offer(_) => SdpType::Offer(munged_sdp),
            SdpType::Answer(_) => SdpType::Answer(munged_sdp),
        };

        self.peer
            .set_remote_description(native_sdp)
            .await
            .map_err(|e| {
                self.emit(PeerEvent::SetRemoteDescriptionFailed {
                    peer_id: self.id,
                    error: e.clone(),
                });
                tracerr::new!(PeerError::SetRemoteDescriptionFailed(e))
            })?;

        if let Some(ufrag) = munged.ice_ufrag().map(ToOwned::to_owned) {
            let changed = self.remote_ufrag.borrow().as_deref()
                != Some(ufrag.as_str());
            if changed {
                *self.remote_ufrag.borrow_mut() = Some(ufrag.clone());
                self.emit(PeerEvent::RemoteUfragChanged {
                    peer_id: self.id,
                    ufrag,
                });
            }
        }
        *self.remote_description.borrow_mut() = Some(munged);
        self.has_remote_description.set(true);

        let buffered: Vec<_> =
            self.ice_candidates_buffer.borrow_mut().drain(..).collect();
        for candidate in buffered {
            if let Err(e) = self.peer.add_ice_candidate(&candidate).await {
                log::error!("Failed to add buffered ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    /// Adds a remote ICE candidate, buffering it if no remote description
    /// has been applied yet.
    ///
    /// # Errors
    ///
    /// With [`PeerError::AddIceCandidateFailed`] if the native call
    /// fails.
    pub async fn add_ice_candidate(
        &self,
        candidate: platform::IceCandidate,
    ) -> Result<()> {
        self.ensure_open()?;
        if !self.has_remote_description.get() {
            self.ice_candidates_buffer.borrow_mut().push(candidate);
            return Ok(());
        }
        self.peer
            .add_ice_candidate(&candidate)
            .await
            .map_err(|e| tracerr::new!(PeerError::AddIceCandidateFailed(e)))
    }

    /// Attaches a local track to this connection, reusing a free
    /// transceiver when one exists.
    ///
    /// Video tracks immediately get their encoder policy applied.
    ///
    /// # Errors
    ///
    /// With [`PeerError::TrackAlreadyAttached`] if the track is attached
    /// already, or [`PeerError::ReplaceTrackFailed`] if the native sender
    /// refuses the track.
    pub async fn add_track(&self, track: Rc<local::Track>) -> Result<()> {
        self.ensure_open()?;
        if self
            .senders
            .borrow()
            .iter()
            .any(|e| e.track.id() == track.id())
        {
            return Err(tracerr::new!(PeerError::TrackAlreadyAttached(
                track.id()
            )));
        }

        let kind = track.kind();
        let transceiver = self.find_free_transceiver(kind).unwrap_or_else(
            || self.peer.add_transceiver(kind, TransceiverDirection::all()),
        );
        let direction = transceiver.direction();
        if !direction.contains(TransceiverDirection::SEND) {
            transceiver
                .set_direction(direction | TransceiverDirection::SEND);
        }
        transceiver
            .sender()
            .replace_track(Some(track.native()))
            .await
            .map_err(|e| tracerr::new!(PeerError::ReplaceTrackFailed(e)))?;

        self.senders.borrow_mut().push(SenderEntry {
            track: Rc::clone(&track),
            transceiver,
        });

        match kind {
            MediaKind::Video => {
                let height = track
                    .captured_resolution()
                    .map_or(2160, |(_, h)| h);
                self.set_sender_video_constraints(
                    &track.source_name().clone(),
                    height,
                )
                .await?;
            }
            MediaKind::Audio => {
                if !self.audio_transfer_active.get() {
                    self.set_transfer_active(MediaKind::Audio, false)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Detaches a local track without closing its transceiver.
    ///
    /// The transceiver keeps receiving: its direction becomes `recvonly`
    /// on peer-to-peer sessions and stays `sendrecv` towards the SFU,
    /// where the m-line must survive for SSRC remappings.
    ///
    /// # Errors
    ///
    /// With [`PeerError::TrackNotAttached`] if the track is not attached,
    /// or [`PeerError::ReplaceTrackFailed`].
    pub async fn remove_track(&self, track: &local::Track) -> Result<()> {
        self.ensure_open()?;
        let position = self
            .senders
            .borrow()
            .iter()
            .position(|e| e.track.id() == track.id())
            .ok_or_else(|| {
                tracerr::new!(PeerError::TrackNotAttached(track.id()))
            })?;
        let entry = self.senders.borrow_mut().remove(position);

        entry
            .transceiver
            .sender()
            .replace_track(None)
            .await
            .map_err(|e| tracerr::new!(PeerError::ReplaceTrackFailed(e)))?;
        entry.transceiver.set_direction(if self.is_p2p {
            TransceiverDirection::RECV
        } else {
            TransceiverDirection::all()
        });

        let source = track.source_name();
        self.requested_heights.borrow_mut().remove(source);
        self.pending_encodings.borrow_mut().remove(source);
        self.max_enabled_heights.borrow_mut().remove(source);
        Ok(())
    }

    /// Swaps the track of an attached sender in place, carrying the old
    /// track's constraints over to the new source.
    ///
    /// Returns whether the swap requires renegotiation: only
    /// peer-to-peer sessions do, the SFU path never renegotiates on
    /// replace.
    ///
    /// # Errors
    ///
    /// With [`PeerError::TrackNotAttached`] or
    /// [`PeerError::ReplaceTrackFailed`].
    pub async fn replace_track(
        &self,
        old: &local::Track,
        new: Rc<local::Track>,
    ) -> Result<bool> {
        self.ensure_open()?;
        let position = self
            .senders
            .borrow()
            .iter()
            .position(|e| e.track.id() == old.id())
            .ok_or_else(|| {
                tracerr::new!(PeerError::TrackNotAttached(old.id()))
            })?;
        let transceiver =
            Rc::clone(&self.senders.borrow()[position].transceiver);

        let sender = transceiver.sender();
        sender
            .replace_track(Some(new.native()))
            .await
            .map_err(|e| tracerr::new!(PeerError::ReplaceTrackFailed(e)))?;
        if self.options.enable_insertable_streams {
            if self.options.rewire_insertable_streams_on_replace {
                sender.rewire_encoded_streams();
            } else {
                log::debug!(
                    "Insertable streams processor left untouched across \
                     replaceTrack",
                );
            }
        }

        let height =
            self.requested_heights.borrow_mut().remove(old.source_name());
        self.pending_encodings.borrow_mut().remove(old.source_name());
        self.max_enabled_heights.borrow_mut().remove(old.source_name());
        self.senders.borrow_mut()[position].track = Rc::clone(&new);

        if new.kind() == MediaKind::Video {
            if let Some(height) = height {
                self.set_sender_video_constraints(
                    &new.source_name().clone(),
                    height,
                )
                .await?;
            }
        }
        Ok(self.is_p2p)
    }

    /// Applies the encoder policy of a local video source for the
    /// provided receiver height preference.
    ///
    /// Updates against muted sources are stored and applied on unmute.
    /// Consecutive calls are serialized: no two native `setParameters`
    /// ever overlap on one connection.
    ///
    /// # Errors
    ///
    /// With [`PeerError::UnknownSource`] if no video sender carries the
    /// source, or [`PeerError::SenderParametersRejected`].
    pub async fn set_sender_video_constraints(
        &self,
        source_name: &SourceName,
        max_height: u32,
    ) -> Result<()> {
        self.ensure_open()?;
        let (track, transceiver) = self
            .video_sender(source_name)
            .ok_or_else(|| {
                tracerr::new!(PeerError::UnknownSource(source_name.clone()))
            })?;

        self.requested_heights
            .borrow_mut()
            .insert(source_name.clone(), max_height);
        let captured_height =
            track.captured_resolution().map_or(720, |(_, h)| h);
        let plan = compute_encodings(
            &self.encoder_request(&track, captured_height, max_height),
            &self.options.video_quality,
        );

        if track.is_muted() {
            self.pending_encodings
                .borrow_mut()
                .insert(source_name.clone(), plan);
            return Ok(());
        }
        self.apply_encodings(&transceiver, source_name, plan, captured_height)
            .await
    }

    /// Applies the encoder plan stored for a source while it was muted.
    ///
    /// # Errors
    ///
    /// With [`PeerError::SenderParametersRejected`] if the native sender
    /// refuses the stored plan.
    pub async fn on_source_unmuted(
        &self,
        source_name: &SourceName,
    ) -> Result<()> {
        self.ensure_open()?;
        let pending =
            self.pending_encodings.borrow_mut().remove(source_name);
        let plan = match pending {
            Some(plan) => plan,
            None => return Ok(()),
        };
        let (track, transceiver) = match self.video_sender(source_name) {
            Some(found) => found,
            None => return Ok(()),
        };
        let captured_height =
            track.captured_resolution().map_or(720, |(_, h)| h);
        self.apply_encodings(&transceiver, source_name, plan, captured_height)
            .await
    }

    /// Toggles whether send-direction video is transmitted, without
    /// renegotiation.
    ///
    /// # Errors
    ///
    /// With [`PeerError::SenderParametersRejected`] when the
    /// encoding-flags strategy hits a native rejection.
    pub async fn set_video_transfer_active(&self, active: bool) -> Result<()> {
        self.set_transfer_active(MediaKind::Video, active).await
    }

    /// Toggles whether send-direction audio is transmitted, without
    /// renegotiation.
    ///
    /// # Errors
    ///
    /// With [`PeerError::SenderParametersRejected`] when the
    /// encoding-flags strategy hits a native rejection.
    pub async fn set_audio_transfer_active(&self, active: bool) -> Result<()> {
        self.audio_transfer_active.set(active);
        self.set_transfer_active(MediaKind::Audio, active).await
    }

    /// Polls the native stats and normalizes them into a
    /// [`StatsSnapshot`], diffing counters against the previous poll.
    ///
    /// # Errors
    ///
    /// With [`PeerError::GetStatsFailed`] if the native call fails.
    pub async fn get_stats(&self) -> Result<StatsSnapshot> {
        self.ensure_open()?;
        let report = self
            .peer
            .get_stats()
            .await
            .map_err(|e| tracerr::new!(PeerError::GetStatsFailed(e)))?;
        let (snapshot, baseline) = stats::normalize(
            &report,
            self.stats_baseline.borrow().as_ref(),
            stats::now_ms(),
        );
        *self.stats_baseline.borrow_mut() = Some(baseline);
        Ok(snapshot)
    }

    /// Closes this connection: every registered remote track is removed
    /// (emitting [`PeerEvent::RemoteTrackRemoved`]), native callbacks are
    /// unbound and the native connection is closed.
    ///
    /// Subsequent events of the native stack are suppressed. Idempotent.
    pub fn close(&self) {
        if self.closed.get() {
            return;
        }
        let removed: Vec<Rc<remote::Track>> = {
            let mut tracks = self.remote_tracks.borrow_mut();
            tracks.drain().map(|(_, track)| track).collect()
        };
        for track in removed {
            self.emit(PeerEvent::RemoteTrackRemoved {
                peer_id: self.id,
                track,
            });
        }
        self.closed.set(true);

        if let Some(collector) = self.stats_collector.borrow().as_ref() {
            collector.stop();
        }
        self.peer.on_track(None);
        self.peer.on_remove_track(None);
        self.peer.on_ice_candidate(None);
        self.peer.on_ice_connection_state_change(None);
        self.peer.on_connection_state_change(None);
        self.peer.close();
    }

    /// Returns all remote tracks currently registered on this
    /// connection.
    #[must_use]
    pub fn remote_tracks(&self) -> Vec<Rc<remote::Track>> {
        self.remote_tracks.borrow().values().cloned().collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            Err(tracerr::new!(PeerError::TransportClosed))
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PeerEvent) {
        if self.closed.get() {
            return;
        }
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    /// Runs the local munging pipeline: quality/codec munging, simulcast
    /// SSRC expansion, RTX pairing, and the local SSRC cache update.
    fn munge_local(&self, desc: &SessionDescription) -> SessionDescription {
        let mut munged =
            munge::munge_local_description(desc, &self.munge_options());
        if self.simulcast_ssrcs_enabled() {
            munged = self.simulcast_injector.inject(&munged);
        }
        if !self.options.disable_rtx {
            munged = self.rtx_modifier.modify_rtx_ssrcs(&munged);
        }
        munged = munge::order_ssrc_groups(&munged);

        let updates = self
            .local_ssrcs
            .borrow_mut()
            .update(extract_source_ssrcs(&munged));
        for update in updates {
            self.emit(PeerEvent::LocalTrackSsrcUpdated {
                peer_id: self.id,
                kind: update.kind,
                source_index: update.source_index,
                previous: update.previous,
                current: update.current,
            });
        }
        munged
    }

    fn munge_options(&self) -> MungeOptions {
        let settings = &self.options.codec_settings;
        let (preference, disabled) =
            if settings.media_type == MediaKind::Video {
                (
                    settings.codec_list.clone(),
                    settings.disabled_codecs.clone(),
                )
            } else {
                (vec![Codec::Vp8, Codec::Vp9, Codec::H264], Vec::new())
            };
        MungeOptions {
            is_p2p: self.is_p2p,
            audio_quality: self.options.audio_quality,
            video_codec_preference: preference,
            disabled_codecs: disabled,
            opus_dtx_supported: self.peer.honors_opus_dtx(),
            scalability_mode_enabled: self.peer.supports_scalability_mode(),
            svc_bandwidth_kbps: self.svc_bandwidth_kbps(),
            simulcast_recv_sections: None,
        }
    }

    /// Simulcast towards the SFU uses multiple SSRCs only for VP8 (and
    /// H.264 when scalability-mode selection is available); SVC codecs
    /// stay single-SSRC.
    fn simulcast_ssrcs_enabled(&self) -> bool {
        if self.options.disable_simulcast || self.is_p2p {
            return false;
        }
        match self.preferred_video_codec() {
            Some(Codec::Vp8) => true,
            Some(Codec::H264) => self.peer.supports_scalability_mode(),
            _ => false,
        }
    }

    fn preferred_video_codec(&self) -> Option<Codec> {
        let settings = &self.options.codec_settings;
        if settings.media_type == MediaKind::Video {
            settings.preferred()
        } else {
            Some(Codec::Vp8)
        }
    }

    fn svc_bandwidth_kbps(&self) -> Option<u32> {
        if self.options.disable_simulcast
            || self.preferred_video_codec() != Some(Codec::Vp9)
        {
            return None;
        }
        let height = self
            .senders
            .borrow()
            .iter()
            .find(|e| e.track.kind() == MediaKind::Video)
            .and_then(|e| e.track.captured_resolution())
            .map(|(_, h)| h)?;
        let bitrate = self
            .options
            .video_quality
            .table(Codec::Vp9)
            .for_height(height);
        Some((bitrate / 1000) as u32)
    }

    fn local_source_counts(&self) -> SourceCounts {
        let senders = self.senders.borrow();
        SourceCounts {
            audio: senders
                .iter()
                .filter(|e| e.track.kind() == MediaKind::Audio)
                .count(),
            video: senders
                .iter()
                .filter(|e| e.track.kind() == MediaKind::Video)
                .count(),
        }
    }

    fn encoder_request(
        &self,
        track: &local::Track,
        captured_height: u32,
        max_height: u32,
    ) -> EncoderRequest {
        EncoderRequest {
            codec: self.preferred_video_codec().unwrap_or(Codec::Vp8),
            video_type: track.video_type(),
            captured_height,
            max_height,
            simulcast: !self.options.disable_simulcast && !self.is_p2p,
            cap_screenshare_bitrate: self.options.cap_screenshare_bitrate,
            supports_scalability_mode: self.peer.supports_scalability_mode(),
        }
    }

    fn video_sender(
        &self,
        source_name: &SourceName,
    ) -> Option<(Rc<local::Track>, Rc<dyn platform::Transceiver>)> {
        self.senders
            .borrow()
            .iter()
            .find(|e| {
                e.track.kind() == MediaKind::Video
                    && e.track.source_name() == source_name
            })
            .map(|e| (Rc::clone(&e.track), Rc::clone(&e.transceiver)))
    }

    fn find_free_transceiver(
        &self,
        kind: MediaKind,
    ) -> Option<Rc<dyn platform::Transceiver>> {
        let senders = self.senders.borrow();
        self.peer.transceivers().into_iter().find(|t| {
            t.kind() == kind
                && !senders
                    .iter()
                    .any(|e| Rc::ptr_eq(&e.transceiver, t))
        })
    }

    async fn apply_encodings(
        &self,
        transceiver: &Rc<dyn platform::Transceiver>,
        source_name: &SourceName,
        plan: EncodingsPlan,
        captured_height: u32,
    ) -> Result<()> {
        let sender = transceiver.sender();
        let merged_plan = plan.clone();
        let result = self
            .update_queue
            .schedule(async move {
                let mut params = sender.get_parameters();
                merge_encodings(&mut params, &merged_plan);
                sender.set_parameters(params).await
            })
            .await;
        result.map_err(|e| {
            tracerr::new!(PeerError::SenderParametersRejected(e))
        })?;

        let height = plan.max_enabled_height(captured_height).unwrap_or(0);
        let previous = self
            .max_enabled_heights
            .borrow_mut()
            .insert(source_name.clone(), height);
        if previous != Some(height) {
            self.emit(PeerEvent::MaxEnabledResolutionChanged {
                peer_id: self.id,
                source_name: source_name.clone(),
                height,
            });
        }
        Ok(())
    }

    async fn set_transfer_active(
        &self,
        kind: MediaKind,
        active: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let strategy = self.pause_strategy.get().unwrap_or_else(|| {
            let probed = if self.peer.supports_per_encoding_activation() {
                PauseStrategy::EncodingFlags
            } else {
                PauseStrategy::Direction
            };
            self.pause_strategy.set(Some(probed));
            probed
        });

        let targets: Vec<(Rc<local::Track>, Rc<dyn platform::Transceiver>)> =
            self.senders
                .borrow()
                .iter()
                .filter(|e| e.track.kind() == kind)
                .map(|e| (Rc::clone(&e.track), Rc::clone(&e.transceiver)))
                .collect();

        match strategy {
            PauseStrategy::EncodingFlags => {
                for (_, transceiver) in &targets {
                    let sender = transceiver.sender();
                    let result = self
                        .update_queue
                        .schedule(async move {
                            let mut params = sender.get_parameters();
                            for encoding in &mut params.encodings {
                                encoding.active = active;
                            }
                            sender.set_parameters(params).await
                        })
                        .await;
                    result.map_err(|e| {
                        tracerr::new!(PeerError::SenderParametersRejected(e))
                    })?;
                }
                // Reactivated video restores its per-layer plan.
                if active && kind == MediaKind::Video {
                    for (track, _) in &targets {
                        let source = track.source_name().clone();
                        let height = self
                            .requested_heights
                            .borrow()
                            .get(&source)
                            .copied();
                        if let Some(height) = height {
                            self.set_sender_video_constraints(
                                &source, height,
                            )
                            .await?;
                        }
                    }
                }
            }
            PauseStrategy::Direction => {
                for (_, transceiver) in &targets {
                    let direction = transceiver.direction();
                    transceiver.set_direction(if active {
                        direction | TransceiverDirection::SEND
                    } else {
                        direction - TransceiverDirection::SEND
                    });
                }
            }
        }
        Ok(())
    }

    fn bind_native_callbacks(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        self.peer.on_track(Some(Box::new(move |event| {
            if let Some(this) = weak.upgrade() {
                this.handle_remote_track(&event);
            }
        })));

        let weak = Rc::downgrade(self);
        self.peer
            .on_remove_track(Some(Box::new(move |stream_id, track_id| {
                if let Some(this) = weak.upgrade() {
                    this.handle_remove_track(&stream_id, &track_id);
                }
            })));

        let weak = Rc::downgrade(self);
        self.peer.on_ice_candidate(Some(Box::new(move |candidate| {
            if let Some(this) = weak.upgrade() {
                let peer_id = this.id;
                this.emit(PeerEvent::IceCandidateDiscovered {
                    peer_id,
                    candidate,
                });
            }
        })));

        let weak = Rc::downgrade(self);
        self.peer
            .on_ice_connection_state_change(Some(Box::new(move |state| {
                if let Some(this) = weak.upgrade() {
                    let peer_id = this.id;
                    this.emit(PeerEvent::IceConnectionStateChanged {
                        peer_id,
                        state,
                    });
                }
            })));

        let weak = Rc::downgrade(self);
        self.peer
            .on_connection_state_change(Some(Box::new(move |state| {
                if let Some(this) = weak.upgrade() {
                    let peer_id = this.id;
                    this.emit(PeerEvent::ConnectionStateChanged {
                        peer_id,
                        state,
                    });
                }
            })));
    }

    fn spawn_signaling_watchers(this: &Rc<Self>) {
        let mut on_source_muted = this.signaling.on_source_muted_changed();
        let weak = Rc::downgrade(this);
        platform::spawn(async move {
            while let Some((source, muted)) = on_source_muted.next().await {
                match weak.upgrade() {
                    Some(this) => {
                        if let Some(track) =
                            this.remote_track_by_source(&source)
                        {
                            track.set_muted(muted);
                        }
                    }
                    None => break,
                }
            }
        });

        let mut on_source_video_type =
            this.signaling.on_source_video_type_changed();
        let weak = Rc::downgrade(this);
        platform::spawn(async move {
            while let Some((source, video_type)) =
                on_source_video_type.next().await
            {
                match weak.upgrade() {
                    Some(this) => {
                        if let Some(track) =
                            this.remote_track_by_source(&source)
                        {
                            track.set_video_type(video_type);
                        }
                    }
                    None => break,
                }
            }
        });

        let mut on_peer_muted = this.signaling.on_peer_muted_changed();
        let weak = Rc::downgrade(this);
        platform::spawn(async move {
            while let Some((endpoint, kind, muted)) =
                on_peer_muted.next().await
            {
                match weak.upgrade() {
                    Some(this) => {
                        let track = this
                            .remote_tracks
                            .borrow()
                            .get(&(endpoint, kind))
                            .cloned();
                        if let Some(track) = track {
                            track.set_muted(muted);
                        }
                    }
                    None => break,
                }
            }
        });

        let mut on_peer_video_type =
            this.signaling.on_peer_video_type_changed();
        let weak = Rc::downgrade(this);
        platform::spawn(async move {
            while let Some((endpoint, video_type)) =
                on_peer_video_type.next().await
            {
                match weak.upgrade() {
                    Some(this) => {
                        let track = this
                            .remote_tracks
                            .borrow()
                            .get(&(endpoint, MediaKind::Video))
                            .cloned();
                        if let Some(track) = track {
                            track.set_video_type(video_type);
                        }
                    }
                    None => break,
                }
            }
        });
    }

    fn remote_track_by_source(
        &self,
        source: &SourceName,
    ) -> Option<Rc<remote::Track>> {
        self.remote_tracks
            .borrow()
            .values()
            .find(|t| t.source_name() == Some(source))
            .cloned()
    }

    /// Binds a native `track` event to its owner and registers the
    /// resulting remote track.
    fn handle_remote_track(&self, event: &platform::TrackEvent) {
        if self.closed.get() {
            return;
        }
        // Conference-wide mixed streams only terminate RTCP on the SFU
        // path; never surface them.
        if event
            .stream_ids
            .iter()
            .any(|id| id == MIXED_STREAM_ID)
        {
            return;
        }

        let remote_desc = self.remote_description.borrow();
        let section = remote_desc.as_ref().and_then(|desc| {
            match event.transceiver.mid() {
                Some(mid) => desc
                    .media
                    .iter()
                    .find(|m| m.mid.as_deref() == Some(mid.as_str())),
                None => desc.media.iter().find(|m| {
                    event.stream_ids.iter().any(|stream| {
                        m.msid.as_deref().map_or(false, |msid| {
                            msid.split(' ').next() == Some(stream)
                        }) || m.ssrc_lines.iter().any(|l| {
                            l.attribute == "msid"
                                && l.value.as_deref().map_or(
                                    false,
                                    |v| {
                                        v.split(' ').next()
                                            == Some(stream.as_str())
                                    },
                                )
                        })
                    })
                }),
            }
        });
        let ssrc = match section {
            Some(section) => {
                let primaries = section.primary_ssrcs();
                let by_msid = primaries.iter().copied().find(|ssrc| {
                    section.msid_of_ssrc(*ssrc).map_or(false, |msid| {
                        event
                            .stream_ids
                            .iter()
                            .any(|s| msid.split(' ').next() == Some(s))
                    })
                });
                match by_msid.or_else(|| primaries.first().copied()) {
                    Some(ssrc) => ssrc,
                    None => {
                        log::warn!(
                            "Remote track without SSRCs in its m-line, \
                             dropping",
                        );
                        return;
                    }
                }
            }
            None => {
                log::warn!(
                    "No m-line found for a remote track, dropping",
                );
                return;
            }
        };
        drop(remote_desc);

        let owner = match self.signaling.ssrc_owner(ssrc) {
            Some(owner) => owner,
            None => {
                log::warn!("No owner known for SSRC {}, dropping", ssrc);
                return;
            }
        };
        let source_name = self.signaling.track_source_name(ssrc);
        let kind = event.track.kind();
        let info = self
            .signaling
            .peer_media_info(&owner, kind, source_name.as_ref())
            .unwrap_or_default();
        let PeerMediaInfo { muted, video_type } = info;

        let key = (owner.clone(), kind);
        if let Some(existing) = self.remote_tracks.borrow().get(&key) {
            if existing.native_id() == event.track.id() {
                return;
            }
        }
        let track = remote::Track::new(
            owner,
            source_name,
            ssrc,
            muted,
            video_type,
            Rc::clone(&event.track),
        );
        self.remote_tracks
            .borrow_mut()
            .insert(key, Rc::clone(&track));
        self.emit(PeerEvent::RemoteTrackAdded {
            peer_id: self.id,
            track,
        });
    }

    fn handle_remove_track(&self, _stream_id: &str, track_id: &str) {
        if self.closed.get() {
            return;
        }
        let key = self
            .remote_tracks
            .borrow()
            .iter()
            .find(|(_, t)| t.native_id() == track_id)
            .map(|(k, _)| k.clone());
        if let Some(key) = key {
            if let Some(track) = self.remote_tracks.borrow_mut().remove(&key)
            {
                self.emit(PeerEvent::RemoteTrackRemoved {
                    peer_id: self.id,
                    track,
                });
            }
        }
    }
}

/// Merges a computed [`EncodingsPlan`] into native sender parameters,
/// keeping whatever fields the plan does not own.
fn merge_encodings(params: &mut SendParameters, plan: &EncodingsPlan) {
    for (i, wanted) in plan.encodings.iter().enumerate() {
        match params.encodings.get_mut(i) {
            Some(existing) => {
                existing.active = wanted.active;
                existing.max_bitrate = wanted.max_bitrate;
                existing.scale_resolution_down_by =
                    wanted.scale_resolution_down_by;
                existing.scalability_mode = wanted.scalability_mode.clone();
            }
            None => params.encodings.push(wanted.clone()),
        }
    }
    for extra in params.encodings.iter_mut().skip(plan.encodings.len()) {
        extra.active = false;
    }
    params.degradation_preference = Some(plan.degradation_preference);
}

#[cfg(test)]
mod tests;
