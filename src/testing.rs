//! Hand-rolled fakes of the platform and signalling seams, shared by the
//! unit tests of this crate.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::Future,
    rc::Rc,
    time::Duration,
};

use async_trait::async_trait;
use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};
use tracerr::Traced;

use crate::{
    media::{
        track::local, EndpointId, MediaKind, SourceName, TrackId, VideoType,
    },
    platform::{
        self, BridgeTransport, CloseFrame, IceCandidate, IceConnectionState,
        MediaStreamTrack, PeerConnectionState, RtcPeerConnection, RtcStat,
        RtpSender, SdpType, SendParameters, SignalingState, Transceiver,
        TransceiverDirection, TransportError, TransportState,
    },
    signaling::{PeerMediaInfo, SignalingLayer},
};

/// Runs the provided future on a fresh current-thread runtime with paused
/// time, inside a `LocalSet` so that `platform::spawn()` works.
pub fn run<F: Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();
    tokio::task::LocalSet::new().block_on(&rt, fut)
}

/// Drains everything currently buffered in a boxed local stream.
pub fn drain_stream<T>(stream: &mut LocalBoxStream<'static, T>) -> Vec<T> {
    use futures::FutureExt as _;

    let mut out = Vec::new();
    while let Some(Some(item)) = stream.next().now_or_never() {
        out.push(item);
    }
    out
}

/// Native media track stub.
pub struct FakeTrack {
    /// Reported track ID.
    pub id: String,

    /// Reported media kind.
    pub kind: MediaKind,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_owned(),
            kind,
        })
    }
}

impl MediaStreamTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

/// Builds a local video track over a [`FakeTrack`].
pub fn local_video_track(id: u64, source: &str) -> Rc<local::Track> {
    let track = local::Track::new(
        TrackId(id),
        SourceName::from(source),
        VideoType::Camera,
        FakeTrack::new(&format!("native-{}", id), MediaKind::Video),
    );
    track.set_captured_resolution(1280, 720);
    track
}

/// Builds a local audio track over a [`FakeTrack`].
pub fn local_audio_track(id: u64, source: &str) -> Rc<local::Track> {
    local::Track::new(
        TrackId(id),
        SourceName::from(source),
        VideoType::None,
        FakeTrack::new(&format!("native-{}", id), MediaKind::Audio),
    )
}

/// Recording [`RtpSender`] stub that panics on overlapping
/// `setParameters` calls.
#[derive(Default)]
pub struct FakeSender {
    /// Current parameters.
    pub params: RefCell<SendParameters>,

    /// Currently attached native track.
    pub track: RefCell<Option<Rc<dyn MediaStreamTrack>>>,

    /// Number of completed `set_parameters` calls.
    pub set_parameters_calls: Cell<usize>,

    /// Guard flagging an in-flight `set_parameters`.
    in_flight: Cell<bool>,

    /// Makes the next `set_parameters` fail.
    pub fail_next: Cell<bool>,
}

#[async_trait(?Send)]
impl RtpSender for FakeSender {
    async fn replace_track(
        &self,
        with: Option<Rc<dyn MediaStreamTrack>>,
    ) -> Result<(), platform::Error> {
        *self.track.borrow_mut() = with;
        Ok(())
    }

    fn get_parameters(&self) -> SendParameters {
        self.params.borrow().clone()
    }

    async fn set_parameters(
        &self,
        params: SendParameters,
    ) -> Result<(), platform::Error> {
        assert!(
            !self.in_flight.replace(true),
            "concurrent setParameters on one sender",
        );
        platform::delay_for(Duration::from_millis(10)).await;
        self.in_flight.set(false);
        if self.fail_next.take() {
            return Err(platform::Error::from("parameters rejected"));
        }
        *self.params.borrow_mut() = params;
        self.set_parameters_calls
            .set(self.set_parameters_calls.get() + 1);
        Ok(())
    }
}

/// [`Transceiver`] stub.
pub struct FakeTransceiver {
    /// Media kind of the transceiver.
    pub kind: MediaKind,

    /// Negotiated mid, when assigned.
    pub mid: RefCell<Option<String>>,

    /// Current direction.
    pub direction: Cell<TransceiverDirection>,

    /// Sender half.
    pub sender: Rc<FakeSender>,
}

impl FakeTransceiver {
    pub fn new(kind: MediaKind, mid: Option<&str>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            mid: RefCell::new(mid.map(ToOwned::to_owned)),
            direction: Cell::new(TransceiverDirection::all()),
            sender: Rc::new(FakeSender::default()),
        })
    }
}

impl Transceiver for FakeTransceiver {
    fn mid(&self) -> Option<String> {
        self.mid.borrow().clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn direction(&self) -> TransceiverDirection {
        self.direction.get()
    }

    fn set_direction(&self, direction: TransceiverDirection) {
        self.direction.set(direction);
    }

    fn sender(&self) -> Rc<dyn RtpSender> {
        Rc::clone(&self.sender) as Rc<dyn RtpSender>
    }
}

type TrackCallback = Box<dyn FnMut(platform::TrackEvent)>;
type RemoveTrackCallback = Box<dyn FnMut(String, String)>;

/// Scriptable [`RtcPeerConnection`] stub.
pub struct FakePeer {
    /// SDP returned by `create_offer`.
    pub offer_sdp: RefCell<String>,

    /// SDP returned by `create_answer`.
    pub answer_sdp: RefCell<String>,

    /// Transceivers created so far.
    pub transceivers: RefCell<Vec<Rc<FakeTransceiver>>>,

    /// Last local description applied.
    pub local_desc: RefCell<Option<SdpType>>,

    /// Last remote description applied.
    pub remote_desc: RefCell<Option<SdpType>>,

    /// Remote candidates added.
    pub candidates: RefCell<Vec<IceCandidate>>,

    /// Report returned by `get_stats`.
    pub stats: RefCell<Vec<RtcStat>>,

    /// Whether per-encoding activation is supported.
    pub per_encoding_activation: Cell<bool>,

    /// Whether scalability-mode selection is supported.
    pub scalability_mode: Cell<bool>,

    /// Registered `track` callback.
    on_track_cb: RefCell<Option<TrackCallback>>,

    /// Registered remove-track callback.
    on_remove_track_cb: RefCell<Option<RemoveTrackCallback>>,

    /// Whether `close` was called.
    pub closed: Cell<bool>,
}

impl Default for FakePeer {
    fn default() -> Self {
        Self {
            offer_sdp: RefCell::new(String::new()),
            answer_sdp: RefCell::new(String::new()),
            transceivers: RefCell::new(Vec::new()),
            local_desc: RefCell::new(None),
            remote_desc: RefCell::new(None),
            candidates: RefCell::new(Vec::new()),
            stats: RefCell::new(Vec::new()),
            per_encoding_activation: Cell::new(true),
            scalability_mode: Cell::new(false),
            on_track_cb: RefCell::new(None),
            on_remove_track_cb: RefCell::new(None),
            closed: Cell::new(false),
        }
    }
}

impl FakePeer {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Fires the registered native `track` callback.
    pub fn fire_track(&self, event: platform::TrackEvent) {
        if let Some(cb) = self.on_track_cb.borrow_mut().as_mut() {
            cb(event);
        }
    }

    /// Fires the registered remove-track callback.
    pub fn fire_remove_track(&self, stream_id: &str, track_id: &str) {
        if let Some(cb) = self.on_remove_track_cb.borrow_mut().as_mut() {
            cb(stream_id.to_owned(), track_id.to_owned());
        }
    }
}

#[async_trait(?Send)]
impl RtcPeerConnection for FakePeer {
    async fn create_offer(
        &self,
        _ice_restart: bool,
    ) -> Result<String, platform::Error> {
        Ok(self.offer_sdp.borrow().clone())
    }

    async fn create_answer(&self) -> Result<String, platform::Error> {
        Ok(self.answer_sdp.borrow().clone())
    }

    async fn set_local_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), platform::Error> {
        *self.local_desc.borrow_mut() = Some(sdp);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), platform::Error> {
        *self.remote_desc.borrow_mut() = Some(sdp);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> Result<(), platform::Error> {
        self.candidates.borrow_mut().push(candidate.clone());
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        SignalingState::Stable
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        IceConnectionState::New
    }

    fn connection_state(&self) -> Option<PeerConnectionState> {
        Some(PeerConnectionState::New)
    }

    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver> {
        let transceiver = FakeTransceiver::new(kind, None);
        transceiver.direction.set(direction);
        self.transceivers.borrow_mut().push(Rc::clone(&transceiver));
        transceiver
    }

    fn transceivers(&self) -> Vec<Rc<dyn Transceiver>> {
        self.transceivers
            .borrow()
            .iter()
            .map(|t| Rc::clone(t) as Rc<dyn Transceiver>)
            .collect()
    }

    fn transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>> {
        self.transceivers
            .borrow()
            .iter()
            .find(|t| t.mid.borrow().as_deref() == Some(mid))
            .map(|t| Rc::clone(t) as Rc<dyn Transceiver>)
    }

    async fn get_stats(&self) -> Result<Vec<RtcStat>, platform::Error> {
        Ok(self.stats.borrow().clone())
    }

    fn supports_per_encoding_activation(&self) -> bool {
        self.per_encoding_activation.get()
    }

    fn supports_scalability_mode(&self) -> bool {
        self.scalability_mode.get()
    }

    fn honors_opus_dtx(&self) -> bool {
        true
    }

    fn on_track(&self, f: Option<Box<dyn FnMut(platform::TrackEvent)>>) {
        *self.on_track_cb.borrow_mut() = f;
    }

    fn on_remove_track(&self, f: Option<Box<dyn FnMut(String, String)>>) {
        *self.on_remove_track_cb.borrow_mut() = f;
    }

    fn on_ice_candidate(&self, _f: Option<Box<dyn FnMut(IceCandidate)>>) {}

    fn on_ice_connection_state_change(
        &self,
        _f: Option<Box<dyn FnMut(IceConnectionState)>>,
    ) {
    }

    fn on_connection_state_change(
        &self,
        _f: Option<Box<dyn FnMut(PeerConnectionState)>>,
    ) {
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

/// Table-driven [`SignalingLayer`] stub.
#[derive(Default)]
pub struct FakeSignaling {
    /// `ssrc -> owner` table.
    pub owners: RefCell<HashMap<u32, EndpointId>>,

    /// `ssrc -> source name` table.
    pub sources: RefCell<HashMap<u32, SourceName>>,

    /// Per-source media info; absent entries fall back to the default.
    pub infos: RefCell<HashMap<SourceName, PeerMediaInfo>>,

    /// Subscribers of source mute changes.
    source_muted_txs: RefCell<Vec<mpsc::UnboundedSender<(SourceName, bool)>>>,
}

impl FakeSignaling {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Registers an owned SSRC with its source name.
    pub fn add_source(&self, ssrc: u32, owner: &str, source: &str) {
        self.owners
            .borrow_mut()
            .insert(ssrc, EndpointId::from(owner));
        self.sources
            .borrow_mut()
            .insert(ssrc, SourceName::from(source));
    }

    /// Pushes a source mute change to every subscriber.
    pub fn push_source_muted(&self, source: &str, muted: bool) {
        self.source_muted_txs.borrow_mut().retain(|tx| {
            tx.unbounded_send((SourceName::from(source), muted)).is_ok()
        });
    }
}

impl SignalingLayer for FakeSignaling {
    fn ssrc_owner(&self, ssrc: u32) -> Option<EndpointId> {
        self.owners.borrow().get(&ssrc).cloned()
    }

    fn track_source_name(&self, ssrc: u32) -> Option<SourceName> {
        self.sources.borrow().get(&ssrc).cloned()
    }

    fn peer_media_info(
        &self,
        _endpoint: &EndpointId,
        _kind: MediaKind,
        source_name: Option<&SourceName>,
    ) -> Option<PeerMediaInfo> {
        source_name
            .and_then(|name| self.infos.borrow().get(name).copied())
    }

    fn on_peer_muted_changed(
        &self,
    ) -> LocalBoxStream<'static, (EndpointId, MediaKind, bool)> {
        Box::pin(futures::stream::pending())
    }

    fn on_peer_video_type_changed(
        &self,
    ) -> LocalBoxStream<'static, (EndpointId, VideoType)> {
        Box::pin(futures::stream::pending())
    }

    fn on_source_muted_changed(
        &self,
    ) -> LocalBoxStream<'static, (SourceName, bool)> {
        let (tx, rx) = mpsc::unbounded();
        self.source_muted_txs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn on_source_video_type_changed(
        &self,
    ) -> LocalBoxStream<'static, (SourceName, VideoType)> {
        Box::pin(futures::stream::pending())
    }
}

/// Scriptable [`BridgeTransport`] stub.
pub struct FakeTransport {
    /// Frames handed to `send`.
    pub sent: RefCell<Vec<String>>,

    /// Current transport state.
    pub state: RefCell<TransportState>,

    /// Message subscribers.
    msg_txs: RefCell<Vec<mpsc::UnboundedSender<String>>>,

    /// State subscribers.
    state_txs: RefCell<Vec<mpsc::UnboundedSender<TransportState>>>,

    /// Close frame passed to `close` by the client, when any.
    pub closed_by_client: RefCell<Option<CloseFrame>>,
}

impl FakeTransport {
    /// Creates a transport that reports itself open.
    pub fn open() -> Rc<Self> {
        Rc::new(Self {
            sent: RefCell::new(Vec::new()),
            state: RefCell::new(TransportState::Open),
            msg_txs: RefCell::new(Vec::new()),
            state_txs: RefCell::new(Vec::new()),
            closed_by_client: RefCell::new(None),
        })
    }

    /// Creates a transport that is still connecting.
    pub fn connecting() -> Rc<Self> {
        let transport = Self::open();
        *transport.state.borrow_mut() = TransportState::Connecting;
        transport
    }

    /// Simulates the underlying socket finishing its handshake.
    pub fn server_open(&self) {
        *self.state.borrow_mut() = TransportState::Open;
        self.state_txs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(TransportState::Open).is_ok());
    }

    /// Delivers an inbound frame to every subscriber.
    pub fn push_message(&self, frame: &str) {
        self.msg_txs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(frame.to_owned()).is_ok());
    }

    /// Simulates a server-side close.
    pub fn server_close(&self, code: u16, reason: &str) {
        let state = TransportState::Closed(CloseFrame {
            code,
            reason: reason.to_owned(),
        });
        *self.state.borrow_mut() = state.clone();
        self.state_txs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(state.clone()).is_ok());
    }
}

impl BridgeTransport for FakeTransport {
    fn send(&self, frame: &str) -> Result<(), Traced<TransportError>> {
        self.sent.borrow_mut().push(frame.to_owned());
        Ok(())
    }

    fn on_message(&self) -> LocalBoxStream<'static, String> {
        let (tx, rx) = mpsc::unbounded();
        self.msg_txs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        let (tx, rx) = mpsc::unbounded();
        self.state_txs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn state(&self) -> TransportState {
        self.state.borrow().clone()
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed_by_client.borrow_mut() = Some(CloseFrame {
            code,
            reason: reason.to_owned(),
        });
        *self.state.borrow_mut() = TransportState::Closed(CloseFrame {
            code,
            reason: reason.to_owned(),
        });
    }
}
